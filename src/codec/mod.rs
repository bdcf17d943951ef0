//! Block payload codecs.
//!
//! Four named codecs, identified on disk by a 16-byte null-padded ASCII
//! name in the file header — one codec is in force for the whole file,
//! not chosen per block, so the name is recorded once and never repeated.
//!
//! An unknown codec name is a `BadFormat` at open time; there is no
//! negotiation and no fallback.

use std::io::{Cursor, Read, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("compression error: {0}")]
    Compression(String),
    #[error("decompression error: {0}")]
    Decompression(String),
    #[error("unknown codec: {0}")]
    UnknownCodec(String),
}

/// Runtime codec discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecId {
    None,
    Deflate,
    Bz2,
    Lzma,
}

impl CodecId {
    /// The 16-byte null-padded ASCII name written into the file header.
    pub fn to_header_bytes(self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        let name = self.name().as_bytes();
        buf[..name.len()].copy_from_slice(name);
        buf
    }

    pub fn from_header_bytes(buf: &[u8; 16]) -> Result<Self, CodecError> {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        let name = std::str::from_utf8(&buf[..end])
            .map_err(|_| CodecError::UnknownCodec(hex::encode(buf)))?;
        Self::from_name(name).ok_or_else(|| CodecError::UnknownCodec(name.to_string()))
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "none" => Some(CodecId::None),
            "deflate" => Some(CodecId::Deflate),
            "bz2" => Some(CodecId::Bz2),
            "lzma" => Some(CodecId::Lzma),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CodecId::None => "none",
            CodecId::Deflate => "deflate",
            CodecId::Bz2 => "bz2",
            CodecId::Lzma => "lzma",
        }
    }
}

pub trait Codec: Send + Sync {
    fn codec_id(&self) -> CodecId;
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

// ── None ─────────────────────────────────────────────────────────────────

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn codec_id(&self) -> CodecId {
        CodecId::None
    }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }
}

// ── Deflate (RFC 1951, raw — no zlib/gzip framing) ──────────────────────────

pub struct DeflateCodec;
impl Codec for DeflateCodec {
    fn codec_id(&self) -> CodecId {
        CodecId::Deflate
    }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        use flate2::write::DeflateEncoder;
        use flate2::Compression;
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        enc.finish().map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        use flate2::read::DeflateDecoder;
        let mut out = Vec::new();
        DeflateDecoder::new(Cursor::new(data))
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

// ── bzip2 ───────────────────────────────────────────────────────────────────

pub struct Bz2Codec;
impl Codec for Bz2Codec {
    fn codec_id(&self) -> CodecId {
        CodecId::Bz2
    }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        use bzip2::write::BzEncoder;
        use bzip2::Compression;
        let mut enc = BzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        enc.finish().map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        use bzip2::read::BzDecoder;
        let mut out = Vec::new();
        BzDecoder::new(Cursor::new(data))
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

// ── LZMA ─────────────────────────────────────────────────────────────────

pub struct LzmaCodec;
impl Codec for LzmaCodec {
    fn codec_id(&self) -> CodecId {
        CodecId::Lzma
    }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lzma_rs::lzma_compress(&mut Cursor::new(data), &mut out)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        Ok(out)
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lzma_rs::lzma_decompress(&mut Cursor::new(data), &mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

// ── Factory ──────────────────────────────────────────────────────────────

pub fn get_codec(id: CodecId) -> Box<dyn Codec> {
    match id {
        CodecId::None => Box::new(NoneCodec),
        CodecId::Deflate => Box::new(DeflateCodec),
        CodecId::Bz2 => Box::new(Bz2Codec),
        CodecId::Lzma => Box::new(LzmaCodec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(id: CodecId) {
        let data = b"the quick brown fox jumps over the lazy dog, repeated. ".repeat(64);
        let codec = get_codec(id);
        let compressed = codec.compress(&data).unwrap();
        let decompressed = codec.decompress(&compressed).unwrap();
        assert_eq!(decompressed, data, "roundtrip mismatch for {:?}", id);
    }

    #[test]
    fn roundtrip_all_codecs() {
        for id in [CodecId::None, CodecId::Deflate, CodecId::Bz2, CodecId::Lzma] {
            roundtrip(id);
        }
    }

    #[test]
    fn header_bytes_roundtrip() {
        for id in [CodecId::None, CodecId::Deflate, CodecId::Bz2, CodecId::Lzma] {
            let bytes = id.to_header_bytes();
            assert_eq!(CodecId::from_header_bytes(&bytes).unwrap(), id);
        }
    }

    #[test]
    fn unknown_codec_rejected() {
        let mut buf = [0u8; 16];
        buf[..4].copy_from_slice(b"zzzz");
        assert!(CodecId::from_header_bytes(&buf).is_err());
    }
}
