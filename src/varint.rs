//! uleb128 and fixed-width little-endian integer framing.
//!
//! Every multi-byte integer on disk is little-endian; every variable-length
//! integer is canonical uleb128 — readers reject any encoding that is not
//! the shortest possible one for the decoded value.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::{Error, Result};

/// Write `value` as canonical uleb128: little-endian base-128, continuation
/// bit set on every byte but the last.
pub fn write_uleb128<W: Write>(mut w: W, mut value: u64) -> Result<()> {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
            w.write_all(&[byte])?;
        } else {
            w.write_all(&[byte])?;
            break;
        }
    }
    Ok(())
}

/// Return the number of bytes `write_uleb128` would emit for `value`.
pub fn uleb128_len(value: u64) -> usize {
    let mut v = value;
    let mut n = 1;
    while v >= 0x80 {
        v >>= 7;
        n += 1;
    }
    n
}

/// Read a canonical uleb128 value.
///
/// Rejects truncated input, values wider than 64 bits, and non-canonical
/// encodings (a value that could have been expressed in fewer bytes).
pub fn read_uleb128<R: Read>(mut r: R) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    let mut nbytes: u32 = 0;

    loop {
        let mut byte = [0u8; 1];
        r.read_exact(&mut byte).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::BadFormat("truncated uleb128".into())
            } else {
                Error::Io(e)
            }
        })?;
        let byte = byte[0];
        nbytes += 1;

        if shift >= 64 {
            return Err(Error::BadFormat("uleb128 wider than 64 bits".into()));
        }

        let low_bits = (byte & 0x7f) as u64;
        value |= low_bits.checked_shl(shift).unwrap_or(0);
        shift += 7;

        if byte & 0x80 == 0 {
            break;
        }
        if shift > 64 {
            return Err(Error::BadFormat("uleb128 wider than 64 bits".into()));
        }
    }

    // Canonical check: re-encoding `value` must take exactly `nbytes` bytes.
    if uleb128_len(value) as u32 != nbytes {
        return Err(Error::BadFormat("non-canonical uleb128 encoding".into()));
    }

    Ok(value)
}

pub fn read_u64le<R: Read>(mut r: R) -> Result<u64> {
    Ok(r.read_u64::<LittleEndian>()?)
}

pub fn write_u64le<W: Write>(mut w: W, value: u64) -> Result<()> {
    w.write_u64::<LittleEndian>(value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: u64) {
        let mut buf = Vec::new();
        write_uleb128(&mut buf, v).unwrap();
        assert_eq!(buf.len(), uleb128_len(v));
        let got = read_uleb128(&mut &buf[..]).unwrap();
        assert_eq!(got, v, "roundtrip failed for {v}");
    }

    #[test]
    fn uleb128_roundtrip_values() {
        for v in [0u64, 1, 0x7F, 0x80, 0x107F, 1u64 << 33, u64::MAX] {
            roundtrip(v);
        }
    }

    #[test]
    fn uleb128_rejects_non_canonical() {
        // 0x80 0x00 decodes to 0 but canonical encoding of 0 is a single 0x00.
        let buf = [0x80u8, 0x00];
        let err = read_uleb128(&mut &buf[..]).unwrap_err();
        assert!(matches!(err, Error::BadFormat(_)));
    }

    #[test]
    fn uleb128_rejects_truncation() {
        let buf = [0x80u8];
        let err = read_uleb128(&mut &buf[..]).unwrap_err();
        assert!(matches!(err, Error::BadFormat(_)));
    }

    #[test]
    fn u64le_roundtrip() {
        let mut buf = Vec::new();
        write_u64le(&mut buf, 0x0123_4567_89ab_cdef).unwrap();
        assert_eq!(buf, 0x0123_4567_89ab_cdefu64.to_le_bytes());
        assert_eq!(read_u64le(&mut &buf[..]).unwrap(), 0x0123_4567_89ab_cdef);
    }

    proptest::proptest! {
        #[test]
        fn uleb128_roundtrips_for_any_u64(v: u64) {
            roundtrip(v);
        }

        #[test]
        fn uleb128_roundtrip_matches_encoded_length(v: u64) {
            let mut buf = Vec::new();
            write_uleb128(&mut buf, v).unwrap();
            prop_assert_eq!(buf.len(), uleb128_len(v));
        }
    }
}
