//! Crate-wide error taxonomy.
//!
//! Five kinds, matching the failure model every other module reports
//! against: a file that cannot be parsed at all (`BadFormat`), a file that
//! parses but violates a structural invariant (`Corrupt`), a transport
//! failure that survived its retry budget (`Io`), a caller mistake
//! (`BadUsage`), and an in-flight query torn down by the caller
//! (`Cancelled`).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("bad format: {0}")]
    BadFormat(String),

    #[error("corrupt: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad usage: {0}")]
    BadUsage(String),

    #[error("cancelled")]
    Cancelled,
}

impl From<crate::codec::CodecError> for Error {
    fn from(e: crate::codec::CodecError) -> Self {
        match e {
            crate::codec::CodecError::UnknownCodec(name) => {
                Error::BadFormat(format!("unknown codec: {name}"))
            }
            other => Error::Corrupt(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
