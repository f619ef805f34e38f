//! Error types for the miniSEED codec and the filtering core.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while decoding or encoding a single miniSEED record.
#[derive(Debug, Error)]
pub enum MseedError {
    #[error("record too short: expected at least {expected} bytes, got {actual}")]
    RecordTooShort { expected: usize, actual: usize },

    #[error("invalid fixed header: {0}")]
    InvalidHeader(String),

    #[error("unsupported encoding format: {0}")]
    UnsupportedEncoding(u8),

    #[error("blockette 1000 not found")]
    MissingBlockette1000,

    #[error("sample count mismatch: header says {expected}, decoded {actual}")]
    SampleCountMismatch { expected: usize, actual: usize },

    #[error("encode error: {0}")]
    EncodeError(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, MseedError>;

/// Errors raised by selection, trimming and dispatch.
///
/// Only some variants are fatal for a run; see the pipeline for how each
/// one is handled.
#[derive(Debug, Error)]
pub enum FilterError {
    /// Malformed selection file, regex list, template or time string.
    #[error("{origin}: {message}")]
    Parse { origin: String, message: String },

    /// A record could not be decoded.
    #[error("cannot read {} at byte offset {offset}: {source}", path.display())]
    Decode {
        path: PathBuf,
        offset: u64,
        #[source]
        source: MseedError,
    },

    /// Samples of a record selected for trimming could not be unpacked.
    #[error("cannot unpack samples of {srcname}: {source}")]
    Unpack {
        srcname: String,
        #[source]
        source: MseedError,
    },

    /// A trimmed record could not be repacked.
    #[error("cannot pack trimmed record {srcname} ({start}): {source}")]
    Encode {
        srcname: String,
        start: String,
        #[source]
        source: MseedError,
    },

    /// New record bounds do not fit inside the record.
    #[error(
        "problem with new start/end record bound times for {srcname}: \
         record {start} to {end}, bounds {new_start} to {new_end}"
    )]
    TrimBounds {
        srcname: String,
        start: String,
        end: String,
        new_start: String,
        new_end: String,
    },

    /// An output path could not be created, opened or written.
    #[error("cannot write {}: {source}", path.display())]
    Resource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Usage(String),
}

impl FilterError {
    pub(crate) fn parse(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            origin: origin.into(),
            message: message.into(),
        }
    }

    pub(crate) fn resource(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Resource {
            path: path.into(),
            source,
        }
    }
}

pub type FilterResult<T> = std::result::Result<T, FilterError>;
