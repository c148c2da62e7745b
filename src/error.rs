use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Range out of bounds: offset {offset} + length {len} exceeds source length {available}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        available: usize,
    },

    #[error("Entry '{name}' [{offset}+{size}] extends past the {written} bytes written")]
    EntryOutOfRange {
        name: String,
        offset: u64,
        size: u64,
        written: u64,
    },

    #[error("Truncated entry '{name}' at offset {offset}: expected {expected} bytes, got {actual}")]
    Truncated {
        name: String,
        offset: u64,
        expected: u64,
        actual: u64,
    },

    #[error("Archive writer already finished")]
    AlreadyFinished,

    #[error("Archive is closed")]
    Closed,

    #[error("Entry not found: {name} (chain index {index})")]
    EntryNotFound { name: String, index: usize },

    #[error("Class not found: {0}")]
    ClassNotFound(String),

    #[error("Invalid block size: {0} (must be a power of two, at least 64)")]
    InvalidBlockSize(usize),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid archive URL: {0}")]
    InvalidUrl(String),

    #[error("Chain index {0} cannot be encoded in a URL port")]
    ChainIndexOverflow(usize),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Configuration parse error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

impl From<ArchiveError> for std::io::Error {
    fn from(err: ArchiveError) -> Self {
        use std::io::ErrorKind;

        match err {
            ArchiveError::Io(e) => e,
            e @ ArchiveError::Truncated { .. } => std::io::Error::new(ErrorKind::UnexpectedEof, e),
            e @ (ArchiveError::EntryNotFound { .. } | ArchiveError::ClassNotFound(_)) => {
                std::io::Error::new(ErrorKind::NotFound, e)
            }
            e @ (ArchiveError::OutOfBounds { .. } | ArchiveError::EntryOutOfRange { .. }) => {
                std::io::Error::new(ErrorKind::InvalidInput, e)
            }
            e => std::io::Error::new(ErrorKind::Other, e),
        }
    }
}

impl ArchiveError {
    /// True for lookup failures that callers usually report as absence.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ArchiveError::EntryNotFound { .. } | ArchiveError::ClassNotFound(_)
        )
    }
}
