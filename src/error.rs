use std::fmt::Display;

/// Emberdb errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// An empty key was supplied.
    KeyEmpty,
    /// The key exceeds the 1 GiB limit.
    KeyTooBig,
    /// An empty value was supplied. The empty value is reserved internally
    /// as the tombstone marker.
    ValueEmpty,
    /// The value exceeds the 4 GiB limit.
    ValueTooBig,
    /// The key pattern did not compile as a regular expression.
    InvalidPattern(String),
    /// The stored value is not a decimal ASCII integer.
    NotAnInteger,
    /// The key is not present in the store.
    KeyMissing,
    /// The key exists but its record has expired.
    KeyExpired,
    /// A definitive deletion record was found for the key, so no older
    /// source needs to be consulted. Mapped to [`Error::KeyMissing`] at the
    /// operation surface.
    KeyDeleted,
    /// The key is not present in the queried SSTable. Internal to point
    /// queries; the engine moves on to the next table.
    KeyNotInSstable,
    /// The record checksum did not match its value bytes.
    ChecksumInvalid,
    /// A record could not be decoded, typically a short or torn read.
    CorruptRecord(String),
    /// No open segment matches the file id recorded in the index.
    DataFileNotFound(u64),
    /// Another process holds the lock on the data directory.
    DirectoryLocked(String),
    /// A read or write was attempted against a file handle opened in an
    /// incompatible mode.
    InvalidMode(&'static str),
    /// An underlying IO error.
    Io(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::KeyEmpty => write!(f, "key is empty"),
            Error::KeyTooBig => write!(f, "key is larger than 1 GiB"),
            Error::ValueEmpty => write!(f, "empty value is not allowed"),
            Error::ValueTooBig => write!(f, "value is larger than 4 GiB"),
            Error::InvalidPattern(msg) => write!(f, "invalid key pattern: {msg}"),
            Error::NotAnInteger => write!(f, "value is not an integer"),
            Error::KeyMissing => write!(f, "key is missing"),
            Error::KeyExpired => write!(f, "key is expired"),
            Error::KeyDeleted => write!(f, "key is deleted"),
            Error::KeyNotInSstable => write!(f, "key not present in SSTable"),
            Error::ChecksumInvalid => write!(f, "record checksum is invalid"),
            Error::CorruptRecord(msg) => write!(f, "corrupt record: {msg}"),
            Error::DataFileNotFound(id) => write!(f, "no data file with id {id}"),
            Error::DirectoryLocked(path) => {
                write!(f, "directory is locked by another process: {path}")
            }
            Error::InvalidMode(msg) => write!(f, "invalid file mode: {msg}"),
            Error::Io(msg) => write!(f, "io error: {msg}"),
        }
    }
}

/// An emberdb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for Error {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        Error::CorruptRecord(err.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::InvalidPattern(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Io(err.to_string())
    }
}
