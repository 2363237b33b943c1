//! Storage engines and the operation surface they share.

pub mod lsht;
pub mod lsm;

use std::sync::Arc;
use std::time::SystemTime;

use crate::config::Config;
use crate::error::{Error, Result};

const GIB: usize = 1 << 30;

/// Maximum key size accepted by either engine.
pub const MAX_KEY_SIZE: usize = GIB;
/// Maximum value size accepted by either engine.
pub const MAX_VALUE_SIZE: usize = 4 * GIB;

/// The operation surface implemented identically by both engines.
///
/// Engines are internally safe for concurrent callers: reads take the read
/// side of the engine lock, every mutation takes the write side. Within a
/// single key, the last successful mutation wins; across keys there is no
/// ordering guarantee beyond the lock's serialization.
pub trait Store: Send + Sync {
    /// Latest unexpired value for `key`.
    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// One result per key, each tagged ok or err; never aggregates.
    fn mget(&self, keys: &[String]) -> Vec<Result<Vec<u8>>>;

    /// Inserts or updates a key-value pair. Visible to readers immediately;
    /// durable when the next sync occurs.
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Removes a key. Idempotent: succeeds whether or not the key existed,
    /// as long as the tombstone write succeeds.
    fn delete(&self, key: &str) -> Result<()>;

    /// Whether the key is present, answered from in-memory structures only.
    fn exists(&self, key: &str) -> bool;

    /// Keys matching a regex pattern; `*` matches everything.
    fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// All keys; equivalent to `keys("*")`.
    fn all_keys(&self) -> Result<Vec<String>> {
        self.keys("*")
    }

    /// Whole seconds until expiry, or -1 when the key has no expiry or has
    /// already expired.
    fn ttl(&self, key: &str) -> Result<i64>;

    /// Rewrites the key's record with a new absolute expiry.
    fn expire(&self, key: &str, at: SystemTime) -> Result<()>;

    /// `set` with an expiry of now + `ttl_secs`.
    fn setex(&self, key: &str, value: &[u8], ttl_secs: i64) -> Result<()>;

    /// Clears the key's expiry by rewriting its record.
    fn persist(&self, key: &str) -> Result<()>;

    /// Parses the value as a decimal ASCII integer, adds one, writes it
    /// back, and returns the new value.
    fn incr(&self, key: &str) -> Result<i64>;

    /// Like [`Store::incr`], subtracting one.
    fn decr(&self, key: &str) -> Result<i64>;

    /// Forces buffered writes to stable storage.
    fn sync(&self) -> Result<()>;

    /// Cleanly shuts the engine down, persisting whatever it keeps in
    /// memory and releasing the directory lock.
    fn close(&self) -> Result<()>;
}

/// Which engine backs a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Lsht,
    Lsm,
}

impl std::str::FromStr for Engine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lsht" => Ok(Engine::Lsht),
            "lsm" => Ok(Engine::Lsm),
            other => Err(Error::Io(format!("unknown engine: {other}"))),
        }
    }
}

/// Opens the selected engine over `config.directory`.
pub fn open_store(config: Config, engine: Engine) -> Result<Arc<dyn Store>> {
    match engine {
        Engine::Lsht => Ok(Arc::new(lsht::LshtStore::open(config)?)),
        Engine::Lsm => Ok(Arc::new(lsm::LsmStore::open(config)?)),
    }
}

/// Validates key and value bounds for a write.
pub(crate) fn validate_entry(key: &str, value: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(Error::KeyEmpty);
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(Error::KeyTooBig);
    }
    if value.is_empty() {
        return Err(Error::ValueEmpty);
    }
    if value.len() > MAX_VALUE_SIZE {
        return Err(Error::ValueTooBig);
    }
    Ok(())
}

/// Compiles a key pattern; `*` means "match everything" and compiles to
/// `None` so callers can skip the regex entirely.
pub(crate) fn compile_pattern(pattern: &str) -> Result<Option<regex::Regex>> {
    if pattern == "*" {
        return Ok(None);
    }
    Ok(Some(regex::Regex::new(pattern)?))
}

/// Parses a stored value as a decimal ASCII integer for incr/decr.
pub(crate) fn parse_int(value: &[u8]) -> Result<i64> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or(Error::NotAnInteger)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_entry() {
        assert_eq!(validate_entry("", b"v"), Err(Error::KeyEmpty));
        assert_eq!(validate_entry("k", b""), Err(Error::ValueEmpty));
        assert_eq!(validate_entry("k", b"v"), Ok(()));
    }

    #[test]
    fn test_compile_pattern() {
        assert!(compile_pattern("*").unwrap().is_none());
        assert!(compile_pattern("^user:").unwrap().is_some());
        assert!(matches!(
            compile_pattern("["),
            Err(Error::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int(b"42").unwrap(), 42);
        assert_eq!(parse_int(b"-7").unwrap(), -7);
        assert_eq!(parse_int(b"forty two"), Err(Error::NotAnInteger));
        assert_eq!(parse_int(b"\xff\xfe"), Err(Error::NotAnInteger));
    }

    #[test]
    fn test_engine_from_str() {
        assert_eq!("lsht".parse::<Engine>().unwrap(), Engine::Lsht);
        assert_eq!("LSM".parse::<Engine>().unwrap(), Engine::Lsm);
        assert!("btree".parse::<Engine>().is_err());
    }
}
