//! JSON-file persistence for cached values.
//!
//! Each logical value is stored as a single JSON file named after it inside a
//! dedicated cache subdirectory. Callers decide how to react to corrupt data;
//! the repository only surfaces it as a decode error.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Name of the cache subdirectory holding the persisted values.
const CACHE_DIR_NAME: &str = "sdk-core";

/// Errors emitted by the [`JsonRepository`].
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stores one JSON value per name inside a cache subdirectory.
#[derive(Debug, Clone)]
pub struct JsonRepository {
    /// Directory holding one `<name>.json` file per value.
    directory: PathBuf,
}

impl JsonRepository {
    /// Creates a repository rooted at `<base>/sdk-core`, creating the
    /// directory if needed.
    pub fn new(base: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let directory = base.as_ref().join(CACHE_DIR_NAME);
        fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    /// Returns whether a value with the given name exists on disk.
    pub fn value_exists(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }

    /// Reads and decodes the value with the given name.
    pub fn read<T>(&self, name: &str) -> Result<T, PersistenceError>
    where
        T: DeserializeOwned,
    {
        let bytes = fs::read(self.path_for(name))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Encodes and writes the value with the given name, replacing any
    /// previous content.
    pub fn write<T>(&self, value: &T, name: &str) -> Result<(), PersistenceError>
    where
        T: Serialize,
    {
        let bytes = serde_json::to_vec(value)?;
        fs::write(self.path_for(name), bytes)?;
        Ok(())
    }

    /// Removes the value with the given name from disk.
    pub fn remove_value(&self, name: &str) -> Result<(), PersistenceError> {
        fs::remove_file(self.path_for(name))?;
        Ok(())
    }

    /// Resolves the file path backing a value name.
    fn path_for(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{name}.json"))
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    /// Values round trip through write/read and can be removed.
    #[test]
    fn write_read_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let repository = JsonRepository::new(dir.path()).unwrap();
        let value = Sample {
            name: "analytics".into(),
            count: 3,
        };
        assert!(!repository.value_exists("config"));
        repository.write(&value, "config").unwrap();
        assert!(repository.value_exists("config"));
        let restored: Sample = repository.read("config").unwrap();
        assert_eq!(restored, value);
        repository.remove_value("config").unwrap();
        assert!(!repository.value_exists("config"));
    }

    /// Corrupt content surfaces as a serialization error, not a panic.
    #[test]
    fn corrupt_content_reports_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let repository = JsonRepository::new(dir.path()).unwrap();
        std::fs::write(
            dir.path().join(CACHE_DIR_NAME).join("config.json"),
            b"not json",
        )
        .unwrap();
        match repository.read::<Sample>("config") {
            Err(PersistenceError::Serialization(_)) => {}
            other => panic!("expected serialization error, got {other:?}"),
        }
    }
}
