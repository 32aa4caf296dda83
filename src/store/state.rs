//! Engine metadata persisted across restarts.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::Error;

pub const STATE_FILE: &str = "state.json";

/// The durable portion of the engine's state. The next table ordinal is
/// all that has to survive a restart; everything else is rebuilt from the
/// WAL segments and the table files themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineState {
    pub sstable_counter: u64,
}

impl EngineState {
    /// Loads the state file from `dir`, or `None` when it does not exist.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        match fs::read(dir.join(STATE_FILE)) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| Error::InvalidData(format!("undecodable {STATE_FILE}: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes and syncs the state file in `dir`.
    pub fn persist(&self, dir: &Path) -> Result<()> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| Error::InvalidData(format!("unencodable engine state: {e}")))?;
        let mut file = File::create(dir.join(STATE_FILE))?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_state() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        assert_eq!(EngineState::load(temp_dir.path()).unwrap(), None);
    }

    #[test]
    fn test_persist_and_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let state = EngineState { sstable_counter: 7 };
        state.persist(temp_dir.path()).expect("persist failed");

        let loaded = EngineState::load(temp_dir.path()).expect("load failed");
        assert_eq!(loaded, Some(state));
    }

    #[test]
    fn test_state_file_is_json() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        EngineState { sstable_counter: 3 }
            .persist(temp_dir.path())
            .expect("persist failed");

        let raw = fs::read_to_string(temp_dir.path().join(STATE_FILE)).unwrap();
        assert_eq!(raw, r#"{"sstable_counter":3}"#);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(temp_dir.path().join(STATE_FILE), b"not json").unwrap();
        assert!(matches!(
            EngineState::load(temp_dir.path()),
            Err(Error::InvalidData(_))
        ));
    }
}
