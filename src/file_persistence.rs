use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::persistence::PersistenceHandler;

/// Snapshot persistence in a single file. Writes go to a sibling temp file
/// first and are renamed into place, so a crash mid-write never leaves a
/// truncated snapshot behind.
pub struct FilePersistence {
    file_path: PathBuf,
}

impl FilePersistence {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }
}

impl PersistenceHandler for FilePersistence {
    fn save_state(&mut self, state: &[u8]) -> Result<()> {
        let tmp_path = self.file_path.with_extension("tmp");
        fs::write(&tmp_path, state)
            .with_context(|| format!("failed to write snapshot to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.file_path).with_context(|| {
            format!("failed to move snapshot into {}", self.file_path.display())
        })?;
        Ok(())
    }

    fn load_state(&mut self) -> Result<Option<Vec<u8>>> {
        if !self.file_path.exists() {
            return Ok(None);
        }
        let state = fs::read(&self.file_path)
            .with_context(|| format!("failed to read snapshot from {}", self.file_path.display()))?;
        Ok(Some(state))
    }
}
