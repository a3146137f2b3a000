use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::persistence::PersistenceHandler;

/// In-memory snapshot buffer, mainly for tests. Clones share the buffer, so
/// one miner's saved state can seed another.
#[derive(Clone, Debug, Default)]
pub struct MemoryBufferPersistence {
    state: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryBufferPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceHandler for MemoryBufferPersistence {
    fn save_state(&mut self, state: &[u8]) -> Result<()> {
        *self.state.lock().expect("snapshot buffer poisoned") = Some(state.to_vec());
        Ok(())
    }

    fn load_state(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.state.lock().expect("snapshot buffer poisoned").clone())
    }
}
