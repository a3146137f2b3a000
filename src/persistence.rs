use anyhow::Result;

/// External collaborator that keeps the engine's snapshot bytes somewhere
/// durable. The bytes are opaque to the back-end; `load_state` returns
/// `None` when no snapshot has ever been saved.
pub trait PersistenceHandler {
    fn save_state(&mut self, state: &[u8]) -> Result<()>;
    fn load_state(&mut self) -> Result<Option<Vec<u8>>>;
}
