use thiserror::Error;

/// Error kinds surfaced by the mining engine and its facade.
///
/// Persistence back-end failures are not enumerated here; they are whatever
/// the collaborator returned, carried through `anyhow::Error` unmodified.
#[derive(Debug, Error)]
pub enum TemplateMinerError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("unknown match strategy: {0:?}")]
    UnknownMatchStrategy(String),

    #[error("snapshot corrupt: {0}")]
    SnapshotCorrupt(String),
}
