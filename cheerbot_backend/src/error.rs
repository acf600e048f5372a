use thiserror::Error;

use crate::progression::ProgressionError;

/// Failures that abort an invocation without persisting anything.
///
/// Everything else (a failed poll, post or agent call) is transient: it is
/// logged, skipped and the invocation carries on.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("invalid progression table: {0}")]
    InvalidProgressionTable(#[from] ProgressionError),
    #[error("engagement state changed underneath this invocation (expected version {expected}, found {current})")]
    StateConflict { expected: u64, current: u64 },
}

impl FatalError {
    pub fn store(context: &str, error: anyhow::Error) -> Self {
        FatalError::StoreUnavailable(format!("{}: {:#}", context, error))
    }
}
