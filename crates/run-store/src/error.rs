use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunStoreError {
    #[error("run {0} not found")]
    RunNotFound(String),
    #[error("run {0} already exists")]
    AlreadyExists(String),
    /// Expected state-conflict case: another writer already applied this
    /// mutation. Call sites match on this variant and no-op rather than
    /// treating it as a generic backend failure.
    #[error("conditional write lost for run {0}")]
    ConditionalWriteLost(String),
    #[error("run store backend error: {0}")]
    Backend(#[from] sqlx::Error),
}
