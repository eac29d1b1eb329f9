use thiserror::Error;

/// Failure of a privileged directive. Every variant renders as a
/// user-visible reply; none of them aborts message handling.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("{0}")]
    Validation(String),

    #[error("Relationship for {0} is locked")]
    Locked(String),

    #[error("Unknown command: {0}")]
    UnknownVerb(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Durable-storage failure. Surfaced distinctly and logged; silent loss
/// of user or persona state is a correctness hazard.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Completion-oracle failure for a single attempt.
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("quota or billing rejection")]
    Quota,

    #[error("API error: {0}")]
    Api(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed response")]
    Malformed,
}

impl OracleError {
    /// Quota rejections are not retried; the handler degrades immediately.
    pub fn is_quota(&self) -> bool {
        matches!(self, OracleError::Quota)
    }
}
