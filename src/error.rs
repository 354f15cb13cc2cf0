use thiserror::Error;

use crate::core::mocks::MockKind;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error("Contract logic error: {0}")]
    ContractLogic(String),

    #[error("No {kind} mock for {target}; registered patterns: [{}]", .registered.join(", "))]
    MockNotFound {
        kind: MockKind,
        target: String,
        registered: Vec<String>,
    },

    #[error("Storage key error: {0}")]
    StorageKey(String),

    #[error("Recursion limit exceeded: depth {depth} > limit {limit}")]
    RecursionLimit { depth: usize, limit: usize },

    #[error("Snapshot {0} not found")]
    SnapshotNotFound(u64),

    #[error("No contract deployed at {0}")]
    ContractNotFound(String),

    #[error("No contract code registered for {0}")]
    CodeNotFound(String),

    #[error("Contract has no method '{0}'")]
    MethodNotFound(String),

    #[error("No validator captured; call a method that runs a nondet block first")]
    NoValidatorCaptured,

    #[error("Expected revert{}, but call succeeded", .0.as_ref().map(|m| format!(" with message '{}'", m)).unwrap_or_default())]
    ExpectedRevert(Option<String>),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid mock pattern: {0}")]
    InvalidPattern(String),

    #[error("Context error: {0}")]
    Context(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("File access error: {0}")]
    FileAccess(String),

    #[error("Live I/O error: {0}")]
    Live(String),
}

pub type Result<T> = std::result::Result<T, SimError>;

impl SimError {
    /// Shorthand used by contract code to abort the current call.
    pub fn rollback(message: impl Into<String>) -> Self {
        SimError::ContractLogic(message.into())
    }

    /// Errors that abort the whole top-level transaction instead of becoming a leader result.
    pub fn is_fatal_to_transaction(&self) -> bool {
        matches!(self, SimError::RecursionLimit { .. })
    }
}

impl From<serde_json::Error> for SimError {
    fn from(err: serde_json::Error) -> Self {
        SimError::Serialization(err.to_string())
    }
}

impl From<regex::Error> for SimError {
    fn from(err: regex::Error) -> Self {
        SimError::InvalidPattern(err.to_string())
    }
}

impl From<chrono::ParseError> for SimError {
    fn from(err: chrono::ParseError) -> Self {
        SimError::Context(format!("invalid timestamp: {}", err))
    }
}
