use thiserror::Error;

/// Every failure the engine reports.
///
/// `Clone` because one pending load is shared by all callers waiting on the
/// same sound id, and each of them receives the same error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("Network Error: {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("Decode Error: {id}: {reason}")]
    Decode { id: String, reason: String },

    #[error("Engine Not Ready: {0}")]
    EngineNotReady(String),

    #[error("Parsing Error: {input}: {reason}")]
    Parse { input: String, reason: String },

    #[error("Manifest Error: {0}")]
    Manifest(String),

    #[error("Audio Device Error: {0}")]
    Device(String),

    #[error("Config Error: {0}")]
    Config(String),
}

impl EngineError {
    pub(crate) fn network(url: &str, reason: impl ToString) -> Self {
        EngineError::Network { url: url.to_string(), reason: reason.to_string() }
    }

    pub(crate) fn decode(id: &str, reason: impl ToString) -> Self {
        EngineError::Decode { id: id.to_string(), reason: reason.to_string() }
    }

    pub(crate) fn parse(input: &str, reason: impl ToString) -> Self {
        EngineError::Parse { input: input.to_string(), reason: reason.to_string() }
    }

    /// Network failures are worth another attempt, bad bytes are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Network { .. })
    }
}
