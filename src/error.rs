use thiserror::Error;

/// Errors that can occur in the solver stack.
///
/// Recovery policy:
/// - `Configuration` / `AbstractionMismatch` are fatal. Silently resuming
///   against an incompatible abstraction would corrupt the blueprint.
/// - `ResourceExhaustion` is recovered at the coordinator: the batch completes
///   from the surviving workers.
/// - `ComputationTimeout` and `LeafEvaluation` never escape the resolver; they
///   degrade to best-effort results and show up only in telemetry.
/// - `IllegalAction` is caught and corrected by the action translator before
///   anything reaches the table.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("abstraction mismatch: artifact was built with hash {found:#018x}, live configuration is {expected:#018x}")]
    AbstractionMismatch { expected: u64, found: u64 },

    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),

    #[error("computation timed out after {0} ms")]
    ComputationTimeout(u64),

    #[error("leaf evaluation failed: {0}")]
    LeafEvaluation(String),

    #[error("illegal action: {0}")]
    IllegalAction(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for SolverError {
    fn from(e: bincode::Error) -> Self {
        SolverError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for SolverError {
    fn from(e: serde_json::Error) -> Self {
        SolverError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SolverError>;
