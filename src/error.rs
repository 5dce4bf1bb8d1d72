use thiserror::Error;

/// Errors raised by the nested cross-validation engine.
///
/// `Configuration` aborts a run before any training starts. `DataSufficiency`
/// aborts the partition it was raised for. `TuningFailure` and `Evaluation`
/// are caught at the per-learner boundary and only cost that learner its
/// report.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Too few compounds to build a QSAR model: {reason}")]
    DataSufficiency { reason: String },

    #[error("The learner {learner} was not optimized: {reason}")]
    TuningFailure { learner: String, reason: String },

    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn config(msg: impl Into<String>) -> Self {
        EngineError::Configuration(msg.into())
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        EngineError::Evaluation(msg.into())
    }

    /// Short label used when logging a learner failure.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Configuration(_) => "ConfigurationError",
            EngineError::DataSufficiency { .. } => "DataSufficiencyError",
            EngineError::TuningFailure { .. } => "TuningFailure",
            EngineError::Evaluation(_) => "EvaluationError",
            EngineError::Io(_) => "IoError",
            EngineError::Serialization(_) => "SerializationError",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_sufficiency_message() {
        let err = EngineError::DataSufficiency {
            reason: "12 examples, need at least 20".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Too few compounds to build a QSAR model: 12 examples, need at least 20"
        );
        assert_eq!(err.kind(), "DataSufficiencyError");
    }

    #[test]
    fn tuning_failure_names_learner() {
        let err = EngineError::TuningFailure {
            learner: "SVM".to_string(),
            reason: "no candidate evaluated".to_string(),
        };
        assert!(err.to_string().contains("SVM"));
        assert_eq!(err.kind(), "TuningFailure");
    }
}
