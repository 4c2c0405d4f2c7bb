use plexus_core::id::ValueId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate value name '{0}'")]
    DuplicateName(String),

    #[error("{0} registered twice")]
    DuplicateValue(ValueId),

    #[error("unknown {0}")]
    UnknownValue(ValueId),

    #[error("{value} assigned by more than one step (second write at step {step})")]
    MultipleWriters { value: ValueId, step: usize },

    #[error("{value} read at step {step} before any step assigns it")]
    ReadBeforeWrite { value: ValueId, step: usize },

    #[error("duplicate argument '{0}'")]
    DuplicateArgument(String),

    #[error("duplicate output '{0}'")]
    DuplicateOutput(String),

    #[error("invalid program: {0}")]
    Invalid(String),
}
