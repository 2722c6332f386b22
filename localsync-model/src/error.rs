//! Error types for schema registration and model handling.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while registering schemas or interpreting model instances.
#[derive(Debug, Error)]
pub enum ModelError {
    /// No schema is registered under this name.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// A schema was registered twice.
    #[error("duplicate model: {0}")]
    DuplicateModel(String),

    /// A predicate, sort or key refers to a field the schema does not declare.
    #[error("unknown field {field} on model {model}")]
    UnknownField { model: String, field: String },

    /// An association points at a model that is not registered.
    #[error("model {model} references unregistered model {target}")]
    UnknownAssociationTarget { model: String, target: String },

    /// The association graph contains a cycle.
    #[error("cyclic relations between models: {}", .0.join(", "))]
    CyclicRelations(Vec<String>),

    /// The instance does not match its schema.
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
