use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContextError {
    #[error("Metadata unavailable for entity '{entity}': {reason}")]
    MetadataUnavailable { entity: String, reason: String },

    #[error("Cannot generate proxy type for '{entity}': {reason}")]
    GenerationFailure { entity: String, reason: String },

    #[error("Cannot instantiate '{entity}': {reason}")]
    InstantiationFailure { entity: String, reason: String },

    #[error("Dispatch of '{member}' on '{entity}' failed: {reason}")]
    DispatchFailure {
        entity: String,
        member: String,
        reason: String,
    },

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl ContextError {
    pub fn generation(entity: &str, reason: impl Into<String>) -> Self {
        Self::GenerationFailure {
            entity: entity.to_string(),
            reason: reason.into(),
        }
    }

    pub fn instantiation(entity: &str, reason: impl Into<String>) -> Self {
        Self::InstantiationFailure {
            entity: entity.to_string(),
            reason: reason.into(),
        }
    }

    pub fn dispatch(entity: &str, member: &str, reason: impl Into<String>) -> Self {
        Self::DispatchFailure {
            entity: entity.to_string(),
            member: member.to_string(),
            reason: reason.into(),
        }
    }

    /// Name of the entity type the error refers to, if any.
    pub fn entity(&self) -> Option<&str> {
        match self {
            Self::MetadataUnavailable { entity, .. }
            | Self::GenerationFailure { entity, .. }
            | Self::InstantiationFailure { entity, .. }
            | Self::DispatchFailure { entity, .. } => Some(entity),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ContextError>;

impl<T> From<std::sync::PoisonError<T>> for ContextError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
