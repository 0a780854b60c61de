use thiserror::Error;

/// Top-level error type for the Skillmatch system.
///
/// The vector core distinguishes failures that leave catalog state untouched
/// (`Embedding`, `DimensionMismatch`, `InvalidArgument`) from `Persistence`,
/// which is raised after an in-memory commit whose artifacts could not be
/// written.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SkillmatchError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Catalog not found: {0}")]
    CatalogNotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Index and metadata disagree. Always a bug, never user input.
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SkillmatchError {
    /// True when the error means "state changed in memory but was not saved".
    pub fn is_persistence(&self) -> bool {
        matches!(self, SkillmatchError::Persistence(_))
    }
}

impl From<toml::de::Error> for SkillmatchError {
    fn from(err: toml::de::Error) -> Self {
        SkillmatchError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for SkillmatchError {
    fn from(err: toml::ser::Error) -> Self {
        SkillmatchError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SkillmatchError {
    fn from(err: serde_json::Error) -> Self {
        SkillmatchError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for SkillmatchError {
    fn from(err: bincode::Error) -> Self {
        SkillmatchError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Skillmatch operations.
pub type Result<T> = std::result::Result<T, SkillmatchError>;
