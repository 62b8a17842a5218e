use thiserror::Error;

/// Top-level error type for vault operations.
///
/// Subsystem crates wrap this in their own error enums via `#[from]` so the
/// `?` operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VaultError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Front matter error: {0}")]
    FrontMatter(String),

    #[error("Invalid vault path: {0}")]
    InvalidPath(String),
}

impl From<toml::de::Error> for VaultError {
    fn from(err: toml::de::Error) -> Self {
        VaultError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for VaultError {
    fn from(err: toml::ser::Error) -> Self {
        VaultError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        VaultError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for VaultError {
    fn from(err: serde_yaml::Error) -> Self {
        VaultError::FrontMatter(err.to_string())
    }
}

/// A specialized `Result` type for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
