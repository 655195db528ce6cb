//! Error types for session repository operations.

/// Error type for session repository operations.
///
/// Lookups of missing or expired sessions, saves racing a delete, and
/// queries against unsupported indexes are not errors; they surface as
/// `None`, a silent no-op, or an empty map respectively.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A collaborator or setting was rejected while building the repository.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The TOML configuration could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The background dispatcher thread could not be started.
    #[error("Failed to start dispatcher thread: {0}")]
    Dispatcher(#[from] std::io::Error),
}

/// Result type for session repository operations.
pub type Result<T> = std::result::Result<T, Error>;
