use thiserror::Error;

/// Main error type for the image resizer
#[derive(Debug, Error)]
pub enum ResizerError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    #[error("Invalid memory size: {0}")]
    InvalidMemorySize(String),

    // Launch-related errors
    #[error("App not found in ecosystem file: {0}")]
    AppNotFound(String),

    #[error("Launch check failed: {0}")]
    LaunchCheckError(String),

    #[error("Failed to spawn process: {0}")]
    SpawnError(String),

    // Image-related errors
    #[error("{0}")]
    NotFound(String),

    #[error("Error processing image: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Cache error: {0}")]
    CacheError(String),

    // IO errors (automatically converted from std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for image resizer operations
pub type Result<T> = std::result::Result<T, ResizerError>;
