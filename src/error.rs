//! Error types for the financial assistant

use thiserror::Error;

/// Result type alias for assistant operations
pub type Result<T> = std::result::Result<T, AssistantError>;

#[derive(Error, Debug)]
pub enum AssistantError {

    // =============================
    // Startup / Configuration
    // =============================

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =============================
    // Market/News Provider
    // =============================

    #[error("Provider request failed: {0}")]
    ProviderRequest(String),

    #[error("Provider deadline exceeded: {0}")]
    ProviderTimeout(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    // =============================
    // Retrieval Pipeline
    // =============================

    #[error("Embedding backend error: {0}")]
    EmbeddingBackend(String),

    #[error("Vector index error: {0}")]
    Index(String),

    // =============================
    // Language-Model Backend
    // =============================

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),

    // =============================
    // Ambient Services
    // =============================

    #[error("Session store error: {0}")]
    Database(String),

    #[error("Speech service error: {0}")]
    Speech(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
