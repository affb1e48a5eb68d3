//! Error types for the crypto insight agent

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {

    // =============================
    // Pipeline Errors
    // =============================

    #[error("Planning error: {0}")]
    PlanningError(String),

    #[error("Fetch error: {0}")]
    FetchError(String),

    #[error("Market data error: {0}")]
    MarketDataError(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Routing error: {0}")]
    RoutingError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AgentError {
    /// Stable label used when a failure outcome is rendered for the caller.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::PlanningError(_) => "planning",
            AgentError::FetchError(_) => "fetch",
            AgentError::MarketDataError(_) => "market_data",
            AgentError::LlmError(_) => "llm",
            AgentError::RoutingError(_) => "routing",
            AgentError::SerializationError(_) => "serialization",
            AgentError::HttpError(_) => "http",
            AgentError::IoError(_) => "io",
        }
    }
}
