use thiserror::Error;

/// Errors surfaced by the question-answering pipeline and its clients.
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Chat completion error: {0}")]
    Completion(String),

    #[error("Malformed search_database arguments: {0}")]
    ToolArguments(#[source] serde_json::Error),

    #[error("Unsupported filter: {column} {operator}")]
    UnsupportedFilter { column: String, operator: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RagError>;
