pub mod config;
pub mod embeddings;
pub mod error;
pub mod llm;
pub mod rag;
pub mod search;
pub mod tokens;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export primary types for convenience
pub use config::{ApiHost, ChatConfig, EmbeddingConfig, RagConfig, SearchConfig};
pub use error::{RagError, Result};
pub use rag::{
    ExtractionStrategy, QueryRewriter, RetrievalDelta, RetrievalResponse, SearchArguments,
    SimpleRagChat,
};
pub use search::{InMemoryCatalog, Retriever};
pub use types::{
    ChatRequest, Filter, FilterColumn, FilterValue, Item, Message, Overrides, RetrievalMode,
    RetrievedItem, SearchRequest, ThoughtStep,
};

// Re-export client types
pub use embeddings::EmbeddingClient;
pub use llm::{ChatClient, ChatCompletion, ChatMessage, ChatRole, OpenAiCompatibleClient};
