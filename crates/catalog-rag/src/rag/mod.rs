//! RAG pipeline - query rewriting into catalog searches and grounded answering.

pub mod query_rewriter;
pub mod simple_chat;

pub use query_rewriter::{
    build_search_function, extract_search_arguments, QueryRewriter, SearchArguments,
    QUERY_PROMPT, SEARCH_TOOL_NAME,
};
pub use simple_chat::{
    ExtractionStrategy, RetrievalDelta, RetrievalResponse, SimpleRagChat, ANSWER_PROMPT,
};
