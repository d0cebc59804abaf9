//! Retrieval boundary. Ranking belongs to the retriever; the pipeline only
//! decides which inputs to hand it.

pub mod catalog;
pub mod hybrid;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{RetrievedItem, SearchRequest};

pub use catalog::InMemoryCatalog;
pub use hybrid::reciprocal_rank_fusion;

/// Ranked search over the catalog, applying the request's filters.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<RetrievedItem>>;
}

/// Run `request`, or return nothing when it has neither text nor vector.
pub async fn retrieve(
    retriever: &dyn Retriever,
    request: &SearchRequest,
) -> Result<Vec<RetrievedItem>> {
    if !request.has_query() {
        tracing::info!("No query text or vector; skipping retrieval");
        return Ok(Vec::new());
    }
    let mut results = retriever.search(request).await?;
    results.truncate(request.top_k);
    Ok(results)
}
