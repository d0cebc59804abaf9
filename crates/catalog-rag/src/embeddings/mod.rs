use async_trait::async_trait;
use serde::Serialize;

use crate::error::{RagError, Result};

/// Body of an embeddings call.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbeddingRequest {
    /// Deployment name on Azure, model name elsewhere.
    pub model: String,
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
}

/// Text-embedding capability used by the pipeline.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn create_embedding(&self, request: &EmbeddingRequest) -> Result<Vec<f32>>;
}

/// Whether the model accepts a `dimensions` parameter.
pub fn supports_dimensions(model: &str) -> bool {
    model.starts_with("text-embedding-3")
}

/// Embed one query string.
///
/// The deployment, when set, is sent in place of the model name. The result must
/// have exactly `dimensions` components.
pub async fn compute_text_embedding(
    text: &str,
    client: &dyn EmbeddingClient,
    model: &str,
    deployment: Option<&str>,
    dimensions: usize,
) -> Result<Vec<f32>> {
    let request = EmbeddingRequest {
        model: deployment.unwrap_or(model).to_string(),
        input: text.to_string(),
        dimensions: supports_dimensions(model).then_some(dimensions),
    };
    let embedding = client.create_embedding(&request).await?;
    if embedding.len() != dimensions {
        return Err(RagError::Embedding(format!(
            "expected {} dimensions from {}, got {}",
            dimensions,
            model,
            embedding.len()
        )));
    }
    tracing::debug!(model = %model, dimensions, "Computed query embedding");
    Ok(embedding)
}
