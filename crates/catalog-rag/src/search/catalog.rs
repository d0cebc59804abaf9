//! In-process catalog retriever over seed-file items.
//!
//! Lexical ranking counts query terms found in an item's text fields; vector
//! ranking uses cosine similarity against stored embeddings. With both inputs
//! present the two rankings are fused with RRF.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

use super::hybrid::reciprocal_rank_fusion;
use super::Retriever;
use crate::error::{RagError, Result};
use crate::types::{Filter, FilterColumn, FilterValue, Item, RetrievedItem, SearchRequest};

pub struct InMemoryCatalog {
    items: Vec<Item>,
    rrf_k: usize,
}

impl InMemoryCatalog {
    pub fn new(items: Vec<Item>) -> Self {
        Self { items, rrf_k: 60 }
    }

    pub fn with_rrf_k(mut self, rrf_k: usize) -> Self {
        self.rrf_k = rrf_k;
        self
    }

    /// Load a JSON array of items in the seed layout (`Id`, `Type`, `Brand`, ...).
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RagError::Config(format!("Failed to read catalog {}: {}", path.display(), e))
        })?;
        let items: Vec<Item> = serde_json::from_str(&content)?;
        tracing::info!(items = items.len(), path = %path.display(), "Loaded catalog");
        Ok(Self::new(items))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn text_rank(candidates: &[&Item], query: &str) -> Vec<String> {
        let terms: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect();

        let mut scored: Vec<(usize, &Item)> = candidates
            .iter()
            .filter_map(|item| {
                let haystack = format!(
                    "{} {} {} {}",
                    item.name, item.description, item.brand, item.item_type
                )
                .to_lowercase();
                let hits = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                (hits > 0).then_some((hits, *item))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().map(|(_, item)| item.id.to_string()).collect()
    }

    fn vector_rank(candidates: &[&Item], vector: &[f32]) -> Vec<String> {
        let mut scored: Vec<(f32, &Item)> = candidates
            .iter()
            .filter_map(|item| {
                let embedding = item.embedding.as_ref()?;
                (embedding.len() == vector.len())
                    .then(|| (cosine_similarity(embedding, vector), *item))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().map(|(_, item)| item.id.to_string()).collect()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn unsupported(filter: &Filter) -> RagError {
    RagError::UnsupportedFilter {
        column: filter.column.to_string(),
        operator: filter.comparison_operator.clone(),
    }
}

fn matches_filter(item: &Item, filter: &Filter) -> Result<bool> {
    let op = filter.comparison_operator.as_str();
    match filter.column {
        FilterColumn::Price => {
            let FilterValue::Number(value) = filter.value else {
                return Err(unsupported(filter));
            };
            match op {
                ">" => Ok(item.price > value),
                "<" => Ok(item.price < value),
                ">=" => Ok(item.price >= value),
                "<=" => Ok(item.price <= value),
                "==" => Ok((item.price - value).abs() < f64::EPSILON),
                _ => Err(unsupported(filter)),
            }
        }
        FilterColumn::Brand => {
            let FilterValue::Text(ref value) = filter.value else {
                return Err(unsupported(filter));
            };
            match op {
                "==" => Ok(item.brand == *value),
                "!=" => Ok(item.brand != *value),
                _ => Err(unsupported(filter)),
            }
        }
    }
}

#[async_trait]
impl Retriever for InMemoryCatalog {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<RetrievedItem>> {
        let mut candidates = Vec::with_capacity(self.items.len());
        for item in &self.items {
            let mut keep = true;
            for filter in &request.filters {
                if !matches_filter(item, filter)? {
                    keep = false;
                    break;
                }
            }
            if keep {
                candidates.push(item);
            }
        }

        let text_ranked = request
            .query_text
            .as_deref()
            .map(|q| Self::text_rank(&candidates, q));
        let vector_ranked = request
            .query_vector
            .as_deref()
            .map(|v| Self::vector_rank(&candidates, v));

        let ranked: Vec<String> = match (vector_ranked, text_ranked) {
            (Some(vector), Some(text)) => {
                reciprocal_rank_fusion(&vector, &text, self.rrf_k, request.top_k)
                    .into_iter()
                    .map(|(id, _, _)| id)
                    .collect()
            }
            (Some(only), None) | (None, Some(only)) => only,
            (None, None) => Vec::new(),
        };

        let by_id: HashMap<String, &Item> = candidates
            .iter()
            .map(|item| (item.id.to_string(), *item))
            .collect();

        let results: Vec<RetrievedItem> = ranked
            .iter()
            .filter_map(|id| by_id.get(id))
            .take(request.top_k)
            .map(|item| RetrievedItem::from(*item))
            .collect();

        tracing::debug!(
            candidates = candidates.len(),
            results = results.len(),
            filters = request.filters.len(),
            "Catalog search complete"
        );
        Ok(results)
    }
}
