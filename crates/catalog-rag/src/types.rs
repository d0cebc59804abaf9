use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

use crate::error::{RagError, Result};
use crate::llm::{ChatMessage, ChatRole};

/// One conversation turn as the caller sends it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: ChatRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        ChatMessage {
            role: message.role.clone(),
            content: Some(message.content.clone()),
            tool_calls: None,
        }
    }
}

/// Logical request body: conversation plus per-request overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub overrides: Overrides,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FilterColumn {
    Price,
    Brand,
}

impl fmt::Display for FilterColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Price => f.write_str("price"),
            Self::Brand => f.write_str("brand"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FilterValue {
    Number(f64),
    Text(String),
}

/// Structured restriction on a catalog column. Filters in a request are ANDed.
///
/// The operator is not checked here; retrievers reject operators they cannot apply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Filter {
    pub column: FilterColumn,
    pub comparison_operator: String,
    pub value: FilterValue,
}

/// Input to a retriever. At least one of `query_text`/`query_vector` must be
/// present for a search to run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchRequest {
    pub query_text: Option<String>,
    pub query_vector: Option<Vec<f32>>,
    pub filters: Vec<Filter>,
    pub top_k: usize,
}

impl SearchRequest {
    pub fn new(
        query_text: Option<String>,
        query_vector: Option<Vec<f32>>,
        top_k: usize,
    ) -> Result<Self> {
        if top_k == 0 {
            return Err(RagError::InvalidRequest("top must be > 0".into()));
        }
        Ok(Self {
            query_text,
            query_vector: query_vector.filter(|v| !v.is_empty()),
            filters: Vec::new(),
            top_k,
        })
    }

    pub fn with_filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }

    pub fn has_query(&self) -> bool {
        self.query_text.is_some() || self.query_vector.is_some()
    }
}

/// A ranked candidate handed back by a retriever.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedItem {
    pub id: String,
    /// Text placed in the prompt as grounding.
    pub content: String,
    /// Plain record shown in the trace.
    pub record: Value,
}

impl RetrievedItem {
    pub fn to_str_for_rag(&self) -> &str {
        &self.content
    }

    pub fn to_record(&self) -> Value {
        self.record.clone()
    }
}

/// Catalog product in the seed-file layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    #[serde(rename = "Id")]
    pub id: i64,
    #[serde(rename = "Type")]
    pub item_type: String,
    #[serde(rename = "Brand")]
    pub brand: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Price")]
    pub price: f64,
    #[serde(rename = "Embedding", default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Item {
    pub fn to_str_for_rag(&self) -> String {
        format!(
            "Name:{} Description:{} Price:{} Brand:{} Type:{}",
            self.name, self.description, self.price, self.brand, self.item_type
        )
    }

    pub fn to_dict(&self) -> Value {
        json!({
            "id": self.id,
            "type": self.item_type,
            "brand": self.brand,
            "name": self.name,
            "description": self.description,
            "price": self.price,
        })
    }
}

impl From<&Item> for RetrievedItem {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id.to_string(),
            content: item.to_str_for_rag(),
            record: item.to_dict(),
        }
    }
}

/// One entry of the reasoning trace returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThoughtStep {
    pub title: String,
    pub description: Value,
    #[serde(default)]
    pub props: Map<String, Value>,
}

impl ThoughtStep {
    pub fn new(title: impl Into<String>, description: Value) -> Self {
        Self {
            title: title.into(),
            description,
            props: Map::new(),
        }
    }

    pub fn with_prop(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.props.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    Text,
    Vectors,
    Hybrid,
}

impl RetrievalMode {
    /// `(text_search, vector_search)` for a possibly unset mode. Unset means hybrid.
    pub fn search_flags(mode: Option<Self>) -> (bool, bool) {
        match mode {
            Some(Self::Text) => (true, false),
            Some(Self::Vectors) => (false, true),
            Some(Self::Hybrid) | None => (true, true),
        }
    }
}

/// Per-request knobs. Every field is optional on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Overrides {
    pub retrieval_mode: Option<RetrievalMode>,
    pub top: Option<usize>,
    pub temperature: Option<f64>,
    pub prompt_template: Option<String>,
}

pub const DEFAULT_TEMPERATURE: f64 = 0.3;

impl Overrides {
    pub fn temperature(&self) -> f64 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }

    /// Override template, ignoring an empty string.
    pub fn prompt_template(&self) -> Option<&str> {
        self.prompt_template.as_deref().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DataPoints {
    pub text: Vec<String>,
}

/// Grounding and trace attached to the first choice of a completion.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ResponseContext {
    pub data_points: DataPoints,
    pub thoughts: Vec<ThoughtStep>,
}
