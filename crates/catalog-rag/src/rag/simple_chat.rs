//! Retrieval-augmented answering over the product catalog.
//!
//! One turn runs strictly in sequence: optional query rewrite, query embedding,
//! retrieval, prompt assembly within the model's token budget, completion.
//! The response carries the grounding sources and a three-step trace.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::query_rewriter::QueryRewriter;
use crate::config::{ChatConfig, EmbeddingConfig, RagConfig};
use crate::embeddings::{compute_text_embedding, EmbeddingClient};
use crate::error::{RagError, Result};
use crate::llm::{ChatClient, ChatCompletion, ChatCompletionRequest, ChatMessage};
use crate::search::{retrieve, Retriever};
use crate::tokens::{build_messages, get_token_limit, TokenCounter};
use crate::types::{
    DataPoints, Filter, Message, Overrides, ResponseContext, RetrievalMode, RetrievedItem,
    SearchRequest, ThoughtStep,
};

const ANSWER_RESPONSE_TOKEN_LIMIT: usize = 1024;
const DEFAULT_TOP: usize = 3;

pub const ANSWER_PROMPT: &str = "Assistant helps customers with questions about products in the catalog.
Respond as a salesperson helping a customer in a store would. Do NOT respond with tables.
Answer ONLY with the product details listed in the sources.
If the sources do not contain enough information, say you don't know.
Do not generate answers that don't use the sources below.
Each product has an ID in brackets followed by a colon and the product details.
Always include the product ID for each product you use in the response.
Use square brackets to reference the source, for example [52].
Don't combine citations, list each product separately, for example [27][51].";

/// The full completion record with `choices[0].context` filled in.
pub type RetrievalResponse = ChatCompletion;

/// How the search query and filters are derived from the conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// The last user turn is used verbatim as the text query. No filters.
    #[default]
    Direct,
    /// The chat model rewrites the turn through the `search_database` tool,
    /// which can also produce price and brand filters.
    ToolRewrite,
}

/// One piece of a streamed answer. The first delta carries the context and no content.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RetrievalDelta {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ResponseContext>,
}

struct PreparedTurn {
    request: ChatCompletionRequest,
    context: ResponseContext,
}

pub struct SimpleRagChat {
    searcher: Arc<dyn Retriever>,
    chat_client: Arc<dyn ChatClient>,
    embed_client: Arc<dyn EmbeddingClient>,
    chat_model: String,
    chat_deployment: Option<String>,
    embed_model: String,
    embed_deployment: Option<String>,
    embed_dimensions: usize,
    chat_token_limit: usize,
    counter: TokenCounter,
    answer_prompt_template: String,
    strategy: ExtractionStrategy,
    default_top: usize,
    rewriter: QueryRewriter,
}

impl SimpleRagChat {
    pub fn new(
        searcher: Arc<dyn Retriever>,
        chat_client: Arc<dyn ChatClient>,
        embed_client: Arc<dyn EmbeddingClient>,
        chat: &ChatConfig,
        embedding: &EmbeddingConfig,
    ) -> Result<Self> {
        let counter = TokenCounter::for_model(&chat.model, true)?;
        let rewriter = QueryRewriter::with_counter(
            chat_client.clone(),
            &chat.model,
            chat.deployment.as_deref(),
            counter.clone(),
        )?;

        Ok(Self {
            searcher,
            chat_client,
            embed_client,
            chat_model: chat.model.clone(),
            chat_deployment: chat.deployment.clone(),
            embed_model: embedding.model.clone(),
            embed_deployment: embedding.deployment.clone(),
            embed_dimensions: embedding.dimensions,
            chat_token_limit: get_token_limit(&chat.model, true)?,
            counter,
            answer_prompt_template: ANSWER_PROMPT.to_string(),
            strategy: ExtractionStrategy::default(),
            default_top: DEFAULT_TOP,
            rewriter,
        })
    }

    /// Build from a validated config. A configured prompt file is read here, once.
    pub fn from_config(
        config: &RagConfig,
        searcher: Arc<dyn Retriever>,
        chat_client: Arc<dyn ChatClient>,
        embed_client: Arc<dyn EmbeddingClient>,
    ) -> Result<Self> {
        config.validate()?;
        let mut chat = Self::new(
            searcher,
            chat_client,
            embed_client,
            &config.chat,
            &config.embedding,
        )?
        .with_default_top(config.search.default_top);

        if let Some(path) = &config.prompt_template_path {
            let template = std::fs::read_to_string(path).map_err(|e| {
                RagError::Config(format!(
                    "Failed to read prompt template {}: {}",
                    path.display(),
                    e
                ))
            })?;
            chat = chat.with_prompt_template(template);
        }
        Ok(chat)
    }

    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.answer_prompt_template = template.into();
        self
    }

    pub fn with_strategy(mut self, strategy: ExtractionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_default_top(mut self, top: usize) -> Self {
        self.default_top = top;
        self
    }

    pub fn strategy(&self) -> ExtractionStrategy {
        self.strategy
    }

    /// Answer the last message of `messages`, grounded on retrieved products.
    pub async fn run(
        &self,
        messages: &[Message],
        overrides: &Overrides,
    ) -> Result<RetrievalResponse> {
        let prepared = self.prepare(messages, overrides).await?;

        let mut completion = self.chat_client.complete(&prepared.request).await?;
        let first = completion
            .choices
            .first_mut()
            .ok_or_else(|| RagError::Completion("Chat completion returned no choices".into()))?;
        first.context = Some(prepared.context);

        tracing::info!(model = %prepared.request.model, "Generated grounded answer");
        Ok(completion)
    }

    /// Streamed variant of [`run`](Self::run).
    ///
    /// Everything up to the completion call happens before this returns, so
    /// embedding and retrieval failures surface here. Completion failures
    /// arrive as an `Err` item on the channel.
    pub async fn run_stream(
        &self,
        messages: &[Message],
        overrides: &Overrides,
    ) -> Result<mpsc::Receiver<Result<RetrievalDelta>>> {
        let mut prepared = self.prepare(messages, overrides).await?;
        prepared.request.stream = true;

        let mut tokens = self.chat_client.complete_stream(&prepared.request).await?;
        let (tx, rx) = mpsc::channel(100);
        let context = prepared.context;

        tokio::spawn(async move {
            let first = RetrievalDelta {
                content: String::new(),
                context: Some(context),
            };
            if tx.send(Ok(first)).await.is_err() {
                return;
            }
            while let Some(token) = tokens.next().await {
                let delta = token.map(|content| RetrievalDelta {
                    content,
                    context: None,
                });
                let failed = delta.is_err();
                if tx.send(delta).await.is_err() || failed {
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn prepare(&self, messages: &[Message], overrides: &Overrides) -> Result<PreparedTurn> {
        let (last, past) = messages
            .split_last()
            .ok_or_else(|| RagError::InvalidRequest("messages must not be empty".into()))?;
        let original_user_query = last.content.as_str();
        let past_messages: Vec<ChatMessage> = past.iter().map(ChatMessage::from).collect();

        let (text_search, vector_search) = RetrievalMode::search_flags(overrides.retrieval_mode);
        let top = overrides.top.unwrap_or(self.default_top);

        let (search_query, filters): (Option<String>, Vec<Filter>) = match self.strategy {
            ExtractionStrategy::Direct => (Some(original_user_query.to_string()), Vec::new()),
            ExtractionStrategy::ToolRewrite => {
                let arguments = self
                    .rewriter
                    .rewrite(&past_messages, original_user_query)
                    .await?;
                (arguments.search_query, arguments.filters)
            }
        };

        let query_vector = if vector_search {
            let embed_input = search_query.as_deref().unwrap_or(original_user_query);
            Some(
                compute_text_embedding(
                    embed_input,
                    self.embed_client.as_ref(),
                    &self.embed_model,
                    self.embed_deployment.as_deref(),
                    self.embed_dimensions,
                )
                .await?,
            )
        } else {
            None
        };
        let query_text = if text_search { search_query } else { None };

        let search_request = SearchRequest::new(query_text.clone(), query_vector, top)?
            .with_filters(filters.clone());
        let results = retrieve(self.searcher.as_ref(), &search_request).await?;

        tracing::info!(
            results_count = results.len(),
            text_search,
            vector_search,
            top,
            filters = filters.len(),
            "Retrieved catalog items"
        );

        let sources_content = render_sources(&results);
        let content = sources_content.join("\n");

        let messages = build_messages(
            &self.counter,
            overrides
                .prompt_template()
                .unwrap_or(self.answer_prompt_template.as_str()),
            &format!("{}\n\nSources:\n{}", original_user_query, content),
            &past_messages,
            self.chat_token_limit
                .saturating_sub(ANSWER_RESPONSE_TOKEN_LIMIT),
        );

        let mut query_step = ThoughtStep::new("Search query for database", json!(query_text))
            .with_prop("top", top)
            .with_prop("vector_search", vector_search)
            .with_prop("text_search", text_search);
        if self.strategy == ExtractionStrategy::ToolRewrite {
            query_step = query_step.with_prop("filters", serde_json::to_value(&filters)?);
        }

        let mut prompt_step =
            ThoughtStep::new("Prompt to generate answer", serde_json::to_value(&messages)?)
                .with_prop("model", self.chat_model.clone());
        if let Some(deployment) = &self.chat_deployment {
            prompt_step = prompt_step.with_prop("deployment", deployment.clone());
        }

        let context = ResponseContext {
            data_points: DataPoints {
                text: sources_content,
            },
            thoughts: vec![
                query_step,
                ThoughtStep::new(
                    "Search results",
                    json!(results.iter().map(RetrievedItem::to_record).collect::<Vec<_>>()),
                ),
                prompt_step,
            ],
        };

        let request = ChatCompletionRequest {
            model: self
                .chat_deployment
                .clone()
                .unwrap_or_else(|| self.chat_model.clone()),
            messages,
            temperature: overrides.temperature(),
            max_tokens: ANSWER_RESPONSE_TOKEN_LIMIT,
            n: 1,
            stream: false,
            tools: Vec::new(),
        };

        Ok(PreparedTurn { request, context })
    }
}

/// `[id]:<text>\n\n` per item, in retriever order.
fn render_sources(results: &[RetrievedItem]) -> Vec<String> {
    results
        .iter()
        .map(|item| format!("[{}]:{}\n\n", item.id, item.to_str_for_rag()))
        .collect()
}
