//! Token accounting for prompt assembly.
//!
//! Counts with tiktoken encoders and fits conversation history into a model's
//! context window, dropping the oldest turns first.

use std::sync::Arc;
use tiktoken_rs::CoreBPE;

use crate::error::{RagError, Result};
use crate::llm::{ChatMessage, ChatRole};

/// Context window per model name, Azure and OpenAI spellings both listed.
const MODEL_TOKEN_LIMITS: &[(&str, usize)] = &[
    ("gpt-35-turbo", 4000),
    ("gpt-3.5-turbo", 4000),
    ("gpt-35-turbo-16k", 16000),
    ("gpt-3.5-turbo-16k", 16000),
    ("gpt-4", 8100),
    ("gpt-4-32k", 32000),
    ("gpt-4v", 128000),
    ("gpt-4o", 128000),
    ("gpt-4o-mini", 128000),
];

/// Framing tokens each chat message costs on top of its role and content.
const MESSAGE_OVERHEAD: usize = 3;

/// Smallest known context window; used for models not in the table.
pub fn minimum_token_limit() -> usize {
    MODEL_TOKEN_LIMITS
        .iter()
        .map(|(_, limit)| *limit)
        .min()
        .unwrap_or(4000)
}

/// Context window for `model`. Unknown models get the minimum when
/// `default_to_minimum` is set and are an error otherwise.
pub fn get_token_limit(model: &str, default_to_minimum: bool) -> Result<usize> {
    match MODEL_TOKEN_LIMITS.iter().find(|(name, _)| *name == model) {
        Some((_, limit)) => Ok(*limit),
        None if default_to_minimum => {
            let limit = minimum_token_limit();
            tracing::warn!(model = %model, limit, "Unknown model, using minimum token limit");
            Ok(limit)
        }
        None => Err(RagError::Config(format!("Unknown model for token limit: {}", model))),
    }
}

/// Token counter bound to one model's encoding.
#[derive(Clone)]
pub struct TokenCounter {
    bpe: Arc<CoreBPE>,
}

impl TokenCounter {
    /// Encoder for `model`. Unknown models use `cl100k_base` when `fallback_to_default` is set.
    pub fn for_model(model: &str, fallback_to_default: bool) -> Result<Self> {
        let openai_name = model.replace("gpt-35", "gpt-3.5");
        let bpe = match tiktoken_rs::get_bpe_from_model(&openai_name) {
            Ok(bpe) => bpe,
            Err(e) if fallback_to_default => {
                tracing::warn!(model = %model, error = %e, "No encoding for model, using cl100k_base");
                tiktoken_rs::cl100k_base()?
            }
            Err(e) => {
                return Err(RagError::Config(format!(
                    "No token encoding for model {}: {}",
                    model, e
                )))
            }
        };
        Ok(Self { bpe: Arc::new(bpe) })
    }

    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    pub fn count_message(&self, message: &ChatMessage) -> usize {
        let role = match message.role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };
        MESSAGE_OVERHEAD
            + self.count(role)
            + message.content.as_deref().map(|c| self.count(c)).unwrap_or(0)
    }
}

/// Assemble `[system, ...history, user]` within `max_tokens`.
///
/// The system prompt and new user message are always kept, even when they alone
/// exceed the budget. History is walked newest to oldest and stops at the first
/// message that does not fit, so only a contiguous newest suffix survives.
pub fn build_messages(
    counter: &TokenCounter,
    system_prompt: &str,
    new_user_message: &str,
    past_messages: &[ChatMessage],
    max_tokens: usize,
) -> Vec<ChatMessage> {
    let system = ChatMessage::system(system_prompt);
    let user = ChatMessage::user(new_user_message);
    let mut total = counter.count_message(&system) + counter.count_message(&user);
    if total > max_tokens {
        tracing::warn!(
            required = total,
            max_tokens,
            "System prompt and question exceed token budget; sending without history"
        );
    }

    let mut kept = Vec::new();
    for message in past_messages.iter().rev() {
        let tokens = counter.count_message(message);
        if total + tokens > max_tokens {
            break;
        }
        total += tokens;
        kept.push(message.clone());
    }

    if kept.len() < past_messages.len() {
        tracing::debug!(
            kept = kept.len(),
            dropped = past_messages.len() - kept.len(),
            "Truncated conversation history to fit token budget"
        );
    }

    let mut messages = Vec::with_capacity(kept.len() + 2);
    messages.push(system);
    messages.extend(kept.into_iter().rev());
    messages.push(user);
    messages
}
