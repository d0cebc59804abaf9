//! Recording test doubles for the three pipeline collaborators.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::embeddings::{EmbeddingClient, EmbeddingRequest};
use crate::error::{RagError, Result};
use crate::llm::{
    ChatClient, ChatCompletion, ChatCompletionRequest, ChatMessage, Choice, TokenStream, ToolCall,
};
use crate::search::Retriever;
use crate::types::{RetrievedItem, SearchRequest};

/// Shared, ordered record of which collaborator was called.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<&'static str>>>);

impl CallLog {
    pub fn push(&self, event: &'static str) {
        self.0.lock().push(event);
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.0.lock().clone()
    }
}

pub fn completion_with_message(message: ChatMessage) -> ChatCompletion {
    ChatCompletion {
        id: "chatcmpl-test".into(),
        object: "chat.completion".into(),
        created: 1_700_000_000,
        model: "gpt-35-turbo".into(),
        choices: vec![Choice {
            index: 0,
            message,
            finish_reason: Some("stop".into()),
            context: None,
        }],
        usage: None,
    }
}

pub fn completion_with_content(content: Option<&str>) -> ChatCompletion {
    completion_with_message(ChatMessage {
        role: crate::llm::ChatRole::Assistant,
        content: content.map(str::to_string),
        tool_calls: None,
    })
}

pub fn completion_with_tool_calls(calls: Vec<ToolCall>) -> ChatCompletion {
    completion_with_message(ChatMessage::assistant_tool_calls(calls))
}

pub struct MockEmbeddingClient {
    dims: usize,
    requests: Mutex<Vec<EmbeddingRequest>>,
    log: CallLog,
}

impl MockEmbeddingClient {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            requests: Mutex::new(Vec::new()),
            log: CallLog::default(),
        }
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn requests(&self) -> Vec<EmbeddingRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl EmbeddingClient for MockEmbeddingClient {
    async fn create_embedding(&self, request: &EmbeddingRequest) -> Result<Vec<f32>> {
        self.log.push("embed");
        self.requests.lock().push(request.clone());
        Ok(vec![0.5; self.dims])
    }
}

pub struct MockRetriever {
    items: Vec<RetrievedItem>,
    requests: Mutex<Vec<SearchRequest>>,
    log: CallLog,
    fail: bool,
}

impl MockRetriever {
    pub fn with_ids(ids: &[&str]) -> Self {
        let items = ids
            .iter()
            .map(|id| RetrievedItem {
                id: id.to_string(),
                content: format!("Name:Item {} Price:10", id),
                record: json!({"id": id}),
            })
            .collect();
        Self {
            items,
            requests: Mutex::new(Vec::new()),
            log: CallLog::default(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::with_ids(&[])
        }
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn requests(&self) -> Vec<SearchRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Retriever for MockRetriever {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<RetrievedItem>> {
        self.log.push("search");
        self.requests.lock().push(request.clone());
        if self.fail {
            return Err(RagError::Retrieval("database unavailable".into()));
        }
        Ok(self.items.iter().take(request.top_k).cloned().collect())
    }
}

/// Replies with queued completions in order, then with a fixed answer.
pub struct MockChatClient {
    responses: Mutex<VecDeque<ChatCompletion>>,
    requests: Mutex<Vec<ChatCompletionRequest>>,
    stream_tokens: Vec<String>,
    log: CallLog,
}

impl MockChatClient {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            stream_tokens: vec!["The ".into(), "tent ".into(), "[1].".into()],
            log: CallLog::default(),
        }
    }

    pub fn with_response(self, completion: ChatCompletion) -> Self {
        self.responses.lock().push_back(completion);
        self
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn requests(&self) -> Vec<ChatCompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn complete(&self, request: &ChatCompletionRequest) -> Result<ChatCompletion> {
        self.log.push("complete");
        self.requests.lock().push(request.clone());
        let queued = self.responses.lock().pop_front();
        Ok(queued.unwrap_or_else(|| completion_with_content(Some("Try the TrailMaster [1]."))))
    }

    async fn complete_stream(&self, request: &ChatCompletionRequest) -> Result<TokenStream> {
        self.log.push("complete_stream");
        self.requests.lock().push(request.clone());
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        for token in &self.stream_tokens {
            let _ = tx.send(Ok(token.clone())).await;
        }
        Ok(TokenStream::new(rx))
    }
}
