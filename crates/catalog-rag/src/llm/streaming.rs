//! Streaming response handling for chat completions

use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::error::{RagError, Result};

/// Content fragments from a streaming completion. An `Err` item ends the stream.
pub struct TokenStream {
    receiver: mpsc::Receiver<Result<String>>,
}

impl TokenStream {
    pub fn new(receiver: mpsc::Receiver<Result<String>>) -> Self {
        Self { receiver }
    }

    /// Get next fragment
    pub async fn next(&mut self) -> Option<Result<String>> {
        self.receiver.recv().await
    }

    /// Collect all fragments into a string, stopping at the first error
    pub async fn collect(mut self) -> Result<String> {
        let mut result = String::new();
        while let Some(token) = self.next().await {
            result.push_str(&token?);
        }
        Ok(result)
    }
}

impl Stream for TokenStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// What one SSE line from an OpenAI-compatible stream carries.
#[derive(Debug, PartialEq)]
pub enum SseEvent {
    Content(String),
    Done,
    Skip,
    /// Unparseable payload or an `error` object from the provider.
    Error(String),
}

/// Parse one line of an OpenAI-style `text/event-stream` body.
pub fn parse_sse_line(line: &str) -> SseEvent {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return SseEvent::Skip;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return SseEvent::Done;
    }
    let parsed = match serde_json::from_str::<serde_json::Value>(data) {
        Ok(parsed) => parsed,
        Err(e) => return SseEvent::Error(format!("Malformed stream chunk: {}", e)),
    };
    if let Some(error) = parsed.get("error") {
        let message = error["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return SseEvent::Error(message);
    }
    match parsed["choices"][0]["delta"]["content"].as_str() {
        Some(content) if !content.is_empty() => SseEvent::Content(content.to_string()),
        _ => SseEvent::Skip,
    }
}

/// Read an SSE byte stream into `sender` until `[DONE]`, the body ends, or an error.
///
/// Bytes are buffered until a full line is available, so characters split across
/// chunks decode intact. Invalid UTF-8 and provider errors end the stream with `Err`.
pub async fn forward_sse<S, B>(byte_stream: S, sender: mpsc::Sender<Result<String>>)
where
    S: Stream<Item = std::result::Result<B, reqwest::Error>>,
    B: AsRef<[u8]>,
{
    futures::pin_mut!(byte_stream);
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk_result) = byte_stream.next().await {
        let chunk = match chunk_result {
            Ok(c) => c,
            Err(e) => {
                let _ = sender.send(Err(RagError::Http(e))).await;
                return;
            }
        };
        buffer.extend_from_slice(chunk.as_ref());

        while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = buffer.drain(..=line_end).collect();
            let line = match std::str::from_utf8(&raw) {
                Ok(line) => line,
                Err(e) => {
                    let _ = sender
                        .send(Err(RagError::Completion(format!(
                            "Invalid UTF-8 in stream: {}",
                            e
                        ))))
                        .await;
                    return;
                }
            };
            match parse_sse_line(line) {
                SseEvent::Done => return,
                SseEvent::Content(content) => {
                    if sender.send(Ok(content)).await.is_err() {
                        return;
                    }
                }
                SseEvent::Error(message) => {
                    tracing::error!(error = %message, "Chat stream failed");
                    let _ = sender.send(Err(RagError::Completion(message))).await;
                    return;
                }
                SseEvent::Skip => {}
            }
        }
    }
}
