//! OpenAI-compatible HTTP client for chat completions and embeddings.
//! Covers OpenAI, Azure OpenAI deployments, and Ollama's `/v1` endpoint.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;

use super::streaming::forward_sse;
use super::{ChatClient, ChatCompletion, ChatCompletionRequest, TokenStream};
use crate::config::{ApiHost, ChatConfig, EmbeddingConfig};
use crate::embeddings::{EmbeddingClient, EmbeddingRequest};
use crate::error::{RagError, Result};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";
const DEFAULT_AZURE_API_VERSION: &str = "2024-03-01-preview";

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

pub struct OpenAiCompatibleClient {
    host: ApiHost,
    api_key: Option<String>,
    base_url: String,
    api_version: String,
    client: Client,
}

impl OpenAiCompatibleClient {
    pub fn new(
        host: ApiHost,
        endpoint: Option<String>,
        api_key: Option<String>,
        api_version: Option<String>,
    ) -> Result<Self> {
        let base_url = match (host, endpoint) {
            (_, Some(endpoint)) => endpoint.trim_end_matches('/').to_string(),
            (ApiHost::OpenAi, None) => OPENAI_BASE_URL.to_string(),
            (ApiHost::Ollama, None) => OLLAMA_BASE_URL.to_string(),
            (ApiHost::Azure, None) => {
                return Err(RagError::Config("Azure OpenAI requires an endpoint".into()))
            }
        };

        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .timeout(std::time::Duration::from_secs(300))
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()?;

        tracing::info!(host = ?host, base_url = %base_url, "Creating OpenAI-compatible client");

        Ok(Self {
            host,
            api_key,
            base_url,
            api_version: api_version.unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
            client,
        })
    }

    pub fn from_chat_config(config: &ChatConfig) -> Result<Self> {
        Self::new(
            config.host,
            config.endpoint.clone(),
            config.api_key.clone(),
            config.api_version.clone(),
        )
    }

    pub fn from_embedding_config(config: &EmbeddingConfig) -> Result<Self> {
        Self::new(
            config.host,
            config.endpoint.clone(),
            config.api_key.clone(),
            config.api_version.clone(),
        )
    }

    /// Endpoint for `operation`. Azure routes by deployment, so `model` must be the deployment there.
    fn url(&self, model: &str, operation: &str) -> String {
        match self.host {
            ApiHost::Azure => format!(
                "{}/openai/deployments/{}/{}?api-version={}",
                self.base_url, model, operation, self.api_version
            ),
            ApiHost::OpenAi | ApiHost::Ollama => format!("{}/{}", self.base_url, operation),
        }
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match (&self.host, &self.api_key) {
            (ApiHost::Azure, Some(key)) => builder.header("api-key", key),
            (_, Some(key)) => builder.header("Authorization", format!("Bearer {}", key)),
            (_, None) => builder,
        }
    }

    async fn post(&self, endpoint: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        self.authorize(self.client.post(endpoint))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    tracing::error!(endpoint = %endpoint, "Request timed out");
                } else if e.is_connect() {
                    tracing::error!(endpoint = %endpoint, error = %e, "Connection failed");
                }
                RagError::Http(e)
            })
    }

    /// Parse a response body as JSON, returning a clear error if the server returned HTML
    /// (e.g. a gateway error page) instead of valid JSON.
    async fn parse_json_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        endpoint: &str,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;

        let trimmed = body.trim_start();
        if trimmed.starts_with('<') {
            let preview: String = trimmed.chars().take(200).collect();
            return Err(RagError::Other(anyhow::anyhow!(
                "Endpoint {} returned HTML instead of JSON (HTTP {}): {}",
                endpoint,
                status,
                preview
            )));
        }

        serde_json::from_str::<T>(&body).map_err(|e| {
            let preview: String = body.chars().take(300).collect();
            RagError::Other(anyhow::anyhow!(
                "Failed to parse JSON from {} (HTTP {}): {}. Response body: {}",
                endpoint,
                status,
                e,
                preview
            ))
        })
    }
}

#[async_trait]
impl ChatClient for OpenAiCompatibleClient {
    async fn complete(&self, request: &ChatCompletionRequest) -> Result<ChatCompletion> {
        let endpoint = self.url(&request.model, "chat/completions");
        let mut body = request.to_openai_body();
        body["stream"] = json!(false);

        tracing::debug!(
            endpoint = %endpoint,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending chat completion request"
        );

        let response = self.post(&endpoint, &body).await?;
        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(RagError::Completion(format!("Chat API error ({}): {}", status, error)));
        }

        let completion: ChatCompletion = Self::parse_json_response(response, &endpoint).await?;
        if completion.choices.is_empty() {
            return Err(RagError::Completion("No choices returned from API".into()));
        }
        Ok(completion)
    }

    async fn complete_stream(&self, request: &ChatCompletionRequest) -> Result<TokenStream> {
        let endpoint = self.url(&request.model, "chat/completions");
        let mut body = request.to_openai_body();
        body["stream"] = json!(true);

        let response = self.post(&endpoint, &body).await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !status.is_success() || content_type.contains("text/html") {
            let error = response.text().await.unwrap_or_default();
            let preview: String = error.chars().take(300).collect();
            return Err(RagError::Completion(format!(
                "Chat streaming error (HTTP {}, content-type: {}): {}",
                status, content_type, preview
            )));
        }

        let (sender, receiver) = tokio::sync::mpsc::channel::<Result<String>>(256);
        tokio::spawn(forward_sse(response.bytes_stream(), sender));

        Ok(TokenStream::new(receiver))
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiCompatibleClient {
    async fn create_embedding(&self, request: &EmbeddingRequest) -> Result<Vec<f32>> {
        let endpoint = self.url(&request.model, "embeddings");
        let body = serde_json::to_value(request)?;

        let response = self.post(&endpoint, &body).await?;
        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(RagError::Embedding(format!(
                "Embedding API error ({}): {}",
                status, error
            )));
        }

        let result: EmbeddingResponse = Self::parse_json_response(response, &endpoint).await?;
        result
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| RagError::Embedding("Empty embedding response".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one chunked SSE response, flushing each piece separately.
    async fn serve_sse_chunks(chunks: Vec<Vec<u8>>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_lowercase();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
            }

            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n",
                )
                .await
                .unwrap();
            for chunk in chunks {
                socket
                    .write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
                    .await
                    .unwrap();
                socket.write_all(&chunk).await.unwrap();
                socket.write_all(b"\r\n").await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
            socket.write_all(b"0\r\n\r\n").await.unwrap();
            socket.flush().await.unwrap();
        });

        format!("http://{}", addr)
    }

    fn stream_request() -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "llama3.1".into(),
            messages: vec![ChatMessage::user("price of the trail shoes?")],
            temperature: 0.3,
            max_tokens: 1024,
            n: 1,
            stream: true,
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn test_stream_keeps_char_split_across_chunks() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Price 45\u{20ac}\"}}]}\n\ndata: [DONE]\n\n";
        let split = body.find('\u{20ac}').unwrap() + 1;
        let bytes = body.as_bytes();
        let endpoint =
            serve_sse_chunks(vec![bytes[..split].to_vec(), bytes[split..].to_vec()]).await;
        let client = OpenAiCompatibleClient::new(ApiHost::Ollama, Some(endpoint), None, None).unwrap();

        let answer = client
            .complete_stream(&stream_request())
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(answer, "Price 45\u{20ac}");
    }

    #[tokio::test]
    async fn test_stream_error_event_fails_collect() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"The \"}}]}\n\n",
            "data: {\"error\":{\"message\":\"content_filter\"}}\n\n",
        );
        let endpoint = serve_sse_chunks(vec![body.as_bytes().to_vec()]).await;
        let client = OpenAiCompatibleClient::new(ApiHost::Ollama, Some(endpoint), None, None).unwrap();

        let result = client.complete_stream(&stream_request()).await.unwrap().collect().await;

        assert!(matches!(result, Err(RagError::Completion(_))));
    }

    #[test]
    fn test_openai_urls() {
        let client = OpenAiCompatibleClient::new(ApiHost::OpenAi, None, Some("sk".into()), None).unwrap();
        assert_eq!(
            client.url("gpt-4", "chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            client.url("text-embedding-3-small", "embeddings"),
            "https://api.openai.com/v1/embeddings"
        );
    }

    #[test]
    fn test_azure_urls_use_deployment() {
        let client = OpenAiCompatibleClient::new(
            ApiHost::Azure,
            Some("https://example.openai.azure.com/".into()),
            Some("key".into()),
            Some("2024-02-01".into()),
        )
        .unwrap();
        assert_eq!(
            client.url("chat", "chat/completions"),
            "https://example.openai.azure.com/openai/deployments/chat/chat/completions?api-version=2024-02-01"
        );
    }

    #[test]
    fn test_azure_requires_endpoint() {
        assert!(OpenAiCompatibleClient::new(ApiHost::Azure, None, None, None).is_err());
    }

    #[test]
    fn test_ollama_default_endpoint() {
        let client = OpenAiCompatibleClient::new(ApiHost::Ollama, None, None, None).unwrap();
        assert_eq!(
            client.url("llama3.1", "chat/completions"),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[test]
    fn test_auth_headers() {
        let azure = OpenAiCompatibleClient::new(
            ApiHost::Azure,
            Some("https://example.openai.azure.com".into()),
            Some("azure-key".into()),
            None,
        )
        .unwrap();
        let request = azure
            .authorize(azure.client.post("https://example.openai.azure.com"))
            .build()
            .unwrap();
        assert_eq!(request.headers()["api-key"], "azure-key");
        assert!(request.headers().get("Authorization").is_none());

        let openai =
            OpenAiCompatibleClient::new(ApiHost::OpenAi, None, Some("sk-test".into()), None).unwrap();
        let request = openai
            .authorize(openai.client.post(OPENAI_BASE_URL))
            .build()
            .unwrap();
        assert_eq!(request.headers()["Authorization"], "Bearer sk-test");

        let ollama = OpenAiCompatibleClient::new(ApiHost::Ollama, None, None, None).unwrap();
        let request = ollama
            .authorize(ollama.client.post(OLLAMA_BASE_URL))
            .build()
            .unwrap();
        assert!(request.headers().get("Authorization").is_none());
    }
}
