use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RagError, Result};

/// Where a model is hosted. Decides URL layout and authentication.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiHost {
    #[default]
    OpenAi,
    Azure,
    Ollama,
}

impl ApiHost {
    fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some("azure") => Self::Azure,
            Some("ollama") => Self::Ollama,
            _ => Self::OpenAi,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    pub chat: ChatConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    /// Replaces the built-in answer prompt. Read once when the pipeline is built.
    #[serde(default)]
    pub prompt_template_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default)]
    pub host: ApiHost,
    pub model: String,
    /// Azure deployment name; takes precedence over `model` in requests.
    #[serde(default)]
    pub deployment: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub host: ApiHost,
    pub model: String,
    #[serde(default)]
    pub deployment: Option<String>,
    pub dimensions: usize,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Result cap used when a request does not override `top`.
    pub default_top: usize,
    /// Rank constant for reciprocal rank fusion in the in-memory catalog.
    pub rrf_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top: 3,
            rrf_k: 60,
        }
    }
}

impl RagConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<()> {
        if self.chat.model.trim().is_empty() {
            return Err(RagError::Config("chat.model must be set".into()));
        }
        if self.embedding.model.trim().is_empty() {
            return Err(RagError::Config("embedding.model must be set".into()));
        }
        if self.embedding.dimensions == 0 {
            return Err(RagError::Config("embedding.dimensions must be > 0".into()));
        }
        if self.search.default_top == 0 {
            return Err(RagError::Config("search.default_top must be > 0".into()));
        }
        if self.chat.host == ApiHost::Azure {
            if self.chat.endpoint.is_none() {
                return Err(RagError::Config("chat.endpoint is required for azure".into()));
            }
            if self.chat.deployment.is_none() {
                return Err(RagError::Config("chat.deployment is required for azure".into()));
            }
        }
        if self.embedding.host == ApiHost::Azure {
            if self.embedding.endpoint.is_none() {
                return Err(RagError::Config(
                    "embedding.endpoint is required for azure".into(),
                ));
            }
            if self.embedding.deployment.is_none() {
                return Err(RagError::Config(
                    "embedding.deployment is required for azure".into(),
                ));
            }
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RagError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| RagError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Build config from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let chat_host = ApiHost::from_env_value(lookup("OPENAI_CHAT_HOST").as_deref());
        let chat = match chat_host {
            ApiHost::Azure => ChatConfig {
                host: chat_host,
                model: lookup("AZURE_OPENAI_CHAT_MODEL").unwrap_or_default(),
                deployment: lookup("AZURE_OPENAI_CHAT_DEPLOYMENT"),
                endpoint: lookup("AZURE_OPENAI_ENDPOINT"),
                api_key: lookup("AZURE_OPENAI_KEY"),
                api_version: lookup("AZURE_OPENAI_VERSION"),
            },
            ApiHost::Ollama => ChatConfig {
                host: chat_host,
                model: lookup("OLLAMA_CHAT_MODEL").unwrap_or_default(),
                deployment: None,
                endpoint: lookup("OLLAMA_ENDPOINT"),
                api_key: None,
                api_version: None,
            },
            ApiHost::OpenAi => ChatConfig {
                host: chat_host,
                model: lookup("OPENAICOM_CHAT_MODEL").unwrap_or_default(),
                deployment: None,
                endpoint: None,
                api_key: lookup("OPENAICOM_KEY"),
                api_version: None,
            },
        };

        let embed_host = ApiHost::from_env_value(lookup("OPENAI_EMBED_HOST").as_deref());
        let parse_dims = |key: &str| -> Result<usize> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|e| RagError::Config(format!("{} is not a number: {}", key, e))),
                None => Ok(1536),
            }
        };
        let embedding = match embed_host {
            ApiHost::Azure => EmbeddingConfig {
                host: embed_host,
                model: lookup("AZURE_OPENAI_EMBED_MODEL")
                    .unwrap_or_else(|| "text-embedding-ada-002".to_string()),
                deployment: lookup("AZURE_OPENAI_EMBED_DEPLOYMENT"),
                dimensions: parse_dims("AZURE_OPENAI_EMBED_MODEL_DIMENSIONS")?,
                endpoint: lookup("AZURE_OPENAI_ENDPOINT"),
                api_key: lookup("AZURE_OPENAI_KEY"),
                api_version: lookup("AZURE_OPENAI_VERSION"),
            },
            _ => EmbeddingConfig {
                host: ApiHost::OpenAi,
                model: lookup("OPENAICOM_EMBED_MODEL")
                    .unwrap_or_else(|| "text-embedding-ada-002".to_string()),
                deployment: None,
                dimensions: parse_dims("OPENAICOM_EMBED_MODEL_DIMENSIONS")?,
                endpoint: None,
                api_key: lookup("OPENAICOM_KEY"),
                api_version: None,
            },
        };

        let config = Self {
            chat,
            embedding,
            search: SearchConfig::default(),
            prompt_template_path: lookup("PROMPT_TEMPLATE_PATH").map(PathBuf::from),
        };
        config.validate()?;
        Ok(config)
    }
}
