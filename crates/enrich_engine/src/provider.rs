use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

/// Opaque per-group generation settings (prompt flavour, voice, ...),
/// forwarded to the provider untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub key: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl GroupConfig {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            params: serde_json::Map::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("provider is not configured: {0}")]
    NotConfigured(String),
    #[error("provider request timed out")]
    Timeout,
    #[error("provider returned http status {status}: {message}")]
    HttpStatus { status: u16, message: String },
    #[error("provider response was malformed: {0}")]
    Malformed(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("provider rejected the request: {0}")]
    Rejected(String),
}

impl ProviderError {
    /// Whether a later retry by the caller could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout | ProviderError::Network(_) => true,
            ProviderError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            ProviderError::NotConfigured(_)
            | ProviderError::Malformed(_)
            | ProviderError::Rejected(_) => false,
        }
    }
}

/// External text-explanation and speech-synthesis service.
#[async_trait::async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Checked once before a group starts; failing here aborts the group.
    fn check_ready(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn explain(&self, text: &str, config: &GroupConfig) -> Result<String, ProviderError>;

    async fn synthesize(&self, text: &str, config: &GroupConfig) -> Result<Vec<u8>, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerationRequest<'a> {
    text: &'a str,
    config: &'a GroupConfig,
}

#[derive(Debug, Deserialize)]
struct ExplainResponse {
    text: String,
}

/// JSON-over-HTTP provider: `POST {base}/explain` answers `{"text": ...}`,
/// `POST {base}/synthesize` answers raw audio bytes.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    settings: ProviderSettings,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(settings: ProviderSettings) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| ProviderError::Network(err.to_string()))?;
        Ok(Self { settings, client })
    }

    fn endpoint(&self, path: &str) -> Result<String, ProviderError> {
        let base = self
            .settings
            .base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ProviderError::NotConfigured("missing provider url".into()))?;
        Ok(format!("{}/{}", base.trim_end_matches('/'), path))
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.settings
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ProviderError::NotConfigured("missing api key".into()))
    }

    async fn post(
        &self,
        path: &str,
        text: &str,
        config: &GroupConfig,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = self.endpoint(path)?;
        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key()?))
            .json(&GenerationRequest { text, config })
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            let message = if message.trim().is_empty() {
                status.to_string()
            } else {
                message
            };
            return Err(ProviderError::HttpStatus {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl GenerationProvider for HttpProvider {
    fn check_ready(&self) -> Result<(), ProviderError> {
        self.endpoint("")?;
        self.api_key()?;
        Ok(())
    }

    async fn explain(&self, text: &str, config: &GroupConfig) -> Result<String, ProviderError> {
        let response = self.post("explain", text, config).await?;
        let body: ExplainResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Malformed(err.to_string()))?;
        if body.text.trim().is_empty() {
            return Err(ProviderError::Malformed("empty explanation".into()));
        }
        Ok(body.text)
    }

    async fn synthesize(&self, text: &str, config: &GroupConfig) -> Result<Vec<u8>, ProviderError> {
        let response = self.post("synthesize", text, config).await?;
        if let Some(content_type) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
        {
            if content_type.starts_with("application/json") {
                return Err(ProviderError::Malformed(format!(
                    "expected audio, got {content_type}"
                )));
            }
        }
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        if bytes.is_empty() {
            return Err(ProviderError::Malformed("empty audio".into()));
        }
        Ok(bytes.to_vec())
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        return ProviderError::Timeout;
    }
    ProviderError::Network(err.to_string())
}
