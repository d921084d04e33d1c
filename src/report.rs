use crate::model::Endpoint;
use crate::registry::RegistryError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const MISSING_KEY_PLACEHOLDER: &str = "Error: API key not found. Cannot generate report.";
pub const API_ERROR_PLACEHOLDER: &str = "Failed to generate incident report due to an API error.";
pub const EMPTY_PLACEHOLDER: &str = "No response generated.";

const PROMPT_TEMPLATE: &str = r#"You are a Senior Site Reliability Engineer.
The server monitor for "{{NAME}}" ({{URL}}) just detected a downtime event.

Error details (curl output):
"{{DETAIL}}"

Please generate a concise, professional incident report.
Include:
1. Incident Summary
2. Technical Analysis (hypothetical, based on the error)
3. Recommended Next Steps for the engineering team.

Format using Markdown. Keep it under 200 words."#;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("API key not configured")]
    MissingApiKey,
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Upstream returned no text")]
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub model: String,
    pub endpoint: String,
    /// Deadline for one generation request.
    pub timeout_ms: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            api_key_env: "API_KEY".to_string(),
            model: "gemini-2.5-flash".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            timeout_ms: 30_000,
        }
    }
}

impl ReportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

/// Writes an incident narrative for a downed endpoint.
#[async_trait::async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(&self, name: &str, url: &str, detail: &str) -> Result<String, ReportError>;
}

pub fn render_prompt(name: &str, url: &str, detail: &str) -> String {
    PROMPT_TEMPLATE
        .replace("{{NAME}}", name)
        .replace("{{URL}}", url)
        .replace("{{DETAIL}}", detail)
}

/// Google Generative Language `generateContent` over plain REST.
pub struct GeminiReporter {
    client: reqwest::Client,
    config: ReportConfig,
    api_key: Option<String>,
}

impl GeminiReporter {
    pub fn new(config: ReportConfig, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    /// Reads the key from the configured environment variable.
    pub fn from_env(config: ReportConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env).ok();
        Self::new(config, api_key)
    }
}

#[async_trait::async_trait]
impl ReportGenerator for GeminiReporter {
    async fn generate(&self, name: &str, url: &str, detail: &str) -> Result<String, ReportError> {
        let api_key = self.api_key.as_deref().ok_or(ReportError::MissingApiKey)?;
        let endpoint = format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        );
        let payload = json!({
            "contents": [{ "parts": [{ "text": render_prompt(name, url, detail) }] }]
        });

        tracing::debug!("Requesting incident report for {} from {}", name, endpoint);
        let body: serde_json::Value = self
            .client
            .post(&endpoint)
            .timeout(self.config.timeout())
            .query(&[("key", api_key)])
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let text: String = body["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(ReportError::Empty);
        }
        Ok(text)
    }
}

/// Never fails: collaborator errors become a displayable placeholder.
pub async fn generate_incident_report(
    generator: &dyn ReportGenerator,
    name: &str,
    url: &str,
    detail: &str,
) -> String {
    match generator.generate(name, url, detail).await {
        Ok(text) => text,
        Err(ReportError::MissingApiKey) => MISSING_KEY_PLACEHOLDER.to_string(),
        Err(ReportError::Empty) => EMPTY_PLACEHOLDER.to_string(),
        Err(e) => {
            tracing::error!("Incident report for {} failed: {}", name, e);
            API_ERROR_PLACEHOLDER.to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "report", rename_all = "lowercase")]
pub enum ReportState {
    Pending,
    Ready(String),
}

/// Per-endpoint report status for the presentation layer.
#[derive(Clone)]
pub struct ReportBoard {
    generator: Arc<dyn ReportGenerator>,
    reports: Arc<DashMap<String, ReportState>>,
}

impl ReportBoard {
    pub fn new(generator: Arc<dyn ReportGenerator>) -> Self {
        Self {
            generator,
            reports: Arc::new(DashMap::new()),
        }
    }

    pub fn get(&self, id: &str) -> Option<ReportState> {
        self.reports.get(id).map(|r| r.value().clone())
    }

    pub fn forget(&self, id: &str) {
        self.reports.remove(id);
    }

    /// Marks the endpoint pending and generates in the background. Only DOWN
    /// endpoints qualify.
    pub fn request(
        &self,
        endpoint: &Endpoint,
    ) -> Result<tokio::task::JoinHandle<()>, RegistryError> {
        if !endpoint.capabilities().can_report {
            return Err(RegistryError::NotDown(endpoint.id.clone()));
        }
        self.reports.insert(endpoint.id.clone(), ReportState::Pending);

        let generator = self.generator.clone();
        let reports = self.reports.clone();
        let id = endpoint.id.clone();
        let name = endpoint.name.clone();
        let url = endpoint.url.clone();
        let detail = endpoint
            .last_detail
            .clone()
            .unwrap_or_else(|| "Host unreachable.".to_string());

        Ok(tokio::spawn(async move {
            let report = generate_incident_report(generator.as_ref(), &name, &url, &detail).await;
            // the endpoint may have been deleted meanwhile
            if let Some(mut slot) = reports.get_mut(&id) {
                *slot = ReportState::Ready(report);
            }
        }))
    }
}
