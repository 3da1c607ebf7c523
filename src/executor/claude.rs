use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::ExecutorConfig;
use crate::error::{AppError, Result};
use crate::executor::{StepExecutor, StepRequest, StepResult};

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

pub struct ClaudeClient {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl ClaudeClient {
    pub fn new(api_key: &str, model: &str, max_tokens: u32) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_tokens,
        }
    }

    pub async fn send_message(&self, request: &MessagesRequest) -> Result<MessagesResponse> {
        let response = self
            .client
            .post(CLAUDE_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ClaudeRateLimited(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ClaudeApi(format!("API returned {status}: {body}")));
        }

        let body = response.json::<MessagesResponse>().await?;
        Ok(body)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }
}

// --- Request types ---

#[derive(Debug, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

// --- Response types ---

#[derive(Debug, Deserialize)]
pub struct MessagesResponse {
    pub model: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Per-million-token prices used to turn usage into a step cost.
#[derive(Debug, Clone, Copy)]
pub struct Pricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl Pricing {
    pub fn cost(&self, usage: &Usage) -> f64 {
        (f64::from(usage.input_tokens) * self.input_per_mtok
            + f64::from(usage.output_tokens) * self.output_per_mtok)
            / 1_000_000.0
    }
}

/// Single-turn executor over the Messages API.
///
/// The model only sees the prompt; it cannot touch the worktree, so this
/// backend suits dry runs and text-only steps.
pub struct ClaudeApiExecutor {
    client: ClaudeClient,
    pricing: Pricing,
}

impl ClaudeApiExecutor {
    pub fn new(config: &ExecutorConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::Config("executor.api_key is not set".to_string()))?;
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        Ok(Self {
            client: ClaudeClient::new(api_key, model, config.max_tokens),
            pricing: Pricing {
                input_per_mtok: config.input_cost_per_mtok,
                output_per_mtok: config.output_cost_per_mtok,
            },
        })
    }
}

#[async_trait]
impl StepExecutor for ClaudeApiExecutor {
    async fn run(&self, request: StepRequest<'_>) -> StepResult {
        let body = MessagesRequest {
            model: self.client.model().to_string(),
            max_tokens: self.client.max_tokens(),
            messages: vec![Message {
                role: "user".to_string(),
                content: request.prompt.to_string(),
            }],
        };

        let response = match self.client.send_message(&body).await {
            Ok(r) => r,
            Err(AppError::ClaudeRateLimited(msg)) => {
                tracing::warn!(label = request.label, "Claude API rate limited");
                return StepResult::failed(
                    format!("Rate limited: {msg}"),
                    0.0,
                    self.client.model(),
                );
            }
            Err(e) => return StepResult::failed(e.to_string(), 0.0, self.client.model()),
        };

        let cost = self.pricing.cost(&response.usage);
        tracing::info!(
            label = request.label,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            stop_reason = ?response.stop_reason,
            "Claude response"
        );

        StepResult::succeeded(extract_text(&response.content), cost, response.model)
    }
}

fn extract_text(content: &[ContentBlock]) -> String {
    content
        .iter()
        .filter_map(|block| {
            if let ContentBlock::Text { text } = block {
                Some(text.as_str())
            } else {
                None
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
