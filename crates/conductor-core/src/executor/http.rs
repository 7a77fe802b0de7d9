//! HTTP agent executor: calls an LLM API directly.
//!
//! The specialist's instructions become the system prompt and the SubTask
//! instruction becomes the single user message. Two wire formats:
//!
//! - Anthropic Messages API: `POST {base_url}/v1/messages`
//! - OpenAI-compatible chat completions: `POST {base_url}/chat/completions`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{AgentExecutor, AgentOutput, DispatchRequest, ExecutorError, UsageInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HttpAdapter {
    #[default]
    Anthropic,
    #[serde(alias = "opencode")]
    OpenAi,
}

impl std::str::FromStr for HttpAdapter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" | "opencode" => Ok(Self::OpenAi),
            other => Err(format!("Unknown adapter type: '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpExecutorConfig {
    pub adapter: HttpAdapter,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
}

impl HttpExecutorConfig {
    pub fn default_base_url(adapter: HttpAdapter) -> &'static str {
        match adapter {
            HttpAdapter::Anthropic => "https://api.anthropic.com",
            HttpAdapter::OpenAi => "https://api.openai.com/v1",
        }
    }

    pub fn default_model(adapter: HttpAdapter) -> &'static str {
        match adapter {
            HttpAdapter::Anthropic => "claude-sonnet-4-20250514",
            HttpAdapter::OpenAi => "gpt-4o",
        }
    }
}

pub struct HttpAgentExecutor {
    client: reqwest::Client,
    config: HttpExecutorConfig,
}

impl HttpAgentExecutor {
    pub fn new(config: HttpExecutorConfig) -> Result<Self, ExecutorError> {
        if config.api_key.trim().is_empty() {
            return Err(ExecutorError::NotConfigured(
                "no API key; set ANTHROPIC_API_KEY or OPENAI_API_KEY, or configure executor.apiKey"
                    .to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ExecutorError::NotConfigured(format!("HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpExecutorConfig {
        &self.config
    }

    async fn call_anthropic(&self, request: &DispatchRequest) -> Result<AgentOutput, ExecutorError> {
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));

        let mut body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": [
                { "role": "user", "content": user_message(request) }
            ]
        });
        if !request.specialist.instructions.is_empty() {
            body["system"] = serde_json::Value::String(request.specialist.instructions.clone());
        }
        if let Some(temp) = self.config.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        tracing::debug!(
            subtask_id = %request.subtask_id,
            "[HttpExecutor] POST {} (model: {})",
            url,
            self.config.model
        );

        let response = self
            .client
            .post(&url)
            .timeout(request.timeout)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, request))?;

        let json = read_json(response).await?;

        // Concatenate every text block
        let content = json
            .get("content")
            .and_then(|c| c.as_array())
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        let usage = json.get("usage").map(|u| UsageInfo {
            input_tokens: u.get("input_tokens").and_then(|v| v.as_u64()),
            output_tokens: u.get("output_tokens").and_then(|v| v.as_u64()),
        });

        Ok(AgentOutput {
            content,
            model: json.get("model").and_then(|m| m.as_str()).map(|m| m.to_string()),
            usage,
        })
    }

    async fn call_openai(&self, request: &DispatchRequest) -> Result<AgentOutput, ExecutorError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let mut messages = vec![];
        if !request.specialist.instructions.is_empty() {
            messages.push(serde_json::json!({
                "role": "system",
                "content": request.specialist.instructions
            }));
        }
        messages.push(serde_json::json!({
            "role": "user",
            "content": user_message(request)
        }));

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": self.config.max_tokens,
        });
        if let Some(temp) = self.config.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        tracing::debug!(
            subtask_id = %request.subtask_id,
            "[HttpExecutor] POST {} (model: {})",
            url,
            self.config.model
        );

        let response = self
            .client
            .post(&url)
            .timeout(request.timeout)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, request))?;

        let json = read_json(response).await?;

        let content = json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|msg| msg.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .to_string();

        let usage = json.get("usage").map(|u| UsageInfo {
            input_tokens: u
                .get("prompt_tokens")
                .or_else(|| u.get("input_tokens"))
                .and_then(|v| v.as_u64()),
            output_tokens: u
                .get("completion_tokens")
                .or_else(|| u.get("output_tokens"))
                .and_then(|v| v.as_u64()),
        });

        Ok(AgentOutput {
            content,
            model: json.get("model").and_then(|m| m.as_str()).map(|m| m.to_string()),
            usage,
        })
    }
}

#[async_trait]
impl AgentExecutor for HttpAgentExecutor {
    fn name(&self) -> &str {
        match self.config.adapter {
            HttpAdapter::Anthropic => "anthropic",
            HttpAdapter::OpenAi => "openai",
        }
    }

    async fn invoke(&self, request: DispatchRequest) -> Result<AgentOutput, ExecutorError> {
        let output = match self.config.adapter {
            HttpAdapter::Anthropic => self.call_anthropic(&request).await?,
            HttpAdapter::OpenAi => self.call_openai(&request).await?,
        };
        if output.content.trim().is_empty() {
            return Err(ExecutorError::Failed("empty response from model".to_string()));
        }
        Ok(output)
    }
}

fn user_message(request: &DispatchRequest) -> String {
    match &request.workspace {
        Some(ws) => format!("Workspace: {}\n\n{}", ws.display(), request.instruction),
        None => request.instruction.clone(),
    }
}

fn map_reqwest_error(e: reqwest::Error, request: &DispatchRequest) -> ExecutorError {
    if e.is_timeout() {
        ExecutorError::TimedOut(request.timeout)
    } else {
        ExecutorError::Failed(format!("HTTP request failed: {}", e))
    }
}

/// Client errors are permanent, except request timeout and rate limiting.
fn status_error(status: reqwest::StatusCode, message: String) -> ExecutorError {
    let transient = status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
    if status.is_client_error() && !transient {
        ExecutorError::Rejected(message)
    } else {
        ExecutorError::Failed(message)
    }
}

async fn read_json(response: reqwest::Response) -> Result<serde_json::Value, ExecutorError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ExecutorError::Failed(format!("Failed to read response body: {}", e)))?;

    if !status.is_success() {
        let message = format!("API returned {}: {}", status, crate::truncate(&text, 500));
        return Err(status_error(status, message));
    }

    serde_json::from_str(&text)
        .map_err(|e| ExecutorError::Failed(format!("Failed to parse response JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ErrorKind;

    #[test]
    fn test_adapter_from_str() {
        assert_eq!("anthropic".parse::<HttpAdapter>().unwrap(), HttpAdapter::Anthropic);
        assert_eq!("OpenAI".parse::<HttpAdapter>().unwrap(), HttpAdapter::OpenAi);
        assert!("grpc".parse::<HttpAdapter>().is_err());
    }

    #[test]
    fn test_missing_api_key_is_rejected() {
        let config = HttpExecutorConfig {
            adapter: HttpAdapter::Anthropic,
            base_url: HttpExecutorConfig::default_base_url(HttpAdapter::Anthropic).to_string(),
            api_key: String::new(),
            model: "m".to_string(),
            max_tokens: 1024,
            temperature: None,
        };
        assert!(matches!(
            HttpAgentExecutor::new(config),
            Err(ExecutorError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_status_error_classification() {
        use reqwest::StatusCode;
        let kind = |status| status_error(status, String::new()).kind();
        assert_eq!(kind(StatusCode::UNAUTHORIZED), ErrorKind::ExecutorRejected);
        assert_eq!(kind(StatusCode::BAD_REQUEST), ErrorKind::ExecutorRejected);
        assert_eq!(kind(StatusCode::TOO_MANY_REQUESTS), ErrorKind::ExecutorFailure);
        assert_eq!(kind(StatusCode::REQUEST_TIMEOUT), ErrorKind::ExecutorFailure);
        assert_eq!(kind(StatusCode::BAD_GATEWAY), ErrorKind::ExecutorFailure);
    }
}
