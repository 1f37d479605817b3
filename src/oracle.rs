//! Judgment oracle - the external reasoning backend

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::OracleConfig;
use crate::error::OracleError;

/// Which operation a judgment request serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgmentKind {
    Evaluation,
    Synthesis,
    Continuation,
}

/// Structured request: the asking agent plus a tagged-section prompt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JudgmentRequest {
    pub kind: JudgmentKind,
    pub agent: String,
    pub prompt: String,
}

/// Raw tagged text returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgmentResponse {
    pub text: String,
}

impl JudgmentResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Capability that turns a judgment request into a judgment
///
/// Failures are surfaced to the caller; nothing here retries.
#[async_trait]
pub trait Oracle: Send + Sync {
    fn name(&self) -> &str;

    async fn judge(&self, request: JudgmentRequest) -> Result<JudgmentResponse, OracleError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<ProviderRouting<'a>>,
}

#[derive(Serialize)]
struct ProviderRouting<'a> {
    order: [&'a str; 1],
    allow_fallbacks: bool,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// OpenAI-compatible chat-completions backend (OpenRouter by default)
pub struct ChatCompletionsOracle {
    config: OracleConfig,
    client: reqwest::Client,
}

impl ChatCompletionsOracle {
    pub fn new(config: OracleConfig) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| OracleError::Network(e.to_string()))?;
        Ok(Self { config, client })
    }

    pub fn from_env() -> Result<Self, OracleError> {
        Self::new(OracleConfig::default())
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl Oracle for ChatCompletionsOracle {
    fn name(&self) -> &str {
        "chat-completions"
    }

    #[instrument(skip(self, request), fields(kind = ?request.kind, agent = %request.agent))]
    async fn judge(&self, request: JudgmentRequest) -> Result<JudgmentResponse, OracleError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: request.prompt,
            }],
            provider: self.config.provider.as_deref().map(|p| ProviderRouting {
                order: [p],
                allow_fallbacks: false,
            }),
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let mut req = self
            .client
            .post(&url)
            .header("HTTP-Referer", &self.config.referer)
            .header("X-Title", &self.config.title)
            .json(&body);
        if let Some(ref key) = self.config.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| OracleError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Transport {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;
        let text = chat
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| OracleError::InvalidResponse("no choices in completion".into()))?;

        debug!(chars = text.len(), "Received judgment");
        Ok(JudgmentResponse { text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_shape() {
        let body = ChatRequest {
            model: "some/model",
            messages: vec![ChatMessage {
                role: "user".into(),
                content: "hi".into(),
            }],
            provider: Some(ProviderRouting {
                order: ["fast"],
                allow_fallbacks: false,
            }),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "some/model");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["provider"]["order"][0], "fast");
        assert_eq!(json["provider"]["allow_fallbacks"], false);
    }

    #[test]
    fn test_chat_request_without_provider() {
        let body = ChatRequest {
            model: "m",
            messages: vec![],
            provider: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("provider").is_none());
    }

    #[test]
    fn test_chat_response_parses() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"<a>1</a>"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content, "<a>1</a>");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_error() {
        let oracle = ChatCompletionsOracle::new(OracleConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
            ..OracleConfig::default()
        })
        .unwrap();
        let err = oracle
            .judge(JudgmentRequest {
                kind: JudgmentKind::Evaluation,
                agent: "alice".into(),
                prompt: "hello".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::Network(_)));
    }
}
