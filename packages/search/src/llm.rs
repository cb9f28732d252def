//! OpenAI-compatible chat client for query enhancement and answer synthesis.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use searchlight_core::error::{SearchError, SearchResult};

use crate::prompts;

/// Seam for the chat endpoint (to allow mocking).
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Rewrite a raw query into a more searchable one.
    async fn enhance_query(&self, query: &str) -> SearchResult<EnhancedQuery>;

    /// Produce the final answer from the retrieved chunks. Returns the raw
    /// completion envelope, which is forwarded to the client untouched.
    async fn synthesize(&self, enhanced_query: &str, data_summary: &str) -> SearchResult<Value>;
}

/// Parsed output of the enhancement call.
#[derive(Debug, Clone, Deserialize)]
pub struct EnhancedQuery {
    pub enhanced: String,
    #[serde(default)]
    pub language_detected: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    top_p: f32,
    seed: u32,
    stream: bool,
    response_format: ResponseFormat,
    max_completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

/// Deterministic sampling parameters shared by both calls.
const TEMPERATURE: f32 = 0.0;
const TOP_P: f32 = 1.0;
const SEED: u32 = 42;

const ENHANCE_MAX_TOKENS: u32 = 1024;
const SYNTHESIS_MAX_TOKENS: u32 = 5000;

/// HTTP client for an OpenAI-compatible chat-completions endpoint.
#[derive(Clone)]
pub struct HttpChatClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl HttpChatClient {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> SearchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| SearchError::Llm(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    async fn completion(&self, request: &ChatRequest) -> SearchResult<Value> {
        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| SearchError::Llm(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Llm(format!("HTTP {}", status.as_u16())));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| SearchError::Llm(format!("decode failed: {e}")))
    }

    fn request(&self, messages: Vec<ChatMessage>, max_tokens: u32) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: TEMPERATURE,
            top_p: TOP_P,
            seed: SEED,
            stream: false,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
            max_completion_tokens: max_tokens,
        }
    }
}

#[async_trait]
impl ChatApi for HttpChatClient {
    async fn enhance_query(&self, query: &str) -> SearchResult<EnhancedQuery> {
        let request = self.request(
            vec![
                ChatMessage {
                    role: "system",
                    content: prompts::enhancer_system_prompt(),
                },
                ChatMessage {
                    role: "user",
                    content: query.to_string(),
                },
            ],
            ENHANCE_MAX_TOKENS,
        );

        let envelope = self.completion(&request).await?;
        let completion: ChatCompletion = serde_json::from_value(envelope)
            .map_err(|e| SearchError::Llm(format!("unexpected completion shape: {e}")))?;

        let content = completion
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .ok_or_else(|| SearchError::Llm("completion had no choices".to_string()))?;

        parse_enhanced(content)
    }

    async fn synthesize(&self, enhanced_query: &str, data_summary: &str) -> SearchResult<Value> {
        let request = self.request(
            vec![
                ChatMessage {
                    role: "system",
                    content: prompts::synthesis_system_prompt(),
                },
                ChatMessage {
                    role: "user",
                    content: format!(
                        "Here is the data retrieved from the web:\n\n{data_summary}"
                    ),
                },
                ChatMessage {
                    role: "user",
                    content: enhanced_query.to_string(),
                },
            ],
            SYNTHESIS_MAX_TOKENS,
        );

        self.completion(&request).await
    }
}

/// The model answers with a JSON document inside the message content.
fn parse_enhanced(content: &str) -> SearchResult<EnhancedQuery> {
    serde_json::from_str(content)
        .map_err(|e| SearchError::Llm(format!("enhancer returned invalid JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_serializes_expected_fields() {
        let client = HttpChatClient::new("https://llm.test/v1/chat", "key", "test-model").unwrap();
        let request = client.request(
            vec![ChatMessage {
                role: "user",
                content: "hi".to_string(),
            }],
            1024,
        );

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "test-model");
        assert_eq!(json["temperature"], 0.0);
        assert_eq!(json["top_p"], 1.0);
        assert_eq!(json["seed"], 42);
        assert_eq!(json["response_format"]["type"], "json_object");
        assert_eq!(json["max_completion_tokens"], 1024);
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn parse_enhanced_full_payload() {
        let parsed = parse_enhanced(
            r#"{"enhanced":"What are the latest AI developments?","language_detected":"en","confidence":0.97}"#,
        )
        .unwrap();
        assert_eq!(parsed.enhanced, "What are the latest AI developments?");
        assert_eq!(parsed.language_detected.as_deref(), Some("en"));
    }

    #[test]
    fn parse_enhanced_minimal_payload() {
        let parsed = parse_enhanced(r#"{"enhanced":"q"}"#).unwrap();
        assert_eq!(parsed.enhanced, "q");
        assert!(parsed.confidence.is_none());
    }

    #[test]
    fn parse_enhanced_rejects_non_json() {
        assert!(parse_enhanced("Sure! Here is your query:").is_err());
    }

    #[test]
    fn completion_content_extraction() {
        let envelope = serde_json::json!({
            "id": "cmpl-1",
            "choices": [{"index": 0, "finish_reason": "stop",
                         "message": {"role": "assistant", "content": "{\"enhanced\":\"x\"}"}}],
            "usage": {"total_tokens": 10}
        });
        let completion: ChatCompletion = serde_json::from_value(envelope).unwrap();
        assert_eq!(completion.choices[0].message.content, "{\"enhanced\":\"x\"}");
    }
}
