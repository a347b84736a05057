//! OpenAI-compatible chat.completions client
//!
//! Works against any endpoint speaking the chat.completions protocol
//! (OpenAI itself, vLLM, Ollama, LM Studio). Tool invocation is structured:
//! the model returns `tool_calls`, never free text to be parsed.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use crate::config::LlmConfig;
use crate::error::{AgentFlowError, Result};
use crate::llm::client::LlmClient;
use crate::llm::types::{CompletionRequest, CompletionResponse, FinishReason, Role, ToolUse};

/// Client for an OpenAI-compatible reasoning service
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
}

impl OpenAiClient {
    /// Create a client from config; the API key is read from the
    /// environment variable the config names
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            AgentFlowError::Configuration(format!("{} not set", config.api_key_env))
        })?;
        Self::with_api_key(api_key, config)
    }

    /// Create a client with an explicit API key
    pub fn with_api_key(api_key: String, config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AgentFlowError::Llm(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn build_request(&self, request: &CompletionRequest) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(Self::message_to_json).collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
            "temperature": request.temperature.unwrap_or(self.temperature),
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request.tools.iter().map(|t| t.to_openai_schema()).collect();
            body["tools"] = json!(tools);
            // One tool call at a time keeps MCP servers stable
            body["parallel_tool_calls"] = json!(false);
        }

        body
    }

    fn message_to_json(message: &crate::llm::types::Message) -> Value {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };

        let mut value = json!({ "role": role, "content": message.content });

        if !message.tool_calls.is_empty() {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": {
                            "name": c.name,
                            "arguments": c.arguments.to_string()
                        }
                    })
                })
                .collect();
            value["tool_calls"] = json!(calls);
        }

        if let Some(id) = &message.tool_call_id {
            value["tool_call_id"] = json!(id);
        }

        value
    }

    fn parse_response(&self, body: Value) -> Result<CompletionResponse> {
        let message = body
            .pointer("/choices/0/message")
            .ok_or_else(|| AgentFlowError::Llm("Response has no choices".to_string()))?;

        let content = message["content"].as_str().unwrap_or("").to_string();

        let mut tool_calls = Vec::new();
        if let Some(calls) = message["tool_calls"].as_array() {
            for call in calls {
                let id = call["id"].as_str().unwrap_or("").to_string();
                let name = call["function"]["name"].as_str().unwrap_or("").to_string();
                // Arguments arrive as a JSON-encoded string
                let arguments = match call["function"]["arguments"].as_str() {
                    Some(raw) => serde_json::from_str(raw)
                        .unwrap_or_else(|_| Value::Object(Default::default())),
                    None => call["function"]["arguments"].clone(),
                };
                tool_calls.push(ToolUse::new(id, name, arguments));
            }
        }

        let finish_reason = match body.pointer("/choices/0/finish_reason").and_then(Value::as_str) {
            Some("stop") => FinishReason::Stop,
            Some("tool_calls") => FinishReason::ToolCalls,
            Some("length") => FinishReason::Length,
            Some(_) => FinishReason::Other,
            None => FinishReason::Stop,
        };

        Ok(CompletionResponse {
            content,
            tool_calls,
            finish_reason,
        })
    }

    async fn send_request(&self, body: Value) -> Result<Value> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentFlowError::Llm(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AgentFlowError::Llm(format!(
                "API error {}: {}",
                status, error_body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AgentFlowError::Llm(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = self.build_request(&request);
        let response = self.send_request(body).await?;
        self.parse_response(response)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{Message, ToolSchema};

    fn test_client() -> OpenAiClient {
        let config = LlmConfig {
            model: "test-model".to_string(),
            base_url: "http://localhost:8000/v1/".to_string(),
            ..Default::default()
        };
        OpenAiClient::with_api_key("test-key".to_string(), &config).unwrap()
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = test_client();
        assert_eq!(client.base_url, "http://localhost:8000/v1");
    }

    #[test]
    fn test_build_request_basic() {
        let client = test_client();
        let request = CompletionRequest::new(vec![
            Message::system("You are an operator"),
            Message::user("list pods"),
        ]);

        let body = client.build_request(&request);
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "list pods");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_build_request_with_tools_disables_parallel_calls() {
        let client = test_client();
        let request = CompletionRequest::new(vec![Message::user("list pods")]).with_tools(vec![
            ToolSchema::new("podList", "List pods", json!({"type": "object"})),
        ]);

        let body = client.build_request(&request);
        assert_eq!(body["tools"][0]["function"]["name"], "podList");
        assert_eq!(body["parallel_tool_calls"], false);
    }

    #[test]
    fn test_message_with_tool_call_serializes_arguments_as_string() {
        let call = ToolUse::new("c1", "podList", json!({"namespace": "kube-system"}));
        let message = Message::assistant_tool_call(call);
        let value = OpenAiClient::message_to_json(&message);

        assert_eq!(value["tool_calls"][0]["function"]["name"], "podList");
        let raw = value["tool_calls"][0]["function"]["arguments"].as_str().unwrap();
        let parsed: Value = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed["namespace"], "kube-system");
    }

    #[test]
    fn test_parse_response_text() {
        let client = test_client();
        let body = json!({
            "choices": [{
                "message": { "role": "assistant", "content": "All pods healthy." },
                "finish_reason": "stop"
            }]
        });

        let response = client.parse_response(body).unwrap();
        assert_eq!(response.content, "All pods healthy.");
        assert!(!response.wants_tool());
        assert_eq!(response.finish_reason, FinishReason::Stop);
    }

    #[test]
    fn test_parse_response_tool_calls() {
        let client = test_client();
        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {
                            "name": "podList",
                            "arguments": "{\"namespace\": \"default\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });

        let response = client.parse_response(body).unwrap();
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "call_abc");
        assert_eq!(response.tool_calls[0].arguments["namespace"], "default");
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
    }

    #[test]
    fn test_parse_response_invalid_arguments_fall_back_to_empty() {
        let client = test_client();
        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "function": { "name": "t", "arguments": "not json" }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });

        let response = client.parse_response(body).unwrap();
        assert!(response.tool_calls[0].arguments.is_object());
    }

    #[test]
    fn test_parse_response_no_choices() {
        let client = test_client();
        let result = client.parse_response(json!({}));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_api_key_env() {
        let config = LlmConfig {
            api_key_env: "AGENTFLOW_TEST_KEY_THAT_DOES_NOT_EXIST".to_string(),
            ..Default::default()
        };
        let result = OpenAiClient::new(&config);
        assert!(matches!(result, Err(AgentFlowError::Configuration(_))));
    }

    #[test]
    fn test_debug_hides_api_key() {
        let client = test_client();
        let debug = format!("{:?}", client);
        assert!(debug.contains("test-model"));
        assert!(!debug.contains("test-key"));
    }
}
