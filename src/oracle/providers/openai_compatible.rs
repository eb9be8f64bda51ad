//! Reference decision-oracle adapter for OpenAI-compatible chat-completions
//! endpoints. Hosts with richer transports (streaming, provider-specific
//! wire formats) implement `DecisionOracle` themselves; the core only
//! depends on the trait.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::agent::history::ConversationMessage;
use crate::oracle::provider::DecisionOracle;
use crate::oracle::retry::OracleError;
use crate::oracle::types::{Decision, ToolDef};

pub struct OpenAiCompatibleOracle {
    id: String,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f64,
    tools: Vec<ToolDef>,
    client: reqwest::Client,
}

impl OpenAiCompatibleOracle {
    pub fn new(
        id: impl Into<String>,
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        temperature: f64,
        tools: Vec<ToolDef>,
    ) -> Self {
        Self {
            id: id.into(),
            api_base: api_base.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature,
            tools,
            client: reqwest::Client::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.id
    }

    /// Maps the conversation onto chat-completions wire messages.
    fn wire_messages(
        system_prompt: &str,
        history: &[ConversationMessage],
        observation: &str,
    ) -> Vec<serde_json::Value> {
        let mut messages = vec![json!({"role": "system", "content": system_prompt})];
        for message in history {
            match message {
                ConversationMessage::UserObservation { text } => {
                    messages.push(json!({"role": "user", "content": text}));
                }
                ConversationMessage::AssistantToolCall {
                    id,
                    tool_name,
                    arguments,
                    reasoning,
                } => {
                    messages.push(json!({
                        "role": "assistant",
                        "content": reasoning,
                        "tool_calls": [{
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": tool_name,
                                "arguments": arguments.to_string(),
                            },
                        }],
                    }));
                }
                ConversationMessage::ToolResult { id, text } => {
                    messages.push(json!({
                        "role": "tool",
                        "tool_call_id": id,
                        "content": text,
                    }));
                }
            }
        }
        messages.push(json!({"role": "user", "content": observation}));
        messages
    }
}

#[async_trait]
impl DecisionOracle for OpenAiCompatibleOracle {
    async fn decide(
        &self,
        system_prompt: &str,
        history: &[ConversationMessage],
        observation: &str,
    ) -> Result<Decision, OracleError> {
        let body = json!({
            "model": self.model,
            "messages": Self::wire_messages(system_prompt, history, observation),
            "temperature": self.temperature,
            "tools": self.tools,
            "tool_choice": "auto",
        });

        tracing::debug!(
            provider = %self.id,
            model = %self.model,
            history = history.len(),
            "sending oracle request"
        );

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(120))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let err_body = response.text().await.unwrap_or_default();
            return Err(OracleError::from_status(status, &err_body));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| OracleError::Other(format!("malformed response body: {e}")))?;

        let message = &json["choices"][0]["message"];
        let content = message["content"].as_str().unwrap_or("").to_string();
        let reasoning = message["reasoning_content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        // Exactly one tool is expected; extra calls are logged and dropped.
        let tool_calls = message["tool_calls"].as_array().cloned().unwrap_or_default();
        if tool_calls.len() > 1 {
            tracing::warn!(
                count = tool_calls.len(),
                "oracle returned multiple tool calls, using the first"
            );
        }

        let decision = match tool_calls.first() {
            Some(tc) => {
                let raw_arguments = tc["function"]["arguments"]
                    .as_str()
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or(serde_json::Value::Null);
                Decision {
                    tool_call_id: tc["id"]
                        .as_str()
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4())),
                    tool_name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                    raw_arguments,
                    reasoning: if reasoning.is_empty() {
                        content.clone()
                    } else {
                        reasoning
                    },
                    content,
                }
            }
            None => Decision {
                tool_call_id: format!("call_{}", uuid::Uuid::new_v4()),
                tool_name: String::new(),
                raw_arguments: serde_json::Value::Null,
                reasoning,
                content,
            },
        };

        tracing::info!(
            tool = %decision.tool_name,
            content_len = decision.content.len(),
            "oracle decision received"
        );
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_maps_onto_wire_roles_in_order() {
        let history = vec![
            ConversationMessage::UserObservation {
                text: "App: com.shop".into(),
            },
            ConversationMessage::AssistantToolCall {
                id: "call_1".into(),
                tool_name: "click_element".into(),
                arguments: serde_json::json!({"elementId": 3}),
                reasoning: "opening orders".into(),
            },
            ConversationMessage::ToolResult {
                id: "call_1".into(),
                text: "Clicked element [3]".into(),
            },
        ];
        let wire =
            OpenAiCompatibleOracle::wire_messages("system rules", &history, "new observation");
        let roles: Vec<&str> = wire.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool", "user"]);
        assert_eq!(wire[3]["tool_call_id"], "call_1");
        assert_eq!(
            wire[2]["tool_calls"][0]["function"]["name"],
            "click_element"
        );
    }
}
