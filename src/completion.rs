//! Chat-completion collaborator.
//!
//! Every configured provider speaks the same OpenAI-compatible shape:
//! `{ model, messages, temperature, max_tokens }` in,
//! `{ choices: [{ message: { content } }] }` out.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::chat::window::ContextEntry;
use crate::config::ProviderConfig;
use crate::error::CompletionError;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Sends `messages` and returns the assistant text. Resolves to
    /// [`CompletionError::Cancelled`] as soon as `cancel` fires.
    async fn complete(
        &self,
        messages: &[ContextEntry],
        cancel: CancellationToken,
    ) -> Result<String, CompletionError>;
}

/// HTTP client for one OpenAI-compatible endpoint.
pub struct OpenAiCompatClient {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn request_body(&self, messages: &[ContextEntry]) -> serde_json::Value {
        serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        })
    }

    async fn call(&self, messages: &[ContextEntry]) -> Result<String, CompletionError> {
        let url = format!("{}/chat/completions", self.config.api_url.trim_end_matches('/'));

        let mut req = self.client.post(&url).json(&self.request_body(messages));
        if let Some(ref key) = self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Http { status, body });
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CompletionError::Decode(e.to_string()))?;

        extract_content(&response_json)
    }
}

fn extract_content(response_json: &serde_json::Value) -> Result<String, CompletionError> {
    let choice = response_json["choices"]
        .as_array()
        .and_then(|arr| arr.first())
        .ok_or(CompletionError::EmptyChoices)?;

    choice["message"]["content"]
        .as_str()
        .map(String::from)
        .ok_or_else(|| CompletionError::Decode("choice has no message content".to_string()))
}

#[async_trait]
impl CompletionProvider for OpenAiCompatClient {
    async fn complete(
        &self,
        messages: &[ContextEntry],
        cancel: CancellationToken,
    ) -> Result<String, CompletionError> {
        tracing::debug!(
            "Calling {} ({}) with {} message(s)",
            self.config.name,
            self.config.model,
            messages.len()
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Completion request cancelled");
                Err(CompletionError::Cancelled)
            }
            result = self.call(messages) => result,
        }
    }
}

/// Stand-in used when no provider is configured; every call fails with a
/// readable cause so the failure lands in the transcript.
pub struct UnconfiguredProvider;

#[async_trait]
impl CompletionProvider for UnconfiguredProvider {
    async fn complete(
        &self,
        _messages: &[ContextEntry],
        _cancel: CancellationToken,
    ) -> Result<String, CompletionError> {
        Err(CompletionError::NoProvider)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::window::Role;

    #[test]
    fn request_body_carries_model_and_messages() {
        let client = OpenAiCompatClient::new(ProviderConfig {
            model: "deepseek-chat".to_string(),
            max_tokens: 512,
            ..ProviderConfig::default()
        });
        let body = client.request_body(&[
            ContextEntry::new(Role::System, "be brief"),
            ContextEntry::new(Role::User, "hi"),
        ]);
        assert_eq!(body["model"], "deepseek-chat");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
    }

    #[test]
    fn extracts_first_choice_content() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "4" } }]
        });
        assert_eq!(extract_content(&json).unwrap(), "4");
    }

    #[test]
    fn empty_choices_is_an_error() {
        let json = serde_json::json!({ "choices": [] });
        assert_eq!(extract_content(&json), Err(CompletionError::EmptyChoices));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let client = OpenAiCompatClient::new(ProviderConfig {
            api_url: "http://127.0.0.1:9".to_string(),
            ..ProviderConfig::default()
        });
        let token = CancellationToken::new();
        token.cancel();
        let result = client
            .complete(&[ContextEntry::new(Role::User, "hi")], token)
            .await;
        assert_eq!(result, Err(CompletionError::Cancelled));
    }
}
