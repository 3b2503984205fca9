use std::time::Duration;

use async_trait::async_trait;
use chatlog_common::{ChatCompletionRequest, ChatCompletionResponse, PromptMessage};
use reqwest::Client;

use super::{CompletionClient, CompletionError};
use crate::config::CompletionConfig;
use crate::retry::RetryPolicy;

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiClient {
    http_client: Client,
    base_url: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
}

impl OpenAiClient {
    pub fn new(config: &CompletionConfig) -> Result<Self, CompletionError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CompletionError::RequestFailed(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn map_send_error(e: reqwest::Error) -> CompletionError {
        if e.is_timeout() {
            CompletionError::Timeout
        } else {
            CompletionError::RequestFailed(e.to_string())
        }
    }

    async fn send_once(&self, request: &ChatCompletionRequest) -> Result<String, CompletionError> {
        let url = format!("{}/chat/completions", self.base_url);

        tracing::debug!("Sending {} messages to {}", request.messages.len(), url);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::InvalidResponse(e.to_string()))?;

        if let Some(usage) = &completion.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Completion usage"
            );
        }

        if completion.choices.is_empty() {
            return Err(CompletionError::InvalidResponse(
                "response has no choices".to_string(),
            ));
        }

        match completion.first_content() {
            Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
            _ => Err(CompletionError::InvalidResponse(
                "first choice has no content".to_string(),
            )),
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(
        &self,
        messages: &[PromptMessage],
        max_tokens: u32,
    ) -> Result<String, CompletionError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            max_tokens: Some(max_tokens),
            temperature: None,
        };

        let request = &request;
        self.retry
            .run("Completion request", CompletionError::is_transient, move || {
                self.send_once(request)
            })
            .await
    }
}
