use crate::errors::AppError;
use crate::models::Report;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

/// Outbound side of the chat transport boundary.
///
/// The worker context talks to users only through this trait; tests plug in
/// a recording implementation instead of HTTP.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_text(&self, user_key: &str, text: &str) -> Result<(), AppError>;

    async fn send_report(&self, user_key: &str, report: &Report) -> Result<(), AppError> {
        self.send_text(user_key, &report.render_text()).await
    }
}

/// Client for the chat transport's HTTP API.
#[derive(Clone)]
pub struct ChatApiClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl ChatApiClient {
    pub fn new(base_url: String, token: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create chat client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }
}

#[async_trait]
impl Notifier for ChatApiClient {
    async fn send_text(&self, user_key: &str, text: &str) -> Result<(), AppError> {
        let url = format!("{}/sendMessage", self.base_url.trim_end_matches('/'));
        tracing::debug!("Sending message to user {}", user_key);

        let body = json!({
            "chat_id": user_key,
            "text": text,
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Failed to send message: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Chat API message send failed {}: {}",
                status, error_text
            )));
        }

        Ok(())
    }
}
