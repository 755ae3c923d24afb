use crate::config::MailConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

/// 邮件通道抽象；portal 邮件不计费，失败只记日志
#[async_trait]
pub trait MailGateway: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> AppResult<()>;
}

#[derive(Debug, Serialize)]
struct SendMailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

#[derive(Clone)]
pub struct MailRelayGateway {
    client: Client,
    config: MailConfig,
}

impl MailRelayGateway {
    pub fn new(config: MailConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl MailGateway for MailRelayGateway {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> AppResult<()> {
        let url = format!("{}/v1/send", self.config.base_url.trim_end_matches('/'));
        let payload = SendMailRequest {
            from: &self.config.from_address,
            to,
            subject,
            text: body,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await?;

        if response.status().is_success() {
            log::debug!("Email dispatched: {}", to);
            Ok(())
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            Err(AppError::ExternalApiError(format!(
                "Email sending failed: {}",
                error_text
            )))
        }
    }
}
