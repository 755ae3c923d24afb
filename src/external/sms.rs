use crate::config::SmsConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::Client;

/// 短信网关抽象；扇出只依赖这个 trait，测试里用进程内假实现
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send_sms(&self, to: &str, body: &str) -> AppResult<()>;
}

#[derive(Clone)]
pub struct TwilioSmsGateway {
    client: Client,
    config: SmsConfig,
}

impl TwilioSmsGateway {
    pub fn new(config: SmsConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn messages_url(&self) -> String {
        let base = self
            .config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.twilio.com".to_string());
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            base.trim_end_matches('/'),
            self.config.account_sid
        )
    }
}

#[async_trait]
impl SmsGateway for TwilioSmsGateway {
    async fn send_sms(&self, to: &str, body: &str) -> AppResult<()> {
        let params = [
            ("To", to),
            ("From", self.config.from_phone.as_str()),
            ("Body", body),
        ];

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&params)
            .send()
            .await?;

        if response.status().is_success() {
            log::debug!("SMS dispatched: {}", to);
            Ok(())
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            Err(AppError::ExternalApiError(format!(
                "SMS sending failed: {}",
                error_text
            )))
        }
    }
}
