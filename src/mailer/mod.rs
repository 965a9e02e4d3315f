use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::MailConfig;
use crate::utils::TrackerError;

/// 邮件 API 请求体
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// 邮件发送端：成功返回 Ok，传输失败返回错误
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// 通过事务邮件 HTTP API 发送
pub struct HttpMailer {
    client: reqwest::Client,
    config: MailConfig,
}

impl HttpMailer {
    pub fn new(config: MailConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("创建邮件 HTTP 客户端失败")?;
        Ok(Self { client, config })
    }

    pub fn sender_address(&self) -> &str {
        &self.config.from
    }
}

#[async_trait]
impl EmailSender for HttpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        debug!("发送邮件: {} -> {}", message.subject, message.to);

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(message)
            .send()
            .await
            .map_err(TrackerError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(200).collect();
            return Err(TrackerError::MailError(format!("邮件 API 返回 {}: {}", status, preview)).into());
        }

        info!("邮件已发送: {}", message.to);
        Ok(())
    }
}
