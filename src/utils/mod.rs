pub mod logger;
pub mod scheduler;

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("数据库错误: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("网络请求错误: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("解析错误: {0}")]
    ParseError(String),

    #[error("页面加载超时: 等待 `{target}` 超过 {timeout:?}")]
    PageTimeout { target: String, timeout: Duration },

    #[error("邮件发送错误: {0}")]
    MailError(String),
}

impl TrackerError {
    /// 判断 anyhow 错误链中是否为页面等待超时
    pub fn is_page_timeout(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<TrackerError>(),
            Some(TrackerError::PageTimeout { .. })
        )
    }
}
