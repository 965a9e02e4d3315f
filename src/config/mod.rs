pub mod selectors;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub use selectors::ListingSelectors;

use crate::storage::MergePolicy;

pub const SETTINGS_PATH: &str = "config/settings.toml";
const ENV_PREFIX: &str = "GRADTRACK";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub crawler: CrawlerConfig,
    pub program_api: ProgramApiConfig,
    pub storage: StorageConfig,
    pub mail: MailConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlerConfig {
    pub start_url: String,
    pub page_timeout_secs: u64,
    pub max_pages: usize,
    pub user_agent: String,
    pub selectors: ListingSelectors,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProgramApiConfig {
    pub url: String,
    pub api_key: String,
    pub country: String,
    pub level: String,
    pub limit: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub database_path: String,
    pub merge_policy: MergePolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MailConfig {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
    pub dashboard_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    pub listing_cron: String,
    pub program_api_cron: String,
    pub reminder_cron: String,
    pub reminder_horizon_days: i64,
}

impl AppConfig {
    /// 依次叠加：内置默认值 → config/settings.toml → GRADTRACK_* 环境变量
    pub fn load() -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::Config::try_from(&AppConfig::default())?)
            .add_source(::config::File::with_name(SETTINGS_PATH).required(false))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .context("加载配置失败")?;

        let config: AppConfig = settings.try_deserialize().context("配置格式错误")?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn database_url(&self) -> String {
        format!("sqlite:{}", self.storage.database_path)
    }
}

impl MailConfig {
    /// 检查邮件 API key 是否已配置
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && self.api_key != "your-mail-api-key"
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            crawler: CrawlerConfig {
                start_url: "https://www.findamasters.com/masters-degrees/?PG=1".to_string(),
                page_timeout_secs: 15,
                max_pages: 200,
                user_agent: "GradTrackBot/1.0".to_string(),
                selectors: ListingSelectors::default(),
            },
            program_api: ProgramApiConfig {
                url: "https://api.gradprograms.example/v1/programs".to_string(),
                api_key: String::new(),
                country: "United States".to_string(),
                level: "masters".to_string(),
                limit: 100,
            },
            storage: StorageConfig {
                database_path: "./data/gradtrack.db".to_string(),
                merge_policy: MergePolicy::LastWriteWins,
            },
            mail: MailConfig {
                api_url: "https://api.resend.com/emails".to_string(),
                api_key: "your-mail-api-key".to_string(),
                from: "GradTrack <reminders@gradtrack.app>".to_string(),
                dashboard_url: "https://gradtrack.app/dashboard".to_string(),
            },
            schedule: ScheduleConfig {
                listing_cron: "0 0 0 1 * *".to_string(),
                program_api_cron: "0 0 0 1 * *".to_string(),
                reminder_cron: "0 0 8 * * *".to_string(),
                reminder_horizon_days: 7,
            },
        }
    }
}
