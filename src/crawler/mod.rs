pub mod browser;
pub mod deadline;
pub mod listing;
pub mod program_api;

pub use browser::{BrowserEngine, BrowserSession, HttpBrowser, ListingFields};
pub use listing::ListingCrawler;
pub use program_api::ProgramApiClient;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{error, info, warn};

use crate::storage::CatalogWriter;
use crate::utils::TrackerError;

/// 产生目录记录的数据源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Listing,
    ProgramApi,
}

impl SourceTag {
    pub const ALL: [SourceTag; 2] = [SourceTag::Listing, SourceTag::ProgramApi];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Listing => "listing",
            SourceTag::ProgramApi => "program_api",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceTag {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "listing" => Ok(SourceTag::Listing),
            "program_api" | "api" => Ok(SourceTag::ProgramApi),
            other => Err(TrackerError::ConfigError(format!("未知数据源: {}", other))),
        }
    }
}

/// 尚未写入目录的一条项目观测
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRecord {
    pub source: SourceTag,
    pub school_name: String,
    pub program_name: String,
    pub funding_type: Option<String>,
    pub funding_amount: Option<String>,
    pub application_deadline: Option<NaiveDate>,
    pub deadline_text: Option<String>,
    pub gre_waiver: Option<String>,
    pub ielts_waiver: Option<String>,
    pub application_fee_waiver: Option<String>,
    pub required_documents: Vec<String>,
    pub application_link: Option<String>,
}

impl CandidateRecord {
    /// 学校名或项目名为空时返回 None
    pub fn new(source: SourceTag, school_name: &str, program_name: &str) -> Option<Self> {
        let school_name = clean_text(school_name)?;
        let program_name = clean_text(program_name)?;
        Some(Self {
            source,
            school_name,
            program_name,
            funding_type: None,
            funding_amount: None,
            application_deadline: None,
            deadline_text: None,
            gre_waiver: None,
            ielts_waiver: None,
            application_fee_waiver: None,
            required_documents: Vec::new(),
            application_link: None,
        })
    }

    /// 保留原始文本，同时尝试解析为日期
    pub fn with_deadline_text(mut self, text: Option<&str>) -> Self {
        self.deadline_text = text.and_then(clean_text);
        self.application_deadline = self
            .deadline_text
            .as_deref()
            .and_then(deadline::parse_deadline);
        self
    }
}

/// 合并空白并去掉首尾空格，空串视为缺失
pub fn clean_text(raw: &str) -> Option<String> {
    let joined = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

/// 单次运行统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterSummary {
    pub pages: usize,
    pub upserted: usize,
    pub skipped: usize,
    pub hit_page_cap: bool,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> SourceTag;

    /// 拉取候选记录并逐条写入目录
    async fn run(&self, writer: &dyn CatalogWriter) -> Result<AdapterSummary>;
}

/// 运行一个数据源并记录结果。失败时已写入的记录保留
pub async fn run_adapter(
    adapter: &dyn SourceAdapter,
    writer: &dyn CatalogWriter,
) -> Result<AdapterSummary> {
    info!("开始采集数据源: {}", adapter.source());
    match adapter.run(writer).await {
        Ok(summary) => {
            info!(
                "数据源 {} 采集完成: {} 页, 写入 {} 条, 跳过 {} 条",
                adapter.source(),
                summary.pages,
                summary.upserted,
                summary.skipped
            );
            if summary.hit_page_cap {
                warn!("数据源 {} 因页数上限提前结束，目录可能不完整", adapter.source());
            }
            Ok(summary)
        }
        Err(e) => {
            error!("数据源 {} 采集中止: {:#}", adapter.source(), e);
            Err(e)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_key_fields_are_rejected() {
        assert!(CandidateRecord::new(SourceTag::Listing, "  ", "MSc CS").is_none());
        assert!(CandidateRecord::new(SourceTag::Listing, "ETH Zurich", "\n").is_none());

        let c = CandidateRecord::new(SourceTag::Listing, " ETH   Zurich ", "MSc CS").unwrap();
        assert_eq!(c.school_name, "ETH Zurich");
    }

    #[test]
    fn sentinel_deadline_keeps_text_but_no_date() {
        let c = CandidateRecord::new(SourceTag::Listing, "TU Delft", "MSc Robotics")
            .unwrap()
            .with_deadline_text(Some("Anytime"));
        assert_eq!(c.deadline_text.as_deref(), Some("Anytime"));
        assert_eq!(c.application_deadline, None);
    }

    #[test]
    fn source_tag_parses_cli_names() {
        assert_eq!("listing".parse::<SourceTag>().unwrap(), SourceTag::Listing);
        assert_eq!("api".parse::<SourceTag>().unwrap(), SourceTag::ProgramApi);
        assert!("mastersportal".parse::<SourceTag>().is_err());
    }
}
