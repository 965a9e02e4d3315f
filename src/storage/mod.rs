pub mod database;
pub mod models;

pub use database::Database;
pub use models::{ApplicationRecord, CatalogProgram, EmailLogEntry, UserProfile};

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::crawler::CandidateRecord;

/// 同一 (学校, 项目) 被多个数据源写入时的字段合并策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// 后写入者覆盖全部可变字段，包括空值
    #[default]
    LastWriteWins,
    /// 新记录中为空的字段保留已有值
    PreferNonNull,
}

impl MergePolicy {
    fn assignment(&self, column: &str) -> String {
        match self {
            MergePolicy::LastWriteWins => format!("{column} = excluded.{column}"),
            // 日期与原始文本作为一个整体合并
            MergePolicy::PreferNonNull if column == "application_deadline" => format!(
                "{column} = CASE WHEN excluded.deadline_text IS NULL \
                 THEN catalog_programs.{column} ELSE excluded.{column} END"
            ),
            MergePolicy::PreferNonNull => {
                format!("{column} = COALESCE(excluded.{column}, catalog_programs.{column})")
            }
        }
    }
}

/// 目录写入端：按自然键插入或更新
#[async_trait]
pub trait CatalogWriter: Send + Sync {
    async fn upsert(&self, candidate: &CandidateRecord) -> Result<()>;
}

/// 提醒任务读写的申请数据：待提醒申请、用户资料、邮件日志
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    /// 截止日期在 [from, to] 内且仍在进行中的申请
    async fn pending_applications(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ApplicationRecord>>;

    async fn user_profile(&self, user_id: &str) -> Result<Option<UserProfile>>;

    async fn append_email_log(&self, application_id: i64, entry: &EmailLogEntry) -> Result<()>;
}
