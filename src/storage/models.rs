use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use crate::utils::TrackerError;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// 目录中的项目，以 (school_name, program_name) 为自然键
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CatalogProgram {
    pub id: i64,
    pub school_name: String,
    pub program_name: String,
    pub funding_type: Option<String>,
    pub funding_amount: Option<String>,
    /// YYYY-MM-DD
    pub application_deadline: Option<String>,
    pub deadline_text: Option<String>,
    pub gre_waiver: Option<String>,
    pub ielts_waiver: Option<String>,
    pub application_fee_waiver: Option<String>,
    /// JSON 数组
    pub required_documents: Option<String>,
    pub application_link: Option<String>,
    pub source_tag: String,
    pub created_at: String,
    pub updated_at: String,
}

impl CatalogProgram {
    pub fn deadline(&self) -> Option<NaiveDate> {
        self.application_deadline
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, DATE_FORMAT).ok())
    }

    pub fn documents(&self) -> Vec<String> {
        self.required_documents
            .as_deref()
            .and_then(|d| serde_json::from_str(d).ok())
            .unwrap_or_default()
    }
}

/// 申请状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicationStatus {
    Interested,
    Applying,
    Applied,
    Accepted,
    Rejected,
}

impl ApplicationStatus {
    /// 仍在进行中的状态，只有这些会收到截止提醒
    pub const PENDING: [ApplicationStatus; 2] =
        [ApplicationStatus::Interested, ApplicationStatus::Applying];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Interested => "Interested",
            ApplicationStatus::Applying => "Applying",
            ApplicationStatus::Applied => "Applied",
            ApplicationStatus::Accepted => "Accepted",
            ApplicationStatus::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Interested" => Ok(ApplicationStatus::Interested),
            "Applying" => Ok(ApplicationStatus::Applying),
            "Applied" => Ok(ApplicationStatus::Applied),
            "Accepted" => Ok(ApplicationStatus::Accepted),
            "Rejected" => Ok(ApplicationStatus::Rejected),
            other => Err(TrackerError::ParseError(format!("未知申请状态: {}", other))),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct ApplicationRow {
    pub id: i64,
    pub user_id: String,
    pub school_name: String,
    pub program_name: String,
    pub deadline: String,
    pub status: String,
}

/// 用户的申请记录（由 CRUD 子系统维护，这里只读并追加邮件日志）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationRecord {
    pub id: i64,
    pub user_id: String,
    pub school_name: String,
    pub program_name: String,
    pub deadline: NaiveDate,
    pub status: ApplicationStatus,
}

impl TryFrom<ApplicationRow> for ApplicationRecord {
    type Error = TrackerError;

    fn try_from(row: ApplicationRow) -> Result<Self, Self::Error> {
        let deadline = NaiveDate::parse_from_str(&row.deadline, DATE_FORMAT).map_err(|e| {
            TrackerError::ParseError(format!("申请 {} 的截止日期无效 '{}': {}", row.id, row.deadline, e))
        })?;
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            school_name: row.school_name,
            program_name: row.program_name,
            deadline,
            status: row.status.parse()?,
        })
    }
}

/// 已发送邮件的日志条目，只追加
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailLogEntry {
    pub subject: String,
    pub body: String,
    pub recipient: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserProfile {
    pub user_id: String,
    pub email: String,
    /// None 表示用户从未设置；只有显式 false 才算退订
    pub email_notifications: Option<bool>,
}

impl UserProfile {
    pub fn opted_out(&self) -> bool {
        self.email_notifications == Some(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_explicit_false_opts_out() {
        let mut profile = UserProfile {
            user_id: "u1".into(),
            email: "a@b.c".into(),
            email_notifications: None,
        };
        assert!(!profile.opted_out());
        profile.email_notifications = Some(true);
        assert!(!profile.opted_out());
        profile.email_notifications = Some(false);
        assert!(profile.opted_out());
    }

    #[test]
    fn status_parses_known_labels_only() {
        assert_eq!("Applying".parse::<ApplicationStatus>().unwrap(), ApplicationStatus::Applying);
        assert!("applying".parse::<ApplicationStatus>().is_err());
        assert!(ApplicationStatus::PENDING.contains(&ApplicationStatus::Interested));
        assert!(!ApplicationStatus::PENDING.contains(&ApplicationStatus::Applied));
    }

    #[test]
    fn application_row_with_bad_deadline_is_rejected() {
        let row = ApplicationRow {
            id: 3,
            user_id: "u".into(),
            school_name: "MIT".into(),
            program_name: "EECS".into(),
            deadline: "soon".into(),
            status: "Applying".into(),
        };
        assert!(ApplicationRecord::try_from(row).is_err());
    }
}
