use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::{info, warn};

use super::models::{ApplicationRecord, ApplicationRow, ApplicationStatus, CatalogProgram, EmailLogEntry, UserProfile, DATE_FORMAT};
use super::{ApplicationStore, CatalogWriter, MergePolicy};
use crate::crawler::CandidateRecord;
use crate::utils::TrackerError;

/// 除自然键外，每次写入都会合并的列
const MUTABLE_COLUMNS: [&str; 10] = [
    "funding_type",
    "funding_amount",
    "application_deadline",
    "deadline_text",
    "gre_waiver",
    "ielts_waiver",
    "application_fee_waiver",
    "required_documents",
    "application_link",
    "source_tag",
];

const PROGRAM_COLUMNS: &str = "id, school_name, program_name, funding_type, funding_amount, \
    application_deadline, deadline_text, gre_waiver, ielts_waiver, application_fee_waiver, \
    required_documents, application_link, source_tag, created_at, updated_at";

fn build_upsert_sql(policy: MergePolicy) -> String {
    let assignments = MUTABLE_COLUMNS
        .iter()
        .map(|c| policy.assignment(c))
        .collect::<Vec<_>>()
        .join(",\n                ");

    format!(
        r#"
            INSERT INTO catalog_programs (school_name, program_name, {columns})
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(school_name, program_name) DO UPDATE SET
                {assignments},
                updated_at = CURRENT_TIMESTAMP
            "#,
        columns = MUTABLE_COLUMNS.join(", "),
        assignments = assignments,
    )
}

pub struct Database {
    pool: SqlitePool,
    merge_policy: MergePolicy,
    upsert_sql: String,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(
                database_url
                    .parse::<sqlx::sqlite::SqliteConnectOptions>()
                    .map_err(TrackerError::from)?
                    .create_if_missing(true)
            )
            .await
            .map_err(TrackerError::from)?;

        info!("数据库连接成功: {}", database_url);
        let merge_policy = MergePolicy::default();
        Ok(Self {
            pool,
            merge_policy,
            upsert_sql: build_upsert_sql(merge_policy),
        })
    }

    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self.upsert_sql = build_upsert_sql(policy);
        self
    }

    pub fn merge_policy(&self) -> MergePolicy {
        self.merge_policy
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS catalog_programs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                school_name TEXT NOT NULL,
                program_name TEXT NOT NULL,
                funding_type TEXT,
                funding_amount TEXT,
                application_deadline TEXT,
                deadline_text TEXT,
                gre_waiver TEXT,
                ielts_waiver TEXT,
                application_fee_waiver TEXT,
                required_documents TEXT,
                application_link TEXT,
                source_tag TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(school_name, program_name)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(TrackerError::from)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS application_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                school_name TEXT NOT NULL,
                program_name TEXT NOT NULL,
                deadline TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(TrackerError::from)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_application_deadline ON application_records (deadline, status)",
        )
        .execute(&self.pool)
        .await
        .map_err(TrackerError::from)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS email_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                application_id INTEGER NOT NULL,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                recipient TEXT NOT NULL,
                sent_at TEXT NOT NULL,
                FOREIGN KEY (application_id) REFERENCES application_records(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(TrackerError::from)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_profiles (
                user_id TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                email_notifications INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(TrackerError::from)?;

        info!("数据库表结构初始化完成");
        Ok(())
    }

    /// 按 (学校, 项目) 插入或更新，单条语句完成
    pub async fn upsert_program(&self, candidate: &CandidateRecord) -> Result<()> {
        let deadline = candidate
            .application_deadline
            .map(|d| d.format(DATE_FORMAT).to_string());
        let documents = if candidate.required_documents.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&candidate.required_documents)?)
        };

        sqlx::query(&self.upsert_sql)
            .bind(&candidate.school_name)
            .bind(&candidate.program_name)
            .bind(&candidate.funding_type)
            .bind(&candidate.funding_amount)
            .bind(deadline)
            .bind(&candidate.deadline_text)
            .bind(&candidate.gre_waiver)
            .bind(&candidate.ielts_waiver)
            .bind(&candidate.application_fee_waiver)
            .bind(documents)
            .bind(&candidate.application_link)
            .bind(candidate.source.as_str())
            .execute(&self.pool)
            .await
            .map_err(TrackerError::from)?;

        Ok(())
    }

    pub async fn get_program(&self, school_name: &str, program_name: &str) -> Result<Option<CatalogProgram>> {
        let program = sqlx::query_as::<_, CatalogProgram>(&format!(
            "SELECT {} FROM catalog_programs WHERE school_name = ? AND program_name = ?",
            PROGRAM_COLUMNS
        ))
        .bind(school_name)
        .bind(program_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(TrackerError::from)?;

        Ok(program)
    }

    pub async fn count_programs(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM catalog_programs")
            .fetch_one(&self.pool)
            .await
            .map_err(TrackerError::from)?;
        Ok(count)
    }

    /// 查询截止日期在 [from, to] 内、状态仍在进行中的申请
    pub async fn pending_applications_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ApplicationRecord>> {
        let [first, second] = ApplicationStatus::PENDING;
        let rows = sqlx::query_as::<_, ApplicationRow>(
            r#"
            SELECT id, user_id, school_name, program_name, deadline, status
            FROM application_records
            WHERE status IN (?, ?) AND deadline >= ? AND deadline <= ?
            ORDER BY deadline, id
            "#,
        )
        .bind(first.as_str())
        .bind(second.as_str())
        .bind(from.format(DATE_FORMAT).to_string())
        .bind(to.format(DATE_FORMAT).to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(TrackerError::from)?;

        let records = rows
            .into_iter()
            .filter_map(|row| match ApplicationRecord::try_from(row) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("跳过无效的申请记录: {}", e);
                    None
                }
            })
            .collect();

        Ok(records)
    }

    pub async fn get_user_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let profile = sqlx::query_as::<_, UserProfile>(
            "SELECT user_id, email, email_notifications FROM user_profiles WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(TrackerError::from)?;

        Ok(profile)
    }

    /// 追加一条邮件日志，不修改申请本身
    pub async fn append_email_log(&self, application_id: i64, entry: &EmailLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO email_logs (application_id, subject, body, recipient, sent_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(application_id)
        .bind(&entry.subject)
        .bind(&entry.body)
        .bind(&entry.recipient)
        .bind(entry.sent_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(TrackerError::from)?;

        Ok(())
    }

    pub async fn email_logs(&self, application_id: i64) -> Result<Vec<EmailLogEntry>> {
        let rows = sqlx::query_as::<_, (String, String, String, String)>(
            "SELECT subject, body, recipient, sent_at FROM email_logs WHERE application_id = ? ORDER BY id",
        )
        .bind(application_id)
        .fetch_all(&self.pool)
        .await
        .map_err(TrackerError::from)?;

        rows.into_iter()
            .map(|(subject, body, recipient, sent_at)| -> Result<EmailLogEntry> {
                let sent_at = DateTime::parse_from_rfc3339(&sent_at)
                    .map_err(|e| TrackerError::ParseError(format!("无效的发送时间 '{}': {}", sent_at, e)))?
                    .with_timezone(&Utc);
                Ok(EmailLogEntry {
                    subject,
                    body,
                    recipient,
                    sent_at,
                })
            })
            .collect()
    }
}

#[async_trait]
impl CatalogWriter for Database {
    async fn upsert(&self, candidate: &CandidateRecord) -> Result<()> {
        self.upsert_program(candidate).await
    }
}

#[async_trait]
impl ApplicationStore for Database {
    async fn pending_applications(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ApplicationRecord>> {
        self.pending_applications_between(from, to).await
    }

    async fn user_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        self.get_user_profile(user_id).await
    }

    async fn append_email_log(&self, application_id: i64, entry: &EmailLogEntry) -> Result<()> {
        Database::append_email_log(self, application_id, entry).await
    }
}

/// 申请与用户资料由其他子系统写入，这里只在测试中造数据
#[cfg(test)]
impl Database {
    pub async fn insert_application(
        &self,
        user_id: &str,
        school_name: &str,
        program_name: &str,
        deadline: NaiveDate,
        status: ApplicationStatus,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO application_records (user_id, school_name, program_name, deadline, status)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(school_name)
        .bind(program_name)
        .bind(deadline.format(DATE_FORMAT).to_string())
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn save_user_profile(&self, profile: &UserProfile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_profiles (user_id, email, email_notifications) VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                email = excluded.email,
                email_notifications = excluded.email_notifications
            "#,
        )
        .bind(&profile.user_id)
        .bind(&profile.email)
        .bind(profile.email_notifications)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
