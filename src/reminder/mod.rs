pub mod template;

use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::MailConfig;
use crate::mailer::{EmailMessage, EmailSender};
use crate::storage::{ApplicationRecord, ApplicationStore, EmailLogEntry};
use crate::utils::TrackerError;

/// 单条申请的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Sent,
    /// 邮件已发出，但日志写入失败
    SentLogFailed,
    NoProfile,
    OptedOut,
    NoEmail,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderSummary {
    pub matched: usize,
    pub sent: usize,
    pub skipped_no_profile: usize,
    pub skipped_opt_out: usize,
    pub skipped_no_email: usize,
    pub log_failures: usize,
    pub failed: usize,
}

/// 每日截止提醒：查询即将截止的申请并给用户发邮件
pub struct ReminderJob {
    store: Arc<dyn ApplicationStore>,
    mailer: Arc<dyn EmailSender>,
    from: String,
    dashboard_url: String,
    horizon_days: i64,
}

impl ReminderJob {
    pub fn new(
        store: Arc<dyn ApplicationStore>,
        mailer: Arc<dyn EmailSender>,
        mail: &MailConfig,
        horizon_days: i64,
    ) -> Self {
        Self {
            store,
            mailer,
            from: mail.from.clone(),
            dashboard_url: mail.dashboard_url.clone(),
            horizon_days,
        }
    }

    pub async fn run(&self) -> Result<ReminderSummary> {
        self.run_for(Local::now().date_naive()).await
    }

    /// 截止日期在 [today, today + horizon] 内（含两端）的申请会收到提醒
    pub async fn run_for(&self, today: NaiveDate) -> Result<ReminderSummary> {
        let until = Duration::try_days(self.horizon_days)
            .and_then(|horizon| today.checked_add_signed(horizon))
            .ok_or_else(|| {
                TrackerError::ConfigError(format!("提醒窗口天数超出范围: {}", self.horizon_days))
            })?;
        let records = self
            .store
            .pending_applications(today, until)
            .await
            .context("查询即将截止的申请失败")?;

        info!("{} ~ {} 之间有 {} 个待提醒的申请", today, until, records.len());

        let mut summary = ReminderSummary {
            matched: records.len(),
            ..Default::default()
        };

        // 单条失败不影响其余记录
        for record in &records {
            match self.remind(record).await {
                Ok(Outcome::Sent) => summary.sent += 1,
                Ok(Outcome::SentLogFailed) => {
                    summary.sent += 1;
                    summary.log_failures += 1;
                }
                Ok(Outcome::NoProfile) => summary.skipped_no_profile += 1,
                Ok(Outcome::OptedOut) => summary.skipped_opt_out += 1,
                Ok(Outcome::NoEmail) => summary.skipped_no_email += 1,
                Err(e) => {
                    error!("申请 {} 提醒失败: {:#}", record.id, e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "提醒任务完成: 发送 {}, 无资料 {}, 退订 {}, 无邮箱 {}, 日志失败 {}, 失败 {}",
            summary.sent,
            summary.skipped_no_profile,
            summary.skipped_opt_out,
            summary.skipped_no_email,
            summary.log_failures,
            summary.failed
        );
        Ok(summary)
    }

    async fn remind(&self, record: &ApplicationRecord) -> Result<Outcome> {
        let Some(profile) = self.store.user_profile(&record.user_id).await? else {
            info!("用户 {} 没有资料，跳过申请 {}", record.user_id, record.id);
            return Ok(Outcome::NoProfile);
        };

        if profile.opted_out() {
            debug!("用户 {} 已关闭邮件通知", record.user_id);
            return Ok(Outcome::OptedOut);
        }

        let recipient = profile.email.trim();
        if recipient.is_empty() {
            warn!("用户 {} 没有邮箱地址，跳过申请 {}", record.user_id, record.id);
            return Ok(Outcome::NoEmail);
        }

        let email = template::render(record, &self.dashboard_url);
        let message = EmailMessage {
            from: self.from.clone(),
            to: recipient.to_string(),
            subject: email.subject,
            html: email.html,
        };

        self.mailer
            .send(&message)
            .await
            .with_context(|| format!("发送给 {} 的邮件失败", message.to))?;

        let entry = EmailLogEntry {
            subject: message.subject,
            body: message.html,
            recipient: message.to,
            sent_at: Utc::now(),
        };

        // 发送与日志不在同一事务中，日志失败不重试
        if let Err(e) = self.store.append_email_log(record.id, &entry).await {
            error!("申请 {} 的邮件已发送，但日志写入失败: {:#}", record.id, e);
            return Ok(Outcome::SentLogFailed);
        }

        Ok(Outcome::Sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::storage::database::testing::create_test_db;
    use crate::storage::models::ApplicationStatus;
    use crate::storage::{Database, UserProfile};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<EmailMessage>>,
        attempts: Mutex<usize>,
        fail_for: Vec<String>,
    }

    impl RecordingMailer {
        fn recipients(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|m| m.to.clone()).collect()
        }
    }

    #[async_trait]
    impl EmailSender for RecordingMailer {
        async fn send(&self, message: &EmailMessage) -> Result<()> {
            *self.attempts.lock().unwrap() += 1;
            if self.fail_for.contains(&message.to) {
                return Err(TrackerError::MailError("smtp unavailable".into()).into());
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    /// 委托给真实数据库，但对指定申请的日志写入失败
    struct FlakyLogStore {
        db: Arc<Database>,
        fail_log_for: Vec<i64>,
    }

    #[async_trait]
    impl ApplicationStore for FlakyLogStore {
        async fn pending_applications(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ApplicationRecord>> {
            self.db.pending_applications_between(from, to).await
        }

        async fn user_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
            self.db.get_user_profile(user_id).await
        }

        async fn append_email_log(&self, application_id: i64, entry: &EmailLogEntry) -> Result<()> {
            if self.fail_log_for.contains(&application_id) {
                return Err(anyhow::anyhow!("database is locked"));
            }
            self.db.append_email_log(application_id, entry).await
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 24).unwrap()
    }

    async fn setup(mailer: Arc<RecordingMailer>) -> (TempDir, Arc<Database>, ReminderJob) {
        let (dir, db) = create_test_db().await;
        let db = Arc::new(db);
        let config = AppConfig::default();
        let job = ReminderJob::new(db.clone(), mailer, &config.mail, config.schedule.reminder_horizon_days);
        (dir, db, job)
    }

    async fn add_user(db: &Database, user_id: &str, notifications: Option<bool>) {
        db.save_user_profile(&UserProfile {
            user_id: user_id.to_string(),
            email: format!("{}@example.com", user_id),
            email_notifications: notifications,
        })
        .await
        .unwrap();
    }

    async fn add_application(db: &Database, user_id: &str, school: &str, days: i64, status: ApplicationStatus) -> i64 {
        db.insert_application(user_id, school, "MSc CS", today() + Duration::days(days), status)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn horizon_includes_seventh_day_and_excludes_outside() {
        let mailer = Arc::new(RecordingMailer::default());
        let (_dir, db, job) = setup(mailer.clone()).await;
        add_user(&db, "alice", Some(true)).await;

        let due_today = add_application(&db, "alice", "Today U", 0, ApplicationStatus::Interested).await;
        let edge = add_application(&db, "alice", "Edge U", 7, ApplicationStatus::Applying).await;
        let late = add_application(&db, "alice", "Late U", 8, ApplicationStatus::Applying).await;
        let past = add_application(&db, "alice", "Past U", -1, ApplicationStatus::Interested).await;
        let done = add_application(&db, "alice", "Done U", 3, ApplicationStatus::Applied).await;

        let summary = job.run_for(today()).await.unwrap();

        assert_eq!(summary.matched, 2);
        assert_eq!(summary.sent, 2);
        assert_eq!(db.email_logs(due_today).await.unwrap().len(), 1);
        assert_eq!(db.email_logs(edge).await.unwrap().len(), 1);
        for id in [late, past, done] {
            assert!(db.email_logs(id).await.unwrap().is_empty());
        }

        let log = &db.email_logs(edge).await.unwrap()[0];
        assert_eq!(log.recipient, "alice@example.com");
        assert!(log.subject.contains("Edge U"));
        assert!(log.body.contains("December 1, 2025"));
    }

    #[tokio::test]
    async fn opted_out_user_gets_no_mail_and_no_log() {
        let mailer = Arc::new(RecordingMailer::default());
        let (_dir, db, job) = setup(mailer.clone()).await;
        add_user(&db, "bob", Some(false)).await;
        let first = add_application(&db, "bob", "A", 1, ApplicationStatus::Interested).await;
        let second = add_application(&db, "bob", "B", 2, ApplicationStatus::Applying).await;

        let summary = job.run_for(today()).await.unwrap();

        assert_eq!(summary.skipped_opt_out, 2);
        assert_eq!(*mailer.attempts.lock().unwrap(), 0);
        assert!(db.email_logs(first).await.unwrap().is_empty());
        assert!(db.email_logs(second).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unset_preference_and_missing_profile() {
        let mailer = Arc::new(RecordingMailer::default());
        let (_dir, db, job) = setup(mailer.clone()).await;
        add_user(&db, "carol", None).await;
        add_application(&db, "carol", "A", 1, ApplicationStatus::Interested).await;
        let orphan = add_application(&db, "ghost", "B", 1, ApplicationStatus::Interested).await;

        let summary = job.run_for(today()).await.unwrap();

        assert_eq!(summary.sent, 1);
        assert_eq!(summary.skipped_no_profile, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(mailer.recipients(), vec!["carol@example.com"]);
        assert!(db.email_logs(orphan).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn one_failed_send_does_not_stop_the_batch() {
        let mailer = Arc::new(RecordingMailer {
            fail_for: vec!["dave@example.com".to_string()],
            ..Default::default()
        });
        let (_dir, db, job) = setup(mailer.clone()).await;
        for user in ["erin", "dave", "frank"] {
            add_user(&db, user, Some(true)).await;
        }
        let first = add_application(&db, "erin", "A", 1, ApplicationStatus::Interested).await;
        let second = add_application(&db, "dave", "B", 2, ApplicationStatus::Interested).await;
        let third = add_application(&db, "frank", "C", 3, ApplicationStatus::Applying).await;

        let summary = job.run_for(today()).await.unwrap();

        assert_eq!(summary.matched, 3);
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(*mailer.attempts.lock().unwrap(), 3);
        assert_eq!(mailer.recipients(), vec!["erin@example.com", "frank@example.com"]);
        assert_eq!(db.email_logs(first).await.unwrap().len(), 1);
        assert!(db.email_logs(second).await.unwrap().is_empty());
        assert_eq!(db.email_logs(third).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn log_failure_after_send_is_counted_and_batch_continues() {
        let mailer = Arc::new(RecordingMailer::default());
        let (_dir, db) = create_test_db().await;
        let db = Arc::new(db);
        for user in ["gina", "hank"] {
            add_user(&db, user, Some(true)).await;
        }
        let first = add_application(&db, "gina", "A", 1, ApplicationStatus::Interested).await;
        let second = add_application(&db, "hank", "B", 2, ApplicationStatus::Applying).await;

        let store = Arc::new(FlakyLogStore {
            db: db.clone(),
            fail_log_for: vec![first],
        });
        let config = AppConfig::default();
        let job = ReminderJob::new(store, mailer.clone(), &config.mail, 7);

        let summary = job.run_for(today()).await.unwrap();

        assert_eq!(summary.matched, 2);
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.log_failures, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(mailer.recipients(), vec!["gina@example.com", "hank@example.com"]);
        assert!(db.email_logs(first).await.unwrap().is_empty());
        assert_eq!(db.email_logs(second).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn oversized_horizon_is_a_config_error() {
        let mailer = Arc::new(RecordingMailer::default());
        let (_dir, db) = create_test_db().await;
        let db = Arc::new(db);
        add_user(&db, "ivy", Some(true)).await;
        add_application(&db, "ivy", "A", 1, ApplicationStatus::Interested).await;

        let config = AppConfig::default();
        let job = ReminderJob::new(db, mailer.clone(), &config.mail, i64::MAX);

        let err = job.run_for(today()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TrackerError>(),
            Some(TrackerError::ConfigError(_))
        ));
        assert_eq!(*mailer.attempts.lock().unwrap(), 0);
    }
}
