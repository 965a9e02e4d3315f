use anyhow::Result;
use chrono::Local;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

pub type JobFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
pub type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// 一次触发的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Completed,
    Failed,
    /// 上一次执行尚未结束，本次触发被跳过
    SkippedOverlap,
}

/// 定时任务：名称、cron 表达式（本地时区，秒在首位）以及执行函数
#[derive(Clone)]
pub struct ScheduledJob {
    name: String,
    cron_expr: String,
    run: JobFn,
    running: Arc<AtomicBool>,
}

impl ScheduledJob {
    pub fn new<F, Fut>(name: impl Into<String>, cron_expr: impl Into<String>, job_fn: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let run: JobFn = Arc::new(move || Box::pin(job_fn()) as JobFuture);
        Self {
            name: name.into(),
            cron_expr: cron_expr.into(),
            run,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cron_expr(&self) -> &str {
        &self.cron_expr
    }

    /// 执行一次任务。同一任务同时只允许一个实例运行，错误只记录日志
    pub async fn fire(&self) -> FireOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("任务 {} 仍在运行，跳过本次触发", self.name);
            return FireOutcome::SkippedOverlap;
        }
        let _guard = RunGuard(&self.running);

        info!("执行定时任务: {}", self.name);
        match (self.run)().await {
            Ok(()) => {
                info!("定时任务完成: {}", self.name);
                FireOutcome::Completed
            }
            Err(e) => {
                error!("定时任务 {} 执行失败: {:#}", self.name, e);
                FireOutcome::Failed
            }
        }
    }
}

struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 调度器在进程启动时构造一次，持有全部注入的任务
pub struct Scheduler {
    scheduler: JobScheduler,
    jobs: Vec<ScheduledJob>,
}

impl Scheduler {
    pub async fn new(jobs: Vec<ScheduledJob>) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        for scheduled in &jobs {
            let job_ref = scheduled.clone();
            let job = Job::new_async_tz(scheduled.cron_expr(), Local, move |_uuid, _lock| {
                let job_ref = job_ref.clone();
                Box::pin(async move {
                    job_ref.fire().await;
                })
            })?;

            scheduler.add(job).await?;
            info!("已注册定时任务: {} [{}]", scheduled.name(), scheduled.cron_expr());
        }

        Ok(Self { scheduler, jobs })
    }

    #[cfg(test)]
    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }

    pub async fn start(&self) -> Result<()> {
        self.scheduler.start().await?;
        info!("任务调度器已启动，共 {} 个任务", self.jobs.len());
        Ok(())
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.scheduler.shutdown().await?;
        info!("任务调度器已关闭");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn overlapping_fire_of_same_job_is_skipped() {
        let release = Arc::new(Notify::new());
        let started = Arc::new(Notify::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let job = {
            let release = release.clone();
            let started = started.clone();
            let runs = runs.clone();
            ScheduledJob::new("slow", "0 0 8 * * *", move || {
                let release = release.clone();
                let started = started.clone();
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    started.notify_one();
                    release.notified().await;
                    Ok(())
                }
            })
        };

        let first = {
            let job = job.clone();
            tokio::spawn(async move { job.fire().await })
        };
        started.notified().await;

        assert_eq!(job.fire().await, FireOutcome::SkippedOverlap);

        release.notify_one();
        assert_eq!(first.await.unwrap(), FireOutcome::Completed);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // 前一次结束后可以再次执行
        let again = {
            let job = job.clone();
            tokio::spawn(async move { job.fire().await })
        };
        started.notified().await;
        release.notify_one();
        assert_eq!(again.await.unwrap(), FireOutcome::Completed);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_job_releases_guard() {
        let job = ScheduledJob::new("broken", "0 0 8 * * *", || async {
            Err(anyhow::anyhow!("boom"))
        });

        assert_eq!(job.fire().await, FireOutcome::Failed);
        assert_eq!(job.fire().await, FireOutcome::Failed);
    }

    #[tokio::test]
    async fn invalid_cron_expression_is_rejected() {
        let job = ScheduledJob::new("bad", "every tuesday", || async { Ok(()) });
        assert!(Scheduler::new(vec![job]).await.is_err());
    }

    #[tokio::test]
    async fn registers_injected_jobs() {
        let jobs = vec![
            ScheduledJob::new("monthly", "0 0 0 1 * *", || async { Ok(()) }),
            ScheduledJob::new("daily", "0 0 8 * * *", || async { Ok(()) }),
        ];
        let scheduler = Scheduler::new(jobs).await.unwrap();
        let names: Vec<&str> = scheduler.jobs().iter().map(|j| j.name()).collect();
        assert_eq!(names, vec!["monthly", "daily"]);
    }
}
