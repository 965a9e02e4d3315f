mod config;
mod crawler;
mod mailer;
mod reminder;
mod storage;
mod utils;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use config::{AppConfig, SETTINGS_PATH};
use crawler::{HttpBrowser, ListingCrawler, ProgramApiClient, SourceAdapter, SourceTag};
use mailer::HttpMailer;
use reminder::ReminderJob;
use storage::{CatalogProgram, Database};
use utils::logger;
use utils::scheduler::{ScheduledJob, Scheduler};

#[derive(Parser)]
#[command(name = "gradtrack")]
#[command(about = "研究生项目目录采集与申请截止提醒", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 初始化配置和数据库
    Init,
    /// 立即采集项目目录
    Discover {
        /// 只运行指定数据源 (listing / program_api)
        #[arg(short, long)]
        source: Option<SourceTag>,
    },
    /// 立即执行截止提醒
    Remind {
        /// 以指定日期为“今天” (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<String>,
    },
    /// 查看目录中的单个项目
    Show {
        /// 学校名称
        school: String,
        /// 项目名称
        program: String,
    },
    /// 查看某个申请的提醒邮件日志
    Logs {
        /// 申请 ID
        application_id: i64,
    },
    /// 启动定时任务
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    logger::init_logger();
    info!("gradtrack 启动");

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            init_command().await?;
        }
        Commands::Discover { source } => {
            discover_command(source).await?;
        }
        Commands::Remind { date } => {
            remind_command(date).await?;
        }
        Commands::Show { school, program } => {
            show_command(&school, &program).await?;
        }
        Commands::Logs { application_id } => {
            logs_command(application_id).await?;
        }
        Commands::Schedule => {
            schedule_command().await?;
        }
    }

    Ok(())
}

async fn open_database(config: &AppConfig) -> Result<Arc<Database>> {
    if let Some(parent) = Path::new(&config.storage.database_path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let db = Database::new(&config.database_url())
        .await?
        .with_merge_policy(config.storage.merge_policy);
    db.init_schema().await?;
    info!("目录合并策略: {:?}", db.merge_policy());
    Ok(Arc::new(db))
}

fn build_adapter(source: SourceTag, config: &AppConfig) -> Result<Arc<dyn SourceAdapter>> {
    let adapter: Arc<dyn SourceAdapter> = match source {
        SourceTag::Listing => {
            let engine = Arc::new(HttpBrowser::new(
                &config.crawler.user_agent,
                Duration::from_secs(config.crawler.page_timeout_secs),
            ));
            Arc::new(ListingCrawler::new(engine, &config.crawler))
        }
        SourceTag::ProgramApi => Arc::new(ProgramApiClient::new(
            config.program_api.clone(),
            &config.crawler.user_agent,
        )?),
    };
    Ok(adapter)
}

/// 邮件未配置时返回 None
fn build_reminder(config: &AppConfig, db: Arc<Database>) -> Result<Option<ReminderJob>> {
    if !config.mail.is_configured() {
        return Ok(None);
    }
    let mailer = Arc::new(HttpMailer::new(config.mail.clone())?);
    info!("提醒邮件发件人: {}", mailer.sender_address());
    Ok(Some(ReminderJob::new(
        db,
        mailer,
        &config.mail,
        config.schedule.reminder_horizon_days,
    )))
}

async fn init_command() -> Result<()> {
    info!("初始化系统...");

    tokio::fs::create_dir_all("data").await?;
    tokio::fs::create_dir_all("config").await?;

    let app_config = AppConfig::default();
    app_config.save(SETTINGS_PATH)?;
    info!("已生成配置文件: {}", SETTINGS_PATH);

    let db = open_database(&app_config).await?;
    info!("数据库初始化完成，目录中现有 {} 个项目", db.count_programs().await?);

    info!("✅ 系统初始化完成！");
    info!("下一步:");
    info!("  1. 编辑 {} 配置列表页、项目 API 和邮件 API", SETTINGS_PATH);
    info!("  2. 运行 'gradtrack discover' 采集项目目录");
    info!("  3. 运行 'gradtrack schedule' 启动定时任务");

    Ok(())
}

async fn discover_command(source: Option<SourceTag>) -> Result<()> {
    info!("开始采集任务...");

    let app_config = AppConfig::load()?;
    let db = open_database(&app_config).await?;

    let sources: Vec<SourceTag> = match source {
        Some(tag) => vec![tag],
        None => SourceTag::ALL.to_vec(),
    };

    let mut failures = 0;
    for tag in sources {
        let adapter = build_adapter(tag, &app_config)?;
        // 单个数据源失败不影响其他数据源
        if crawler::run_adapter(adapter.as_ref(), db.as_ref()).await.is_err() {
            failures += 1;
        }
    }

    info!(
        "✅ 采集任务结束: 目录共 {} 个项目, {} 个数据源失败",
        db.count_programs().await?,
        failures
    );
    Ok(())
}

async fn remind_command(date: Option<String>) -> Result<()> {
    let app_config = AppConfig::load()?;
    let db = open_database(&app_config).await?;

    let Some(job) = build_reminder(&app_config, db)? else {
        info!("❌ 邮件 API key 未配置。请在 {} 中设置 [mail] api_key", SETTINGS_PATH);
        return Ok(());
    };

    let summary = match date {
        Some(d) => {
            let today = NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                .with_context(|| format!("日期格式应为 YYYY-MM-DD: {}", d))?;
            job.run_for(today).await?
        }
        None => job.run().await?,
    };

    info!("✅ 提醒完成: 匹配 {} 个申请, 发送 {} 封邮件", summary.matched, summary.sent);
    Ok(())
}

fn print_program(program: &CatalogProgram) {
    let or_dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());

    info!("📚 {} / {}", program.school_name, program.program_name);
    info!("  截止日期: {}", match program.deadline() {
        Some(date) => date.to_string(),
        None => or_dash(&program.deadline_text),
    });
    info!("  原始截止文本: {}", or_dash(&program.deadline_text));
    info!("  资助: {} {}", or_dash(&program.funding_type), or_dash(&program.funding_amount));
    info!(
        "  GRE 豁免: {}  IELTS 豁免: {}  申请费豁免: {}",
        or_dash(&program.gre_waiver),
        or_dash(&program.ielts_waiver),
        or_dash(&program.application_fee_waiver)
    );
    let documents = program.documents();
    if !documents.is_empty() {
        info!("  所需材料: {}", documents.join(", "));
    }
    info!("  申请链接: {}", or_dash(&program.application_link));
    info!("  来源: {}  更新于: {}", program.source_tag, program.updated_at);
}

async fn show_command(school: &str, program: &str) -> Result<()> {
    let app_config = AppConfig::load()?;
    let db = open_database(&app_config).await?;

    match db.get_program(school, program).await? {
        Some(found) => print_program(&found),
        None => info!("❌ 目录中没有该项目: {} / {}", school, program),
    }
    Ok(())
}

async fn logs_command(application_id: i64) -> Result<()> {
    let app_config = AppConfig::load()?;
    let db = open_database(&app_config).await?;

    let logs = db.email_logs(application_id).await?;
    if logs.is_empty() {
        info!("申请 {} 还没有提醒邮件记录", application_id);
        return Ok(());
    }

    info!("申请 {} 共 {} 条提醒邮件记录:", application_id, logs.len());
    for entry in &logs {
        info!("  [{}] {} -> {}", entry.sent_at.to_rfc3339(), entry.subject, entry.recipient);
    }
    Ok(())
}

fn source_job(name: &str, cron_expr: &str, adapter: Arc<dyn SourceAdapter>, db: Arc<Database>) -> ScheduledJob {
    ScheduledJob::new(name, cron_expr, move || {
        let adapter = adapter.clone();
        let db = db.clone();
        async move {
            crawler::run_adapter(adapter.as_ref(), db.as_ref()).await?;
            Ok(())
        }
    })
}

async fn schedule_command() -> Result<()> {
    info!("启动定时任务调度器...");

    let app_config = AppConfig::load()?;
    let db = open_database(&app_config).await?;
    let schedule = &app_config.schedule;

    let mut jobs = vec![
        source_job(
            "listing-discovery",
            &schedule.listing_cron,
            build_adapter(SourceTag::Listing, &app_config)?,
            db.clone(),
        ),
        source_job(
            "program-api-sync",
            &schedule.program_api_cron,
            build_adapter(SourceTag::ProgramApi, &app_config)?,
            db.clone(),
        ),
    ];

    match build_reminder(&app_config, db.clone())? {
        Some(reminder) => {
            let reminder = Arc::new(reminder);
            jobs.push(ScheduledJob::new("deadline-reminder", &schedule.reminder_cron, move || {
                let reminder = reminder.clone();
                async move {
                    reminder.run().await?;
                    Ok(())
                }
            }));
        }
        None => warn!("⚠️ 邮件 API key 未配置，不启用截止提醒任务"),
    }

    let scheduler = Scheduler::new(jobs).await?;
    scheduler.start().await?;

    info!("调度器运行中，按 Ctrl+C 停止");

    // 保持运行
    tokio::signal::ctrl_c().await?;
    info!("收到停止信号");

    scheduler.shutdown().await?;
    Ok(())
}
