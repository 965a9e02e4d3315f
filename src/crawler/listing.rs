use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{AdapterSummary, BrowserEngine, BrowserSession, CandidateRecord, ListingFields, SourceAdapter, SourceTag};
use crate::config::{CrawlerConfig, ListingSelectors};
use crate::storage::CatalogWriter;
use crate::utils::TrackerError;

/// 分页列表爬虫：逐页提取项目并立即写入目录
pub struct ListingCrawler {
    engine: Arc<dyn BrowserEngine>,
    start_url: String,
    selectors: ListingSelectors,
    page_timeout: Duration,
    max_pages: usize,
}

impl ListingCrawler {
    pub fn new(engine: Arc<dyn BrowserEngine>, config: &CrawlerConfig) -> Self {
        Self {
            engine,
            start_url: config.start_url.clone(),
            selectors: config.selectors.clone(),
            page_timeout: Duration::from_secs(config.page_timeout_secs),
            max_pages: config.max_pages.max(1),
        }
    }

    async fn paginate(
        &self,
        session: &mut dyn BrowserSession,
        writer: &dyn CatalogWriter,
        summary: &mut AdapterSummary,
    ) -> Result<()> {
        if let Err(e) = session.goto(&self.start_url).await {
            if TrackerError::is_page_timeout(&e) {
                warn!("首页加载超时，结束本次采集: {}", e);
                return Ok(());
            }
            return Err(e);
        }

        loop {
            if let Err(e) = session.wait_for(&self.selectors.listing, self.page_timeout).await {
                if TrackerError::is_page_timeout(&e) {
                    info!("第 {} 页未出现列表，分页结束: {}", summary.pages + 1, e);
                    return Ok(());
                }
                return Err(e);
            }

            summary.pages += 1;
            let listings = session.extract_listings(&self.selectors).await?;
            info!("第 {} 页提取到 {} 个项目", summary.pages, listings.len());

            for fields in listings {
                match candidate_from_listing(fields) {
                    Some(candidate) => {
                        writer.upsert(&candidate).await?;
                        summary.upserted += 1;
                    }
                    None => {
                        warn!("列表项缺少学校或项目名称，已跳过");
                        summary.skipped += 1;
                    }
                }
            }

            if summary.pages >= self.max_pages {
                warn!("已达到最大页数 {}，停止翻页", self.max_pages);
                summary.hit_page_cap = true;
                return Ok(());
            }

            match session.next_page(&self.selectors.next_page).await {
                Ok(true) => {}
                Ok(false) => {
                    info!("没有下一页，分页结束");
                    return Ok(());
                }
                Err(e) if TrackerError::is_page_timeout(&e) => {
                    info!("下一页加载超时，分页结束: {}", e);
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn candidate_from_listing(fields: ListingFields) -> Option<CandidateRecord> {
    let school = fields.school?;
    let program = fields.program?;
    let mut candidate = CandidateRecord::new(SourceTag::Listing, &school, &program)?
        .with_deadline_text(fields.deadline.as_deref());
    candidate.funding_type = fields.funding;
    candidate.application_link = fields.link;
    Some(candidate)
}

#[async_trait]
impl SourceAdapter for ListingCrawler {
    fn source(&self) -> SourceTag {
        SourceTag::Listing
    }

    async fn run(&self, writer: &dyn CatalogWriter) -> Result<AdapterSummary> {
        let mut session = self.engine.launch().await?;
        let mut summary = AdapterSummary::default();

        let result = self.paginate(session.as_mut(), writer, &mut summary).await;

        // 无论成功失败都释放会话
        if let Err(e) = session.close().await {
            warn!("释放浏览器会话失败: {}", e);
        }

        result.map(|_| summary)
    }
}
