use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, warn};

use super::{clean_text, AdapterSummary, CandidateRecord, SourceAdapter, SourceTag};
use crate::config::ProgramApiConfig;
use crate::storage::CatalogWriter;
use crate::utils::TrackerError;

/// 项目数据库 API 返回的单个项目
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiProgram {
    #[serde(alias = "school", alias = "university", alias = "school_name")]
    pub school_name: Option<String>,
    #[serde(alias = "program", alias = "name", alias = "program_name")]
    pub program_name: Option<String>,
    #[serde(alias = "funding_type")]
    pub funding_type: Option<String>,
    #[serde(alias = "funding_amount")]
    pub funding_amount: Option<String>,
    #[serde(alias = "deadline", alias = "application_deadline")]
    pub application_deadline: Option<String>,
    #[serde(alias = "gre_waiver")]
    pub gre_waiver: Option<String>,
    #[serde(alias = "ielts_waiver")]
    pub ielts_waiver: Option<String>,
    #[serde(alias = "application_fee_waiver", alias = "appFeeWaiver")]
    pub application_fee_waiver: Option<String>,
    #[serde(default, alias = "required_documents")]
    pub required_documents: Vec<String>,
    #[serde(alias = "link", alias = "url", alias = "application_link")]
    pub application_link: Option<String>,
}

/// 响应可以是裸数组，也可以包在 data / results 里
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiResponse {
    List(Vec<ApiProgram>),
    Data { data: Vec<ApiProgram> },
    Results { results: Vec<ApiProgram> },
}

impl ApiResponse {
    fn into_programs(self) -> Vec<ApiProgram> {
        match self {
            ApiResponse::List(items) => items,
            ApiResponse::Data { data } => data,
            ApiResponse::Results { results } => results,
        }
    }
}

impl ApiProgram {
    fn into_candidate(self) -> Option<CandidateRecord> {
        let school = self.school_name?;
        let program = self.program_name?;
        let mut candidate = CandidateRecord::new(SourceTag::ProgramApi, &school, &program)?
            .with_deadline_text(self.application_deadline.as_deref());
        candidate.funding_type = self.funding_type.as_deref().and_then(clean_text);
        candidate.funding_amount = self.funding_amount.as_deref().and_then(clean_text);
        candidate.gre_waiver = self.gre_waiver.as_deref().and_then(clean_text);
        candidate.ielts_waiver = self.ielts_waiver.as_deref().and_then(clean_text);
        candidate.application_fee_waiver = self.application_fee_waiver.as_deref().and_then(clean_text);
        candidate.required_documents = self
            .required_documents
            .iter()
            .filter_map(|d| clean_text(d))
            .collect();
        candidate.application_link = self.application_link.as_deref().and_then(clean_text);
        Some(candidate)
    }
}

pub struct ProgramApiClient {
    client: Client,
    config: ProgramApiConfig,
}

impl ProgramApiClient {
    pub fn new(config: ProgramApiConfig, user_agent: &str) -> Result<Self> {
        // 不单独设置超时，沿用 reqwest 默认行为
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .context("创建 HTTP 客户端失败")?;

        Ok(Self { client, config })
    }

    /// 按固定参数请求项目列表
    pub async fn fetch(&self) -> Result<String> {
        let limit = self.config.limit.to_string();
        let query = [
            ("country", self.config.country.as_str()),
            ("level", self.config.level.as_str()),
            ("limit", limit.as_str()),
        ];

        info!("请求项目 API: {} {:?}", self.config.url, query);

        let mut request = self.client.get(&self.config.url).query(&query);
        if !self.config.api_key.is_empty() {
            request = request.header("X-Api-Key", &self.config.api_key);
        }

        let response = request.send().await.map_err(TrackerError::from)?;
        let status = response.status();
        let text = response.text().await.map_err(TrackerError::from)?;

        info!("项目 API 响应状态: {}, 内容长度: {} 字节", status, text.len());

        if !status.is_success() {
            let preview: String = text.chars().take(200).collect();
            return Err(TrackerError::ParseError(format!("项目 API 返回 {}: {}", status, preview)).into());
        }

        Ok(text)
    }
}

/// 把响应体映射为候选记录；缺少学校或项目名的条目计入 skipped
pub fn parse_programs(body: &str) -> Result<(Vec<CandidateRecord>, usize)> {
    let response: ApiResponse = serde_json::from_str(body)
        .map_err(|e| TrackerError::ParseError(format!("项目 API 响应格式错误: {}", e)))?;

    let mut skipped = 0;
    let candidates = response
        .into_programs()
        .into_iter()
        .filter_map(|item| {
            let candidate = item.into_candidate();
            if candidate.is_none() {
                skipped += 1;
            }
            candidate
        })
        .collect();

    Ok((candidates, skipped))
}

#[async_trait]
impl SourceAdapter for ProgramApiClient {
    fn source(&self) -> SourceTag {
        SourceTag::ProgramApi
    }

    async fn run(&self, writer: &dyn CatalogWriter) -> Result<AdapterSummary> {
        let body = self.fetch().await?;
        let (candidates, skipped) = parse_programs(&body)?;
        if skipped > 0 {
            warn!("{} 个 API 条目缺少学校或项目名称，已跳过", skipped);
        }

        upsert_all(&candidates, skipped, writer).await
    }
}

/// 逐条写入；遇到写入错误立即中止，之前写入的记录保留
pub async fn upsert_all(
    candidates: &[CandidateRecord],
    skipped: usize,
    writer: &dyn CatalogWriter,
) -> Result<AdapterSummary> {
    let mut summary = AdapterSummary {
        pages: 1,
        skipped,
        ..Default::default()
    };

    for candidate in candidates {
        writer.upsert(candidate).await.with_context(|| {
            format!(
                "写入项目失败: {} / {} (已写入 {} 条)",
                candidate.school_name, candidate.program_name, summary.upserted
            )
        })?;
        summary.upserted += 1;
    }

    Ok(summary)
}
