use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ListingSelectors;
use crate::utils::TrackerError;

/// 单个列表元素中提取出的原始文本
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingFields {
    pub school: Option<String>,
    pub program: Option<String>,
    pub deadline: Option<String>,
    pub link: Option<String>,
    pub funding: Option<String>,
}

/// 浏览器引擎：每次 launch 得到一个相互隔离的会话
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>>;
}

#[async_trait]
pub trait BrowserSession: Send {
    async fn goto(&mut self, url: &str) -> Result<()>;

    /// 等待选择器出现，超时返回 `TrackerError::PageTimeout`
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<()>;

    async fn extract_listings(&mut self, selectors: &ListingSelectors) -> Result<Vec<ListingFields>>;

    /// 跟随“下一页”控件。控件不存在或已禁用时返回 false
    async fn next_page(&mut self, selector: &str) -> Result<bool>;

    async fn close(&mut self) -> Result<()>;
}

/// 基于 HTTP 抓取 + DOM 查询的浏览器引擎，适用于服务端渲染的列表页
pub struct HttpBrowser {
    user_agent: String,
    page_timeout: Duration,
}

impl HttpBrowser {
    pub fn new(user_agent: &str, page_timeout: Duration) -> Self {
        Self {
            user_agent: user_agent.to_string(),
            page_timeout,
        }
    }
}

#[async_trait]
impl BrowserEngine for HttpBrowser {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        let client = Client::builder()
            .user_agent(&self.user_agent)
            .redirect(reqwest::redirect::Policy::limited(8))
            .build()
            .context("浏览器会话启动失败")?;

        debug!("已启动浏览器会话");
        Ok(Box::new(HttpSession {
            client,
            page_timeout: self.page_timeout,
            current: None,
            closed: false,
        }))
    }
}

struct LoadedPage {
    url: Url,
    body: String,
}

struct HttpSession {
    client: Client,
    page_timeout: Duration,
    current: Option<LoadedPage>,
    closed: bool,
}

impl HttpSession {
    fn page(&self) -> Result<&LoadedPage> {
        if self.closed {
            return Err(anyhow!("浏览器会话已关闭"));
        }
        self.current.as_ref().ok_or_else(|| anyhow!("尚未打开任何页面"))
    }
}

#[async_trait]
impl BrowserSession for HttpSession {
    async fn goto(&mut self, url: &str) -> Result<()> {
        if self.closed {
            return Err(anyhow!("浏览器会话已关闭"));
        }
        let target = Url::parse(url).with_context(|| format!("无效的页面地址: {}", url))?;
        info!("打开页面: {}", target);

        let load = async {
            let response = self.client.get(target.clone()).send().await?;
            let status = response.status();
            let final_url = response.url().clone();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, final_url, body))
        };

        let (status, final_url, body) = match tokio::time::timeout(self.page_timeout, load).await {
            Ok(result) => result.map_err(TrackerError::from)?,
            Err(_) => {
                return Err(TrackerError::PageTimeout {
                    target: target.to_string(),
                    timeout: self.page_timeout,
                }
                .into())
            }
        };

        // 与真实浏览器一致：错误页也会被加载，随后等待列表时超时
        if !status.is_success() {
            warn!("页面返回状态 {}: {}", status, final_url);
        }

        self.current = Some(LoadedPage { url: final_url, body });
        Ok(())
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        let page = self.page()?;
        if has_element(&page.body, selector)? {
            Ok(())
        } else {
            Err(TrackerError::PageTimeout {
                target: selector.to_string(),
                timeout,
            }
            .into())
        }
    }

    async fn extract_listings(&mut self, selectors: &ListingSelectors) -> Result<Vec<ListingFields>> {
        let page = self.page()?;
        extract_listings(&page.body, &page.url, selectors)
    }

    async fn next_page(&mut self, selector: &str) -> Result<bool> {
        let next = {
            let page = self.page()?;
            next_page_url(&page.body, &page.url, selector)?
        };

        match next {
            Some(url) => {
                self.goto(url.as_str()).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.current = None;
        self.closed = true;
        debug!("浏览器会话已释放");
        Ok(())
    }
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| TrackerError::ParseError(format!("无效的选择器 '{}': {:?}", selector, e)).into())
}

fn has_element(html: &str, selector: &str) -> Result<bool> {
    let sel = parse_selector(selector)?;
    let doc = Html::parse_document(html);
    let found = doc.select(&sel).next().is_some();
    Ok(found)
}

fn element_text(element: &ElementRef<'_>, sel: &Selector) -> Option<String> {
    element
        .select(sel)
        .next()
        .map(|n| n.text().collect::<Vec<_>>().join(" "))
        .and_then(|t| super::clean_text(&t))
}

/// 按选择器从页面中提取每个列表项的字段
pub fn extract_listings(html: &str, base: &Url, selectors: &ListingSelectors) -> Result<Vec<ListingFields>> {
    let listing_sel = parse_selector(&selectors.listing)?;
    let school_sel = parse_selector(&selectors.school)?;
    let program_sel = parse_selector(&selectors.program)?;
    let deadline_sel = parse_selector(&selectors.deadline)?;
    let link_sel = parse_selector(&selectors.link)?;
    let funding_sel = parse_selector(&selectors.funding)?;

    let doc = Html::parse_document(html);
    let listings = doc
        .select(&listing_sel)
        .map(|item| {
            let link = item
                .select(&link_sel)
                .next()
                .and_then(|a| a.value().attr("href"))
                .and_then(|href| base.join(href).ok())
                .map(|u| u.to_string());

            ListingFields {
                school: element_text(&item, &school_sel),
                program: element_text(&item, &program_sel),
                deadline: element_text(&item, &deadline_sel),
                link,
                funding: element_text(&item, &funding_sel),
            }
        })
        .collect();

    Ok(listings)
}

/// 找到可用的“下一页”链接。不存在、被禁用或没有 href 时返回 None
pub fn next_page_url(html: &str, base: &Url, selector: &str) -> Result<Option<Url>> {
    let sel = parse_selector(selector)?;
    let doc = Html::parse_document(html);

    let Some(control) = doc.select(&sel).next() else {
        return Ok(None);
    };
    let el = control.value();

    let disabled = el.attr("disabled").is_some()
        || el.attr("aria-disabled") == Some("true")
        || el.classes().any(|c| c.eq_ignore_ascii_case("disabled"));
    if disabled {
        return Ok(None);
    }

    let Some(href) = el.attr("href").map(str::trim).filter(|h| !h.is_empty() && *h != "#") else {
        return Ok(None);
    };

    let next = base
        .join(href)
        .map_err(|e| TrackerError::ParseError(format!("无效的下一页链接 '{}': {}", href, e)))?;
    if &next == base {
        return Ok(None);
    }
    Ok(Some(next))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <div class="resultsRow">
            <a class="instLink" href="/institutions/toronto"> University of Toronto </a>
            <h3><a class="courseLink" href="/studies/123/cs.html">MSc Computer Science</a></h3>
            <span class="deadline">1 December 2025</span>
            <span class="funding">Fully funded</span>
          </div>
          <div class="resultsRow">
            <a class="instLink">McGill University</a>
            <h3 class="courseLink">MEng   Electrical
              Engineering</h3>
            <span class="deadline">Anytime</span>
          </div>
          <nav><a rel="next" href="?page=2">Next</a></nav>
        </body></html>
    "#;

    fn base() -> Url {
        Url::parse("https://portal.example/search/master?page=1").unwrap()
    }

    #[test]
    fn extracts_fields_per_listing() {
        let listings = extract_listings(PAGE, &base(), &ListingSelectors::default()).unwrap();
        assert_eq!(listings.len(), 2);

        assert_eq!(listings[0].school.as_deref(), Some("University of Toronto"));
        assert_eq!(listings[0].program.as_deref(), Some("MSc Computer Science"));
        assert_eq!(listings[0].deadline.as_deref(), Some("1 December 2025"));
        assert_eq!(listings[0].funding.as_deref(), Some("Fully funded"));
        assert_eq!(
            listings[0].link.as_deref(),
            Some("https://portal.example/studies/123/cs.html")
        );

        assert_eq!(listings[1].program.as_deref(), Some("MEng Electrical Engineering"));
        assert_eq!(listings[1].link, None);
        assert_eq!(listings[1].funding, None);
    }

    #[test]
    fn next_link_is_resolved_against_current_page() {
        let next = next_page_url(PAGE, &base(), "a[rel=next]").unwrap();
        assert_eq!(
            next.map(|u| u.to_string()).as_deref(),
            Some("https://portal.example/search/master?page=2")
        );
    }

    #[test]
    fn disabled_or_missing_next_control_ends_pagination() {
        let disabled = r#"<a rel="next" class="btn disabled" href="?page=9">Next</a>"#;
        assert_eq!(next_page_url(disabled, &base(), "a[rel=next]").unwrap(), None);

        let aria = r#"<a rel="next" aria-disabled="true" href="?page=9">Next</a>"#;
        assert_eq!(next_page_url(aria, &base(), "a[rel=next]").unwrap(), None);

        let no_href = r#"<a rel="next">Next</a>"#;
        assert_eq!(next_page_url(no_href, &base(), "a[rel=next]").unwrap(), None);

        assert_eq!(next_page_url("<p>end</p>", &base(), "a[rel=next]").unwrap(), None);
    }

    #[test]
    fn invalid_selector_is_an_error() {
        assert!(has_element(PAGE, "<<>>").is_err());
        assert!(has_element(PAGE, "div.resultsRow").unwrap());
        assert!(!has_element(PAGE, "table.results").unwrap());
    }
}
