use serde::{Deserialize, Serialize};

/// 列表页的 CSS 选择器。字段选择器都相对于单个 `listing` 元素
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListingSelectors {
    pub listing: String,
    pub school: String,
    pub program: String,
    pub deadline: String,
    pub link: String,
    pub funding: String,
    pub next_page: String,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            listing: ".resultsRow".to_string(),
            school: ".instLink".to_string(),
            program: ".courseLink".to_string(),
            deadline: ".deadline".to_string(),
            link: "a.courseLink".to_string(),
            funding: ".funding".to_string(),
            next_page: "a[rel=next]".to_string(),
        }
    }
}
