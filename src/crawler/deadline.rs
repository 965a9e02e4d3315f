use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

/// 表示“没有截止日期”的占位文本
const NO_DEADLINE_SENTINELS: [&str; 2] = ["not specified", "anytime"];

const DATE_FORMATS: [&str; 8] = [
    "%Y-%m-%d",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d/%m/%Y",
];

fn ordinal_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{1,2})(st|nd|rd|th)\b").expect("ordinal regex"))
}

pub fn is_no_deadline(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    lowered.is_empty() || NO_DEADLINE_SENTINELS.contains(&lowered.as_str())
}

/// 解析列表页上的截止日期文本。占位文本和无法识别的格式都返回 None
pub fn parse_deadline(text: &str) -> Option<NaiveDate> {
    if is_no_deadline(text) {
        return None;
    }

    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix("Deadline:")
        .or_else(|| trimmed.strip_prefix("Application deadline:"))
        .unwrap_or(trimmed)
        .trim();

    // ISO 时间戳只取日期部分
    if let Some(date_part) = trimmed.get(..10) {
        if trimmed.len() > 10 && trimmed.as_bytes()[10] == b'T' {
            if let Ok(date) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
                return Some(date);
            }
        }
    }

    let cleaned = ordinal_suffix().replace_all(trimmed, "$1");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn sentinels_yield_no_deadline() {
        assert_eq!(parse_deadline("Anytime"), None);
        assert_eq!(parse_deadline("Not specified"), None);
        assert_eq!(parse_deadline("  not SPECIFIED "), None);
        assert_eq!(parse_deadline(""), None);
    }

    #[test]
    fn common_listing_formats() {
        assert_eq!(parse_deadline("2025-12-01"), Some(ymd(2025, 12, 1)));
        assert_eq!(parse_deadline("1 December 2025"), Some(ymd(2025, 12, 1)));
        assert_eq!(parse_deadline("1st Dec 2025"), Some(ymd(2025, 12, 1)));
        assert_eq!(parse_deadline("December 15, 2025"), Some(ymd(2025, 12, 15)));
        assert_eq!(parse_deadline("Deadline: Jan 2nd, 2026"), Some(ymd(2026, 1, 2)));
        assert_eq!(parse_deadline("2026-01-15T00:00:00.000Z"), Some(ymd(2026, 1, 15)));
    }

    #[test]
    fn unknown_text_is_not_today() {
        assert_eq!(parse_deadline("Rolling admissions"), None);
        assert_eq!(parse_deadline("Fall 2026"), None);
    }
}
