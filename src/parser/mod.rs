//! Wire format parsers.
//!
//! Every parser turns the raw body of one source into normalized articles.
//! `now` is the ingestion instant, used for missing dates and for the
//! relative time label.

pub mod envelope;
pub mod rss;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::article::Article;
use crate::error::FeedError;
use crate::source::{FeedFormat, FeedSource};

/// Summaries longer than this many characters are cut and suffixed.
pub const SUMMARY_LIMIT: usize = 200;
pub const ELLIPSIS: &str = "...";

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));

pub fn parse(raw: &[u8], source: &FeedSource, now: DateTime<Utc>) -> Result<Vec<Article>, FeedError> {
    match source.format {
        FeedFormat::JsonEnvelope => envelope::parse(raw, source, now),
        FeedFormat::Rss => rss::parse(raw, source, now),
    }
}

/// Strip markup, decode entities, trim and truncate a description.
pub fn clean_summary(html: &str) -> String {
    let text = HTML_TAG.replace_all(html, "");
    let text = html_escape::decode_html_entities(&text);
    truncate_summary(text.trim())
}

pub fn truncate_summary(text: &str) -> String {
    if text.chars().count() <= SUMMARY_LIMIT {
        return text.to_string();
    }
    let mut out: String = text.chars().take(SUMMARY_LIMIT).collect();
    out.push_str(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    mod truncate_summary_tests {
        use super::*;

        #[test]
        fn test_exactly_limit_not_truncated() {
            let text = "a".repeat(SUMMARY_LIMIT);
            assert_eq!(truncate_summary(&text), text);
        }

        #[test]
        fn test_over_limit_truncated_with_ellipsis() {
            let text = "b".repeat(SUMMARY_LIMIT + 1);
            let out = truncate_summary(&text);
            assert_eq!(out, format!("{}...", "b".repeat(SUMMARY_LIMIT)));
        }

        #[test]
        fn test_counts_characters_not_bytes() {
            let text = "é".repeat(SUMMARY_LIMIT);
            assert_eq!(truncate_summary(&text), text);
        }
    }

    mod clean_summary_tests {
        use super::*;

        #[test]
        fn test_strips_tags_and_trims() {
            let html = "  <p>Hamilton <b>takes</b> pole</p>\n";
            assert_eq!(clean_summary(html), "Hamilton takes pole");
        }

        #[test]
        fn test_decodes_entities() {
            assert_eq!(clean_summary("Ferrari &amp; McLaren&nbsp;clash"), "Ferrari & McLaren\u{a0}clash");
        }

        #[test]
        fn test_tags_spanning_lines() {
            let html = "<img\n src=\"x.png\"\n/>Race report";
            assert_eq!(clean_summary(html), "Race report");
        }

        #[test]
        fn test_truncates_after_stripping() {
            let html = format!("<div>{}</div>", "c".repeat(SUMMARY_LIMIT));
            assert_eq!(clean_summary(&html), "c".repeat(SUMMARY_LIMIT));
        }
    }
}
