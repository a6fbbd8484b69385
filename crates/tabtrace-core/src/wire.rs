//! `POST /visit` wire decoding
//!
//! The payload on the wire differs from the in-process `Visit` in two ways:
//! `content` is base64-of-zstd rather than plain text, and `id` doesn't
//! exist yet — it's derived once the timestamp has been parsed.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::ids::visit_id;
use crate::model::Visit;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VisitWire {
    pub url: String,
    pub page_loaded_at: DateTime<Utc>,
    pub tab_id: String,
    #[serde(default)]
    pub opener_tab_id: Option<String>,
    pub group_id: String,
    #[serde(default, rename = "referrer")]
    pub referrer_url: Option<String>,
    #[serde(default)]
    pub referrer_timestamp: Option<f64>,
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
}

/// A schema violation surfaced to the `POST /visit` caller.
#[derive(Debug)]
pub struct ValidationIssue(pub String);

impl VisitWire {
    /// Validate the scalar fields the schema requires to be non-empty.
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if self.url.trim().is_empty() {
            issues.push(ValidationIssue("url must not be empty".to_string()));
        }
        if self.tab_id.trim().is_empty() {
            issues.push(ValidationIssue("tab_id must not be empty".to_string()));
        }
        if self.group_id.trim().is_empty() {
            issues.push(ValidationIssue("group_id must not be empty".to_string()));
        }
        issues
    }

    /// Decode and decompress `content`, compute the visit id, and produce
    /// the in-process `Visit`. Decompression failure falls back to treating
    /// `content` as the raw string, per the wire contract.
    pub fn into_visit(self) -> Visit {
        let id = visit_id(&self.url, self.page_loaded_at);
        let raw_content = decode_content(&self.content);
        let referrer_timestamp = self
            .referrer_timestamp
            .and_then(|secs| DateTime::from_timestamp(secs as i64, 0));

        Visit {
            id,
            url: self.url,
            page_loaded_at: self.page_loaded_at,
            tab_id: self.tab_id,
            opener_tab_id: self.opener_tab_id,
            group_id: self.group_id,
            referrer_url: self.referrer_url,
            referrer_timestamp,
            raw_content,
            title: self.title.unwrap_or_default(),
        }
    }
}

/// Decode base64, then decompress zstd. On either failure, fall back to the
/// input string as-is — the sender may have sent plain text.
fn decode_content(raw: &str) -> String {
    let Ok(compressed) = base64::engine::general_purpose::STANDARD.decode(raw) else {
        return raw.to_string();
    };
    match zstd::stream::decode_all(&compressed[..]) {
        Ok(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| raw.to_string()),
        Err(_) => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(text: &str) -> String {
        let compressed = zstd::stream::encode_all(text.as_bytes(), 0).unwrap();
        base64::engine::general_purpose::STANDARD.encode(compressed)
    }

    #[test]
    fn decodes_valid_zstd_payload() {
        let content = encode("hello world");
        assert_eq!(decode_content(&content), "hello world");
    }

    #[test]
    fn falls_back_to_raw_string_on_invalid_base64() {
        assert_eq!(decode_content("not base64 at all!!"), "not base64 at all!!");
    }

    #[test]
    fn falls_back_to_raw_string_on_invalid_zstd() {
        let bogus = base64::engine::general_purpose::STANDARD.encode(b"not zstd data");
        assert_eq!(decode_content(&bogus), bogus);
    }

    #[test]
    fn validate_flags_empty_required_fields() {
        let wire = VisitWire {
            url: String::new(),
            page_loaded_at: Utc::now(),
            tab_id: String::new(),
            opener_tab_id: None,
            group_id: "g1".to_string(),
            referrer_url: None,
            referrer_timestamp: None,
            title: None,
            content: String::new(),
        };
        let issues = wire.validate();
        assert_eq!(issues.len(), 2);
    }
}
