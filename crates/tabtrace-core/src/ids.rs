//! Id derivation
//!
//! `Visit::id` is a stable hash of `(url, page_loaded_at)`: the sender is
//! trusted to produce monotonic timestamps per URL, so the pair functionally
//! determines a unique visit. A sequence number from the sender would
//! remove the monotonicity assumption, but none is available on the wire
//! today.

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};

/// Derive a visit id as `md5(url || ":" || page_loaded_at)`.
pub fn visit_id(url: &str, page_loaded_at: DateTime<Utc>) -> String {
    let mut hasher = Md5::new();
    hasher.update(url.as_bytes());
    hasher.update(b":");
    hasher.update(page_loaded_at.to_rfc3339().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Derive a fresh tree id from the root visit's id.
pub fn tree_id_for_root(root_visit_id: &str) -> String {
    format!("tree-{}", root_visit_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_same_id() {
        let t = "2026-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(
            visit_id("https://example.com", t),
            visit_id("https://example.com", t)
        );
    }

    #[test]
    fn different_url_different_id() {
        let t = "2026-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_ne!(
            visit_id("https://example.com/a", t),
            visit_id("https://example.com/b", t)
        );
    }

    #[test]
    fn different_timestamp_different_id() {
        let t1 = "2026-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let t2 = "2026-01-01T00:00:01Z".parse::<DateTime<Utc>>().unwrap();
        assert_ne!(
            visit_id("https://example.com", t1),
            visit_id("https://example.com", t2)
        );
    }
}
