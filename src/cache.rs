//! Response cache (C4, §4.4).
//!
//! Entries are JSON-serialized `CachedResponse` values stored in the KV
//! store's cache database, keyed by a fingerprint of method, host, URI, and
//! `Accept` header. Reads are eligible for any GET; writes additionally
//! require the subdomain to permit caching, a matching cache-path glob, a
//! non-error status, and the absence of `no-cache`/`private` in the
//! request's `Cache-Control` header.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProxyResult;
use crate::kv::{KvDb, KvStore, Ttl};

pub const CACHE_TTL: Duration = Duration::from_secs(15 * 60);

pub const SERVER_HEADER_CACHED: &str = "Mixproxy (with cache)";
pub const SERVER_HEADER_PLAIN: &str = "Mixproxy";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Fingerprint = `method ":" host original-uri ":" accept-header` (§4.4, Glossary).
pub fn fingerprint(method: &str, host: &str, uri: &str, accept: &str) -> String {
    format!("{method}:{host}{uri}:{accept}")
}

pub fn server_header(cache_allowed: bool) -> &'static str {
    if cache_allowed {
        SERVER_HEADER_CACHED
    } else {
        SERVER_HEADER_PLAIN
    }
}

/// `/*` matches everything; a trailing `/*` is a prefix match; anything else
/// is an exact match (§3, §8).
pub fn path_matches(patterns: &[String], uri: &str) -> bool {
    patterns.iter().any(|pattern| {
        if pattern == "/*" {
            true
        } else if let Some(prefix) = pattern.strip_suffix("/*") {
            uri.starts_with(prefix)
        } else {
            uri == pattern
        }
    })
}

pub fn is_read_eligible(method: &str) -> bool {
    method.eq_ignore_ascii_case("GET")
}

pub fn is_write_eligible(
    method: &str,
    cache_enabled: bool,
    cache_paths: &[String],
    uri: &str,
    status: u16,
    cache_control: Option<&str>,
) -> bool {
    if !is_read_eligible(method) || !cache_enabled {
        return false;
    }
    if !path_matches(cache_paths, uri) {
        return false;
    }
    if status >= 400 {
        return false;
    }
    if let Some(cc) = cache_control {
        let lower = cc.to_ascii_lowercase();
        if lower.contains("no-cache") || lower.contains("private") {
            return false;
        }
    }
    true
}

pub struct ResponseCache<'a> {
    kv: &'a dyn KvStore,
}

impl<'a> ResponseCache<'a> {
    pub fn new(kv: &'a dyn KvStore) -> Self {
        Self { kv }
    }

    /// A miss is not an error: an unreachable KV store (§7 CacheError) is
    /// logged and treated as a miss here, never surfaced to the caller.
    pub async fn get(&self, key: &str) -> Option<CachedResponse> {
        match self.kv.get(KvDb::Cache, key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                log::warn!("cache read failed, treating as miss: {e}");
                None
            }
        }
    }

    /// A write failure is logged and skipped, never surfaced (§7 CacheError).
    pub async fn put(&self, key: &str, response: &CachedResponse) {
        let value = match serde_json::to_string(response) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("cache serialize failed, skipping write: {e}");
                return;
            }
        };
        if let Err(e) = self
            .kv
            .set(KvDb::Cache, key, &value, Ttl::from_duration(CACHE_TTL))
            .await
        {
            log::warn!("cache write failed, skipping: {e}");
        }
    }

    pub async fn flush(&self) -> ProxyResult<()> {
        self.kv.flushdb(KvDb::Cache).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_everything() {
        assert!(path_matches(&["/*".to_string()], "/anything/at/all"));
    }

    #[test]
    fn prefix_match_respects_boundary() {
        let patterns = vec!["/api/v1/*".to_string()];
        assert!(path_matches(&patterns, "/api/v1/x"));
        assert!(!path_matches(&patterns, "/api/v2/x"));
    }

    #[test]
    fn exact_match_requires_equality() {
        let patterns = vec!["/ping".to_string()];
        assert!(path_matches(&patterns, "/ping"));
        assert!(!path_matches(&patterns, "/ping/extra"));
    }

    #[test]
    fn write_rejects_no_cache_control() {
        let eligible = is_write_eligible(
            "GET",
            true,
            &["/*".to_string()],
            "/x",
            200,
            Some("no-cache"),
        );
        assert!(!eligible);
    }

    #[test]
    fn write_rejects_error_status() {
        let eligible = is_write_eligible("GET", true, &["/*".to_string()], "/x", 404, None);
        assert!(!eligible);
    }

    #[test]
    fn write_rejects_non_get() {
        let eligible = is_write_eligible("POST", true, &["/*".to_string()], "/x", 200, None);
        assert!(!eligible);
    }

    #[test]
    fn server_header_reflects_cache_permission() {
        assert_eq!(server_header(true), SERVER_HEADER_CACHED);
        assert_eq!(server_header(false), SERVER_HEADER_PLAIN);
    }
}
