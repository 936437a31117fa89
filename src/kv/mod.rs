//! External key-value store contract (§6, §9).
//!
//! The gateway never embeds a cache or ACL engine of its own; it talks to a
//! KV service over the network the way the original system talked to
//! Redis, across four logical databases (cache, whitelist, blacklist,
//! observability). Only the contract is specified here — `SET/GET/DEL/KEYS
//! /SCAN/RENAME/FLUSHDB`, TTL `-1` meaning no expiry — so `KvStore` is a
//! trait with one production implementation (`redis_store::RedisKv`) and
//! room for a test double.

pub mod redis_store;

use async_trait::async_trait;

use crate::error::ProxyResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KvDb {
    Cache = 0,
    Whitelist = 1,
    Blacklist = 2,
    Observability = 3,
}

/// Matches the KV contract's `-1 == no expiry` convention (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ttl(Option<std::time::Duration>);

impl Ttl {
    pub const NONE: Ttl = Ttl(None);

    pub fn from_duration(d: std::time::Duration) -> Self {
        Ttl(Some(d))
    }

    pub fn seconds(&self) -> i64 {
        self.0.map(|d| d.as_secs() as i64).unwrap_or(-1)
    }
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn set(&self, db: KvDb, key: &str, value: &str, ttl: Ttl) -> ProxyResult<()>;
    async fn get(&self, db: KvDb, key: &str) -> ProxyResult<Option<String>>;
    async fn del(&self, db: KvDb, key: &str) -> ProxyResult<()>;
    /// Glob match. Callers are responsible for quoting literal `[`/`]` (§9).
    async fn keys(&self, db: KvDb, pattern: &str) -> ProxyResult<Vec<String>>;
    async fn scan(&self, db: KvDb, pattern: &str) -> ProxyResult<Vec<String>>;
    async fn rename(&self, db: KvDb, old: &str, new: &str) -> ProxyResult<()>;
    async fn flushdb(&self, db: KvDb) -> ProxyResult<()>;
}

/// Quotes the literal brackets around a subdomain so a glob scan matches the
/// key `[<subdomain>]<ip>` rather than treating `[` `]` as a character class
/// (§9; ported from the original's `"[[]"+subdomain+"]*"` pattern).
pub fn subdomain_scan_pattern(subdomain: &str) -> String {
    format!("[[]{subdomain}]*")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_none_is_negative_one() {
        assert_eq!(Ttl::NONE.seconds(), -1);
    }

    #[test]
    fn ttl_some_reports_seconds() {
        let ttl = Ttl::from_duration(std::time::Duration::from_secs(900));
        assert_eq!(ttl.seconds(), 900);
    }

    #[test]
    fn scan_pattern_quotes_brackets() {
        assert_eq!(subdomain_scan_pattern("api"), "[[]api]*");
    }
}
