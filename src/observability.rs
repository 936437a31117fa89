//! Observability recording (§3 `RequestRecord`, §6 `/stats`, `/requests`, `/ips`).
//!
//! Write-only per-request telemetry, persisted to the KV store's fourth
//! logical database so `GET /stats`/`/requests`/`/ips` survive a process
//! restart instead of living only in memory, the way the admin surface's
//! in-memory counters did in the system this gateway replaces.

use serde::{Deserialize, Serialize};

use crate::error::ProxyResult;
use crate::kv::{KvDb, KvStore};

const REQUEST_LOG_KEY: &str = "requests:log";
const MAX_RECORDED_REQUESTS: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub method: String,
    pub url: String,
    pub client_ip: String,
    pub subdomain: String,
    pub status: u16,
    pub cached: bool,
    pub timestamp: String,
}

pub struct Observability<'a> {
    kv: &'a dyn KvStore,
}

impl<'a> Observability<'a> {
    pub fn new(kv: &'a dyn KvStore) -> Self {
        Self { kv }
    }

    /// Appends a record to a bounded ring kept as a single JSON array value.
    /// Best-effort: a failure here never affects the response already sent.
    pub async fn record(&self, record: RequestRecord) {
        if let Err(e) = self.try_record(record).await {
            log::warn!("failed to persist request record: {e}");
        }
    }

    async fn try_record(&self, record: RequestRecord) -> ProxyResult<()> {
        let mut log: Vec<RequestRecord> = match self.kv.get(KvDb::Observability, REQUEST_LOG_KEY).await? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            None => Vec::new(),
        };
        log.push(record);
        if log.len() > MAX_RECORDED_REQUESTS {
            let overflow = log.len() - MAX_RECORDED_REQUESTS;
            log.drain(0..overflow);
        }
        let value = serde_json::to_string(&log)?;
        self.kv
            .set(KvDb::Observability, REQUEST_LOG_KEY, &value, crate::kv::Ttl::NONE)
            .await
    }

    pub async fn recent_requests(&self) -> ProxyResult<Vec<RequestRecord>> {
        match self.kv.get(KvDb::Observability, REQUEST_LOG_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw).unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }

    pub async fn stats(&self) -> ProxyResult<Stats> {
        let log = self.recent_requests().await?;
        let mut stats = Stats::default();
        stats.total = log.len();
        for r in &log {
            stats.cache_hits += r.cached as usize;
            match r.status / 100 {
                2 | 3 => stats.success += 1,
                4 => stats.client_errors += 1,
                5 => stats.server_errors += 1,
                _ => {}
            }
        }
        Ok(stats)
    }

    pub async fn ip_counts(&self) -> ProxyResult<std::collections::HashMap<String, usize>> {
        let log = self.recent_requests().await?;
        let mut counts = std::collections::HashMap::new();
        for r in &log {
            *counts.entry(r.client_ip.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[derive(Debug, Default, Serialize)]
pub struct Stats {
    pub total: usize,
    pub cache_hits: usize,
    pub success: usize,
    pub client_errors: usize,
    pub server_errors: usize,
}
