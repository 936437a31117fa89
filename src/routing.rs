//! Routing table (C2, §4.2) and its atomic publish/swap discipline.
//!
//! One immutable snapshot maps subdomain to its `RoutingSlot`; reload builds
//! a whole new snapshot and swaps it in behind an `ArcSwap`, the same
//! lock-free publish pattern the gateway's style ancestor uses for its own
//! route and SNI match tables. A request holds one `Arc` for its duration,
//! so an in-flight request always sees a single, internally consistent
//! table even if a reload lands mid-request (§5, §9).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::{Config, LoadBalancerEntry};
use crate::wrr;

/// The per-subdomain tuple of backend list, WRR sequence, and cursor.
pub struct RoutingSlot {
    pub backends: Vec<String>,
    pub sequence: Vec<usize>,
    cursor: AtomicUsize,
    pub cache_enabled: bool,
    pub cache_paths: Vec<String>,
    pub whitelist_enabled: bool,
    pub blacklist_enabled: bool,
}

impl RoutingSlot {
    fn from_entry(entry: &LoadBalancerEntry) -> Self {
        let active: Vec<&crate::config::VpsEntry> =
            entry.vps.iter().filter(|v| v.active).collect();
        let backends: Vec<String> = active.iter().map(|v| v.ip.clone()).collect();
        let capacities: Vec<f64> = active.iter().map(|v| v.capacity).collect();
        let sequence = wrr::generate_sequence(&capacities);

        Self {
            backends,
            sequence,
            cursor: AtomicUsize::new(0),
            cache_enabled: entry.cache_enabled,
            cache_paths: entry.cache_paths.clone(),
            whitelist_enabled: entry.whitelist_enabled,
            blacklist_enabled: entry.blacklist_enabled,
        }
    }

    /// Advances the cursor and returns the backend URL for this turn.
    /// Thread-safe: concurrent callers may interleave arbitrarily, but each
    /// backend's long-run share still matches its capacity (§4.1, §5).
    pub fn next(&self) -> &str {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.sequence.len();
        let backend_idx = self.sequence[idx];
        &self.backends[backend_idx]
    }
}

#[derive(Default)]
pub struct RoutingSnapshot {
    slots: HashMap<String, RoutingSlot>,
}

impl RoutingSnapshot {
    pub fn build(config: &Config) -> Self {
        let mut slots = HashMap::new();

        for entry in &config.load_balancer {
            if !entry.active {
                continue;
            }
            slots.insert(entry.subdomain.clone(), RoutingSlot::from_entry(entry));
        }

        if let Some(root) = &config.root_load_balancer {
            if root.active {
                slots.insert(String::new(), RoutingSlot::from_entry(root));
            }
        }

        Self { slots }
    }

    pub fn get(&self, subdomain: &str) -> Option<&RoutingSlot> {
        self.slots.get(subdomain)
    }

    pub fn subdomains(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(|s| s.as_str())
    }
}

/// Lock-free, read-often/write-rare holder for the current snapshot.
pub struct RoutingTable {
    current: ArcSwap<RoutingSnapshot>,
}

impl RoutingTable {
    pub fn new(config: &Config) -> Self {
        Self {
            current: ArcSwap::new(Arc::new(RoutingSnapshot::build(config))),
        }
    }

    pub fn load(&self) -> Arc<RoutingSnapshot> {
        self.current.load_full()
    }

    pub fn reload(&self, config: &Config) {
        self.current.store(Arc::new(RoutingSnapshot::build(config)));
    }
}

/// Derives the subdomain from a `Host` header value (§4.5 step 1): strips
/// the port, then returns the empty string for the apex or the first label
/// otherwise.
pub fn subdomain_from_host(host: &str, hostname: &str) -> String {
    let host = host.split(':').next().unwrap_or(host);
    if host == hostname {
        String::new()
    } else {
        host.split('.').next().unwrap_or(host).to_string()
    }
}

/// Derives the subdomain from a WebSocket `Origin` header (§4.6): strip the
/// scheme, then compare against `hostname` or split on `"." + hostname`.
pub fn subdomain_from_origin(origin: &str, hostname: &str) -> String {
    let stripped = origin.split("://").nth(1).unwrap_or(origin);
    if stripped == hostname {
        return String::new();
    }
    let suffix = format!(".{hostname}");
    stripped
        .strip_suffix(&suffix)
        .unwrap_or(stripped)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdminCredentials, VpsEntry};

    fn cfg() -> Config {
        Config {
            hostname: "developer.space".into(),
            admin_panel_subdomain: "admin".into(),
            on_https: true,
            developer_mode: true,
            load_balancer: vec![LoadBalancerEntry {
                subdomain: "api".into(),
                entry_type: "http".into(),
                active: true,
                cache_enabled: false,
                cache_paths: vec![],
                whitelist_enabled: false,
                blacklist_enabled: false,
                vps: vec![
                    VpsEntry {
                        ip: "http://10.0.0.1".into(),
                        capacity: 0.75,
                        active: true,
                    },
                    VpsEntry {
                        ip: "http://10.0.0.2".into(),
                        capacity: 0.25,
                        active: true,
                    },
                ],
            }],
            root_load_balancer: None,
            admin: AdminCredentials {
                username: "admin".into(),
                password: "s3cret".into(),
            },
            tls_cert_path: "certs/fullchain.pem".into(),
            tls_key_path: "certs/privkey.pem".into(),
        }
    }

    #[test]
    fn host_matching_hostname_is_apex() {
        assert_eq!(subdomain_from_host("developer.space", "developer.space"), "");
        assert_eq!(
            subdomain_from_host("developer.space:443", "developer.space"),
            ""
        );
    }

    #[test]
    fn host_with_label_gives_subdomain() {
        assert_eq!(
            subdomain_from_host("api.developer.space", "developer.space"),
            "api"
        );
    }

    #[test]
    fn origin_derivation_matches_host_rule() {
        assert_eq!(
            subdomain_from_origin("https://api.developer.space", "developer.space"),
            "api"
        );
        assert_eq!(
            subdomain_from_origin("https://developer.space", "developer.space"),
            ""
        );
    }

    #[test]
    fn unknown_subdomain_has_no_slot() {
        let table = RoutingTable::new(&cfg());
        let snap = table.load();
        assert!(snap.get("unknown").is_none());
        assert!(snap.get("api").is_some());
    }

    #[test]
    fn reload_replaces_snapshot_atomically() {
        let mut config = cfg();
        let table = RoutingTable::new(&config);
        assert_eq!(table.load().get("api").unwrap().backends.len(), 2);

        config.load_balancer[0].vps[1].active = false;
        config.load_balancer[0].vps[0].capacity = 1.0;
        table.reload(&config);
        assert_eq!(table.load().get("api").unwrap().backends.len(), 1);
    }

    #[test]
    fn wrr_distribution_within_window() {
        let table = RoutingTable::new(&cfg());
        let snap = table.load();
        let slot = snap.get("api").unwrap();
        let mut hits = 0;
        let trials = 100;
        for _ in 0..trials {
            if slot.next() == "http://10.0.0.1" {
                hits += 1;
            }
        }
        assert!((70..=80).contains(&hits), "hits = {hits}");
    }
}
