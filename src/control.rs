//! Control plane (C7, §4.7).
//!
//! `Supervisor` owns the pieces that reload must swap together: the live
//! `Config`, the `RoutingTable`, and the KV-backed per-subdomain flags.
//! Admin-initiated `start`/`stop`/`reload` are queued behind the 5 s delay
//! the original system used to let its HTTP response flush before acting
//! (§5, §9) — reproduced here as a detached `tokio::spawn` + `sleep` so the
//! worker pool is never blocked waiting on it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::acl::{AclList, AclStore};
use crate::config::Config;
use crate::error::ProxyResult;
use crate::kv::KvStore;
use crate::routing::RoutingTable;

const ADMIN_ACTION_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Reload,
}

pub struct Supervisor {
    config: ArcSwap<Config>,
    config_path: PathBuf,
    pub routing: Arc<RoutingTable>,
    kv: Arc<dyn KvStore>,
    /// Simulates the `Running`/`Stopped` halves of the lifecycle state
    /// machine without tearing down the underlying listeners, since a
    /// Pingora `Server`'s services are wired up once at process start;
    /// while this is false the request pipeline answers 503 to every
    /// request instead of accepting one (documented in DESIGN.md).
    accepting: AtomicBool,
}

impl Supervisor {
    pub fn new(config: Config, config_path: PathBuf, kv: Arc<dyn KvStore>) -> Self {
        let routing = Arc::new(RoutingTable::new(&config));
        Self {
            config: ArcSwap::new(Arc::new(config)),
            config_path,
            routing,
            kv,
            accepting: AtomicBool::new(true),
        }
    }

    pub fn current_config(&self) -> Arc<Config> {
        self.config.load_full()
    }

    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Relaxed)
    }

    /// Re-reads, validates, and — only if valid — installs the new config,
    /// routing table, and KV-backed flags. On failure the previous tables
    /// are left completely untouched (§4.7, §8).
    pub async fn reload(&self) -> ProxyResult<()> {
        let new_config = match Config::load(&self.config_path) {
            Ok(c) => c,
            Err(e) => {
                log::error!("reload aborted, config invalid: {e}");
                return Err(e);
            }
        };

        self.kv.flushdb(crate::kv::KvDb::Cache).await.ok();

        let acl = AclStore::new(self.kv.as_ref());
        for entry in new_config.all_entries() {
            if entry.subdomain.is_empty() {
                continue;
            }
            if let Err(e) = acl
                .set_enabled(AclList::Whitelist, &entry.subdomain, entry.whitelist_enabled)
                .await
            {
                log::warn!("failed to sync whitelist flag for {}: {e}", entry.subdomain);
            }
            if let Err(e) = acl
                .set_enabled(AclList::Blacklist, &entry.subdomain, entry.blacklist_enabled)
                .await
            {
                log::warn!("failed to sync blacklist flag for {}: {e}", entry.subdomain);
            }
        }

        self.routing.reload(&new_config);
        self.config.store(Arc::new(new_config));
        log::info!("reload complete");
        Ok(())
    }

    pub fn start(&self) {
        self.accepting.store(true, Ordering::Relaxed);
        log::info!("control plane: now accepting requests");
    }

    pub fn stop(&self) {
        self.accepting.store(false, Ordering::Relaxed);
        log::info!("control plane: no longer accepting requests (cache/ACLs untouched)");
    }

    /// Queues `action` behind the documented 5 s delay and runs it on a
    /// detached task; callers respond `{"status":"Processing"}` immediately.
    pub fn enqueue(self: &Arc<Self>, action: Action) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(ADMIN_ACTION_DELAY).await;
            match action {
                Action::Start => this.start(),
                Action::Stop => this.stop(),
                Action::Reload => {
                    if let Err(e) = this.reload().await {
                        log::error!("queued reload failed: {e}");
                    }
                }
            }
        });
    }

    /// The external certificate helper this gateway delegates to is out of
    /// scope (§1, §4.7); this is a documented no-op.
    pub fn create_certificates(&self) {
        log::info!("createCertificates requested; delegated to external helper, no-op here");
    }
}
