//! Access-list store (C3, §4.3).
//!
//! Whitelist and blacklist entries live in their own logical KV databases,
//! keyed the way the system this gateway replaces keyed them: a boolean
//! enablement flag at `<subdomain>`, and per-IP entries at
//! `[<subdomain>]<ip>`. Global deny entries use `global:<ip>` inside the
//! blacklist database. Evaluation order is fixed: global deny, then
//! per-subdomain whitelist, then per-subdomain blacklist (§4.3).

use serde::{Deserialize, Serialize};

use crate::error::ProxyResult;
use crate::kv::{subdomain_scan_pattern, KvDb, KvStore, Ttl};

const GLOBAL_PREFIX: &str = "global:";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reason {
    pub content: String,
    pub time: String,
    pub date: String,
}

pub enum AclList {
    Whitelist,
    Blacklist,
}

impl AclList {
    fn db(&self) -> KvDb {
        match self {
            AclList::Whitelist => KvDb::Whitelist,
            AclList::Blacklist => KvDb::Blacklist,
        }
    }
}

pub enum AclVerdict {
    Allow,
    Deny { reason: &'static str },
}

pub struct AclStore<'a> {
    kv: &'a dyn KvStore,
}

impl<'a> AclStore<'a> {
    pub fn new(kv: &'a dyn KvStore) -> Self {
        Self { kv }
    }

    pub async fn set_enabled(&self, list: AclList, subdomain: &str, enabled: bool) -> ProxyResult<()> {
        self.kv
            .set(list.db(), subdomain, &enabled.to_string(), Ttl::NONE)
            .await
    }

    pub async fn is_enabled(&self, list: AclList, subdomain: &str) -> ProxyResult<bool> {
        Ok(self
            .kv
            .get(list.db(), subdomain)
            .await?
            .map(|v| v == "true")
            .unwrap_or(false))
    }

    fn entry_key(subdomain: &str, ip: &str) -> String {
        format!("[{subdomain}]{ip}")
    }

    pub async fn put_ip(
        &self,
        list: AclList,
        subdomain: &str,
        ip: &str,
        reason: &Reason,
        ttl: Ttl,
    ) -> ProxyResult<()> {
        let value = serde_json::to_string(reason)?;
        self.kv
            .set(list.db(), &Self::entry_key(subdomain, ip), &value, ttl)
            .await
    }

    pub async fn remove_ip(&self, list: AclList, subdomain: &str, ip: &str) -> ProxyResult<()> {
        self.kv
            .del(list.db(), &Self::entry_key(subdomain, ip))
            .await
    }

    pub async fn get_ip(
        &self,
        list: AclList,
        subdomain: &str,
        ip: &str,
    ) -> ProxyResult<Option<Reason>> {
        match self.kv.get(list.db(), &Self::entry_key(subdomain, ip)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn ips_for_subdomain(
        &self,
        list: AclList,
        subdomain: &str,
    ) -> ProxyResult<Vec<(String, Reason)>> {
        let db = list.db();
        let keys = self
            .kv
            .keys(db, &subdomain_scan_pattern(subdomain))
            .await?;
        let prefix = format!("[{subdomain}]");
        let mut out = Vec::new();
        for key in keys {
            let ip = key.strip_prefix(&prefix).unwrap_or(&key).to_string();
            if let Some(raw) = self.kv.get(db, &key).await? {
                if let Ok(reason) = serde_json::from_str::<Reason>(&raw) {
                    out.push((ip, reason));
                }
            }
        }
        Ok(out)
    }

    /// Enumerates subdomains with the list enabled, by scanning for keys
    /// that are not bracket-prefixed entries and whose value is `"true"`.
    pub async fn enabled_subdomains(&self, list: AclList) -> ProxyResult<Vec<String>> {
        let db = list.db();
        let keys = self.kv.keys(db, "*").await?;
        let mut out = Vec::new();
        for key in keys {
            if key.starts_with('[') || key.starts_with(GLOBAL_PREFIX) {
                continue;
            }
            if let Some(value) = self.kv.get(db, &key).await? {
                if value == "true" {
                    out.push(key);
                }
            }
        }
        Ok(out)
    }

    /// Renames every entry (plus the enablement flag) from `old` to `new`
    /// when a subdomain is renamed, scanning with the bracket-quoted glob
    /// (§9) the way the source system's `ChangeSubdomainBlacklist` does.
    pub async fn rename_subdomain(&self, list: AclList, old: &str, new: &str) -> ProxyResult<()> {
        let db = list.db();
        let keys = self.kv.scan(db, &subdomain_scan_pattern(old)).await?;
        for key in keys {
            if let Some(ip) = key.strip_prefix(&format!("[{old}]")) {
                let new_key = format!("[{new}]{ip}");
                self.kv.rename(db, &key, &new_key).await?;
            }
        }
        if self.kv.get(db, old).await?.is_some() {
            self.kv.rename(db, old, new).await?;
        }
        Ok(())
    }

    pub async fn global_deny_ips(&self) -> ProxyResult<Vec<(String, Reason)>> {
        let keys = self
            .kv
            .keys(KvDb::Blacklist, &format!("{GLOBAL_PREFIX}*"))
            .await?;
        let mut out = Vec::new();
        for key in keys {
            if let Some(raw) = self.kv.get(KvDb::Blacklist, &key).await? {
                if let Ok(reason) = serde_json::from_str::<Reason>(&raw) {
                    let ip = key.strip_prefix(GLOBAL_PREFIX).unwrap_or(&key).to_string();
                    out.push((ip, reason));
                }
            }
        }
        Ok(out)
    }

    pub async fn put_global(&self, ip: &str, reason: &Reason, ttl: Ttl) -> ProxyResult<()> {
        let value = serde_json::to_string(reason)?;
        self.kv
            .set(KvDb::Blacklist, &format!("{GLOBAL_PREFIX}{ip}"), &value, ttl)
            .await
    }

    pub async fn remove_global(&self, ip: &str) -> ProxyResult<()> {
        self.kv
            .del(KvDb::Blacklist, &format!("{GLOBAL_PREFIX}{ip}"))
            .await
    }

    async fn is_global_denied(&self, ip: &str) -> ProxyResult<bool> {
        Ok(self
            .kv
            .get(KvDb::Blacklist, &format!("{GLOBAL_PREFIX}{ip}"))
            .await?
            .is_some())
    }

    /// Applies the fixed evaluation order from §4.3: global deny, then
    /// subdomain whitelist, then subdomain blacklist.
    pub async fn evaluate(
        &self,
        subdomain: &str,
        ip: &str,
        whitelist_enabled: bool,
        blacklist_enabled: bool,
    ) -> ProxyResult<AclVerdict> {
        if self.is_global_denied(ip).await? {
            return Ok(AclVerdict::Deny {
                reason: "global blacklist",
            });
        }

        if whitelist_enabled {
            let allowed = self
                .get_ip(AclList::Whitelist, subdomain, ip)
                .await?
                .is_some();
            if !allowed {
                return Ok(AclVerdict::Deny {
                    reason: "not in whitelist",
                });
            }
        }

        if blacklist_enabled {
            let denied = self
                .get_ip(AclList::Blacklist, subdomain, ip)
                .await?
                .is_some();
            if denied {
                return Ok(AclVerdict::Deny {
                    reason: "in blacklist",
                });
            }
        }

        Ok(AclVerdict::Allow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::KvStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MemKv {
        data: Mutex<HashMap<(u8, String), String>>,
    }

    #[async_trait]
    impl KvStore for MemKv {
        async fn set(&self, db: KvDb, key: &str, value: &str, _ttl: Ttl) -> ProxyResult<()> {
            self.data
                .lock()
                .await
                .insert((db as u8, key.to_string()), value.to_string());
            Ok(())
        }
        async fn get(&self, db: KvDb, key: &str) -> ProxyResult<Option<String>> {
            Ok(self.data.lock().await.get(&(db as u8, key.to_string())).cloned())
        }
        async fn del(&self, db: KvDb, key: &str) -> ProxyResult<()> {
            self.data.lock().await.remove(&(db as u8, key.to_string()));
            Ok(())
        }
        async fn keys(&self, db: KvDb, pattern: &str) -> ProxyResult<Vec<String>> {
            let prefix = pattern.trim_end_matches('*');
            let prefix = prefix.replace("[[]", "[");
            Ok(self
                .data
                .lock()
                .await
                .keys()
                .filter(|(d, k)| *d == db as u8 && k.starts_with(&prefix))
                .map(|(_, k)| k.clone())
                .collect())
        }
        async fn scan(&self, db: KvDb, pattern: &str) -> ProxyResult<Vec<String>> {
            self.keys(db, pattern).await
        }
        async fn rename(&self, db: KvDb, old: &str, new: &str) -> ProxyResult<()> {
            let mut data = self.data.lock().await;
            if let Some(v) = data.remove(&(db as u8, old.to_string())) {
                data.insert((db as u8, new.to_string()), v);
            }
            Ok(())
        }
        async fn flushdb(&self, db: KvDb) -> ProxyResult<()> {
            self.data.lock().await.retain(|(d, _), _| *d != db as u8);
            Ok(())
        }
    }

    fn reason() -> Reason {
        Reason {
            content: "abuse".into(),
            time: "0".into(),
            date: "2025-01-01".into(),
        }
    }

    #[tokio::test]
    async fn global_deny_blocks_every_subdomain() {
        let kv = MemKv::default();
        let acl = AclStore::new(&kv);
        acl.put_global("1.2.3.4", &reason(), Ttl::NONE).await.unwrap();

        for subdomain in ["api", "www", ""] {
            let verdict = acl
                .evaluate(subdomain, "1.2.3.4", false, false)
                .await
                .unwrap();
            assert!(matches!(verdict, AclVerdict::Deny { .. }));
        }
    }

    #[tokio::test]
    async fn whitelist_rejects_unknown_ip() {
        let kv = MemKv::default();
        let acl = AclStore::new(&kv);
        acl.put_ip(AclList::Whitelist, "api", "1.1.1.1", &reason(), Ttl::NONE)
            .await
            .unwrap();

        let allowed = acl.evaluate("api", "1.1.1.1", true, false).await.unwrap();
        assert!(matches!(allowed, AclVerdict::Allow));

        let denied = acl.evaluate("api", "2.2.2.2", true, false).await.unwrap();
        assert!(matches!(denied, AclVerdict::Deny { .. }));
    }

    #[tokio::test]
    async fn rename_moves_entries_and_flag() {
        let kv = MemKv::default();
        let acl = AclStore::new(&kv);
        acl.set_enabled(AclList::Blacklist, "old", true).await.unwrap();
        acl.put_ip(AclList::Blacklist, "old", "9.9.9.9", &reason(), Ttl::NONE)
            .await
            .unwrap();

        acl.rename_subdomain(AclList::Blacklist, "old", "new")
            .await
            .unwrap();

        assert!(acl.is_enabled(AclList::Blacklist, "new").await.unwrap());
        assert!(acl
            .get_ip(AclList::Blacklist, "new", "9.9.9.9")
            .await
            .unwrap()
            .is_some());
    }
}
