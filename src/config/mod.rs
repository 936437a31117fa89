//! Configuration model and validation (§3, §4.8, §8).
//!
//! The configuration file is JSON, read from `./.config/proxy.config.json`
//! by default. Validation runs a `validator::Validate` derive plus a single
//! schema-level function that checks the capacity-sum invariant with an
//! epsilon tolerance rather than the strict float equality the system this
//! crate replaces used (§9).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::{ProxyError, ProxyResult};

/// Tolerance on the "capacities must sum to 1.0" invariant (§9).
pub const CAPACITY_EPSILON: f64 = 1e-9;

pub const RESERVED_ADMIN_API_SUBDOMAIN: &str = "admin-api";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "VpsEntry::validate_capacity_range"))]
pub struct VpsEntry {
    pub ip: String,
    pub capacity: f64,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl VpsEntry {
    fn validate_capacity_range(entry: &VpsEntry) -> Result<(), ValidationError> {
        if !(0.0..=1.0).contains(&entry.capacity) {
            let mut err = ValidationError::new("capacity_out_of_range");
            err.message = Some("capacity must be between 0 and 1".into());
            return Err(err);
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "LoadBalancerEntry::validate_entry"))]
pub struct LoadBalancerEntry {
    /// Empty string denotes the apex host.
    #[serde(default)]
    pub subdomain: String,
    #[serde(rename = "type", default)]
    pub entry_type: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub cache_enabled: bool,
    #[serde(default)]
    pub cache_paths: Vec<String>,
    #[serde(default)]
    pub whitelist_enabled: bool,
    #[serde(default)]
    pub blacklist_enabled: bool,
    #[validate(nested)]
    pub vps: Vec<VpsEntry>,
}

impl LoadBalancerEntry {
    fn validate_entry(entry: &LoadBalancerEntry) -> Result<(), ValidationError> {
        if entry.subdomain == RESERVED_ADMIN_API_SUBDOMAIN {
            let mut err = ValidationError::new("reserved_subdomain");
            err.message = Some("subdomain collides with a reserved name".into());
            return Err(err);
        }

        let active_sum: f64 = entry
            .vps
            .iter()
            .filter(|v| v.active)
            .map(|v| v.capacity)
            .sum();
        if !entry.vps.iter().any(|v| v.active) {
            let mut err = ValidationError::new("no_active_backends");
            return Err(err);
        }
        if (active_sum - 1.0).abs() > CAPACITY_EPSILON {
            let mut err = ValidationError::new("capacity_sum");
            err.message = Some("sum of capacities must be 1.0".into());
            return Err(err);
        }

        if entry.cache_enabled {
            if entry.cache_paths.is_empty() {
                let mut err = ValidationError::new("cache_paths_required");
                err.message = Some("cache_enabled requires at least one cache_paths entry".into());
                return Err(err);
            }
            for path in &entry.cache_paths {
                if !path.starts_with('/') {
                    let mut err = ValidationError::new("cache_path_shape");
                    err.message = Some("cache_paths entries must begin with '/'".into());
                    return Err(err);
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Config {
    pub hostname: String,
    pub admin_panel_subdomain: String,
    #[serde(default)]
    pub on_https: bool,
    #[serde(default)]
    pub developer_mode: bool,
    #[validate(nested)]
    pub load_balancer: Vec<LoadBalancerEntry>,
    #[validate(nested)]
    pub root_load_balancer: Option<LoadBalancerEntry>,
    pub admin: AdminCredentials,
    #[serde(default = "default_tls_paths")]
    pub tls_cert_path: String,
    #[serde(default = "default_tls_key_paths")]
    pub tls_key_path: String,
}

fn default_tls_paths() -> String {
    "certs/fullchain.pem".to_string()
}

fn default_tls_key_paths() -> String {
    "certs/privkey.pem".to_string()
}

impl Config {
    pub const DEFAULT_PATH: &'static str = "./.config/proxy.config.json";

    pub fn load(path: impl AsRef<Path>) -> ProxyResult<Self> {
        let raw = fs::read_to_string(&path)
            .map_err(|e| ProxyError::ConfigInvalid(format!("reading {:?}: {e}", path.as_ref())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> ProxyResult<Self> {
        let config: Config = serde_json::from_str(raw)
            .map_err(|e| ProxyError::ConfigInvalid(format!("parsing JSON: {e}")))?;
        config
            .validate()
            .map_err(|e| ProxyError::ConfigInvalid(e.to_string()))?;

        for entry in &config.load_balancer {
            if entry.subdomain.is_empty() && config.root_load_balancer.is_some() {
                return Err(ProxyError::ConfigInvalid(
                    "subdomain \"\" collides with root_load_balancer".into(),
                ));
            }
            if entry.subdomain == config.admin_panel_subdomain {
                return Err(ProxyError::ConfigInvalid(format!(
                    "subdomain {:?} collides with admin_panel_subdomain",
                    entry.subdomain
                )));
            }
        }

        Ok(config)
    }

    pub fn to_json_pretty(&self) -> ProxyResult<String> {
        serde_json::to_string_pretty(self).map_err(ProxyError::from)
    }

    /// Atomically writes the configuration file (used by the admin `PUT /config`
    /// handler, §6): write to a sibling temp file then rename over the target.
    pub fn write_atomically(&self, path: impl AsRef<Path>) -> ProxyResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, self.to_json_pretty()?)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// All entries, with the optional root entry folded in under key `""`.
    pub fn all_entries(&self) -> Vec<&LoadBalancerEntry> {
        let mut entries: Vec<&LoadBalancerEntry> = self.load_balancer.iter().collect();
        if let Some(root) = &self.root_load_balancer {
            entries.push(root);
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(sum: f64) -> Config {
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
                        capacity: sum * 0.75,
                        active: true,
                    },
                    VpsEntry {
                        ip: "http://10.0.0.2".into(),
                        capacity: sum * 0.25,
                        active: true,
                    },
                ],
            }],
            root_load_balancer: None,
            admin: AdminCredentials {
                username: "admin".into(),
                password: "s3cret".into(),
            },
            tls_cert_path: default_tls_paths(),
            tls_key_path: default_tls_key_paths(),
        }
    }

    #[test]
    fn accepts_exact_sum() {
        let cfg = sample(1.0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_sum_below_one() {
        let cfg = sample(0.999);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_sum_above_one() {
        let cfg = sample(1.001);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn reserved_subdomain_rejected() {
        let mut cfg = sample(1.0);
        cfg.load_balancer[0].subdomain = "admin-api".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn admin_panel_subdomain_collision_rejected() {
        let mut cfg = sample(1.0);
        cfg.load_balancer[0].subdomain = cfg.admin_panel_subdomain.clone();
        let json = cfg.to_json_pretty().unwrap();
        assert!(Config::from_json(&json).is_err());
    }

    #[test]
    fn cache_enabled_requires_paths() {
        let mut cfg = sample(1.0);
        cfg.load_balancer[0].cache_enabled = true;
        assert!(cfg.validate().is_err());
        cfg.load_balancer[0].cache_paths = vec!["/ping".into()];
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn json_round_trip() {
        let cfg = sample(1.0);
        let json = cfg.to_json_pretty().unwrap();
        let parsed = Config::from_json(&json).unwrap();
        assert_eq!(parsed.hostname, cfg.hostname);
        assert_eq!(parsed.load_balancer.len(), cfg.load_balancer.len());
    }
}
