//! Admin REST API (C7, §6), reachable only on `admin-api.<hostname>`.
//!
//! Dispatch happens inline from the gateway's request pipeline rather than
//! as a standalone Pingora service bound to its own port, because the
//! admin-api surface is distinguished purely by the `Host` header on the
//! same TLS listener (§4.7). CORS is open on every response, matching the
//! original system's unconditional `Access-Control-Allow-Origin: *`.

pub mod duration;

use std::sync::Arc;

use http::{Method, StatusCode};
use pingora_proxy::Session;
use serde::{Deserialize, Serialize};

use crate::acl::{AclList, AclStore, Reason};
use crate::control::{Action, Supervisor};
use crate::error::{ProxyError, ProxyResult};
use crate::kv::Ttl;
use crate::observability::Observability;
use crate::utils::response::ResponseBuilder;

#[derive(Deserialize)]
struct PutIpRequest {
    subdomain: String,
    ip: String,
    reason: Reason,
    duration: String,
}

#[derive(Deserialize)]
struct PutGlobalIpRequest {
    ip: String,
    reason: Reason,
    duration: String,
}

#[derive(Serialize)]
struct ProcessingResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn processing() -> ProxyResult<serde_json::Value> {
    Ok(serde_json::to_value(ProcessingResponse {
        status: "Processing",
    })?)
}

/// Gates the admin API to the reserved `admin-api` subdomain (§4.7): any
/// request whose derived subdomain is not `admin-api` reaching this dispatch
/// path short-circuits to the same 404 used for an unknown route.
pub fn require_admin_host(subdomain: &str) -> ProxyResult<()> {
    if subdomain == crate::config::RESERVED_ADMIN_API_SUBDOMAIN {
        Ok(())
    } else {
        Err(ProxyError::AdminHostMismatch)
    }
}

/// Returns true if this request was handled (i.e. the caller should stop
/// the pipeline), having already written a response to `session`.
pub async fn dispatch(
    session: &mut Session,
    supervisor: &Arc<Supervisor>,
    log_dir: &std::path::Path,
    subdomain: &str,
) -> ProxyResult<()> {
    if let Err(e) = require_admin_host(subdomain) {
        log::warn!("admin api reached on host with subdomain {subdomain:?}");
        let body = ErrorBody {
            error: e.to_string(),
        };
        return write_json(session, e.status_code(), &serde_json::to_value(body)?).await;
    }

    let method = session.req_header().method.clone();
    let path = session.req_header().uri.path().to_string();
    let query = session.req_header().uri.query().unwrap_or("").to_string();

    if method == Method::OPTIONS {
        return write_cors_preflight(session).await;
    }

    let path = path.strip_prefix("/api").unwrap_or(&path);
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let result = route(session, supervisor, log_dir, &method, &segments, &query).await;

    match result {
        Ok(value) => write_json(session, StatusCode::OK, &value).await,
        Err(e) => {
            log::warn!("admin api error on {method} {path}: {e}");
            let body = ErrorBody {
                error: e.to_string(),
            };
            write_json(session, e.status_code(), &serde_json::to_value(body)?).await
        }
    }
}

async fn route(
    session: &mut Session,
    supervisor: &Arc<Supervisor>,
    log_dir: &std::path::Path,
    method: &Method,
    segments: &[&str],
    query: &str,
) -> ProxyResult<serde_json::Value> {
    match (method.clone(), segments) {
        (Method::GET, ["config"]) => Ok(serde_json::to_value(&*supervisor.current_config())?),
        (Method::PUT, ["config"]) => {
            let body = read_body(session).await?;
            let new_config = crate::config::Config::from_json(&String::from_utf8_lossy(&body))?;
            new_config.write_atomically(supervisor.config_path())?;
            supervisor.enqueue(Action::Reload);
            Ok(serde_json::json!({"status": "updated"}))
        }

        (Method::GET, ["start"]) => {
            supervisor.enqueue(Action::Start);
            processing()
        }
        (Method::GET, ["stop"]) => {
            supervisor.enqueue(Action::Stop);
            processing()
        }
        (Method::POST, ["reload"]) => {
            supervisor.enqueue(Action::Reload);
            processing()
        }

        (Method::GET, ["logs", "list"]) => {
            let dates = crate::logging::list_log_dates(log_dir).await;
            Ok(serde_json::json!({ "dates": dates }))
        }
        (Method::GET, ["logs"]) => {
            let date = query_param(query, "date")
                .ok_or_else(|| ProxyError::BadRequest("missing date query parameter".into()))?;
            let content = crate::logging::read_log(log_dir, &date)
                .await
                .map_err(|_| ProxyError::NotFound(format!("no log for {date}")))?;
            Ok(serde_json::json!({ "date": date, "content": content }))
        }

        (Method::GET, ["stats"]) => {
            let obs = Observability::new(supervisor.kv().as_ref());
            Ok(serde_json::to_value(obs.stats().await?)?)
        }
        (Method::GET, ["requests"]) => {
            let obs = Observability::new(supervisor.kv().as_ref());
            Ok(serde_json::to_value(obs.recent_requests().await?)?)
        }
        (Method::GET, ["ips"]) => {
            let obs = Observability::new(supervisor.kv().as_ref());
            Ok(serde_json::to_value(obs.ip_counts().await?)?)
        }

        (Method::GET, ["whitelist", "enabled", subdomain]) => {
            let acl = AclStore::new(supervisor.kv().as_ref());
            let enabled = acl.is_enabled(AclList::Whitelist, subdomain).await?;
            Ok(serde_json::json!({ "subdomain": subdomain, "enabled": enabled }))
        }
        (Method::PUT, ["whitelist", "enabled", subdomain]) => {
            let body = read_body(session).await?;
            let enabled = parse_bool_body(&body)?;
            let acl = AclStore::new(supervisor.kv().as_ref());
            acl.set_enabled(AclList::Whitelist, subdomain, enabled).await?;
            Ok(serde_json::json!({ "subdomain": subdomain, "enabled": enabled }))
        }
        (Method::GET, ["whitelist", "enabled"]) => {
            let acl = AclStore::new(supervisor.kv().as_ref());
            Ok(serde_json::json!(acl.enabled_subdomains(AclList::Whitelist).await?))
        }
        (Method::GET, ["whitelist", "ips", subdomain]) => {
            let acl = AclStore::new(supervisor.kv().as_ref());
            let entries = acl.ips_for_subdomain(AclList::Whitelist, subdomain).await?;
            Ok(serde_json::json!(entries
                .into_iter()
                .collect::<std::collections::HashMap<_, _>>()))
        }
        (Method::POST, ["whitelist", "ip"]) => put_ip(session, supervisor, AclList::Whitelist).await,
        (Method::DELETE, ["whitelist", "ip", subdomain, ip]) => {
            let acl = AclStore::new(supervisor.kv().as_ref());
            acl.remove_ip(AclList::Whitelist, subdomain, ip).await?;
            Ok(serde_json::json!({"status": "deleted"}))
        }

        (Method::GET, ["blacklist", "enabled", subdomain]) => {
            let acl = AclStore::new(supervisor.kv().as_ref());
            let enabled = acl.is_enabled(AclList::Blacklist, subdomain).await?;
            Ok(serde_json::json!({ "subdomain": subdomain, "enabled": enabled }))
        }
        (Method::PUT, ["blacklist", "enabled", subdomain]) => {
            let body = read_body(session).await?;
            let enabled = parse_bool_body(&body)?;
            let acl = AclStore::new(supervisor.kv().as_ref());
            acl.set_enabled(AclList::Blacklist, subdomain, enabled).await?;
            Ok(serde_json::json!({ "subdomain": subdomain, "enabled": enabled }))
        }
        (Method::GET, ["blacklist", "enabled"]) => {
            let acl = AclStore::new(supervisor.kv().as_ref());
            Ok(serde_json::json!(acl.enabled_subdomains(AclList::Blacklist).await?))
        }
        (Method::GET, ["blacklist", "ips", subdomain]) => {
            let acl = AclStore::new(supervisor.kv().as_ref());
            let entries = acl.ips_for_subdomain(AclList::Blacklist, subdomain).await?;
            Ok(serde_json::json!(entries
                .into_iter()
                .collect::<std::collections::HashMap<_, _>>()))
        }
        (Method::POST, ["blacklist", "ip"]) => put_ip(session, supervisor, AclList::Blacklist).await,
        (Method::DELETE, ["blacklist", "ip", subdomain, ip]) => {
            let acl = AclStore::new(supervisor.kv().as_ref());
            acl.remove_ip(AclList::Blacklist, subdomain, ip).await?;
            Ok(serde_json::json!({"status": "deleted"}))
        }

        (Method::GET, ["blacklist", "global", "ips"]) => {
            let acl = AclStore::new(supervisor.kv().as_ref());
            let entries = acl.global_deny_ips().await?;
            Ok(serde_json::json!(entries
                .into_iter()
                .collect::<std::collections::HashMap<_, _>>()))
        }
        (Method::POST, ["blacklist", "global", "ip"]) => {
            let body = read_body(session).await?;
            let req: PutGlobalIpRequest = serde_json::from_slice(&body)?;
            let ttl = duration::parse(&req.duration)
                .map(Ttl::from_duration)
                .ok_or_else(|| ProxyError::BadRequest("invalid duration".into()))?;
            let acl = AclStore::new(supervisor.kv().as_ref());
            acl.put_global(&req.ip, &req.reason, ttl).await?;
            Ok(serde_json::json!({"status": "created"}))
        }
        (Method::DELETE, ["blacklist", "global", "ip", ip]) => {
            let acl = AclStore::new(supervisor.kv().as_ref());
            acl.remove_global(ip).await?;
            Ok(serde_json::json!({"status": "deleted"}))
        }

        _ => Err(ProxyError::NotFound(format!(
            "no admin route for {method} /{}",
            segments.join("/")
        ))),
    }
}

async fn put_ip(
    session: &mut Session,
    supervisor: &Arc<Supervisor>,
    list: AclList,
) -> ProxyResult<serde_json::Value> {
    let body = read_body(session).await?;
    let req: PutIpRequest = serde_json::from_slice(&body)?;
    let ttl = duration::parse(&req.duration)
        .map(Ttl::from_duration)
        .ok_or_else(|| ProxyError::BadRequest("invalid duration".into()))?;
    let acl = AclStore::new(supervisor.kv().as_ref());
    acl.put_ip(list, &req.subdomain, &req.ip, &req.reason, ttl)
        .await?;
    Ok(serde_json::json!({"status": "created"}))
}

fn parse_bool_body(body: &[u8]) -> ProxyResult<bool> {
    let value: serde_json::Value = serde_json::from_slice(body)?;
    value
        .get("enabled")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| ProxyError::BadRequest("expected {\"enabled\": bool}".into()))
}

fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}

async fn read_body(session: &mut Session) -> ProxyResult<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(bytes) = session.read_request_body().await? {
        body.extend_from_slice(&bytes);
    }
    Ok(body)
}

async fn write_json(
    session: &mut Session,
    status: StatusCode,
    value: &serde_json::Value,
) -> ProxyResult<()> {
    let body = serde_json::to_vec(value)?;
    let mut resp = ResponseBuilder::build_proxy_response(status, None, None)?;
    resp.insert_header(http::header::CONTENT_TYPE, "application/json")?;
    resp.insert_header(http::header::CONTENT_LENGTH, body.len().to_string())?;
    resp.insert_header("Access-Control-Allow-Origin", "*")?;
    session.write_response_header(Box::new(resp), false).await?;
    session
        .write_response_body(Some(bytes::Bytes::from(body)), true)
        .await?;
    Ok(())
}

async fn write_cors_preflight(session: &mut Session) -> ProxyResult<()> {
    let mut resp = ResponseBuilder::build_proxy_response(StatusCode::NO_CONTENT, None, None)?;
    resp.insert_header("Access-Control-Allow-Origin", "*")?;
    resp.insert_header("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS")?;
    resp.insert_header("Access-Control-Allow-Headers", "Content-Type")?;
    session.write_response_header(Box::new(resp), true).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_admin_host_accepts_reserved_subdomain() {
        assert!(require_admin_host("admin-api").is_ok());
    }

    #[test]
    fn require_admin_host_rejects_other_subdomains() {
        let err = require_admin_host("blog").unwrap_err();
        assert!(matches!(err, ProxyError::AdminHostMismatch));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }
}
