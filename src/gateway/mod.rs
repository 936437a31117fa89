//! Request pipeline (C5, §4.5) tying the routing, ACL, cache, and admin
//! modules together behind a single `ProxyHttp` implementation.
//!
//! Almost everything in §4.5's ten steps happens in `request_filter`, which
//! runs before Pingora picks an upstream: host parsing, the WebSocket/
//! admin-panel/admin-api special cases, ACL enforcement, and the cache
//! lookup all either answer the request directly (returning `Ok(true)`) or
//! leave a chosen backend address in `GatewayCtx` for `upstream_peer`.

pub mod placeholder;
pub mod websocket;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use http::{header, StatusCode};
use pingora_core::upstreams::peer::HttpPeer;
use pingora_error::{Error, Result};
use pingora_http::{RequestHeader, ResponseHeader};
use pingora_proxy::{ProxyHttp, Session};

use crate::acl::{AclStore, AclVerdict};
use crate::cache::{self, CachedResponse, ResponseCache};
use crate::config::{Config, RESERVED_ADMIN_API_SUBDOMAIN};
use crate::control::Supervisor;
use crate::kv::KvStore;
use crate::observability::{Observability, RequestRecord};
use crate::routing;
use crate::utils::request::{get_client_ip, get_request_host};
use crate::utils::response::ResponseBuilder;
use crate::admin;

#[derive(Default)]
pub struct GatewayCtx {
    host: String,
    subdomain: String,
    client_ip: String,
    method: String,
    uri: String,
    cache_control: Option<String>,
    cache_enabled: bool,
    cache_paths: Vec<String>,
    cache_key: Option<String>,
    cache_write: bool,
    cache_headers: HashMap<String, String>,
    cache_body: Vec<u8>,
    backend_addr: Option<String>,
    status_for_log: u16,
    cached: bool,
}

pub struct Gateway {
    pub supervisor: Arc<Supervisor>,
    pub kv: Arc<dyn KvStore>,
    pub log_dir: PathBuf,
}

impl Gateway {
    pub fn new(supervisor: Arc<Supervisor>, kv: Arc<dyn KvStore>, log_dir: PathBuf) -> Self {
        Self {
            supervisor,
            kv,
            log_dir,
        }
    }

    /// Step 3 of §4.5: Basic-auth gate for the admin panel. The panel's own
    /// static UI is an external collaborator (§1 Out of scope); once
    /// authenticated this serves a minimal stand-in page rather than
    /// reverse-proxying to an origin this gateway does not own.
    async fn handle_admin_panel(
        &self,
        session: &mut Session,
        ctx: &mut GatewayCtx,
        config: &Config,
    ) -> Result<bool> {
        if !basic_auth_matches(session.req_header(), &config.admin.username, &config.admin.password) {
            ctx.status_for_log = StatusCode::UNAUTHORIZED.as_u16();
            ResponseBuilder::send_proxy_error(
                session,
                StatusCode::UNAUTHORIZED,
                Some("authentication required"),
                Some(&[("WWW-Authenticate", "Basic realm=\"Admin\"")]),
            )
            .await?;
            return Ok(true);
        }

        let body = "<!DOCTYPE html><html><body><h1>Mixproxy admin panel</h1></body></html>";
        ctx.status_for_log = StatusCode::OK.as_u16();
        let mut resp = ResponseBuilder::build_proxy_response(StatusCode::OK, None, None)?;
        resp.insert_header(header::CONTENT_TYPE, "text/html; charset=utf-8")?;
        resp.insert_header(header::CONTENT_LENGTH, body.len().to_string())?;
        session.write_response_header(Box::new(resp), false).await?;
        session
            .write_response_body(Some(Bytes::from_static(body.as_bytes())), true)
            .await?;
        Ok(true)
    }
}

fn basic_auth_matches(req: &RequestHeader, username: &str, password: &str) -> bool {
    let Some(value) = req.headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    match decoded.split_once(':') {
        Some((u, p)) => u == username && p == password,
        None => false,
    }
}

/// Parses a configured backend URL (`http://host[:port]`) into an `HttpPeer`.
///
/// §4.6: in `developer_mode`, TLS backends (including `wss` upstreams) are
/// accepted without peer-certificate verification.
fn peer_from_backend_url(url: &str, developer_mode: bool) -> Result<Box<HttpPeer>> {
    let uri: http::Uri = url
        .parse()
        .map_err(|_| Error::new_str("malformed backend URL"))?;
    let tls = uri.scheme_str() == Some("https");
    let host = uri.host().ok_or_else(|| Error::new_str("backend URL missing host"))?;
    let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });
    let addr = format!("{host}:{port}");
    let mut peer = Box::new(HttpPeer::new(addr, tls, host.to_string()));
    peer.options.verify_cert = !(tls && developer_mode);
    Ok(peer)
}

#[async_trait]
impl ProxyHttp for Gateway {
    type CTX = GatewayCtx;

    fn new_ctx(&self) -> Self::CTX {
        GatewayCtx::default()
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        if !self.supervisor.is_accepting() {
            ctx.status_for_log = StatusCode::SERVICE_UNAVAILABLE.as_u16();
            ResponseBuilder::send_proxy_error(
                session,
                StatusCode::SERVICE_UNAVAILABLE,
                Some("proxy is stopped"),
                None,
            )
            .await?;
            return Ok(true);
        }

        let config = self.supervisor.current_config();
        let req = session.req_header();
        let host = get_request_host(req).unwrap_or_default().to_string();
        let client_ip = get_client_ip(session);
        let method = req.method.to_string();
        let uri = req
            .uri
            .path_and_query()
            .map(|pq| pq.to_string())
            .unwrap_or_else(|| req.uri.path().to_string());
        let accept = req
            .headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let cache_control = req
            .headers
            .get(header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        ctx.host = host.clone();
        ctx.client_ip = client_ip.clone();
        ctx.method = method.clone();
        ctx.uri = uri.clone();

        // Step 2 (§4.5): WebSocket upgrades derive their ACL subdomain from
        // Origin (§4.6) but still resolve a backend by host, then fall
        // through to Pingora's native upgrade passthrough.
        if websocket::is_upgrade_request(req) {
            let origin = req
                .headers
                .get(header::ORIGIN)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            let ws_subdomain = if origin.is_empty() {
                routing::subdomain_from_host(&host, &config.hostname)
            } else {
                routing::subdomain_from_origin(origin, &config.hostname)
            };
            ctx.subdomain = ws_subdomain.clone();

            let snapshot = self.supervisor.routing.load();
            let slot = snapshot.get(&ws_subdomain);
            let (whitelist_enabled, blacklist_enabled) = slot
                .map(|s| (s.whitelist_enabled, s.blacklist_enabled))
                .unwrap_or((false, false));

            let acl = AclStore::new(self.kv.as_ref());
            let verdict = acl
                .evaluate(&ws_subdomain, &client_ip, whitelist_enabled, blacklist_enabled)
                .await
                .map_err(Box::<Error>::from)?;
            if let AclVerdict::Deny { reason } = verdict {
                ctx.status_for_log = StatusCode::FORBIDDEN.as_u16();
                ResponseBuilder::send_proxy_error(session, StatusCode::FORBIDDEN, Some(reason), None)
                    .await?;
                return Ok(true);
            }

            match slot {
                Some(s) => ctx.backend_addr = Some(s.next().to_string()),
                None => {
                    ctx.status_for_log = StatusCode::NOT_FOUND.as_u16();
                    ResponseBuilder::send_proxy_error(
                        session,
                        StatusCode::NOT_FOUND,
                        Some(&format!("Dominio no configurado: {host}")),
                        None,
                    )
                    .await?;
                    return Ok(true);
                }
            }
            return Ok(false);
        }

        let subdomain = routing::subdomain_from_host(&host, &config.hostname);
        ctx.subdomain = subdomain.clone();

        // Step 3 (§4.5): admin panel.
        if !config.admin_panel_subdomain.is_empty() && subdomain == config.admin_panel_subdomain {
            return self.handle_admin_panel(session, ctx, &config).await;
        }

        // Step 4 (§4.5): admin API, dispatched inline rather than as its own
        // Pingora service (§4.7).
        if subdomain == RESERVED_ADMIN_API_SUBDOMAIN {
            admin::dispatch(session, &self.supervisor, &self.log_dir, &subdomain)
                .await
                .map_err(Box::<Error>::from)?;
            return Ok(true);
        }

        let snapshot = self.supervisor.routing.load();
        let slot = snapshot.get(&subdomain);
        let (whitelist_enabled, blacklist_enabled, cache_enabled, cache_paths) = match slot {
            Some(s) => (
                s.whitelist_enabled,
                s.blacklist_enabled,
                s.cache_enabled,
                s.cache_paths.clone(),
            ),
            None => (false, false, false, Vec::new()),
        };

        // Step 5 (§4.5): ACL evaluation.
        let acl = AclStore::new(self.kv.as_ref());
        let verdict = acl
            .evaluate(&subdomain, &client_ip, whitelist_enabled, blacklist_enabled)
            .await
            .map_err(Box::<Error>::from)?;
        if let AclVerdict::Deny { reason } = verdict {
            ctx.status_for_log = StatusCode::FORBIDDEN.as_u16();
            ResponseBuilder::send_proxy_error(session, StatusCode::FORBIDDEN, Some(reason), None)
                .await?;
            return Ok(true);
        }

        ctx.cache_enabled = cache_enabled;
        ctx.cache_paths = cache_paths;
        ctx.cache_control = cache_control;

        // Step 6 (§4.5): cache lookup on GET.
        if cache::is_read_eligible(&method) {
            let key = cache::fingerprint(&method, &host, &uri, &accept);
            ctx.cache_key = Some(key.clone());
            let response_cache = ResponseCache::new(self.kv.as_ref());
            if let Some(cached) = response_cache.get(&key).await {
                ctx.cached = true;
                ctx.status_for_log = cached.status;
                let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK);
                let mut resp = ResponseHeader::build(status, None)?;
                for (name, value) in &cached.headers {
                    resp.insert_header(name.clone(), value.clone())?;
                }
                resp.insert_header(header::SERVER, cache::server_header(cache_enabled))?;
                resp.insert_header(header::CONTENT_LENGTH, cached.body.len().to_string())?;
                session.write_response_header(Box::new(resp), false).await?;
                session
                    .write_response_body(Some(Bytes::from(cached.body)), true)
                    .await?;
                return Ok(true);
            }
        }

        // Step 7 (§4.5): backend resolution, with the apex placeholder
        // special case.
        match slot {
            Some(s) => ctx.backend_addr = Some(s.next().to_string()),
            None if subdomain.is_empty() => {
                let subdomains: Vec<String> = snapshot
                    .subdomains()
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .collect();
                let body = placeholder::render(&config.hostname, &subdomains);
                ctx.status_for_log = StatusCode::OK.as_u16();
                let mut resp = ResponseBuilder::build_proxy_response(StatusCode::OK, None, None)?;
                resp.insert_header(header::CONTENT_TYPE, "text/html; charset=utf-8")?;
                resp.insert_header(header::CONTENT_LENGTH, body.len().to_string())?;
                resp.insert_header(header::SERVER, cache::SERVER_HEADER_PLAIN)?;
                session.write_response_header(Box::new(resp), false).await?;
                session
                    .write_response_body(Some(Bytes::from(body.into_bytes())), true)
                    .await?;
                return Ok(true);
            }
            None => {
                ctx.status_for_log = StatusCode::NOT_FOUND.as_u16();
                ResponseBuilder::send_proxy_error(
                    session,
                    StatusCode::NOT_FOUND,
                    Some(&format!("Dominio no configurado: {host}")),
                    None,
                )
                .await?;
                return Ok(true);
            }
        }

        Ok(false)
    }

    async fn upstream_peer(&self, _session: &mut Session, ctx: &mut Self::CTX) -> Result<Box<HttpPeer>> {
        let addr = ctx
            .backend_addr
            .as_deref()
            .ok_or_else(|| Error::new_str("no backend selected"))?;
        let developer_mode = self.supervisor.current_config().developer_mode;
        peer_from_backend_url(addr, developer_mode)
    }

    // Step 8 (§4.5): preserve the inbound request as-is, only adding
    // X-Forwarded-Host.
    async fn upstream_request_filter(
        &self,
        _session: &mut Session,
        upstream_request: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        upstream_request.insert_header("X-Forwarded-Host", ctx.host.clone())?;
        Ok(())
    }

    // Step 10 (§4.5): Server header rewrite, plus recording whether this
    // response is write-eligible for the cache (step 9).
    async fn response_filter(
        &self,
        _session: &mut Session,
        upstream_response: &mut ResponseHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        let status = upstream_response.status.as_u16();
        ctx.status_for_log = status;
        upstream_response.insert_header(header::SERVER, cache::server_header(ctx.cache_enabled))?;

        if ctx.cache_key.is_some() {
            let eligible = cache::is_write_eligible(
                &ctx.method,
                ctx.cache_enabled,
                &ctx.cache_paths,
                &ctx.uri,
                status,
                ctx.cache_control.as_deref(),
            );
            ctx.cache_write = eligible;
            if eligible {
                let mut headers = HashMap::new();
                for (name, value) in upstream_response.headers.iter() {
                    let name_str = name.as_str();
                    if name_str.eq_ignore_ascii_case("connection")
                        || name_str.eq_ignore_ascii_case("transfer-encoding")
                    {
                        continue;
                    }
                    if let Ok(v) = value.to_str() {
                        headers.insert(name_str.to_string(), v.to_string());
                    }
                }
                ctx.cache_headers = headers;
            }
        }
        Ok(())
    }

    fn response_body_filter(
        &self,
        _session: &mut Session,
        body: &mut Option<Bytes>,
        end_of_stream: bool,
        ctx: &mut Self::CTX,
    ) -> Result<Option<Duration>> {
        if ctx.cache_write {
            if let Some(chunk) = body {
                ctx.cache_body.extend_from_slice(chunk);
            }
            if end_of_stream {
                if let Some(key) = ctx.cache_key.clone() {
                    let status = ctx.status_for_log;
                    let headers = std::mem::take(&mut ctx.cache_headers);
                    let body = std::mem::take(&mut ctx.cache_body);
                    let kv = self.kv.clone();
                    tokio::spawn(async move {
                        let response_cache = ResponseCache::new(kv.as_ref());
                        response_cache
                            .put(&key, &CachedResponse { status, headers, body })
                            .await;
                    });
                }
            }
        }
        Ok(None)
    }

    async fn logging(&self, _session: &mut Session, e: Option<&Error>, ctx: &mut Self::CTX) {
        if let Some(e) = e {
            log::warn!("request to {}{} failed: {e}", ctx.host, ctx.uri);
        }
        let obs = Observability::new(self.kv.as_ref());
        obs.record(RequestRecord {
            method: ctx.method.clone(),
            url: format!("{}{}", ctx.host, ctx.uri),
            client_ip: ctx.client_ip.clone(),
            subdomain: ctx.subdomain.clone(),
            status: ctx.status_for_log,
            cached: ctx.cached,
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
        .await;
    }
}
