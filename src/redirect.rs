//! HTTP→HTTPS redirector (C9, §4.9): every request on port 80 gets a 301 to
//! the same host and path under `https`.

use async_trait::async_trait;
use http::StatusCode;
use pingora_error::Result;
use pingora_http::ResponseHeader;
use pingora_proxy::{ProxyHttp, Session};

use crate::utils::request::get_request_host;

#[derive(Default)]
pub struct Redirector;

pub struct RedirectCtx;

#[async_trait]
impl ProxyHttp for Redirector {
    type CTX = RedirectCtx;

    fn new_ctx(&self) -> Self::CTX {
        RedirectCtx
    }

    async fn request_filter(&self, session: &mut Session, _ctx: &mut Self::CTX) -> Result<bool> {
        let req = session.req_header();
        let host = get_request_host(req).unwrap_or_default();
        let path_and_query = req
            .uri
            .path_and_query()
            .map(|pq| pq.to_string())
            .unwrap_or_else(|| req.uri.path().to_string());
        let location = format!("https://{host}{path_and_query}");

        let mut resp = ResponseHeader::build(StatusCode::MOVED_PERMANENTLY, None)?;
        resp.insert_header(http::header::LOCATION, location)?;
        resp.insert_header(http::header::CONTENT_LENGTH, "0")?;
        session.write_response_header(Box::new(resp), true).await?;
        Ok(true)
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> Result<Box<pingora_core::upstreams::peer::HttpPeer>> {
        Err(pingora_error::Error::new_str(
            "redirector never dispatches upstream",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctx_is_constructible() {
        let _ = RedirectCtx;
    }
}
