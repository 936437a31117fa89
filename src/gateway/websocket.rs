//! WebSocket upgrade detection (C6, §4.6).
//!
//! The actual bidirectional frame copy is not hand-rolled here: once
//! `request_filter` picks a backend and returns `Ok(false)`, Pingora's own
//! proxy core forwards the `Upgrade` handshake and, on a matching 101
//! response, switches the connection into raw duplex passthrough on its
//! own. There is nothing left for this module to do beyond recognizing the
//! upgrade and deriving the ACL subdomain from `Origin` before a backend is
//! chosen.

use pingora_http::RequestHeader;

pub fn is_upgrade_request(req: &RequestHeader) -> bool {
    let has_upgrade_token = req
        .headers
        .get(http::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false);

    let is_websocket = req
        .headers
        .get(http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    has_upgrade_token && is_websocket
}

#[cfg(test)]
mod tests {
    use super::*;
    use pingora_http::RequestHeader;

    fn req(connection: Option<&str>, upgrade: Option<&str>) -> RequestHeader {
        let mut header = RequestHeader::build(http::Method::GET, b"/ws", None).unwrap();
        if let Some(c) = connection {
            header.insert_header(http::header::CONNECTION, c).unwrap();
        }
        if let Some(u) = upgrade {
            header.insert_header(http::header::UPGRADE, u).unwrap();
        }
        header
    }

    #[test]
    fn detects_websocket_upgrade() {
        assert!(is_upgrade_request(&req(Some("Upgrade"), Some("websocket"))));
        assert!(is_upgrade_request(&req(
            Some("keep-alive, Upgrade"),
            Some("WebSocket")
        )));
    }

    #[test]
    fn plain_request_is_not_upgrade() {
        assert!(!is_upgrade_request(&req(None, None)));
        assert!(!is_upgrade_request(&req(Some("Upgrade"), None)));
        assert!(!is_upgrade_request(&req(None, Some("websocket"))));
    }
}
