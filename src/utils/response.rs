//! Shared response-building helpers for the admin API and the request
//! pipeline.

use bytes::Bytes;
use http::{header, StatusCode};
use pingora_error::Result;
use pingora_http::ResponseHeader;
use pingora_proxy::Session;

pub struct ResponseBuilder;

impl ResponseBuilder {
    /// Builds a proxy `ResponseHeader`, optionally with a plain-text body.
    pub fn build_proxy_response(
        status: StatusCode,
        message: Option<&str>,
        headers: Option<&[(&str, &str)]>,
    ) -> Result<ResponseHeader> {
        let mut resp = ResponseHeader::build(status, None)?;

        if let Some(msg) = message {
            resp.insert_header(header::CONTENT_LENGTH, msg.len().to_string())?;
            resp.insert_header(header::CONTENT_TYPE, "text/plain")?;
        }

        if let Some(hdrs) = headers {
            for (name, value) in hdrs {
                resp.insert_header(name.to_string(), value.to_string())?;
            }
        }

        Ok(resp)
    }

    /// Writes a proxy error response straight to the session (§7).
    pub async fn send_proxy_error(
        session: &mut Session,
        status: StatusCode,
        message: Option<&str>,
        headers: Option<&[(&str, &str)]>,
    ) -> Result<()> {
        let resp = Self::build_proxy_response(status, message, headers)?;
        session
            .write_response_header(Box::new(resp), message.is_none())
            .await?;

        if let Some(msg) = message {
            session
                .write_response_body(Some(Bytes::copy_from_slice(msg.as_bytes())), true)
                .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_plain_text_error() {
        let resp = ResponseBuilder::build_proxy_response(
            StatusCode::NOT_FOUND,
            Some("Dominio no configurado: unknown.developer.space"),
            None,
        )
        .unwrap();
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn includes_extra_headers() {
        let resp = ResponseBuilder::build_proxy_response(
            StatusCode::UNAUTHORIZED,
            Some("auth required"),
            Some(&[("WWW-Authenticate", "Basic realm=\"Admin\"")]),
        )
        .unwrap();
        assert_eq!(
            resp.headers.get("WWW-Authenticate").unwrap(),
            "Basic realm=\"Admin\""
        );
    }
}
