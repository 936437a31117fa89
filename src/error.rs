//! Unified error handling for the gateway.
//!
//! A single enum carries every failure domain named by the error taxonomy so
//! that callers at the edges (the `ProxyHttp` hooks, the admin dispatcher)
//! can map each variant to exactly one HTTP status without re-deriving it
//! from a generic string.

use std::fmt;

#[derive(Debug)]
pub enum ProxyError {
    /// JSON parse failure or a validator rejection at startup or reload.
    ConfigInvalid(String),
    /// No routing slot for the requested host.
    RouteUnknown(String),
    /// Global or subdomain ACL rejection.
    AclDenied(String),
    /// Transport failure talking to a backend.
    UpstreamError(String),
    /// KV store unreachable on cache read/write.
    CacheError(String),
    /// Missing or incorrect admin-panel Basic auth.
    AuthRequired,
    /// admin-api reached on the wrong host.
    AdminHostMismatch,
    /// Malformed admin API request body or parameters.
    BadRequest(String),
    /// Resource referenced by the admin API does not exist.
    NotFound(String),
    /// Network/IO failure.
    Io(std::io::Error),
    /// Pingora framework error.
    Pingora(pingora_error::Error),
    /// Catch-all for conditions that should not occur.
    Internal(String),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::ConfigInvalid(msg) => write!(f, "invalid configuration: {msg}"),
            ProxyError::RouteUnknown(host) => write!(f, "no route for host: {host}"),
            ProxyError::AclDenied(msg) => write!(f, "access denied: {msg}"),
            ProxyError::UpstreamError(msg) => write!(f, "upstream error: {msg}"),
            ProxyError::CacheError(msg) => write!(f, "cache backend error: {msg}"),
            ProxyError::AuthRequired => write!(f, "admin authentication required"),
            ProxyError::AdminHostMismatch => write!(f, "admin API reached on wrong host"),
            ProxyError::BadRequest(msg) => write!(f, "bad request: {msg}"),
            ProxyError::NotFound(msg) => write!(f, "not found: {msg}"),
            ProxyError::Io(err) => write!(f, "io error: {err}"),
            ProxyError::Pingora(err) => write!(f, "pingora error: {err}"),
            ProxyError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::Io(err) => Some(err),
            ProxyError::Pingora(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::Io(err)
    }
}

impl From<pingora_error::Error> for ProxyError {
    fn from(err: pingora_error::Error) -> Self {
        ProxyError::Pingora(err)
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        ProxyError::ConfigInvalid(err.to_string())
    }
}

impl From<redis::RedisError> for ProxyError {
    fn from(err: redis::RedisError) -> Self {
        ProxyError::CacheError(err.to_string())
    }
}

impl From<ProxyError> for Box<pingora_error::Error> {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::Pingora(inner) => Box::new(inner),
            other => {
                log::error!("{other}");
                Box::new(pingora_error::Error::new_str("request failed"))
            }
        }
    }
}

pub type ProxyResult<T> = std::result::Result<T, ProxyError>;

/// Maps a taxonomy variant to the status code it must surface as (§7).
impl ProxyError {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            ProxyError::ConfigInvalid(_) => StatusCode::BAD_REQUEST,
            ProxyError::RouteUnknown(_) => StatusCode::NOT_FOUND,
            ProxyError::AclDenied(_) => StatusCode::FORBIDDEN,
            ProxyError::UpstreamError(_) => StatusCode::BAD_GATEWAY,
            ProxyError::CacheError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::AuthRequired => StatusCode::UNAUTHORIZED,
            ProxyError::AdminHostMismatch => StatusCode::NOT_FOUND,
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::NotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::Io(_) | ProxyError::Pingora(_) | ProxyError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> ProxyResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> ProxyResult<T> {
        self.map_err(|e| ProxyError::Internal(format!("{context}: {e}")))
    }
}
