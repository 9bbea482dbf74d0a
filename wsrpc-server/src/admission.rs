//! Upgrade admission checks
//!
//! Before a WebSocket upgrade completes the server checks two things:
//!
//! - **capacity**: at `max_connections` live connections the upgrade is
//!   refused with `503 Service Unavailable`
//! - **origin**: a browser `Origin` that is neither the request's own `Host`
//!   nor matched by an allowed host pattern is refused with `403 Forbidden`
//!
//! Requests without an `Origin` header (non-browser clients) always pass the
//! origin check.

use glob::{MatchOptions, Pattern};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request};
use tokio_tungstenite::tungstenite::http::{header, StatusCode, Uri};
use wsrpc_core::{Error, Result};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Why an upgrade was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rejection {
    Capacity,
    Origin,
}

impl Rejection {
    /// Metric label
    pub(crate) fn reason(self) -> &'static str {
        match self {
            Rejection::Capacity => "max_connections",
            Rejection::Origin => "origin",
        }
    }

    /// HTTP response sent instead of the upgrade
    pub(crate) fn into_response(self) -> ErrorResponse {
        let (status, body) = match self {
            Rejection::Capacity => (StatusCode::SERVICE_UNAVAILABLE, "too many connections"),
            Rejection::Origin => (StatusCode::FORBIDDEN, "origin not allowed"),
        };
        let mut response = ErrorResponse::new(Some(body.to_string()));
        *response.status_mut() = status;
        response
    }
}

/// Compiled admission rules
#[derive(Debug, Clone)]
pub(crate) struct Admission {
    origins: Vec<Pattern>,
    max_connections: usize,
}

impl Admission {
    /// Compile `allowed_origins` host patterns
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for a malformed pattern.
    pub(crate) fn new(allowed_origins: &[String], max_connections: usize) -> Result<Self> {
        let origins = allowed_origins
            .iter()
            .map(|p| {
                Pattern::new(p)
                    .map_err(|e| Error::Config(format!("invalid origin pattern {:?}: {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            origins,
            max_connections,
        })
    }

    /// Check an upgrade request given the current number of live connections
    pub(crate) fn check(&self, request: &Request, live: usize) -> std::result::Result<(), Rejection> {
        if live >= self.max_connections {
            return Err(Rejection::Capacity);
        }

        let headers = request.headers();
        let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
        let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
        if !origin_allowed(origin, host, &self.origins) {
            return Err(Rejection::Origin);
        }
        Ok(())
    }
}

/// Whether `origin` may open a connection to `host`
pub(crate) fn origin_allowed(origin: Option<&str>, host: Option<&str>, patterns: &[Pattern]) -> bool {
    let origin = match origin {
        None => return true,
        Some(o) if o.is_empty() => return true,
        Some(o) => o,
    };

    let uri: Uri = match origin.parse() {
        Ok(uri) => uri,
        Err(e) => {
            tracing::debug!(%origin, error = %e, "Unparsable Origin header");
            return false;
        }
    };

    if let (Some(authority), Some(host)) = (uri.authority(), host) {
        if authority.as_str().eq_ignore_ascii_case(host) {
            return true;
        }
    }

    match uri.host() {
        Some(origin_host) => patterns
            .iter()
            .any(|p| p.matches_with(origin_host, MATCH_OPTIONS)),
        None => false,
    }
}
