//! Error types for the authentication pipeline.
//!
//! Two layers of errors exist:
//!
//! - [`AuthError`] is what the Tower middleware returns. It is generic over
//!   the inner service's error type `E`, so transport errors keep their type.
//! - [`ApiProblem`] is the normalized shape every caller of
//!   [`ApiClient`](super::ApiClient) sees on terminal failure. It is also what
//!   the refresh coordinator fans out to its waiters, which is why it is `Clone`.

use std::collections::BTreeMap;
use std::fmt;

use http::StatusCode;
use serde::{Deserialize, Serialize};

/// Status used for failures where no HTTP response was received at all.
pub const NO_STATUS: u16 = 0;

/// The normalized error shape surfaced to callers.
///
/// Parsed from `application/problem+json` style bodies when the server sends
/// them; otherwise synthesized from the status code and raw body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{title} (HTTP {status}): {detail}")]
pub struct ApiProblem {
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(
        default,
        rename = "errors",
        alias = "fieldErrors",
        skip_serializing_if = "Option::is_none"
    )]
    pub field_errors: Option<BTreeMap<String, Vec<String>>>,
}

/// Loose view of a problem body; every field is optional on the wire.
#[derive(Deserialize)]
struct WireProblem {
    title: Option<String>,
    status: Option<u16>,
    detail: Option<String>,
    #[serde(alias = "message")]
    error: Option<String>,
    #[serde(alias = "fieldErrors")]
    errors: Option<BTreeMap<String, Vec<String>>>,
}

impl ApiProblem {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        ApiProblem {
            title: status
                .canonical_reason()
                .unwrap_or("Unknown Status")
                .to_string(),
            status: status.as_u16(),
            detail: detail.into(),
            field_errors: None,
        }
    }

    /// A failure before any HTTP status was received (connection refused, timeout...).
    pub fn network(detail: impl Into<String>) -> Self {
        ApiProblem {
            title: "Network Error".to_string(),
            status: NO_STATUS,
            detail: detail.into(),
            field_errors: None,
        }
    }

    /// Normalize an error response body.
    ///
    /// The HTTP status always wins over a `status` field in the body; the body
    /// only fills in what it can.
    pub fn from_response_parts(status: StatusCode, body: &[u8]) -> Self {
        let fallback = ApiProblem::new(status, String::from_utf8_lossy(body).trim().to_string());

        let Ok(wire) = serde_json::from_slice::<WireProblem>(body) else {
            return fallback;
        };

        if let Some(body_status) = wire.status
            && body_status != status.as_u16()
        {
            tracing::debug!(
                http_status = status.as_u16(),
                body_status,
                "problem body disagrees with HTTP status, keeping HTTP status"
            );
        }

        ApiProblem {
            title: wire.title.unwrap_or(fallback.title),
            status: status.as_u16(),
            detail: wire.detail.or(wire.error).unwrap_or(fallback.detail),
            field_errors: wire.errors.filter(|errors| !errors.is_empty()),
        }
    }

    pub fn is_network(&self) -> bool {
        self.status == NO_STATUS
    }
}

/// Errors produced by the [`Authentication`](super::Authentication) middleware.
///
/// Generic over `E`, the inner Tower service's error type, so that callers can
/// tell transport failures apart from pipeline decisions without boxing.
#[derive(Debug)]
pub enum AuthError<E> {
    /// The inner HTTP service failed (connection refused, timeout, ...).
    Inner(E),

    /// The credential refresh failed. Every request that was waiting on the
    /// same refresh cycle receives a clone of the same problem.
    RefreshFailed(ApiProblem),

    /// The stored credential can't be encoded as a header value.
    InvalidCredential(String),
}

// Manual Display: Tower services don't guarantee `E: Display`, so the bound
// lives on the impl rather than on the type.
impl<E: fmt::Display> fmt::Display for AuthError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Inner(e) => write!(f, "inner service error: {e}"),
            AuthError::RefreshFailed(problem) => write!(f, "credential refresh failed: {problem}"),
            AuthError::InvalidCredential(msg) => write!(f, "invalid credential: {msg}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for AuthError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AuthError::RefreshFailed(problem) => Some(problem),
            _ => None,
        }
    }
}

impl<E: fmt::Debug> AuthError<E> {
    /// Collapse into the normalized caller-facing shape.
    pub fn into_problem(self) -> ApiProblem {
        match self {
            AuthError::Inner(e) => ApiProblem::network(format!("{e:?}")),
            AuthError::RefreshFailed(problem) => problem,
            AuthError::InvalidCredential(msg) => ApiProblem {
                title: "Invalid Credential".to_string(),
                status: StatusCode::UNAUTHORIZED.as_u16(),
                detail: msg,
                field_errors: None,
            },
        }
    }
}

/// Errors raised while building an [`AuthenticationLayer`](super::AuthenticationLayer)
/// from a [`PipelineConfig`](crate::config::PipelineConfig).
///
/// These are *setup-time* errors, not per-request ones.
#[derive(Debug, thiserror::Error)]
pub enum FromConfigError {
    #[error("base_url is not set in the config")]
    MissingBaseUrl,

    #[error("invalid endpoint URL {url:?}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("unauthorized_status {0} is not a valid HTTP status code")]
    InvalidStatus(u16),
}
