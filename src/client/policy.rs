//! The authorization-failure decision, in one place.
//!
//! Which statuses count as "unauthorized" is configuration, and which requests
//! may trigger a refresh is declared by markers in the request's
//! [`Extensions`], never inferred from the URL.

use http::{Extensions, StatusCode};

/// Marks a request that must never trigger a credential refresh.
///
/// The pipeline tags its own refresh call with [`AuthExempt::Refresh`] and the
/// login call with [`AuthExempt::Login`]. Callers can tag any other request
/// the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthExempt {
    Login,
    Refresh,
}

/// Set on a request that is itself a replay after a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retried;

/// Why an authorization failure was not recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IneligibleReason {
    Exempt(AuthExempt),
    AlreadyRetried,
}

/// What to do with a completed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Not an authorization failure; hand it back untouched.
    PassThrough,
    /// An authorization failure we must not try to recover from.
    Ineligible(IneligibleReason),
    /// Refresh the credential and replay the request once.
    Eligible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthPolicy {
    unauthorized: StatusCode,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        AuthPolicy {
            unauthorized: StatusCode::UNAUTHORIZED,
        }
    }
}

impl AuthPolicy {
    pub fn new(unauthorized: StatusCode) -> Self {
        AuthPolicy { unauthorized }
    }

    pub fn unauthorized_status(&self) -> StatusCode {
        self.unauthorized
    }

    pub fn is_auth_failure(&self, status: StatusCode) -> bool {
        status == self.unauthorized
    }

    /// Classify a response given the extensions of the request that produced it.
    pub fn classify(&self, status: StatusCode, request: &Extensions) -> Decision {
        if !self.is_auth_failure(status) {
            return Decision::PassThrough;
        }
        if let Some(exempt) = request.get::<AuthExempt>() {
            return Decision::Ineligible(IneligibleReason::Exempt(*exempt));
        }
        if request.get::<Retried>().is_some() {
            return Decision::Ineligible(IneligibleReason::AlreadyRetried);
        }
        Decision::Eligible
    }
}
