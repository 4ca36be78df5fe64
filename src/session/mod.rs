//! The credential store: the single source of truth for "who are we" on this client.
//!
//! [`CredentialStore`] is a cheap, cloneable handle. Every clone shares the same
//! [`Session`], so the request interceptor, the refresh coordinator and the
//! caller-facing [`ApiClient`](crate::client::ApiClient) all observe the same
//! credential. Access is synchronous: nothing in here performs I/O.

use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::debug;

mod claims;

pub use claims::Claims;

#[cfg(test)]
pub(crate) use claims::encode_test_token;

/// An opaque bearer credential plus the claims parsed out of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    raw: String,
    claims: Option<Claims>,
}

impl Credential {
    /// Wrap a raw token. Never fails: if the claims can't be parsed, the raw
    /// value is still kept so it can be attached to outbound requests.
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let claims = Claims::from_token(&raw);
        Credential { raw, claims }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn claims(&self) -> Option<&Claims> {
        self.claims.as_ref()
    }

    /// A credential counts as live only when its claims parsed and `exp`
    /// hasn't passed yet.
    pub fn is_live_at(&self, now: SystemTime) -> bool {
        self.claims
            .as_ref()
            .is_some_and(|claims| !claims.is_expired_at(now))
    }

    /// A short prefix safe to put in logs.
    pub(crate) fn log_prefix(&self) -> &str {
        let end = self
            .raw
            .char_indices()
            .nth(8)
            .map_or(self.raw.len(), |(i, _)| i);
        &self.raw[..end]
    }
}

/// The mutable state behind a [`CredentialStore`].
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub credential: Option<Credential>,
    /// The out-of-band renewal secret (the refresh cookie value), when the
    /// transport doesn't manage cookies by itself.
    pub renewal_secret: Option<String>,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.credential
            .as_ref()
            .is_some_and(|c| c.is_live_at(SystemTime::now()))
    }
}

/// Shared handle to the current [`Session`].
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    session: Arc<RwLock<Session>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with an existing credential (e.g. one restored by the caller).
    pub fn with_credential(raw: impl Into<String>) -> Self {
        let store = Self::new();
        store.set(raw);
        store
    }

    pub fn get(&self) -> Option<Credential> {
        self.session.read().credential.clone()
    }

    /// Replace the current credential wholesale.
    pub fn set(&self, raw: impl Into<String>) {
        let credential = Credential::parse(raw);
        debug!(
            token_prefix = credential.log_prefix(),
            token_len = credential.as_str().len(),
            has_claims = credential.claims().is_some(),
            "storing credential"
        );
        self.session.write().credential = Some(credential);
    }

    /// Forget the credential and the renewal secret.
    pub fn clear(&self) {
        debug!("clearing credential store");
        let mut session = self.session.write();
        session.credential = None;
        session.renewal_secret = None;
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.read().is_authenticated()
    }

    pub fn claims(&self) -> Option<Claims> {
        self.session
            .read()
            .credential
            .as_ref()
            .and_then(|c| c.claims().cloned())
    }

    pub fn renewal_secret(&self) -> Option<String> {
        self.session.read().renewal_secret.clone()
    }

    pub fn set_renewal_secret(&self, secret: impl Into<String>) {
        self.session.write().renewal_secret = Some(secret.into());
    }

    /// A point-in-time copy of the whole session.
    pub fn snapshot(&self) -> Session {
        self.session.read().clone()
    }
}
