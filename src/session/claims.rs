//! Identity claims derived from a bearer credential.
//!
//! Claims are never stored separately: they are always re-derived from the
//! payload segment of the token itself. The signature is *not* verified here
//! (the server does that on every request); the claims only drive client-side
//! decisions such as "is this session still alive" and "what should the UI show".

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Deserializer};
use tracing::debug;

/// The identity claims carried by an access credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Claims {
    #[serde(default, alias = "sub", alias = "nameid", alias = "userId")]
    pub subject_id: Option<String>,

    #[serde(default, alias = "roleId")]
    pub role_id: Option<String>,

    #[serde(default, alias = "role", alias = "roleName")]
    pub role_name: Option<String>,

    #[serde(
        default,
        alias = "permission",
        deserialize_with = "one_or_many"
    )]
    pub permissions: Vec<String>,

    #[serde(default, alias = "name", alias = "unique_name", alias = "displayName")]
    pub display_name: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    /// Expiry as unix seconds (`exp`).
    #[serde(default, rename = "exp")]
    pub expires_at: Option<u64>,
}

impl Claims {
    /// Decode the claims from a compact JWS (`header.payload.signature`).
    ///
    /// Returns `None` when the token is not shaped like a JWT or its payload
    /// isn't a JSON object we understand.
    pub fn from_token(token: &str) -> Option<Self> {
        let mut segments = token.split('.');
        let (Some(_header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            debug!(segments = token.split('.').count(), "credential is not a JWT");
            return None;
        };

        // Some issuers pad their base64url segments, RFC 7515 says they shouldn't.
        let payload = payload.trim_end_matches('=');
        let bytes = match URL_SAFE_NO_PAD.decode(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(error = %e, "credential payload is not base64url");
                return None;
            }
        };

        match serde_json::from_slice::<Claims>(&bytes) {
            Ok(claims) => Some(claims),
            Err(e) => {
                debug!(error = %e, "credential payload is not a claims object");
                None
            }
        }
    }

    /// The expiry as a [`SystemTime`], if the token carries one.
    pub fn expiry(&self) -> Option<SystemTime> {
        self.expires_at
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
    }

    /// Whether the `exp` claim lies in the past. Tokens without `exp` never expire
    /// client-side; the server gets to decide.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expiry().is_some_and(|exp| now >= exp)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

/// Permission claims show up either as a single string or as an array,
/// depending on how many the issuer packed into the token.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(value)) => vec![value],
        Some(OneOrMany::Many(values)) => values,
        None => Vec::new(),
    })
}

#[cfg(test)]
pub(crate) fn encode_test_token(payload: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).unwrap());
    format!("{header}.{payload}.signature")
}
