//! The refresh service contract, spoken through the inner Tower service.
//!
//! The refresh call goes through the same transport as every other request
//! (same TLS, proxies, connection pool) but *below* the authentication layer,
//! so it can never recurse into another refresh. It is additionally tagged
//! [`AuthExempt::Refresh`] in case the inner stack loops back through the
//! pipeline.
//!
//! # Wire contract
//!
//! ```text
//! POST {base_url}{refresh_path}
//! Content-Type: application/json
//! Cookie: {renewal_cookie}={secret}            (only when the secret is known)
//!
//! {"accessToken": "<last known credential or empty>", "refreshToken": ""}
//! ```
//!
//! The renewal secret travels as a cookie. The body tokens are placeholders
//! the server may or may not consult; `send_tokens_in_body = false` sends `{}`.
//!
//! A success response carries the new credential as `accessToken`
//! (`access_token` and `token` are accepted too, optionally wrapped in `data`),
//! and may rotate the cookie through `Set-Cookie`.

use std::fmt;

use bytes::{Buf, Bytes};
use http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue, Request, Response, Uri};
use http_body::Body;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::Service;
use tracing::{debug, warn};

use crate::session::CredentialStore;

use super::error::ApiProblem;
use super::policy::AuthExempt;

/// Where and how to call the refresh service.
#[derive(Debug, Clone)]
pub struct RefreshEndpoint {
    pub uri: Uri,
    /// Name of the cookie holding the renewal secret. When `None`, the
    /// transport is assumed to manage that cookie by itself.
    pub renewal_cookie: Option<String>,
    pub send_tokens_in_body: bool,
}

impl RefreshEndpoint {
    pub fn new(uri: Uri) -> Self {
        RefreshEndpoint {
            uri,
            renewal_cookie: None,
            send_tokens_in_body: true,
        }
    }

    /// Build the refresh request from the current session.
    pub(crate) fn build_request<ReqBody>(
        &self,
        store: &CredentialStore,
    ) -> Result<Request<ReqBody>, ApiProblem>
    where
        ReqBody: From<Bytes>,
    {
        let session = store.snapshot();

        let body = if self.send_tokens_in_body {
            let current = session
                .credential
                .as_ref()
                .map(|c| c.as_str())
                .unwrap_or_default();
            json!({ "accessToken": current, "refreshToken": "" })
        } else {
            json!({})
        };

        let mut builder = Request::post(self.uri.clone())
            .header(CONTENT_TYPE, "application/json")
            .extension(AuthExempt::Refresh);

        if let (Some(name), Some(secret)) = (&self.renewal_cookie, &session.renewal_secret) {
            let cookie = HeaderValue::from_str(&format!("{name}={secret}")).map_err(|e| {
                ApiProblem::network(format!("renewal secret is not a valid cookie value: {e}"))
            })?;
            builder = builder.header(COOKIE, cookie);
        }

        builder
            .body(ReqBody::from(Bytes::from(body.to_string())))
            .map_err(|e| ApiProblem::network(format!("failed to build refresh request: {e}")))
    }
}

/// Call the refresh service and return the new raw credential.
///
/// The caller must have readied `inner`. Every failure, including transport
/// errors, comes back as an [`ApiProblem`] so it can be fanned out to all
/// waiters of the cycle.
pub(crate) async fn request_refresh<S, ReqBody, ResBody>(
    inner: &mut S,
    endpoint: &RefreshEndpoint,
    store: &CredentialStore,
) -> Result<String, ApiProblem>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: fmt::Debug,
    ReqBody: From<Bytes>,
    ResBody: Body,
    ResBody::Data: Buf,
    ResBody::Error: fmt::Debug,
{
    let request = endpoint.build_request::<ReqBody>(store)?;
    debug!(endpoint = %endpoint.uri, "POSTing to refresh endpoint");

    let response = inner
        .call(request)
        .await
        .map_err(|e| ApiProblem::network(format!("refresh request failed: {e:?}")))?;

    let status = response.status();
    debug!(status = %status, "refresh endpoint responded");

    if let Some(name) = &endpoint.renewal_cookie
        && let Some(secret) = find_cookie(response.headers(), name)
    {
        debug!(cookie = %name, "renewal secret rotated");
        store.set_renewal_secret(secret);
    }

    let bytes = collect_body(response.into_body()).await?;

    if !status.is_success() {
        let problem = ApiProblem::from_response_parts(status, &bytes);
        warn!(status = status.as_u16(), detail = %problem.detail, "refresh endpoint returned error");
        return Err(problem);
    }

    parse_access_token(&bytes).ok_or_else(|| ApiProblem {
        title: "Invalid Refresh Response".to_string(),
        status: status.as_u16(),
        detail: "refresh response did not contain an access token".to_string(),
        field_errors: None,
    })
}

pub(crate) async fn collect_body<B>(body: B) -> Result<Bytes, ApiProblem>
where
    B: Body,
    B::Error: fmt::Debug,
{
    BodyExt::collect(body)
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| ApiProblem::network(format!("failed to read response body: {e:?}")))
}

/// Pull the access credential out of a login or refresh response body.
pub(crate) fn parse_access_token(body: &[u8]) -> Option<String> {
    let json: Value = serde_json::from_slice(body).ok()?;
    let root = json.get("data").filter(|d| d.is_object()).unwrap_or(&json);

    ["accessToken", "access_token", "token"]
        .iter()
        .find_map(|key| root.get(*key).and_then(Value::as_str))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Find the value of cookie `name` among the `Set-Cookie` headers.
pub(crate) fn find_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next()?.split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;

    fn endpoint() -> RefreshEndpoint {
        RefreshEndpoint {
            uri: Uri::from_static("https://api.example.com/api/auth/refresh"),
            renewal_cookie: Some("refreshToken".into()),
            send_tokens_in_body: true,
        }
    }

    async fn body_json(request: Request<Full<Bytes>>) -> Value {
        let bytes = collect_body(request.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn refresh_request_carries_token_cookie_and_marker() {
        let store = CredentialStore::with_credential("tok1");
        store.set_renewal_secret("r-123");

        let request: Request<Full<Bytes>> = endpoint().build_request(&store).unwrap();

        assert_eq!(request.method(), http::Method::POST);
        assert_eq!(request.uri(), "https://api.example.com/api/auth/refresh");
        assert_eq!(request.headers()[COOKIE], "refreshToken=r-123");
        assert_eq!(
            request.extensions().get::<AuthExempt>(),
            Some(&AuthExempt::Refresh)
        );
        assert_eq!(
            body_json(request).await,
            json!({ "accessToken": "tok1", "refreshToken": "" })
        );
    }

    #[tokio::test]
    async fn refresh_request_without_credential_sends_placeholders() {
        let store = CredentialStore::new();
        let request: Request<Full<Bytes>> = endpoint().build_request(&store).unwrap();

        assert!(request.headers().get(COOKIE).is_none());
        assert_eq!(
            body_json(request).await,
            json!({ "accessToken": "", "refreshToken": "" })
        );
    }

    #[tokio::test]
    async fn body_tokens_can_be_switched_off() {
        let store = CredentialStore::with_credential("tok1");
        let endpoint = RefreshEndpoint {
            send_tokens_in_body: false,
            ..endpoint()
        };
        let request: Request<Full<Bytes>> = endpoint.build_request(&store).unwrap();
        assert_eq!(body_json(request).await, json!({}));
    }

    #[test]
    fn parses_access_token_variants() {
        assert_eq!(
            parse_access_token(br#"{"accessToken":"a"}"#).as_deref(),
            Some("a")
        );
        assert_eq!(
            parse_access_token(br#"{"access_token":"b","expires_in":60}"#).as_deref(),
            Some("b")
        );
        assert_eq!(
            parse_access_token(br#"{"data":{"token":"c"}}"#).as_deref(),
            Some("c")
        );
    }

    #[test]
    fn rejects_missing_or_empty_token() {
        assert!(parse_access_token(br#"{"refreshToken":"x"}"#).is_none());
        assert!(parse_access_token(br#"{"accessToken":""}"#).is_none());
        assert!(parse_access_token(b"not json").is_none());
    }

    #[test]
    fn finds_cookie_among_set_cookie_headers() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("theme=dark; Path=/"));
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("refreshToken=r-456; HttpOnly; Secure; Path=/api/auth"),
        );

        assert_eq!(find_cookie(&headers, "refreshToken").as_deref(), Some("r-456"));
        assert!(find_cookie(&headers, "session").is_none());
    }
}
