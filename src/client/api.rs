//! The caller-facing client.
//!
//! Business code talks to [`ApiClient`]; it never sees `AuthError` or raw
//! error responses. Whatever the pipeline decides ends up either as a
//! successful [`Response<Bytes>`] or as an [`ApiProblem`].

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{Method, Request, Response, Uri};
use http_body::Body;
use http_body_util::Full;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::session::{Claims, Credential, CredentialStore};

use super::auth::{Authentication, AuthenticationLayer};
use super::coordinator::RefreshCoordinator;
use super::error::{ApiProblem, FromConfigError, NO_STATUS};
use super::notifier::SessionNotifier;
use super::policy::AuthExempt;
use super::refresh;

/// An authenticated API client over any HTTP transport `S`.
#[derive(Clone)]
pub struct ApiClient<S> {
    service: Authentication<S>,
    base_url: Arc<str>,
    login_uri: Uri,
    renewal_cookie: Option<String>,
}

impl<S> ApiClient<S> {
    /// Wrap `transport` in an [`AuthenticationLayer`] built from `config`.
    pub fn from_config(
        config: &PipelineConfig,
        transport: S,
        store: CredentialStore,
        notifier: Arc<dyn SessionNotifier>,
    ) -> Result<Self, FromConfigError> {
        let layer = AuthenticationLayer::from_config(config, store, notifier)?;
        Ok(ApiClient {
            service: layer.layer(transport),
            base_url: Arc::from(config.base_url()?),
            login_uri: config.login_uri()?,
            renewal_cookie: config.renewal_cookie_name.clone(),
        })
    }

    pub fn store(&self) -> &CredentialStore {
        self.service.store()
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        self.service.coordinator()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store().is_authenticated()
    }

    pub fn claims(&self) -> Option<Claims> {
        self.store().claims()
    }

    /// Forget the session locally.
    pub fn logout(&self) {
        info!("logging out");
        self.store().clear();
    }

    /// Resolve `path` against the base URL; absolute URLs are taken as-is.
    fn resolve(&self, path: &str) -> Result<Uri, ApiProblem> {
        if let Ok(uri) = path.parse::<Uri>()
            && uri.scheme().is_some()
            && uri.authority().is_some()
        {
            return Ok(uri);
        }
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        url.parse()
            .map_err(|e| invalid_request(format!("invalid URL {url:?}: {e}")))
    }
}

impl<S, ResBody> ApiClient<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send + fmt::Debug,
    ResBody: Body + Send + 'static,
    ResBody::Data: Send,
    ResBody::Error: Send + fmt::Debug,
{
    /// Send a request through the pipeline and collect the response.
    ///
    /// # Errors
    ///
    /// Every non-success status, transport failure and refresh failure is
    /// returned as an [`ApiProblem`].
    pub async fn send(&self, request: Request<Full<Bytes>>) -> Result<Response<Bytes>, ApiProblem> {
        let method = request.method().clone();
        let uri = request.uri().clone();

        let response = self
            .service
            .clone()
            .oneshot(request)
            .await
            .map_err(|e| {
                let problem = e.into_problem();
                warn!(%method, %uri, status = problem.status, "request failed in pipeline");
                problem
            })?;

        let (parts, body) = response.into_parts();
        let bytes = refresh::collect_body(body).await?;

        if !parts.status.is_success() {
            let problem = ApiProblem::from_response_parts(parts.status, &bytes);
            debug!(%method, %uri, status = problem.status, title = %problem.title, "request rejected");
            return Err(problem);
        }

        Ok(Response::from_parts(parts, bytes))
    }

    pub async fn get(&self, path: &str) -> Result<Response<Bytes>, ApiProblem> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(self.resolve(path)?)
            .header(ACCEPT, "application/json")
            .body(Full::default())
            .map_err(|e| invalid_request(e.to_string()))?;
        self.send(request).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiProblem> {
        let response = self.get(path).await?;
        decode_json(response.body())
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiProblem>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = json_request(Method::POST, self.resolve(path)?, body)?;
        let response = self.send(request).await?;
        decode_json(response.body())
    }

    /// Exchange login details for a credential and store it.
    ///
    /// The login call is marked [`AuthExempt::Login`]: a 401 here means bad
    /// credentials, never an expired session.
    pub async fn login<B: Serialize + ?Sized>(&self, body: &B) -> Result<Credential, ApiProblem> {
        let mut request = json_request(Method::POST, self.login_uri.clone(), body)?;
        request.extensions_mut().insert(AuthExempt::Login);

        let response = self.send(request).await?;

        if let Some(name) = &self.renewal_cookie
            && let Some(secret) = refresh::find_cookie(response.headers(), name)
        {
            self.store().set_renewal_secret(secret);
        }

        let token = refresh::parse_access_token(response.body()).ok_or_else(|| ApiProblem {
            title: "Invalid Login Response".to_string(),
            status: response.status().as_u16(),
            detail: "login response did not contain an access token".to_string(),
            field_errors: None,
        })?;

        self.store().set(token);
        let credential = self
            .store()
            .get()
            .ok_or_else(|| invalid_request("credential vanished right after login"))?;
        info!(
            subject = ?credential.claims().and_then(|c| c.subject_id.as_deref()),
            "logged in"
        );
        Ok(credential)
    }
}

fn json_request<B: Serialize + ?Sized>(
    method: Method,
    uri: Uri,
    body: &B,
) -> Result<Request<Full<Bytes>>, ApiProblem> {
    let bytes = serde_json::to_vec(body)
        .map_err(|e| invalid_request(format!("failed to encode request body: {e}")))?;
    Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .header(ACCEPT, "application/json")
        .body(Full::new(Bytes::from(bytes)))
        .map_err(|e| invalid_request(e.to_string()))
}

fn decode_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiProblem> {
    // An empty 204-style body still decodes into `()` or `Option<_>`.
    let body: &[u8] = if body.is_empty() { b"null" } else { body };
    serde_json::from_slice(body).map_err(|e| ApiProblem {
        title: "Invalid Response Body".to_string(),
        status: NO_STATUS,
        detail: e.to_string(),
        field_errors: None,
    })
}

fn invalid_request(detail: impl Into<String>) -> ApiProblem {
    ApiProblem {
        title: "Invalid Request".to_string(),
        status: NO_STATUS,
        detail: detail.into(),
        field_errors: None,
    }
}
