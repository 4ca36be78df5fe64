//! Tower middleware that authenticates outbound requests and recovers from
//! expired credentials.
//!
//! [`AuthenticationLayer`] wraps an inner HTTP service and produces an
//! [`Authentication`] service, which for every request:
//!
//! 1. attaches `Authorization: Bearer <credential>` from the
//!    [`CredentialStore`] (the outbound interceptor),
//! 2. sends it through the inner service,
//! 3. classifies the response with the [`AuthPolicy`] (the inbound interceptor),
//! 4. on an eligible authorization failure, joins the current refresh cycle of
//!    the [`RefreshCoordinator`] and replays the request exactly once with the
//!    new credential.
//!
//! ```text
//! ┌──────────────────────────┐
//! │   AuthenticationLayer    │  ← Layer<S>: creates Authentication<S>
//! │ ┌──────────────────────┐ │
//! │ │  Authentication<S>   │ │  ← attach / classify / refresh / replay
//! │ │ ┌──────────────────┐ │ │
//! │ │ │  Inner Service S │ │ │  ← the actual HTTP client
//! │ │ └──────────────────┘ │ │
//! │ └──────────────────────┘ │
//! └──────────────────────────┘
//! ```
//!
//! All services produced by one layer share one store and one coordinator;
//! two layers never share anything.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::header::AUTHORIZATION;
use http::{Extensions, HeaderMap, HeaderValue, Method, Request, Response, Uri, Version};
use http_body::Body;
use tower::{Layer, Service};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::session::{Credential, CredentialStore};

use super::coordinator::RefreshCoordinator;
use super::error::{ApiProblem, AuthError, FromConfigError};
use super::notifier::{NoopNotifier, SessionNotifier};
use super::policy::{AuthPolicy, Decision, Retried};
use super::refresh::{self, RefreshEndpoint};

/// State shared by every service created from one layer.
struct Shared {
    coordinator: RefreshCoordinator,
    policy: AuthPolicy,
    refresh: RefreshEndpoint,
}

// ---------------------------------------------------------------------------
// Layer
// ---------------------------------------------------------------------------

/// A Tower [`Layer`] that adds bearer authentication with single-flight refresh.
///
/// ```rust,ignore
/// use tower::ServiceBuilder;
///
/// let store = CredentialStore::with_credential(token);
/// let layer = AuthenticationLayer::builder(store, RefreshEndpoint::new(refresh_uri))
///     .notifier(Arc::new(notifier))
///     .build();
///
/// let client = ServiceBuilder::new().layer(layer).service(http_client);
/// ```
#[derive(Clone)]
pub struct AuthenticationLayer {
    shared: Arc<Shared>,
}

impl AuthenticationLayer {
    /// A layer with the default policy (401) and no session notifier.
    pub fn new(store: CredentialStore, refresh: RefreshEndpoint) -> Self {
        Self::builder(store, refresh).build()
    }

    pub fn builder(store: CredentialStore, refresh: RefreshEndpoint) -> AuthenticationLayerBuilder {
        AuthenticationLayerBuilder {
            store,
            refresh,
            policy: AuthPolicy::default(),
            notifier: Arc::new(NoopNotifier),
        }
    }

    /// Wire a layer from a loaded [`PipelineConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`FromConfigError`] when the base URL is missing, an endpoint
    /// doesn't form a valid URI, or the configured status isn't an HTTP status.
    pub fn from_config(
        config: &PipelineConfig,
        store: CredentialStore,
        notifier: Arc<dyn SessionNotifier>,
    ) -> Result<Self, FromConfigError> {
        let refresh = RefreshEndpoint {
            uri: config.refresh_uri()?,
            renewal_cookie: config.renewal_cookie_name.clone(),
            send_tokens_in_body: config.send_tokens_in_body(),
        };
        let policy = AuthPolicy::new(config.unauthorized_status()?);

        debug!(
            refresh_endpoint = %refresh.uri,
            unauthorized_status = policy.unauthorized_status().as_u16(),
            renewal_cookie = ?refresh.renewal_cookie,
            "building authentication layer from config"
        );

        Ok(Self::builder(store, refresh)
            .policy(policy)
            .notifier(notifier)
            .build())
    }

    pub fn store(&self) -> &CredentialStore {
        self.shared.coordinator.store()
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.shared.coordinator
    }

    pub fn policy(&self) -> AuthPolicy {
        self.shared.policy
    }
}

pub struct AuthenticationLayerBuilder {
    store: CredentialStore,
    refresh: RefreshEndpoint,
    policy: AuthPolicy,
    notifier: Arc<dyn SessionNotifier>,
}

impl AuthenticationLayerBuilder {
    pub fn policy(mut self, policy: AuthPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn SessionNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn build(self) -> AuthenticationLayer {
        AuthenticationLayer {
            shared: Arc::new(Shared {
                coordinator: RefreshCoordinator::new(self.store, self.notifier),
                policy: self.policy,
                refresh: self.refresh,
            }),
        }
    }
}

impl<S> Layer<S> for AuthenticationLayer {
    type Service = Authentication<S>;

    fn layer(&self, service: S) -> Self::Service {
        Authentication {
            inner: service,
            shared: self.shared.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Tower [`Service`] that authenticates requests and replays them after a refresh.
///
/// Cloning is cheap; all clones share the same store and coordinator.
#[derive(Clone)]
pub struct Authentication<S> {
    inner: S,
    shared: Arc<Shared>,
}

impl<S> Authentication<S> {
    pub fn store(&self) -> &CredentialStore {
        self.shared.coordinator.store()
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.shared.coordinator
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for Authentication<S>
where
    // Clone: for the swap pattern, the refresh call and the replay.
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send + fmt::Debug,
    // Clone: the body is kept for the replay. From<Bytes>: the refresh body.
    ReqBody: From<Bytes> + Clone + Send + 'static,
    ResBody: Body + Send + 'static,
    ResBody::Data: Send,
    ResBody::Error: Send + fmt::Debug,
{
    type Response = Response<ResBody>;
    type Error = AuthError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AuthError::Inner)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let shared = self.shared.clone();

        // The readied service goes into the future, a fresh clone stays behind
        // for the next poll_ready.
        let mut inner = self.inner.clone();
        std::mem::swap(&mut self.inner, &mut inner);

        Box::pin(handle_request(shared, inner, req))
    }
}

/// The outbound interceptor: set `Authorization: Bearer <credential>` when the
/// store holds one, leave the request alone otherwise.
///
/// Never fails. A credential that can't be encoded as a header value is
/// skipped with a warning, the server will answer 401 and the normal
/// recovery path takes over.
pub fn attach_credential<B>(request: &mut Request<B>, store: &CredentialStore) {
    let Some(credential) = store.get() else {
        debug!("no credential stored, sending request unauthenticated");
        return;
    };
    match bearer_header(&credential) {
        Some(value) => {
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        None => warn!(
            token_prefix = credential.log_prefix(),
            token_len = credential.as_str().len(),
            "stored credential is not a valid header value, not attaching it"
        ),
    }
}

fn bearer_header(credential: &Credential) -> Option<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", credential.as_str())).ok()?;
    value.set_sensitive(true);
    Some(value)
}

/// Everything needed to send a request again; `http::Request` isn't `Clone`.
struct OriginalRequest<B> {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    extensions: Extensions,
    body: B,
}

impl<B: Clone> OriginalRequest<B> {
    fn capture(request: &Request<B>) -> Self {
        OriginalRequest {
            method: request.method().clone(),
            uri: request.uri().clone(),
            version: request.version(),
            headers: request.headers().clone(),
            extensions: request.extensions().clone(),
            body: request.body().clone(),
        }
    }

    /// Rebuild the request with `credential` attached and the [`Retried`] marker set.
    fn into_replay<E>(self, credential: &Credential) -> Result<Request<B>, AuthError<E>> {
        let header = bearer_header(credential).ok_or_else(|| {
            AuthError::InvalidCredential(
                "refreshed credential contains invalid header characters".to_string(),
            )
        })?;

        let mut request = Request::new(self.body);
        *request.method_mut() = self.method;
        *request.uri_mut() = self.uri;
        *request.version_mut() = self.version;
        *request.headers_mut() = self.headers;
        *request.extensions_mut() = self.extensions;
        request.headers_mut().insert(AUTHORIZATION, header);
        request.extensions_mut().insert(Retried);
        Ok(request)
    }
}

async fn handle_request<S, ReqBody, ResBody>(
    shared: Arc<Shared>,
    mut inner: S,
    mut req: Request<ReqBody>,
) -> Result<Response<ResBody>, AuthError<S::Error>>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send + fmt::Debug,
    ReqBody: From<Bytes> + Clone + Send + 'static,
    ResBody: Body + Send + 'static,
    ResBody::Data: Send,
    ResBody::Error: Send + fmt::Debug,
{
    let original = OriginalRequest::capture(&req);
    attach_credential(&mut req, shared.coordinator.store());

    let response = inner.call(req).await.map_err(AuthError::Inner)?;
    let status = response.status();
    debug!(status = %status, uri = %original.uri, "response received");

    match shared.policy.classify(status, &original.extensions) {
        Decision::PassThrough => return Ok(response),
        Decision::Ineligible(reason) => {
            debug!(?reason, uri = %original.uri, "authorization failure is not recoverable");
            return Ok(response);
        }
        Decision::Eligible => {}
    }

    info!(uri = %original.uri, "authorization failure, joining refresh cycle");

    // Owned clone for the refresh call so the future doesn't need `S: Sync`.
    let mut refresh_svc = inner.clone();
    let endpoint = &shared.refresh;
    let store = shared.coordinator.store();
    let credential = shared
        .coordinator
        .run(move || async move {
            std::future::poll_fn(|cx| refresh_svc.poll_ready(cx))
                .await
                .map_err(|e| ApiProblem::network(format!("refresh transport not ready: {e:?}")))?;
            refresh::request_refresh(&mut refresh_svc, endpoint, store).await
        })
        .await
        .map_err(AuthError::RefreshFailed)?;

    let replay = original.into_replay(&credential)?;
    debug!(
        token_prefix = credential.log_prefix(),
        token_len = credential.as_str().len(),
        uri = %replay.uri(),
        "replaying request with refreshed credential"
    );

    std::future::poll_fn(|cx| inner.poll_ready(cx))
        .await
        .map_err(AuthError::Inner)?;

    let response = inner.call(replay).await.map_err(AuthError::Inner)?;
    debug!(status = %response.status(), "replay response received");
    Ok(response)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
