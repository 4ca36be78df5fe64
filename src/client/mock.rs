//! Test doubles shared by the client tests.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http::header::AUTHORIZATION;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use tokio::sync::Semaphore;
use tower::Service;

use super::notifier::SessionNotifier;

pub(crate) const REFRESH_PATH: &str = "/api/auth/refresh";
pub(crate) const LOGIN_PATH: &str = "/api/auth/login";

/// What the mock saw, for later assertions.
#[derive(Debug, Clone)]
pub(crate) struct CapturedRequest {
    pub method: http::Method,
    pub uri: http::Uri,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

impl CapturedRequest {
    pub fn authorization(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
    }

    pub fn is_refresh(&self) -> bool {
        self.uri.path() == REFRESH_PATH
    }
}

type Handler = dyn Fn(&CapturedRequest) -> Response<Full<Bytes>> + Send + Sync;

/// A mock Tower service that answers through a routing closure and records
/// every request it sees. Refresh calls can be held back behind a semaphore
/// so tests decide when the refresh settles.
#[derive(Clone)]
pub(crate) struct MockHttpService {
    handler: Arc<Handler>,
    captured_requests: Arc<Mutex<Vec<CapturedRequest>>>,
    refresh_gate: Option<Arc<Semaphore>>,
}

impl MockHttpService {
    pub fn new(
        handler: impl Fn(&CapturedRequest) -> Response<Full<Bytes>> + Send + Sync + 'static,
    ) -> Self {
        MockHttpService {
            handler: Arc::new(handler),
            captured_requests: Arc::new(Mutex::new(Vec::new())),
            refresh_gate: None,
        }
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.refresh_gate = Some(gate);
        self
    }

    pub fn captured(&self) -> Vec<CapturedRequest> {
        self.captured_requests.lock().unwrap().clone()
    }
}

impl Service<Request<Full<Bytes>>> for MockHttpService {
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Full<Bytes>>, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        let handler = self.handler.clone();
        let captured_requests = self.captured_requests.clone();
        let gate = self.refresh_gate.clone();

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            // Full<Bytes> never fails to collect.
            let body = body.collect().await.unwrap().to_bytes();
            let captured = CapturedRequest {
                method: parts.method,
                uri: parts.uri,
                headers: parts.headers,
                body,
            };
            captured_requests.lock().unwrap().push(captured.clone());

            if captured.is_refresh()
                && let Some(gate) = gate
            {
                gate.acquire().await.unwrap().forget();
            }
            Ok(handler(&captured))
        })
    }
}

pub(crate) fn status_response(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

pub(crate) fn json_response(status: StatusCode, json: serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(serde_json::to_vec(&json).unwrap())))
        .unwrap()
}

pub(crate) fn get_request(uri: &str) -> Request<Full<Bytes>> {
    Request::builder()
        .method(http::Method::GET)
        .uri(uri)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition was never met");
}

/// Counts session-expired signals; clones share the count.
#[derive(Debug, Clone, Default)]
pub(crate) struct CountingNotifier {
    signals: Arc<AtomicUsize>,
}

impl CountingNotifier {
    pub fn count(&self) -> usize {
        self.signals.load(Ordering::SeqCst)
    }
}

impl SessionNotifier for CountingNotifier {
    fn session_expired(&self) {
        self.signals.fetch_add(1, Ordering::SeqCst);
    }
}
