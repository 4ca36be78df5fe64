//! HTTP client with bearer authentication and single-flight credential refresh.
//!
//! The main components are:
//!
//! - [`AuthenticationLayer`] / [`Authentication`]: Tower middleware that
//!   attaches the stored credential to every request and, when the server
//!   rejects it, refreshes once and replays the request.
//!
//! - [`RefreshCoordinator`]: makes sure that any number of concurrent
//!   authorization failures share one refresh call.
//!
//! - [`AuthPolicy`]: decides which responses are recoverable. Login and
//!   refresh calls are marked with [`AuthExempt`], replays with [`Retried`].
//!
//! - [`ApiClient`]: the caller-facing wrapper. Everything that goes wrong
//!   comes back as an [`ApiProblem`].
//!
//! - [`SessionNotifier`]: told exactly once per failed refresh cycle that the
//!   session is over, so the application can route to its login screen.
//!
//! # Example
//!
//! ```rust,ignore
//! use tower::ServiceBuilder;
//! use auth_pipeline::client::{AuthenticationLayer, BroadcastNotifier};
//!
//! let notifier = Arc::new(BroadcastNotifier::default());
//! let mut expired = notifier.subscribe();
//!
//! let auth_layer = AuthenticationLayer::from_config(&cfg, store, notifier)?;
//!
//! let client = ServiceBuilder::new()
//!     .layer(auth_layer)
//!     .service(http_client);
//! ```

pub mod api;
pub mod auth;
pub mod coordinator;
pub mod error;
pub mod notifier;
pub mod policy;
pub mod refresh;

#[cfg(test)]
mod mock;

pub use api::ApiClient;
pub use auth::{Authentication, AuthenticationLayer, AuthenticationLayerBuilder, attach_credential};
pub use coordinator::{RefreshCoordinator, RefreshOutcome};
pub use error::{ApiProblem, AuthError, FromConfigError, NO_STATUS};
pub use notifier::{BroadcastNotifier, NoopNotifier, SessionEvent, SessionNotifier};
pub use policy::{AuthExempt, AuthPolicy, Decision, IneligibleReason, Retried};
pub use refresh::RefreshEndpoint;
