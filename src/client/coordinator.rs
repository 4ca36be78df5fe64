//! Single-flight coordination of credential refreshes.
//!
//! Many requests can discover an expired credential at roughly the same time.
//! [`RefreshCoordinator`] makes sure only the first of them actually calls the
//! refresh service; everyone else parks on a oneshot channel and receives the
//! leader's outcome.
//!
//! ```text
//!            first eligible 401            refresh settles
//!   Idle ───────────────────────────▶ Refreshing ───────────────▶ Idle
//!                                     │   ▲
//!                 later eligible 401s │   │ (enqueue waiter)
//!                                     └───┘
//! ```
//!
//! The check-and-set of the state and the decision to lead or wait happen under
//! one mutex acquisition with no `.await` inside, and so does settling the
//! cycle: the store update, draining the waiter queue and the return to `Idle`
//! are a single step. A request that fails after that step starts a new cycle.

use std::future::Future;
use std::sync::Arc;

use http::StatusCode;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::session::{Credential, CredentialStore};

use super::error::ApiProblem;
use super::notifier::SessionNotifier;

/// What every participant in a refresh cycle receives.
pub type RefreshOutcome = Result<Credential, ApiProblem>;

type Waiter = oneshot::Sender<RefreshOutcome>;

enum CycleState {
    Idle,
    Refreshing { waiters: Vec<Waiter> },
}

enum Role {
    Leader,
    Waiter(oneshot::Receiver<RefreshOutcome>),
}

/// Owns the refresh state machine for one client instance.
///
/// Shared between all clones of an [`Authentication`](super::Authentication)
/// service via `Arc`; separate clients get separate coordinators.
pub struct RefreshCoordinator {
    state: Mutex<CycleState>,
    store: CredentialStore,
    notifier: Arc<dyn SessionNotifier>,
}

impl RefreshCoordinator {
    pub fn new(store: CredentialStore, notifier: Arc<dyn SessionNotifier>) -> Self {
        RefreshCoordinator {
            state: Mutex::new(CycleState::Idle),
            store,
            notifier,
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.state.lock(), CycleState::Refreshing { .. })
    }

    /// Number of callers currently parked behind the leader.
    pub fn waiter_count(&self) -> usize {
        match &*self.state.lock() {
            CycleState::Idle => 0,
            CycleState::Refreshing { waiters } => waiters.len(),
        }
    }

    /// Join the current refresh cycle, or start one.
    ///
    /// `refresh` is only invoked when this call becomes the leader of a new
    /// cycle. It yields the new raw credential or the problem that ends the
    /// session.
    pub async fn run<F, Fut>(&self, refresh: F) -> RefreshOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, ApiProblem>>,
    {
        match self.join() {
            Role::Waiter(rx) => {
                debug!("refresh already in flight, waiting for its outcome");
                // The sender only disappears without sending if the leader was
                // dropped, and its guard reports that itself.
                rx.await.unwrap_or_else(|_| Err(abandoned()))
            }
            Role::Leader => {
                info!("starting credential refresh cycle");
                let guard = CycleGuard {
                    coordinator: self,
                    settled: false,
                };
                let result = refresh().await;
                guard.settle(result)
            }
        }
    }

    fn join(&self) -> Role {
        let mut state = self.state.lock();
        if let CycleState::Refreshing { waiters } = &mut *state {
            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            return Role::Waiter(rx);
        }
        *state = CycleState::Refreshing {
            waiters: Vec::new(),
        };
        Role::Leader
    }

    /// Settle the cycle: update the store, release every waiter and go back to
    /// `Idle`, all under one lock.
    fn settle(&self, result: Result<String, ApiProblem>) -> RefreshOutcome {
        let outcome = {
            let mut state = self.state.lock();
            let waiters = match std::mem::replace(&mut *state, CycleState::Idle) {
                CycleState::Refreshing { waiters } => waiters,
                CycleState::Idle => Vec::new(),
            };

            let outcome = match result {
                Ok(raw) => {
                    let credential = Credential::parse(raw);
                    self.store.set(credential.as_str());
                    info!(
                        waiters = waiters.len(),
                        token_prefix = credential.log_prefix(),
                        token_len = credential.as_str().len(),
                        "credential refreshed"
                    );
                    Ok(credential)
                }
                Err(problem) => {
                    self.store.clear();
                    warn!(
                        waiters = waiters.len(),
                        status = problem.status,
                        detail = %problem.detail,
                        "credential refresh failed"
                    );
                    Err(problem)
                }
            };

            // A waiter whose caller gave up has dropped its receiver; that's fine.
            for waiter in waiters {
                let _ = waiter.send(outcome.clone());
            }
            outcome
        };

        // Outside the lock: the notifier is foreign code.
        if outcome.is_err() {
            self.notifier.session_expired();
        }
        outcome
    }

    /// The leader went away mid-refresh. Don't strand the waiters.
    fn abandon(&self) {
        let waiters = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, CycleState::Idle) {
                CycleState::Refreshing { waiters } => waiters,
                CycleState::Idle => Vec::new(),
            }
        };
        warn!(waiters = waiters.len(), "refresh leader dropped before completion");
        for waiter in waiters {
            let _ = waiter.send(Err(abandoned()));
        }
    }
}

fn abandoned() -> ApiProblem {
    ApiProblem {
        title: "Refresh Abandoned".to_string(),
        status: StatusCode::UNAUTHORIZED.as_u16(),
        detail: "the credential refresh was cancelled before it completed".to_string(),
        field_errors: None,
    }
}

/// Resets the state machine if the leading future is dropped before settling.
struct CycleGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl CycleGuard<'_> {
    fn settle(mut self, result: Result<String, ApiProblem>) -> RefreshOutcome {
        self.settled = true;
        self.coordinator.settle(result)
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.coordinator.abandon();
        }
    }
}
