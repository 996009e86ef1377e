//! Capability gate in front of protected views.
//!
//! # Purpose
//! Decides, per mount, whether a wrapped [`View`] may run for the current
//! identity or whether the session is sent to [`Route::AccessDenied`].
//!
//! # Key invariants
//! - While the identity store is unresolved the guard stays in
//!   [`GuardState::Loading`] and renders nothing.
//! - The wrapped view's body never runs unless the guard is
//!   [`GuardState::Authorized`], and runs exactly once per mount.
//! - `Unauthorized` always ends in `Redirected`.
//!
//! # Common pitfalls
//! This is routing, not enforcement. The policy service re-checks the same
//! capability on every request.
use crate::identity::{IdentitySnapshot, IdentityStore};
use crate::observability::GUARD_DECISIONS_TOTAL;
use crate::routes::{Navigator, Route};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// A screen that can be mounted behind an [`AccessGuard`].
#[async_trait]
pub trait View: Send + Sync {
    type Props: Send;
    type Output: Send;

    async fn render(&self, props: Self::Props) -> Self::Output;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Loading,
    Authorized,
    Unauthorized,
    Redirected,
}

#[derive(Debug, PartialEq, Eq)]
pub enum GuardOutcome<T> {
    Rendered(T),
    Redirected(Route),
}

impl<T> GuardOutcome<T> {
    pub fn rendered(self) -> Option<T> {
        match self {
            GuardOutcome::Rendered(output) => Some(output),
            GuardOutcome::Redirected(_) => None,
        }
    }
}

/// Pure decision for one snapshot: `Loading`, `Authorized`, or `Unauthorized`.
pub fn evaluate(snapshot: &IdentitySnapshot, required: Option<&str>) -> GuardState {
    if !snapshot.is_resolved() {
        return GuardState::Loading;
    }
    match (snapshot.identity(), required) {
        (None, _) => GuardState::Unauthorized,
        (Some(identity), Some(capability)) if !identity.has_capability(capability) => {
            GuardState::Unauthorized
        }
        (Some(_), _) => GuardState::Authorized,
    }
}

pub struct AccessGuard<V> {
    view: V,
    required: Option<String>,
    store: Arc<IdentityStore>,
    navigator: Arc<dyn Navigator>,
    state: Mutex<GuardState>,
}

impl<V: View> AccessGuard<V> {
    /// Guard that only requires some identity to be present.
    pub fn new(view: V, store: Arc<IdentityStore>, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            view,
            required: None,
            store,
            navigator,
            state: Mutex::new(GuardState::Loading),
        }
    }

    pub fn require(mut self, capability: impl Into<String>) -> Self {
        self.required = Some(capability.into());
        self
    }

    /// Guard using the capability the route table assigns to `route`.
    pub fn for_route(
        view: V,
        route: Route,
        store: Arc<IdentityStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let guard = Self::new(view, store, navigator);
        match route.required_capability() {
            Some(capability) => guard.require(capability),
            None => guard,
        }
    }

    pub fn state(&self) -> GuardState {
        *self.state.lock()
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn required_capability(&self) -> Option<&str> {
        self.required.as_deref()
    }

    /// Mount the view: wait for identity resolution, then either render with
    /// `props` or redirect to the access-denied route.
    pub async fn mount(&self, props: V::Props) -> GuardOutcome<V::Output> {
        *self.state.lock() = GuardState::Loading;
        let snapshot = self.store.wait_resolved().await;
        let required = self.required.as_deref();
        let subject = snapshot
            .identity()
            .map(|identity| identity.subject_label().to_string());
        match evaluate(&snapshot, required) {
            GuardState::Authorized => {
                *self.state.lock() = GuardState::Authorized;
                metrics::counter!(GUARD_DECISIONS_TOTAL, "outcome" => "authorized").increment(1);
                tracing::debug!(subject = ?subject, required = ?required, "view authorized");
                GuardOutcome::Rendered(self.view.render(props).await)
            }
            _ => {
                *self.state.lock() = GuardState::Unauthorized;
                metrics::counter!(GUARD_DECISIONS_TOTAL, "outcome" => "redirected").increment(1);
                tracing::info!(
                    subject = ?subject,
                    required = ?required,
                    "view denied, redirecting"
                );
                self.navigator.navigate(Route::AccessDenied);
                *self.state.lock() = GuardState::Redirected;
                GuardOutcome::Redirected(Route::AccessDenied)
            }
        }
    }
}
