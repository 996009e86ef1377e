//! Lectern console client.
//!
//! # Purpose
//! Holds the current identity, gates protected views on its capabilities, and
//! talks to the policy-administration service to edit the group/permission
//! graph.
//!
//! # How it fits
//! - [`identity::IdentityStore`] rehydrates and owns the current identity.
//! - [`guard::AccessGuard`] decides render vs. redirect for every protected view.
//! - [`api::AuthorizationClient`] wraps the remote permission, policy-group, and
//!   relation endpoints.
//! - [`panel`] composes the two for the administrative screens.
//!
//! # Key invariants
//! - Identity resolution fails closed: any decode or storage failure during
//!   `init()` publishes "no identity".
//! - Relation mutations fail loud: errors are returned and shown, cached lists
//!   are only replaced by a successful refresh.
//! - The guard is UI routing, not a security boundary. The service re-checks
//!   every request.
pub mod api;
pub mod config;
pub mod guard;
pub mod identity;
pub mod observability;
pub mod panel;
pub mod routes;
pub mod session;

pub use api::{AuthorizationClient, BearerSource, RequestError, RequestResult};
pub use config::ClientConfig;
pub use guard::{AccessGuard, GuardOutcome, GuardState, View};
pub use identity::{IdentitySnapshot, IdentityState, IdentityStore};
pub use routes::{AdminScreen, HistoryNavigator, Navigator, Route};
