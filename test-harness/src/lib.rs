//! Test support for Lectern.
//!
//! Provides an in-memory stand-in for the policy-administration service
//! ([`policy_service::PolicyService`]), helpers to mint signed tokens, and
//! the HTTP plumbing to run the service on an ephemeral port.
pub mod policy_service;
pub mod tokens;

pub use http_test::{TestServer, build_test_client, spawn_router, wait_for_listen};
pub use policy_service::PolicyService;
pub use tokens::{TEST_SECRET, mint_token, verify_token};
