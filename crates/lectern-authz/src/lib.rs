//! Lectern identity and capability primitives shared by the console client
//! and the policy-service test double.
//!
//! # Purpose
//! Turns an opaque identity token into a typed [`Claims`] record and an
//! immutable [`Identity`] carrying the capability set embedded at issuance.
//!
//! # How it fits
//! The policy-administration service mints tokens whose payload lists the
//! caller's capabilities. The client decodes them with [`ClaimsCodec`], holds
//! the resulting [`Identity`] in its identity store, and gates protected views
//! against [`CapabilitySet`].
//!
//! # Key invariants
//! - Only the payload segment is interpreted; signatures are NOT verified here.
//!   Capability checks built on this crate are UI-layer gating only, and every
//!   capability-gated endpoint must re-check authorization server-side.
//! - Missing claims decode as `None`; required claims are enforced when an
//!   [`Identity`] is built, never defaulted.
//!
//! # Examples
//! ```rust
//! use lectern_authz::{Claims, ClaimsCodec, Identity};
//! use jsonwebtoken::EncodingKey;
//!
//! let claims = Claims {
//!     id: Some(7),
//!     sub: Some("ana".to_string()),
//!     capabilities: Some(vec!["admin.create".to_string()]),
//!     ..Claims::default()
//! };
//! let token = ClaimsCodec::encode(&claims, &EncodingKey::from_secret(b"secret")).unwrap();
//! let identity = Identity::from_token(&token, 0).unwrap();
//! assert!(identity.has_capability("admin.create"));
//! ```
//!
//! # Common pitfalls
//! - Treating a decoded identity as proof of authorization on the server side.
//! - Expecting capability changes to apply to already-issued tokens; they only
//!   show up after the next login.

mod capability;
mod claims;
mod errors;
mod identity;

pub use capability::{ADMIN_CAPABILITY, Capability, CapabilitySet};
pub use claims::{Claims, ClaimsCodec};
pub use errors::{DecodeError, DecodeResult, IdentityError, IdentityResult};
pub use identity::{Identity, now_epoch_seconds};
