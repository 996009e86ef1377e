//! Immutable identity derived from decoded claims.
//!
//! # Purpose
//! Validates a [`Claims`] record against the required-claims schema and
//! freezes it into an [`Identity`].
//!
//! # Key invariants
//! - `id`, `sub`, and `permissoes` are required; nothing is defaulted.
//! - An identity is never built locally from anything but a token, and is
//!   never mutated after construction.
use crate::{CapabilitySet, Claims, ClaimsCodec, IdentityError, IdentityResult};
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    subject_id: i64,
    subject_label: String,
    capabilities: CapabilitySet,
    group_name: Option<String>,
    expires_at: Option<i64>,
}

impl Identity {
    /// Build an identity from decoded claims.
    ///
    /// # Errors
    /// - [`IdentityError::MissingClaim`] when a required claim is absent.
    /// - [`IdentityError::Expired`] when `exp` is at or before `now`.
    pub fn from_claims(claims: Claims, now: i64) -> IdentityResult<Self> {
        let subject_id = claims.id.ok_or(IdentityError::MissingClaim("id"))?;
        let subject_label = claims.sub.ok_or(IdentityError::MissingClaim("sub"))?;
        let capabilities = claims
            .capabilities
            .ok_or(IdentityError::MissingClaim("permissoes"))?;
        if let Some(expires_at) = claims.exp {
            if expires_at <= now {
                return Err(IdentityError::Expired { expires_at });
            }
        }
        Ok(Self {
            subject_id,
            subject_label,
            capabilities: CapabilitySet::from_raw(capabilities),
            group_name: claims.group,
            expires_at: claims.exp,
        })
    }

    /// Decode `token` and build an identity in one step.
    pub fn from_token(token: &str, now: i64) -> IdentityResult<Self> {
        let claims = ClaimsCodec::decode(token)?;
        Self::from_claims(claims, now)
    }

    pub fn subject_id(&self) -> i64 {
        self.subject_id
    }

    pub fn subject_label(&self) -> &str {
        &self.subject_label
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn group_name(&self) -> Option<&str> {
        self.group_name.as_deref()
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

pub fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ADMIN_CAPABILITY;

    fn ana() -> Claims {
        Claims {
            id: Some(7),
            sub: Some("ana".to_string()),
            capabilities: Some(vec![ADMIN_CAPABILITY.to_string()]),
            ..Claims::default()
        }
    }

    #[test]
    fn builds_identity_from_required_claims() {
        let identity = Identity::from_claims(ana(), 0).expect("identity");
        assert_eq!(identity.subject_id(), 7);
        assert_eq!(identity.subject_label(), "ana");
        assert!(identity.has_capability(ADMIN_CAPABILITY));
        assert_eq!(identity.capabilities().len(), 1);
        assert_eq!(identity.group_name(), None);
    }

    #[test]
    fn each_required_claim_is_enforced() {
        let mut claims = ana();
        claims.id = None;
        assert!(matches!(
            Identity::from_claims(claims, 0),
            Err(IdentityError::MissingClaim("id"))
        ));

        let mut claims = ana();
        claims.sub = None;
        assert!(matches!(
            Identity::from_claims(claims, 0),
            Err(IdentityError::MissingClaim("sub"))
        ));

        let mut claims = ana();
        claims.capabilities = None;
        assert!(matches!(
            Identity::from_claims(claims, 0),
            Err(IdentityError::MissingClaim("permissoes"))
        ));
    }

    #[test]
    fn empty_capability_list_is_valid() {
        let mut claims = ana();
        claims.capabilities = Some(vec![]);
        let identity = Identity::from_claims(claims, 0).expect("identity");
        assert!(identity.capabilities().is_empty());
        assert!(!identity.has_capability(ADMIN_CAPABILITY));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let mut claims = ana();
        claims.exp = Some(100);
        assert!(matches!(
            Identity::from_claims(claims.clone(), 100),
            Err(IdentityError::Expired { expires_at: 100 })
        ));
        let identity = Identity::from_claims(claims, 99).expect("not yet expired");
        assert_eq!(identity.expires_at(), Some(100));
    }

    #[test]
    fn from_token_propagates_decode_errors() {
        let err = Identity::from_token("not-a-token", 0).expect_err("decode");
        assert!(matches!(err, IdentityError::Decode(_)));
    }

    #[test]
    fn group_claim_is_carried() {
        let mut claims = ana();
        claims.group = Some("admin".to_string());
        let identity = Identity::from_claims(claims, 0).expect("identity");
        assert_eq!(identity.group_name(), Some("admin"));
    }
}
