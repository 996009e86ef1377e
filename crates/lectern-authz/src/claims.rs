//! Identity token claims and the payload codec.
//!
//! # Purpose
//! Extracts the claims record from a three-segment identity token without
//! verifying its signature, and mints HS256 tokens for tests and the policy
//! service double.
//!
//! # Key invariants
//! - A token is exactly three non-empty `.`-separated segments.
//! - Only the payload is read; it must be base64url JSON describing an object.
//! - Absent claims are surfaced as `None`, never defaulted.
//!
//! # Security considerations
//! - There is no defense here against a locally forged token. The issuing
//!   service is trusted and TLS is relied on in transit; the service must
//!   re-authorize every request on its own.
use crate::{DecodeError, DecodeResult};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

/// Claims carried in the payload of an identity token.
///
/// Wire names follow the issuing service: `permissoes` holds the capability
/// list and `grupo` the policy group name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(rename = "permissoes", skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
    #[serde(rename = "grupo", skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

/// Stateless token codec.
pub struct ClaimsCodec;

impl ClaimsCodec {
    /// Decode the payload segment of `token` into [`Claims`].
    ///
    /// # Errors
    /// - [`DecodeError::SegmentCount`] unless there are exactly three segments.
    /// - [`DecodeError::EmptySegment`] if any segment is empty.
    /// - [`DecodeError::Base64`] if the payload is not base64url.
    /// - [`DecodeError::Json`] / [`DecodeError::NotARecord`] if the payload is
    ///   not a JSON object.
    /// - [`DecodeError::Schema`] if a known claim has the wrong type.
    pub fn decode(token: &str) -> DecodeResult<Claims> {
        let segments: Vec<&str> = token.trim().split('.').collect();
        let [header, payload, signature] = segments.as_slice() else {
            return Err(DecodeError::SegmentCount(segments.len()));
        };
        for (name, segment) in [
            ("header", header),
            ("payload", payload),
            ("signature", signature),
        ] {
            if segment.is_empty() {
                return Err(DecodeError::EmptySegment(name));
            }
        }

        // Issuers differ on padding; accept both forms.
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
        let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(DecodeError::Json)?;
        if !value.is_object() {
            return Err(DecodeError::NotARecord);
        }
        serde_json::from_value(value).map_err(DecodeError::Schema)
    }

    /// Sign `claims` as an HS256 token.
    pub fn encode(claims: &Claims, key: &EncodingKey) -> jsonwebtoken::errors::Result<String> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, key)
    }
}
