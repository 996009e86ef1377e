// Signing and verification of test session tokens (HS256, shared secret).
use anyhow::{Context, Result};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Validation};
use lectern_authz::{Claims, ClaimsCodec};

pub const TEST_SECRET: &[u8] = b"lectern-test-secret";

pub fn mint_token(claims: &Claims) -> Result<String> {
    ClaimsCodec::encode(claims, &EncodingKey::from_secret(TEST_SECRET)).context("sign test token")
}

/// Verify signature and expiry. Tokens without `exp` are accepted.
pub fn verify_token(token: &str) -> Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();
    validation.leeway = 0;
    let data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(TEST_SECRET),
        &validation,
    )
    .context("verify test token")?;
    Ok(data.claims)
}
