// Credential sign-in: exchange username/password for a token and adopt it.
use crate::api::{AuthorizationClient, RequestError};
use crate::identity::{IdentityStore, IdentityStoreError};
use lectern_authz::Identity;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum SignInError {
    #[error("sign-in request failed: {0}")]
    Request(#[from] RequestError),
    #[error("issued token rejected: {0}")]
    Identity(#[from] IdentityStoreError),
}

pub async fn sign_in(
    client: &AuthorizationClient,
    store: &IdentityStore,
    username: &str,
    password: &str,
) -> Result<Arc<Identity>, SignInError> {
    let token = client.request_token(username.trim(), password).await?;
    let identity = store.login(&token.access_token).await?;
    Ok(identity)
}
