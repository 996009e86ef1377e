//! Current-identity store.
//!
//! # Purpose
//! Owns the one identity the console is acting as. It rehydrates from the
//! persisted session token on startup, replaces the identity wholesale on
//! login, and clears it on logout.
//!
//! # How it fits
//! Readers take cheap snapshots (`current()`) or follow changes through a
//! `tokio::sync::watch` receiver (`subscribe()`). The access guard waits on
//! `wait_resolved()` before deciding anything. The API layer reads the raw
//! token through [`BearerSource`].
//!
//! # Key invariants
//! - `init()` fails closed: an unreadable store or an undecodable token
//!   publishes [`IdentityState::Anonymous`] and clears the persisted token.
//! - Leaving [`IdentityState::Resolving`] happens exactly once.
//! - `init`, `login`, and `logout` are serialized; each publish bumps the
//!   snapshot version.
//! - A failed `login` publishes and persists nothing.
//!
//! # Common pitfalls
//! Capabilities are read from the token. Changes made to the group/permission
//! graph are not visible here until a new token is issued.
mod storage;

pub use storage::{
    FileTokenStorage, MemoryTokenStorage, StorageError, StorageResult, TOKEN_KEY, TokenStorage,
};

use crate::api::BearerSource;
use crate::observability::IDENTITY_TRANSITIONS_TOTAL;
use lectern_authz::{Identity, IdentityError, now_epoch_seconds};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};

/// An authenticated session: the decoded identity plus the token it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: Arc<Identity>,
    pub token: Arc<str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityState {
    /// `init()` has not finished.
    Resolving,
    Anonymous,
    Authenticated(Session),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySnapshot {
    pub version: u64,
    pub state: IdentityState,
}

impl IdentitySnapshot {
    pub fn is_resolved(&self) -> bool {
        !matches!(self.state, IdentityState::Resolving)
    }

    pub fn identity(&self) -> Option<&Arc<Identity>> {
        match &self.state {
            IdentityState::Authenticated(session) => Some(&session.identity),
            _ => None,
        }
    }

    pub fn token(&self) -> Option<&Arc<str>> {
        match &self.state {
            IdentityState::Authenticated(session) => Some(&session.token),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityStoreError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct IdentityStore {
    storage: Arc<dyn TokenStorage>,
    tx: watch::Sender<IdentitySnapshot>,
    transitions: Mutex<()>,
    clock: fn() -> i64,
}

impl IdentityStore {
    pub fn new(storage: Arc<dyn TokenStorage>) -> Self {
        Self::with_clock(storage, now_epoch_seconds)
    }

    /// Store whose expiry checks use `clock` (unix seconds).
    pub fn with_clock(storage: Arc<dyn TokenStorage>, clock: fn() -> i64) -> Self {
        let (tx, _rx) = watch::channel(IdentitySnapshot {
            version: 0,
            state: IdentityState::Resolving,
        });
        Self {
            storage,
            tx,
            transitions: Mutex::new(()),
            clock,
        }
    }

    /// Resolve the persisted token into the initial identity. Calls after the
    /// first resolution return the current snapshot unchanged.
    pub async fn init(&self) -> IdentitySnapshot {
        let _guard = self.transitions.lock().await;
        if self.tx.borrow().is_resolved() {
            return self.current();
        }
        let state = match self.storage.load(TOKEN_KEY).await {
            Ok(Some(token)) => match Identity::from_token(&token, (self.clock)()) {
                Ok(identity) => IdentityState::Authenticated(Session {
                    identity: Arc::new(identity),
                    token: Arc::from(token),
                }),
                Err(err) => {
                    tracing::warn!(error = %err, "persisted session token rejected");
                    self.discard_persisted().await;
                    IdentityState::Anonymous
                }
            },
            Ok(None) => IdentityState::Anonymous,
            Err(err) => {
                tracing::warn!(error = %err, "session storage unreadable");
                self.discard_persisted().await;
                IdentityState::Anonymous
            }
        };
        self.publish(state, "init")
    }

    /// Adopt `token` as the current session.
    ///
    /// # Errors
    /// - [`IdentityStoreError::Identity`] if the token does not decode into a
    ///   valid identity. The previous state is kept.
    /// - [`IdentityStoreError::Storage`] if persisting fails. Nothing is
    ///   published.
    pub async fn login(&self, token: &str) -> Result<Arc<Identity>, IdentityStoreError> {
        let token = token.trim();
        let _guard = self.transitions.lock().await;
        let identity = match Identity::from_token(token, (self.clock)()) {
            Ok(identity) => Arc::new(identity),
            Err(err) => {
                tracing::warn!(error = %err, "login rejected");
                return Err(err.into());
            }
        };
        self.storage.save(TOKEN_KEY, token).await?;
        self.publish(
            IdentityState::Authenticated(Session {
                identity: identity.clone(),
                token: Arc::from(token),
            }),
            "login",
        );
        tracing::info!(
            subject = identity.subject_label(),
            subject_id = identity.subject_id(),
            "identity established"
        );
        Ok(identity)
    }

    /// Clear the session. "No identity" is published even when erasing the
    /// persisted token fails; that failure is still returned.
    pub async fn logout(&self) -> Result<(), IdentityStoreError> {
        let _guard = self.transitions.lock().await;
        let removed = self.storage.remove(TOKEN_KEY).await;
        self.publish(IdentityState::Anonymous, "logout");
        if let Err(err) = &removed {
            tracing::error!(error = %err, "failed to erase session token");
        }
        removed.map_err(Into::into)
    }

    pub fn current(&self) -> IdentitySnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<IdentitySnapshot> {
        self.tx.subscribe()
    }

    /// Wait until `init()` (or a login) has resolved the identity.
    pub async fn wait_resolved(&self) -> IdentitySnapshot {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(IdentitySnapshot::is_resolved).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.current(),
        }
    }

    async fn discard_persisted(&self) {
        if let Err(err) = self.storage.remove(TOKEN_KEY).await {
            tracing::warn!(error = %err, "failed to clear persisted session token");
        }
    }

    fn publish(&self, state: IdentityState, transition: &'static str) -> IdentitySnapshot {
        let outcome = match &state {
            IdentityState::Authenticated(_) => "authenticated",
            _ => "anonymous",
        };
        self.tx.send_modify(|snapshot| {
            snapshot.version += 1;
            snapshot.state = state;
        });
        metrics::counter!(
            IDENTITY_TRANSITIONS_TOTAL,
            "transition" => transition,
            "outcome" => outcome
        )
        .increment(1);
        tracing::debug!(transition, outcome, "identity published");
        self.current()
    }
}

impl BearerSource for IdentityStore {
    fn bearer_token(&self) -> Option<Arc<str>> {
        self.tx.borrow().token().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lectern_authz::{ADMIN_CAPABILITY, Claims, ClaimsCodec};

    fn token_for(claims: &Claims) -> String {
        let key = jsonwebtoken::EncodingKey::from_secret(b"unit-test-secret");
        ClaimsCodec::encode(claims, &key).expect("encode")
    }

    fn ana_token() -> String {
        token_for(&Claims {
            id: Some(7),
            sub: Some("ana".to_string()),
            capabilities: Some(vec![ADMIN_CAPABILITY.to_string()]),
            ..Claims::default()
        })
    }

    struct FailingStorage;

    #[async_trait]
    impl TokenStorage for FailingStorage {
        async fn load(&self, _key: &str) -> StorageResult<Option<String>> {
            Err(io_failure())
        }
        async fn save(&self, _key: &str, _value: &str) -> StorageResult<()> {
            Err(io_failure())
        }
        async fn remove(&self, _key: &str) -> StorageResult<()> {
            Err(io_failure())
        }
    }

    fn io_failure() -> StorageError {
        StorageError::Io {
            path: "/dev/null/session.json".into(),
            source: std::io::Error::other("disk unavailable"),
        }
    }

    #[tokio::test]
    async fn starts_resolving_until_init() {
        let store = IdentityStore::new(Arc::new(MemoryTokenStorage::new()));
        let snapshot = store.current();
        assert_eq!(snapshot.version, 0);
        assert!(!snapshot.is_resolved());

        let snapshot = store.init().await;
        assert_eq!(snapshot.state, IdentityState::Anonymous);
        assert_eq!(snapshot.version, 1);
    }

    #[tokio::test]
    async fn init_rehydrates_valid_token() {
        let storage = Arc::new(MemoryTokenStorage::with_token(ana_token()));
        let store = IdentityStore::new(storage);
        let snapshot = store.init().await;
        let identity = snapshot.identity().expect("identity");
        assert_eq!(identity.subject_label(), "ana");
        assert!(identity.has_capability(ADMIN_CAPABILITY));
        assert_eq!(store.bearer_token().as_deref(), Some(ana_token().as_str()));
    }

    #[tokio::test]
    async fn init_fails_closed_on_garbage_and_clears_it() {
        let storage = Arc::new(MemoryTokenStorage::with_token("garbage"));
        let store = IdentityStore::new(storage.clone());
        let snapshot = store.init().await;
        assert_eq!(snapshot.state, IdentityState::Anonymous);
        assert_eq!(storage.load(TOKEN_KEY).await.expect("load"), None);
    }

    #[tokio::test]
    async fn init_fails_closed_on_missing_claim() {
        let token = token_for(&Claims {
            id: Some(7),
            sub: Some("ana".to_string()),
            ..Claims::default()
        });
        let storage = Arc::new(MemoryTokenStorage::with_token(token));
        let store = IdentityStore::new(storage.clone());
        assert_eq!(store.init().await.state, IdentityState::Anonymous);
        assert_eq!(storage.load(TOKEN_KEY).await.expect("load"), None);
    }

    #[tokio::test]
    async fn init_fails_closed_on_expired_token() {
        let token = token_for(&Claims {
            id: Some(7),
            sub: Some("ana".to_string()),
            capabilities: Some(vec![]),
            exp: Some(1_000),
            ..Claims::default()
        });
        let storage = Arc::new(MemoryTokenStorage::with_token(token));
        let store = IdentityStore::with_clock(storage, || 2_000);
        assert_eq!(store.init().await.state, IdentityState::Anonymous);
    }

    #[tokio::test]
    async fn init_fails_closed_on_storage_error() {
        let store = IdentityStore::new(Arc::new(FailingStorage));
        let snapshot = store.init().await;
        assert_eq!(snapshot.state, IdentityState::Anonymous);
    }

    #[tokio::test]
    async fn init_resolves_once() {
        let store = IdentityStore::new(Arc::new(MemoryTokenStorage::new()));
        let first = store.init().await;
        let second = store.init().await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn login_publishes_and_persists() {
        let storage = Arc::new(MemoryTokenStorage::new());
        let store = IdentityStore::new(storage.clone());
        store.init().await;
        let mut rx = store.subscribe();

        let identity = store.login(&ana_token()).await.expect("login");
        assert_eq!(identity.subject_id(), 7);
        assert!(rx.has_changed().expect("sender alive"));
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.identity().map(|i| i.subject_id()), Some(7));
        assert_eq!(
            storage.load(TOKEN_KEY).await.expect("load"),
            Some(ana_token())
        );
    }

    #[tokio::test]
    async fn failed_login_keeps_previous_state() {
        let storage = Arc::new(MemoryTokenStorage::new());
        let store = IdentityStore::new(storage.clone());
        store.init().await;
        store.login(&ana_token()).await.expect("login");
        let before = store.current();

        let err = store.login("a.b").await.expect_err("malformed");
        assert!(matches!(err, IdentityStoreError::Identity(_)));
        assert_eq!(store.current(), before);
        assert_eq!(
            storage.load(TOKEN_KEY).await.expect("load"),
            Some(ana_token())
        );
    }

    #[tokio::test]
    async fn login_storage_failure_publishes_nothing() {
        let store = IdentityStore::new(Arc::new(FailingStorage));
        store.init().await;
        let before = store.current();
        let err = store.login(&ana_token()).await.expect_err("storage");
        assert!(matches!(err, IdentityStoreError::Storage(_)));
        assert_eq!(store.current(), before);
    }

    #[tokio::test]
    async fn logout_clears_identity_and_token() {
        let storage = Arc::new(MemoryTokenStorage::with_token(ana_token()));
        let store = IdentityStore::new(storage.clone());
        store.init().await;
        store.logout().await.expect("logout");
        assert_eq!(store.current().state, IdentityState::Anonymous);
        assert_eq!(store.bearer_token(), None);
        assert_eq!(storage.load(TOKEN_KEY).await.expect("load"), None);
    }

    #[tokio::test]
    async fn logout_publishes_anonymous_even_when_storage_fails() {
        let store = IdentityStore::new(Arc::new(FailingStorage));
        store.init().await;
        let err = store.logout().await.expect_err("storage");
        assert!(matches!(err, IdentityStoreError::Storage(_)));
        assert_eq!(store.current().state, IdentityState::Anonymous);
    }

    #[tokio::test]
    async fn wait_resolved_completes_after_init() {
        let store = Arc::new(IdentityStore::new(Arc::new(MemoryTokenStorage::with_token(
            ana_token(),
        ))));
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.wait_resolved().await })
        };
        tokio::task::yield_now().await;
        store.init().await;
        let snapshot = waiter.await.expect("join");
        assert!(snapshot.is_resolved());
        assert!(snapshot.identity().is_some());
    }

    /// Memory storage that yields before every write, widening the gap
    /// between persisting and publishing.
    #[derive(Default)]
    struct YieldingStorage(MemoryTokenStorage);

    #[async_trait]
    impl TokenStorage for YieldingStorage {
        async fn load(&self, key: &str) -> StorageResult<Option<String>> {
            self.0.load(key).await
        }
        async fn save(&self, key: &str, value: &str) -> StorageResult<()> {
            tokio::task::yield_now().await;
            self.0.save(key, value).await
        }
        async fn remove(&self, key: &str) -> StorageResult<()> {
            tokio::task::yield_now().await;
            self.0.remove(key).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_transitions_keep_storage_and_snapshot_aligned() {
        let storage = Arc::new(YieldingStorage::default());
        let store = Arc::new(IdentityStore::new(storage.clone()));
        store.init().await;
        let tokens: Vec<String> = (1..=3)
            .map(|id| {
                token_for(&Claims {
                    id: Some(id),
                    sub: Some(format!("user-{id}")),
                    capabilities: Some(Vec::new()),
                    ..Claims::default()
                })
            })
            .collect();

        for _ in 0..200 {
            let mut tasks = Vec::new();
            for token in &tokens {
                let login = {
                    let store = store.clone();
                    let token = token.clone();
                    tokio::spawn(async move { store.login(&token).await.map(|_| ()) })
                };
                let logout = {
                    let store = store.clone();
                    tokio::spawn(async move { store.logout().await })
                };
                tasks.push(login);
                tasks.push(logout);
            }
            for task in tasks {
                task.await.expect("join").expect("transition");
            }

            let persisted = storage.load(TOKEN_KEY).await.expect("load");
            let snapshot = store.current();
            assert_eq!(persisted.as_deref(), snapshot.token().map(|token| &**token));
        }
    }
}
