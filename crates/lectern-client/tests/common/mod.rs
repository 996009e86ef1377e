#![allow(dead_code)]
use lectern_client::identity::{IdentityStore, MemoryTokenStorage};
use lectern_client::{AuthorizationClient, HistoryNavigator};
use lectern_test_harness::{PolicyService, TestServer, build_test_client, spawn_router};
use std::sync::Arc;

pub struct Fixture {
    pub service: Arc<PolicyService>,
    pub server: TestServer,
    pub store: Arc<IdentityStore>,
    pub client: AuthorizationClient,
    pub navigator: Arc<HistoryNavigator>,
}

impl Fixture {
    /// Seeded service, resolved store with no identity.
    pub async fn anonymous() -> Fixture {
        let service = Arc::new(PolicyService::seeded().await.expect("seed"));
        let server = spawn_router(service.router()).await.expect("spawn");
        let store = Arc::new(IdentityStore::new(Arc::new(MemoryTokenStorage::new())));
        store.init().await;
        let http = build_test_client().expect("http client");
        let client = AuthorizationClient::with_http(http, &server.base_url(), store.clone());
        Fixture {
            service,
            server,
            store,
            client,
            navigator: Arc::new(HistoryNavigator::new()),
        }
    }

    /// Seeded service with `username` logged in.
    pub async fn signed_in(username: &str) -> Fixture {
        let fixture = Self::anonymous().await;
        let token = fixture.service.token_for(username).await.expect("token");
        fixture.store.login(&token).await.expect("login");
        fixture
    }
}
