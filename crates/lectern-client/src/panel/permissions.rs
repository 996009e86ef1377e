// Permission catalogue administration.
use super::{Banner, MountSignal, PanelError, PanelResult};
use crate::api::{AuthorizationClient, NewPermission, Permission, PermissionPatch, RequestResult};
use crate::guard::View;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;

#[derive(Debug, Default)]
struct CatalogCache {
    permissions: Vec<Permission>,
    banner: Banner,
}

pub struct PermissionCatalogPanel {
    client: AuthorizationClient,
    mount: MountSignal,
    cache: Mutex<CatalogCache>,
}

impl PermissionCatalogPanel {
    pub fn new(client: AuthorizationClient) -> Self {
        Self {
            client,
            mount: MountSignal::new(),
            cache: Mutex::new(CatalogCache::default()),
        }
    }

    pub async fn refresh(&self) -> PanelResult<()> {
        let result = self.mount.run(self.client.list_permissions()).await;
        let mut cache = self.cache.lock();
        cache.banner.record(&result);
        cache.permissions = result?;
        cache.banner.clear();
        Ok(())
    }

    /// Create a permission. A blank namespace or display name is ignored.
    pub async fn create(&self, permission: NewPermission) -> PanelResult<Option<Permission>> {
        let namespace = permission.namespace.trim();
        let display_name = permission.display_name.trim();
        if namespace.is_empty() || display_name.is_empty() {
            return Ok(None);
        }
        let permission = NewPermission {
            namespace: namespace.to_string(),
            display_name: display_name.to_string(),
            description: permission
                .description
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty()),
        };
        let created = self
            .mutate(self.client.create_permission(&permission))
            .await?;
        Ok(Some(created))
    }

    pub async fn update(&self, id: i64, patch: PermissionPatch) -> PanelResult<Permission> {
        self.mutate(self.client.update_permission(id, &patch)).await
    }

    pub async fn delete(&self, id: i64) -> PanelResult<()> {
        self.mutate(self.client.delete_permission(id)).await
    }

    pub fn permissions(&self) -> Vec<Permission> {
        self.cache.lock().permissions.clone()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.cache
            .lock()
            .permissions
            .iter()
            .map(|permission| permission.namespace.clone())
            .collect()
    }

    pub fn last_error(&self) -> Option<String> {
        self.cache.lock().banner.message()
    }

    pub fn is_mounted(&self) -> bool {
        self.mount.is_mounted()
    }

    pub fn unmount(&self) {
        self.mount.unmount();
    }

    async fn mutate<T, F>(&self, request: F) -> PanelResult<T>
    where
        F: Future<Output = RequestResult<T>>,
    {
        let result = self.mount.run(request).await;
        self.cache.lock().banner.record(&result);
        let value = result?;
        self.refresh().await?;
        Ok(value)
    }
}

#[async_trait]
impl View for PermissionCatalogPanel {
    type Props = ();
    type Output = Result<Vec<Permission>, PanelError>;

    async fn render(&self, _props: ()) -> Self::Output {
        self.refresh().await?;
        Ok(self.permissions())
    }
}
