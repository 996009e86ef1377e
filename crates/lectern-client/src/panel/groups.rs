// Policy-group administration: groups, each annotated with the permissions
// granted to it.
use super::{Banner, MountSignal, PanelError, PanelResult};
use crate::api::{AuthorizationClient, GroupPermission, PolicyGroup, PolicyGroupInput, RelationChange};
use crate::guard::View;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRow {
    pub group: PolicyGroup,
    pub permissions: BTreeSet<String>,
}

/// Namespaces granted to `group_name` according to `relations`.
pub fn permissions_for(relations: &[GroupPermission], group_name: &str) -> BTreeSet<String> {
    relations
        .iter()
        .filter(|relation| relation.group_name == group_name)
        .map(|relation| relation.permission_namespace.clone())
        .collect()
}

#[derive(Debug, Default)]
struct GroupCache {
    groups: Vec<PolicyGroup>,
    relations: Vec<GroupPermission>,
    banner: Banner,
    issued: u64,
    applied: u64,
}

impl GroupCache {
    /// Reserve a generation for a refresh about to be sent.
    fn begin(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    /// Store the outcome of refresh `generation`. Outcomes older than the
    /// last applied refresh leave the cache and banner alone.
    fn apply(
        &mut self,
        generation: u64,
        result: PanelResult<(Vec<PolicyGroup>, Vec<GroupPermission>)>,
    ) -> PanelResult<()> {
        if generation <= self.applied {
            return result.map(|_| ());
        }
        self.banner.record(&result);
        let (groups, relations) = result?;
        self.groups = groups;
        self.relations = relations;
        self.applied = generation;
        self.banner.clear();
        Ok(())
    }
}

pub struct PolicyGroupPanel {
    client: AuthorizationClient,
    mount: MountSignal,
    cache: Mutex<GroupCache>,
}

impl PolicyGroupPanel {
    pub fn new(client: AuthorizationClient) -> Self {
        Self {
            client,
            mount: MountSignal::new(),
            cache: Mutex::new(GroupCache::default()),
        }
    }

    /// Refetch groups and relations. The cache is replaced only if both
    /// fetches succeed and no later refresh has landed already.
    pub async fn refresh(&self) -> PanelResult<()> {
        let generation = self.cache.lock().begin();
        let result = self
            .mount
            .run(async {
                tokio::try_join!(
                    self.client.list_policy_groups(),
                    self.client.list_group_permission_relations()
                )
            })
            .await;
        self.cache.lock().apply(generation, result)
    }

    /// Create a group. A blank name is ignored and returns `Ok(None)`.
    pub async fn add_group(&self, name: &str) -> PanelResult<Option<PolicyGroup>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        let input = PolicyGroupInput {
            name: name.to_string(),
        };
        let created = self.mutate(self.client.create_policy_group(&input)).await?;
        Ok(Some(created))
    }

    /// Rename a group. A blank name is ignored and returns `Ok(None)`.
    pub async fn rename_group(&self, id: i64, name: &str) -> PanelResult<Option<PolicyGroup>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        let input = PolicyGroupInput {
            name: name.to_string(),
        };
        let updated = self
            .mutate(self.client.update_policy_group(id, &input))
            .await?;
        Ok(Some(updated))
    }

    pub async fn delete_group(&self, id: i64) -> PanelResult<()> {
        self.mutate(self.client.delete_policy_group(id)).await
    }

    /// Grant `permission_namespace` to `group_name`. Blank input is ignored
    /// and reported as [`RelationChange::Unchanged`].
    pub async fn grant(
        &self,
        group_name: &str,
        permission_namespace: &str,
    ) -> PanelResult<RelationChange> {
        let (group_name, permission_namespace) = (group_name.trim(), permission_namespace.trim());
        if group_name.is_empty() || permission_namespace.is_empty() {
            return Ok(RelationChange::Unchanged);
        }
        let relation = GroupPermission::new(group_name, permission_namespace);
        self.mutate(self.client.grant_permission_to_group(&relation))
            .await
    }

    pub async fn revoke(
        &self,
        group_name: &str,
        permission_namespace: &str,
    ) -> PanelResult<RelationChange> {
        let (group_name, permission_namespace) = (group_name.trim(), permission_namespace.trim());
        if group_name.is_empty() || permission_namespace.is_empty() {
            return Ok(RelationChange::Unchanged);
        }
        self.mutate(
            self.client
                .revoke_permission_from_group(group_name, permission_namespace),
        )
        .await
    }

    pub fn groups(&self) -> Vec<PolicyGroup> {
        self.cache.lock().groups.clone()
    }

    pub fn relations(&self) -> Vec<GroupPermission> {
        self.cache.lock().relations.clone()
    }

    pub fn permissions_for(&self, group_name: &str) -> BTreeSet<String> {
        permissions_for(&self.cache.lock().relations, group_name)
    }

    pub fn rows(&self) -> Vec<GroupRow> {
        let cache = self.cache.lock();
        cache
            .groups
            .iter()
            .map(|group| GroupRow {
                group: group.clone(),
                permissions: permissions_for(&cache.relations, &group.name),
            })
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
        F: std::future::Future<Output = crate::api::RequestResult<T>>,
    {
        let result = self.mount.run(request).await;
        self.cache.lock().banner.record(&result);
        let value = result?;
        self.refresh().await?;
        Ok(value)
    }
}

#[async_trait]
impl View for PolicyGroupPanel {
    type Props = ();
    type Output = Result<Vec<GroupRow>, PanelError>;

    async fn render(&self, _props: ()) -> Self::Output {
        self.refresh().await?;
        Ok(self.rows())
    }
}
