use crate::roles;
use async_trait::async_trait;
use dcs_types::{Action, ActorId, DcsError, DcsResult, Role};
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

/// Source of the current role mapping and user assignments.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Capability set of a role; empty for an unknown role.
    async fn permissions(&self, role: &Role) -> DcsResult<BTreeSet<Action>>;

    async fn roles_of(&self, actor: &ActorId) -> DcsResult<BTreeSet<Role>>;

    /// Actors currently assigned `role`, sorted.
    async fn holders(&self, role: &Role) -> DcsResult<Vec<ActorId>>;

    async fn define_role(&self, role: Role, actions: BTreeSet<Action>) -> DcsResult<()>;

    /// Remove a role definition and every assignment of it.
    async fn remove_role(&self, role: &Role) -> DcsResult<Vec<ActorId>>;

    async fn assign(&self, actor: &ActorId, role: Role) -> DcsResult<()>;

    async fn unassign(&self, actor: &ActorId, role: &Role) -> DcsResult<bool>;
}

#[derive(Default)]
pub struct InMemoryRoleStore {
    roles: RwLock<HashMap<Role, BTreeSet<Action>>>,
    assignments: RwLock<HashMap<ActorId, BTreeSet<Role>>>,
}

impl InMemoryRoleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store preloaded with [`roles::standard_roles`].
    pub fn with_standard_roles() -> Self {
        let store = Self::new();
        if let Ok(mut guard) = store.roles.write() {
            guard.extend(roles::standard_roles());
        }
        store
    }
}

#[async_trait]
impl RoleStore for InMemoryRoleStore {
    async fn permissions(&self, role: &Role) -> DcsResult<BTreeSet<Action>> {
        let guard = self
            .roles
            .read()
            .map_err(|_| DcsError::StorageUnavailable("roles lock poisoned".into()))?;
        Ok(guard.get(role).cloned().unwrap_or_default())
    }

    async fn roles_of(&self, actor: &ActorId) -> DcsResult<BTreeSet<Role>> {
        let guard = self
            .assignments
            .read()
            .map_err(|_| DcsError::StorageUnavailable("assignments lock poisoned".into()))?;
        Ok(guard.get(actor).cloned().unwrap_or_default())
    }

    async fn holders(&self, role: &Role) -> DcsResult<Vec<ActorId>> {
        let guard = self
            .assignments
            .read()
            .map_err(|_| DcsError::StorageUnavailable("assignments lock poisoned".into()))?;
        let mut holders: Vec<ActorId> = guard
            .iter()
            .filter(|(_, held)| held.contains(role))
            .map(|(actor, _)| actor.clone())
            .collect();
        holders.sort();
        Ok(holders)
    }

    async fn define_role(&self, role: Role, actions: BTreeSet<Action>) -> DcsResult<()> {
        let mut guard = self
            .roles
            .write()
            .map_err(|_| DcsError::StorageUnavailable("roles lock poisoned".into()))?;
        guard.insert(role, actions);
        Ok(())
    }

    async fn remove_role(&self, role: &Role) -> DcsResult<Vec<ActorId>> {
        {
            let mut guard = self
                .roles
                .write()
                .map_err(|_| DcsError::StorageUnavailable("roles lock poisoned".into()))?;
            guard.remove(role);
        }
        let mut guard = self
            .assignments
            .write()
            .map_err(|_| DcsError::StorageUnavailable("assignments lock poisoned".into()))?;
        let mut affected = Vec::new();
        for (actor, held) in guard.iter_mut() {
            if held.remove(role) {
                affected.push(actor.clone());
            }
        }
        affected.sort();
        Ok(affected)
    }

    async fn assign(&self, actor: &ActorId, role: Role) -> DcsResult<()> {
        let mut guard = self
            .assignments
            .write()
            .map_err(|_| DcsError::StorageUnavailable("assignments lock poisoned".into()))?;
        guard.entry(actor.clone()).or_default().insert(role);
        Ok(())
    }

    async fn unassign(&self, actor: &ActorId, role: &Role) -> DcsResult<bool> {
        let mut guard = self
            .assignments
            .write()
            .map_err(|_| DcsError::StorageUnavailable("assignments lock poisoned".into()))?;
        Ok(guard.get_mut(actor).is_some_and(|held| held.remove(role)))
    }
}
