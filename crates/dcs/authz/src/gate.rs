use crate::store::RoleStore;
use chrono::{DateTime, Duration, Utc};
use dcs_ledger::{AuditEvent, AuditLedger};
use dcs_types::{Action, Actor, ActorId, DcsError, DcsResult, EntityRef, Role};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

/// Upper bound on how long a resolved permission set may be reused.
pub const MAX_PERMISSION_TTL: std::time::Duration = std::time::Duration::from_secs(5);

const MAX_CACHED_ACTORS: usize = 10_000;

/// Proof that a check passed, naming the roles that granted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grant {
    pub actor: ActorId,
    pub action: Action,
    pub roles: Vec<Role>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleRevocation {
    pub role: Role,
    pub affected_actors: Vec<ActorId>,
    pub audit_sequence: u64,
}

#[derive(Clone)]
struct Resolved {
    by_role: Vec<(Role, BTreeSet<Action>)>,
    fetched_at: DateTime<Utc>,
}

impl Resolved {
    fn granting(&self, action: Action) -> Vec<Role> {
        self.by_role
            .iter()
            .filter(|(_, actions)| actions.contains(&action))
            .map(|(role, _)| role.clone())
            .collect()
    }
}

/// The single authorization gate.
///
/// Resolved permission sets are cached per actor for at most
/// [`MAX_PERMISSION_TTL`]; role changes made through the gate also drop the
/// affected cache entries at once.
pub struct AuthorizationGate {
    store: Arc<dyn RoleStore>,
    ledger: Arc<AuditLedger>,
    ttl: Duration,
    cache: RwLock<HashMap<ActorId, Resolved>>,
}

impl AuthorizationGate {
    pub fn new(store: Arc<dyn RoleStore>, ledger: Arc<AuditLedger>, ttl: std::time::Duration) -> Self {
        let ttl = ttl.min(MAX_PERMISSION_TTL);
        Self {
            store,
            ledger,
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::zero()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn RoleStore> {
        &self.store
    }

    async fn resolve(&self, actor: &ActorId) -> DcsResult<Resolved> {
        let now = self.ledger.now();
        if let Ok(cache) = self.cache.read() {
            if let Some(hit) = cache.get(actor) {
                if now - hit.fetched_at < self.ttl {
                    return Ok(hit.clone());
                }
            }
        }

        let roles = self.store.roles_of(actor).await?;
        let mut by_role = Vec::with_capacity(roles.len());
        for role in roles {
            let actions = self.store.permissions(&role).await?;
            by_role.push((role, actions));
        }
        let resolved = Resolved {
            by_role,
            fetched_at: now,
        };

        if let Ok(mut cache) = self.cache.write() {
            if cache.len() >= MAX_CACHED_ACTORS {
                cache.clear();
            }
            cache.insert(actor.clone(), resolved.clone());
        }
        Ok(resolved)
    }

    /// Check without recording anything.
    pub async fn check(&self, actor: &Actor, action: Action) -> DcsResult<Grant> {
        let resolved = self.resolve(&actor.id).await?;
        let roles = resolved.granting(action);
        if roles.is_empty() {
            return Err(DcsError::AuthorizationDenied(format!(
                "{} may not {}",
                actor.id,
                action.as_str()
            )));
        }
        Ok(Grant {
            actor: actor.id.clone(),
            action,
            roles,
        })
    }

    /// Check and audit a denial.
    ///
    /// A denied attempt is itself recorded; if that record cannot be written
    /// the caller sees `StorageUnavailable` instead of the denial.
    pub async fn authorize(&self, actor: &Actor, action: Action, entity: &EntityRef) -> DcsResult<Grant> {
        match self.check(actor, action).await {
            Ok(grant) => {
                debug!(actor = %actor, action = action.as_str(), entity = %entity, "authorized");
                Ok(grant)
            }
            Err(DcsError::AuthorizationDenied(reason)) => {
                warn!(actor = %actor, action = action.as_str(), entity = %entity, "authorization denied");
                self.ledger
                    .append(AuditEvent::deny(actor, action, entity.clone(), reason.clone()))
                    .await?;
                Err(DcsError::AuthorizationDenied(reason))
            }
            Err(other) => Err(other),
        }
    }

    pub async fn roles_of(&self, actor: &ActorId) -> DcsResult<BTreeSet<Role>> {
        let resolved = self.resolve(actor).await?;
        Ok(resolved.by_role.into_iter().map(|(role, _)| role).collect())
    }

    pub async fn holds_role(&self, actor: &ActorId, role: &Role) -> DcsResult<bool> {
        Ok(self.roles_of(actor).await?.contains(role))
    }

    /// Drop cached permission sets; `None` clears everything.
    pub fn invalidate(&self, actor: Option<&ActorId>) {
        if let Ok(mut cache) = self.cache.write() {
            match actor {
                Some(id) => {
                    cache.remove(id);
                }
                None => cache.clear(),
            }
        }
    }

    /// Grant `role` to `actor` on behalf of `by`.
    pub async fn assign(&self, actor: &ActorId, role: Role, by: &Actor) -> DcsResult<()> {
        let entity = EntityRef::Actor(actor.clone());
        self.authorize(by, Action::RoleAssign, &entity).await?;
        self.record_assignment(actor, role, by).await
    }

    /// Grant a configured assignment at start-up. Recorded under
    /// [`Actor::bootstrap`] without a permission check.
    pub async fn provision(&self, actor: &ActorId, role: Role) -> DcsResult<()> {
        self.record_assignment(actor, role, &Actor::bootstrap()).await
    }

    async fn record_assignment(&self, actor: &ActorId, role: Role, by: &Actor) -> DcsResult<()> {
        let entity = EntityRef::Actor(actor.clone());
        let entry = self
            .ledger
            .append(
                AuditEvent::allow(by, Action::RoleAssign, entity.clone())
                    .reason(format!("role {role} granted to {actor}"))
                    .evidence(serde_json::json!({ "role": role })),
            )
            .await?;
        if let Err(err) = self.store.assign(actor, role.clone()).await {
            self.abort(by, entity, Action::RoleAssign, entry.sequence, &err).await;
            return Err(err);
        }
        self.invalidate(Some(actor));
        info!(actor = %actor, role = %role, by = %by, "role assigned");
        Ok(())
    }

    /// Record that an audited role change never reached the store.
    async fn abort(&self, by: &Actor, entity: EntityRef, action: Action, sequence: u64, cause: &DcsError) {
        error!(entity = %entity, action = action.as_str(), sequence, error = %cause, "role change aborted after audit");
        let compensation = AuditEvent::deny(
            by,
            Action::CommitAborted,
            entity,
            format!("{} not persisted: {cause}", action.as_str()),
        )
        .evidence(serde_json::json!({ "aborted_sequence": sequence }));
        if let Err(err) = self.ledger.append(compensation).await {
            error!(error = %err, "compensating audit entry lost");
        }
    }

    /// Withdraw a role from everyone. Effective on the next check.
    ///
    /// The revocation is audited before the store changes; if the entry
    /// cannot be written, every holder keeps the role.
    pub async fn revoke_role(&self, role: &Role, by: &Actor) -> DcsResult<RoleRevocation> {
        let entity = EntityRef::Role(role.clone());
        self.authorize(by, Action::RoleRevoke, &entity).await?;

        let holders = self.store.holders(role).await?;
        let entry = self
            .ledger
            .append(
                AuditEvent::allow(by, Action::RoleRevoke, entity.clone())
                    .reason(format!("role {role} revoked"))
                    .evidence(serde_json::json!({ "affected_actors": holders })),
            )
            .await?;
        let affected_actors = match self.store.remove_role(role).await {
            Ok(affected) => affected,
            Err(err) => {
                self.abort(by, entity, Action::RoleRevoke, entry.sequence, &err).await;
                return Err(err);
            }
        };
        self.invalidate(None);

        info!(role = %role, affected = affected_actors.len(), "role revoked");
        Ok(RoleRevocation {
            role: role.clone(),
            affected_actors,
            audit_sequence: entry.sequence,
        })
    }

    /// Withdraw one role from one actor. Returns whether it was held.
    pub async fn revoke_assignment(&self, actor: &ActorId, role: &Role, by: &Actor) -> DcsResult<bool> {
        let entity = EntityRef::Actor(actor.clone());
        self.authorize(by, Action::RoleRevoke, &entity).await?;

        let held = self.store.roles_of(actor).await?.contains(role);
        let entry = self
            .ledger
            .append(
                AuditEvent::allow(by, Action::RoleRevoke, entity.clone())
                    .reason(format!("role {role} withdrawn from {actor}"))
                    .evidence(serde_json::json!({ "role": role, "was_assigned": held })),
            )
            .await?;
        let removed = match self.store.unassign(actor, role).await {
            Ok(removed) => removed,
            Err(err) => {
                self.abort(by, entity, Action::RoleRevoke, entry.sequence, &err).await;
                return Err(err);
            }
        };
        self.invalidate(Some(actor));
        info!(actor = %actor, role = %role, removed, "role assignment revoked");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles;
    use crate::store::InMemoryRoleStore;
    use dcs_ledger::AuditFilter;
    use dcs_storage::{Decision, InMemoryDcsStorage};
    use dcs_types::{ContractId, ManualClock};

    struct Fixture {
        clock: Arc<ManualClock>,
        storage: Arc<InMemoryDcsStorage>,
        store: Arc<InMemoryRoleStore>,
        ledger: Arc<AuditLedger>,
        gate: AuthorizationGate,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let storage = Arc::new(InMemoryDcsStorage::new());
        let ledger = Arc::new(AuditLedger::new(storage.clone(), clock.clone()));
        let store = Arc::new(InMemoryRoleStore::with_standard_roles());
        store
            .assign(&ActorId::new("alice"), Role::new(roles::CONTRACT_CREATOR))
            .await
            .unwrap();
        store
            .assign(&ActorId::new("root"), Role::new(roles::SECURITY_ADMINISTRATOR))
            .await
            .unwrap();
        let gate = AuthorizationGate::new(store.clone(), ledger.clone(), std::time::Duration::from_secs(2));
        Fixture {
            clock,
            storage,
            store,
            ledger,
            gate,
        }
    }

    fn contract() -> EntityRef {
        EntityRef::Contract(ContractId::new("c-1"))
    }

    #[tokio::test]
    async fn grant_names_the_granting_role() {
        let f = fixture().await;
        let grant = f
            .gate
            .authorize(&Actor::human("alice"), Action::ContractCreate, &contract())
            .await
            .unwrap();
        assert_eq!(grant.roles, vec![Role::new(roles::CONTRACT_CREATOR)]);
    }

    #[tokio::test]
    async fn denial_is_audited() {
        let f = fixture().await;
        let err = f
            .gate
            .authorize(&Actor::human("alice"), Action::ContractApprove, &contract())
            .await
            .unwrap_err();
        assert!(matches!(err, DcsError::AuthorizationDenied(_)));

        let entries = f.ledger.query(AuditFilter::default()).collect_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].decision, Decision::Deny);
        assert_eq!(entries[0].action, Action::ContractApprove);
    }

    #[tokio::test]
    async fn out_of_band_change_is_seen_after_ttl() {
        let f = fixture().await;
        let alice = Actor::human("alice");
        f.gate.check(&alice, Action::ContractCreate).await.unwrap();

        f.store
            .unassign(&alice.id, &Role::new(roles::CONTRACT_CREATOR))
            .await
            .unwrap();
        // Within the TTL the cached set may still be used.
        assert!(f.gate.check(&alice, Action::ContractCreate).await.is_ok());

        f.clock.advance(Duration::seconds(3));
        assert!(f.gate.check(&alice, Action::ContractCreate).await.is_err());
    }

    #[tokio::test]
    async fn role_revocation_through_gate_is_immediate() {
        let f = fixture().await;
        let alice = Actor::human("alice");
        f.gate.check(&alice, Action::ContractCreate).await.unwrap();

        let revocation = f
            .gate
            .revoke_role(&Role::new(roles::CONTRACT_CREATOR), &Actor::human("root"))
            .await
            .unwrap();
        assert_eq!(revocation.affected_actors, vec![ActorId::new("alice")]);
        assert!(f.gate.check(&alice, Action::ContractCreate).await.is_err());
    }

    #[tokio::test]
    async fn revoking_requires_permission() {
        let f = fixture().await;
        let err = f
            .gate
            .revoke_assignment(
                &ActorId::new("root"),
                &Role::new(roles::SECURITY_ADMINISTRATOR),
                &Actor::human("alice"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DcsError::AuthorizationDenied(_)));
        assert!(f
            .gate
            .holds_role(&ActorId::new("root"), &Role::new(roles::SECURITY_ADMINISTRATOR))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn assignment_is_audited_and_gated() {
        let f = fixture().await;
        let bob = ActorId::new("bob");
        let signer = Role::new(roles::CONTRACT_SIGNER);

        let err = f
            .gate
            .assign(&bob, signer.clone(), &Actor::human("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, DcsError::AuthorizationDenied(_)));
        assert!(!f.gate.holds_role(&bob, &signer).await.unwrap());

        f.gate.assign(&bob, signer.clone(), &Actor::human("root")).await.unwrap();
        assert!(f.gate.holds_role(&bob, &signer).await.unwrap());

        let grants = f
            .ledger
            .query(AuditFilter::default().with_action(Action::RoleAssign))
            .collect_all()
            .await
            .unwrap();
        let decisions: Vec<_> = grants.iter().map(|e| e.decision).collect();
        assert_eq!(decisions, vec![Decision::Deny, Decision::Allow]);
        assert_eq!(grants[1].actor.id, ActorId::new("root"));
    }

    #[tokio::test]
    async fn provisioning_is_recorded_under_bootstrap() {
        let f = fixture().await;
        f.gate
            .provision(&ActorId::new("carol"), Role::new(roles::AUDITOR))
            .await
            .unwrap();
        let entries = f.ledger.query(AuditFilter::default()).collect_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, Action::RoleAssign);
        assert_eq!(entries[0].actor, Actor::bootstrap());
    }

    #[tokio::test]
    async fn unrecorded_role_changes_do_not_happen() {
        let f = fixture().await;
        let root = Actor::human("root");
        let alice = ActorId::new("alice");
        let creator = Role::new(roles::CONTRACT_CREATOR);
        f.storage.fail_audit_appends(true);

        let err = f.gate.revoke_role(&creator, &root).await.unwrap_err();
        assert!(matches!(err, DcsError::StorageUnavailable(_)));
        assert!(f.gate.holds_role(&alice, &creator).await.unwrap());
        assert!(f
            .gate
            .check(&Actor::human("alice"), Action::ContractCreate)
            .await
            .is_ok());

        let err = f.gate.revoke_assignment(&alice, &creator, &root).await.unwrap_err();
        assert!(matches!(err, DcsError::StorageUnavailable(_)));
        assert!(f.store.roles_of(&alice).await.unwrap().contains(&creator));

        let err = f
            .gate
            .provision(&ActorId::new("mallory"), Role::new(roles::AUDITOR))
            .await
            .unwrap_err();
        assert!(matches!(err, DcsError::StorageUnavailable(_)));
        assert!(f.store.roles_of(&ActorId::new("mallory")).await.unwrap().is_empty());

        f.storage.fail_audit_appends(false);
        assert!(f.ledger.query(AuditFilter::default()).collect_all().await.unwrap().is_empty());
    }

    #[test]
    fn ttl_is_capped() {
        let clock = Arc::new(ManualClock::default());
        let ledger = Arc::new(AuditLedger::new(Arc::new(InMemoryDcsStorage::new()), clock));
        let gate = AuthorizationGate::new(
            Arc::new(InMemoryRoleStore::new()),
            ledger,
            std::time::Duration::from_secs(3600),
        );
        assert_eq!(gate.ttl, Duration::from_std(MAX_PERMISSION_TTL).unwrap());
    }
}
