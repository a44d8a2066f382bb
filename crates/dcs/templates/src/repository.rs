use async_trait::async_trait;
use dcs_authz::AuthorizationGate;
use dcs_ledger::{AuditEvent, AuditLedger};
use dcs_storage::{QueryWindow, TemplateQuery, TemplateStore};
use dcs_types::{
    Action, Actor, ContentHash, DcsError, DcsResult, EntityRef, KeyedLocks, Provenance,
    ReviewDecision, ReviewNote, Template, TemplateId, TemplateRef, TemplateStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Supplies templates to the contract engine.
#[async_trait]
pub trait TemplateSource: Send + Sync {
    async fn resolve(&self, reference: &TemplateRef) -> DcsResult<Option<Template>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTemplate {
    /// Chosen id; generated when absent.
    #[serde(default)]
    pub id: Option<TemplateId>,
    pub name: String,
    pub schema_ref: String,
    pub body: Value,
}

pub struct TemplateRepository {
    store: Arc<dyn TemplateStore>,
    gate: Arc<AuthorizationGate>,
    ledger: Arc<AuditLedger>,
    locks: KeyedLocks<TemplateId>,
}

impl TemplateRepository {
    pub fn new(store: Arc<dyn TemplateStore>, gate: Arc<AuthorizationGate>, ledger: Arc<AuditLedger>) -> Self {
        Self {
            store,
            gate,
            ledger,
            locks: KeyedLocks::new(),
        }
    }

    pub fn prune_locks(&self) -> usize {
        self.locks.prune_idle()
    }

    #[instrument(skip(self, new), fields(actor = %actor, name = %new.name))]
    pub async fn create(&self, actor: &Actor, new: NewTemplate) -> DcsResult<Template> {
        let id = new.id.unwrap_or_else(TemplateId::generate);
        let entity = EntityRef::Template(id.clone());
        self.gate.authorize(actor, Action::TemplateCreate, &entity).await?;
        if new.name.trim().is_empty() {
            return Err(DcsError::InvalidInput("template name is required".into()));
        }

        let _guard = self.locks.lock(&id).await;
        if self.store.latest_template(&id).await?.is_some() {
            return Err(DcsError::InvalidInput(format!("template {id} already exists")));
        }

        let now = self.ledger.now();
        let template = Template {
            id: id.clone(),
            version: 1,
            name: new.name,
            schema_ref: new.schema_ref,
            content_hash: ContentHash::of_json(&new.body)?,
            body: new.body,
            status: TemplateStatus::Draft,
            provenance: Provenance {
                creator: actor.id.clone(),
                contributors: vec![actor.id.clone()],
                created_at: now,
                updated_at: now,
            },
            reviews: Vec::new(),
        };

        self.ledger
            .append(
                AuditEvent::allow(actor, Action::TemplateCreate, entity)
                    .transition("none", TemplateStatus::Draft)
                    .content_hash(template.content_hash.clone())
                    .evidence(serde_json::json!({ "version": 1 })),
            )
            .await?;
        self.store.insert_template_version(template.clone()).await?;
        info!(template = %template.reference(), "template created");
        Ok(template)
    }

    /// Produce a new version with `body`. The new version starts over in Draft.
    #[instrument(skip(self, body), fields(actor = %actor))]
    pub async fn update(&self, actor: &Actor, id: &TemplateId, body: Value) -> DcsResult<Template> {
        let entity = EntityRef::Template(id.clone());
        self.gate.authorize(actor, Action::TemplateUpdate, &entity).await?;

        let _guard = self.locks.lock(id).await;
        let latest = self.require_latest(id).await?;
        if latest.status == TemplateStatus::Deprecated {
            return self
                .deny(actor, Action::TemplateUpdate, &latest, "template is deprecated")
                .await;
        }

        let now = self.ledger.now();
        let mut contributors = latest.provenance.contributors.clone();
        if !contributors.contains(&actor.id) {
            contributors.push(actor.id.clone());
        }
        let template = Template {
            id: id.clone(),
            version: latest.version + 1,
            name: latest.name.clone(),
            schema_ref: latest.schema_ref.clone(),
            content_hash: ContentHash::of_json(&body)?,
            body,
            status: TemplateStatus::Draft,
            provenance: Provenance {
                creator: latest.provenance.creator.clone(),
                contributors,
                created_at: latest.provenance.created_at,
                updated_at: now,
            },
            reviews: Vec::new(),
        };

        self.ledger
            .append(
                AuditEvent::allow(actor, Action::TemplateUpdate, entity)
                    .transition(latest.status, TemplateStatus::Draft)
                    .content_hash(template.content_hash.clone())
                    .evidence(serde_json::json!({
                        "from_version": latest.version,
                        "version": template.version,
                    })),
            )
            .await?;
        self.store.insert_template_version(template.clone()).await?;
        info!(template = %template.reference(), "template version created");
        Ok(template)
    }

    pub async fn submit_for_review(&self, actor: &Actor, id: &TemplateId) -> DcsResult<Template> {
        self.change_status(
            actor,
            id,
            Action::TemplateSubmit,
            &[TemplateStatus::Draft],
            TemplateStatus::UnderReview,
            None,
        )
        .await
    }

    pub async fn approve(&self, actor: &Actor, id: &TemplateId, notes: Option<String>) -> DcsResult<Template> {
        self.change_status(
            actor,
            id,
            Action::TemplateApprove,
            &[TemplateStatus::UnderReview],
            TemplateStatus::Approved,
            Some((ReviewDecision::Approved, notes)),
        )
        .await
    }

    /// Send a version under review back to Draft. A reason is required.
    pub async fn reject(&self, actor: &Actor, id: &TemplateId, reason: &str) -> DcsResult<Template> {
        if reason.trim().is_empty() {
            return Err(DcsError::InvalidInput("a rejection reason is required".into()));
        }
        self.change_status(
            actor,
            id,
            Action::TemplateReject,
            &[TemplateStatus::UnderReview],
            TemplateStatus::Draft,
            Some((ReviewDecision::Rejected, Some(reason.to_string()))),
        )
        .await
    }

    /// Soft-disable the latest version. Existing contracts keep their reference.
    pub async fn deprecate(&self, actor: &Actor, id: &TemplateId) -> DcsResult<Template> {
        self.change_status(
            actor,
            id,
            Action::TemplateDeprecate,
            &[TemplateStatus::Draft, TemplateStatus::UnderReview, TemplateStatus::Approved],
            TemplateStatus::Deprecated,
            None,
        )
        .await
    }

    async fn change_status(
        &self,
        actor: &Actor,
        id: &TemplateId,
        action: Action,
        from: &[TemplateStatus],
        to: TemplateStatus,
        review: Option<(ReviewDecision, Option<String>)>,
    ) -> DcsResult<Template> {
        let entity = EntityRef::Template(id.clone());
        self.gate.authorize(actor, action, &entity).await?;

        let _guard = self.locks.lock(id).await;
        let mut template = self.require_latest(id).await?;
        if !from.contains(&template.status) {
            let reason = format!("cannot {} a {} template", action.as_str(), template.status);
            return self.deny(actor, action, &template, &reason).await;
        }

        let prior = template.status;
        let now = self.ledger.now();
        template.status = to;
        template.provenance.updated_at = now;
        let reason = review.as_ref().and_then(|(_, n)| n.clone());
        if let Some((decision, notes)) = review {
            template.reviews.push(ReviewNote {
                reviewer: actor.id.clone(),
                decision,
                notes,
                at: now,
            });
        }

        let mut event = AuditEvent::allow(actor, action, entity)
            .transition(prior, to)
            .content_hash(template.content_hash.clone())
            .evidence(serde_json::json!({ "version": template.version }));
        if let Some(reason) = reason {
            event = event.reason(reason);
        }
        self.ledger.append(event).await?;
        self.store.update_template_status(template.clone()).await?;
        info!(template = %template.reference(), from = %prior, to = %to, "template status changed");
        Ok(template)
    }

    async fn deny(&self, actor: &Actor, action: Action, template: &Template, reason: &str) -> DcsResult<Template> {
        warn!(template = %template.reference(), action = action.as_str(), reason, "template change denied");
        self.ledger
            .append(
                AuditEvent::deny(actor, action, EntityRef::Template(template.id.clone()), reason)
                    .at_state(template.status),
            )
            .await?;
        Err(DcsError::InvalidTemplateState(reason.to_string()))
    }

    async fn require_latest(&self, id: &TemplateId) -> DcsResult<Template> {
        self.store
            .latest_template(id)
            .await?
            .ok_or_else(|| DcsError::NotFound(format!("template {id}")))
    }

    pub async fn get(&self, actor: &Actor, id: &TemplateId, version: u32) -> DcsResult<Template> {
        self.gate
            .authorize(actor, Action::TemplateRead, &EntityRef::Template(id.clone()))
            .await?;
        self.store
            .get_template(id, version)
            .await?
            .ok_or_else(|| DcsError::NotFound(format!("template {id}@v{version}")))
    }

    pub async fn latest(&self, actor: &Actor, id: &TemplateId) -> DcsResult<Template> {
        self.gate
            .authorize(actor, Action::TemplateRead, &EntityRef::Template(id.clone()))
            .await?;
        self.require_latest(id).await
    }

    pub async fn history(&self, actor: &Actor, id: &TemplateId) -> DcsResult<Vec<Template>> {
        self.gate
            .authorize(actor, Action::TemplateRead, &EntityRef::Template(id.clone()))
            .await?;
        Ok(self.store.template_history(id).await?)
    }

    pub async fn search(&self, actor: &Actor, query: &TemplateQuery, window: QueryWindow) -> DcsResult<Vec<Template>> {
        self.gate
            .check(actor, Action::TemplateRead)
            .await?;
        Ok(self.store.list_templates(query, window).await?)
    }
}

#[async_trait]
impl TemplateSource for TemplateRepository {
    async fn resolve(&self, reference: &TemplateRef) -> DcsResult<Option<Template>> {
        Ok(self
            .store
            .get_template(&reference.template_id, reference.version)
            .await?)
    }
}
