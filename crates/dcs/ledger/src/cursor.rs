use chrono::{DateTime, Utc};
use dcs_storage::{AuditEntry, AuditStore, Decision};
use dcs_types::{Action, ActorId, DcsError, DcsResult, EntityRef};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Audit query filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditFilter {
    pub actor: Option<ActorId>,
    pub entity: Option<EntityRef>,
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actions: Vec<Action>,
    pub decision: Option<Decision>,
}

impl AuditFilter {
    pub fn for_entity(entity: EntityRef) -> Self {
        Self {
            entity: Some(entity),
            ..Self::default()
        }
    }

    pub fn for_actor(actor: ActorId) -> Self {
        Self {
            actor: Some(actor),
            ..Self::default()
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.until = Some(until);
        self
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.actor.as_ref().map_or(true, |a| a == &entry.actor.id)
            && self.entity.as_ref().map_or(true, |e| e == &entry.entity)
            && self.from.map_or(true, |t| entry.timestamp >= t)
            && self.until.map_or(true, |t| entry.timestamp <= t)
            && (self.actions.is_empty() || self.actions.contains(&entry.action))
            && self.decision.map_or(true, |d| d == entry.decision)
    }
}

/// Lazy, restartable sequence of audit entries matching a filter.
///
/// Pages are pulled from storage on demand. [`AuditCursor::position`] is the
/// sequence of the last entry handed out; a new cursor started after that
/// position continues exactly where this one stopped.
pub struct AuditCursor {
    store: Arc<dyn AuditStore>,
    filter: AuditFilter,
    page_size: usize,
    fetched_through: u64,
    position: u64,
    buffer: VecDeque<AuditEntry>,
    exhausted: bool,
}

impl AuditCursor {
    pub(crate) fn new(
        store: Arc<dyn AuditStore>,
        filter: AuditFilter,
        after_sequence: u64,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            filter,
            page_size: page_size.max(1),
            fetched_through: after_sequence,
            position: after_sequence,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn filter(&self) -> &AuditFilter {
        &self.filter
    }

    pub async fn next(&mut self) -> DcsResult<Option<AuditEntry>> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                self.position = entry.sequence;
                return Ok(Some(entry));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fill().await?;
        }
    }

    async fn fill(&mut self) -> DcsResult<()> {
        let page = match &self.filter.entity {
            Some(entity) => {
                self.store
                    .audit_for_entity(&entity.key(), self.fetched_through, self.page_size)
                    .await
            }
            None => self.store.read_audit(self.fetched_through, self.page_size).await,
        }
        .map_err(|e| DcsError::StorageUnavailable(e.to_string()))?;

        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.fetched_through = last.sequence;
        }
        self.buffer
            .extend(page.into_iter().filter(|e| self.filter.matches(e)));
        Ok(())
    }

    /// Drain the remaining entries.
    pub async fn collect_all(mut self) -> DcsResult<Vec<AuditEntry>> {
        let mut out = Vec::new();
        while let Some(entry) = self.next().await? {
            out.push(entry);
        }
        Ok(out)
    }

    pub fn into_stream(self) -> impl Stream<Item = DcsResult<AuditEntry>> + Send {
        futures::stream::unfold(Some(self), |state| async move {
            let mut cursor = state?;
            match cursor.next().await {
                Ok(Some(entry)) => Some((Ok(entry), Some(cursor))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }
}
