use crate::cursor::{AuditCursor, AuditFilter};
use crate::event::AuditEvent;
use chrono::{DateTime, Utc};
use dcs_storage::{AuditEntry, AuditStore, Decision};
use dcs_types::{Action, Clock, DcsError, DcsResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

const DEFAULT_PAGE_SIZE: usize = 256;

/// Where the hash chain first fails verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    pub sequence: u64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub length: u64,
    pub head: Option<String>,
    pub first_break: Option<ChainBreak>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.first_break.is_none()
    }
}

/// Summary of a filtered view, by action kind and decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub total: u64,
    pub allowed: u64,
    pub denied: u64,
    pub by_action: BTreeMap<Action, u64>,
    pub first_at: Option<DateTime<Utc>>,
    pub last_at: Option<DateTime<Utc>>,
}

/// The shared append point for every component.
///
/// Constructed once at process start and closed at shutdown; after
/// [`AuditLedger::close`] every append fails, so no state change can slip
/// through unaudited while the process winds down.
pub struct AuditLedger {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    closed: AtomicBool,
    page_size: usize,
}

impl AuditLedger {
    pub fn new(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            closed: AtomicBool::new(false),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Append one entry.
    ///
    /// Fails only with [`DcsError::StorageUnavailable`]; callers must not
    /// commit the corresponding state change when it does.
    pub async fn append(&self, event: AuditEvent) -> DcsResult<AuditEntry> {
        if self.closed.load(Ordering::SeqCst) {
            error!(action = %event.action().as_str(), "audit ledger is closed");
            return Err(DcsError::StorageUnavailable("audit ledger is closed".into()));
        }
        let append = event.into_append(self.clock.now());
        match self.store.append_audit(append).await {
            Ok(entry) => {
                debug!(
                    sequence = entry.sequence,
                    action = entry.action.as_str(),
                    entity = %entry.entity,
                    decision = ?entry.decision,
                    "audit entry appended"
                );
                Ok(entry)
            }
            Err(err) => {
                error!(error = %err, "audit append failed");
                Err(DcsError::StorageUnavailable(err.to_string()))
            }
        }
    }

    /// Lazily iterate matching entries from the start of the chain.
    pub fn query(&self, filter: AuditFilter) -> AuditCursor {
        self.query_after(filter, 0)
    }

    /// Resume a query after a previously observed position.
    pub fn query_after(&self, filter: AuditFilter, after_sequence: u64) -> AuditCursor {
        AuditCursor::new(Arc::clone(&self.store), filter, after_sequence, self.page_size)
    }

    pub async fn len(&self) -> DcsResult<u64> {
        self.store
            .audit_len()
            .await
            .map_err(|e| DcsError::StorageUnavailable(e.to_string()))
    }

    pub async fn is_empty(&self) -> DcsResult<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn head(&self) -> DcsResult<Option<String>> {
        self.store
            .latest_audit_hash()
            .await
            .map_err(|e| DcsError::StorageUnavailable(e.to_string()))
    }

    /// Recompute the whole chain and report the first inconsistency.
    pub async fn verify_chain(&self) -> DcsResult<ChainReport> {
        let mut cursor = self.query(AuditFilter::default());
        let mut expected_sequence = 1u64;
        let mut previous: Option<String> = None;
        let mut first_break = None;

        while let Some(entry) = cursor.next().await? {
            if first_break.is_none() {
                first_break = check_link(&entry, expected_sequence, previous.as_deref());
            }
            expected_sequence = entry.sequence + 1;
            previous = Some(entry.entry_hash.clone());
        }

        let report = ChainReport {
            length: expected_sequence - 1,
            head: previous,
            first_break,
        };
        match &report.first_break {
            None => info!(length = report.length, "audit chain verified"),
            Some(b) => error!(sequence = b.sequence, reason = %b.reason, "audit chain broken"),
        }
        Ok(report)
    }

    pub async fn report(&self, filter: AuditFilter) -> DcsResult<AuditReport> {
        let mut cursor = self.query(filter);
        let mut report = AuditReport::default();
        while let Some(entry) = cursor.next().await? {
            report.total += 1;
            match entry.decision {
                Decision::Allow => report.allowed += 1,
                Decision::Deny => report.denied += 1,
            }
            *report.by_action.entry(entry.action).or_default() += 1;
            report.first_at.get_or_insert(entry.timestamp);
            report.last_at = Some(entry.timestamp);
        }
        Ok(report)
    }

    /// Refuse further appends.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("audit ledger closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub(crate) fn check_link(
    entry: &AuditEntry,
    expected_sequence: u64,
    previous: Option<&str>,
) -> Option<ChainBreak> {
    if entry.sequence != expected_sequence {
        return Some(ChainBreak {
            sequence: entry.sequence,
            reason: format!("expected sequence {expected_sequence}"),
        });
    }
    if entry.previous_hash.as_deref() != previous {
        return Some(ChainBreak {
            sequence: entry.sequence,
            reason: "previous hash does not match predecessor".into(),
        });
    }
    match entry.recompute_hash() {
        Ok(hash) if hash == entry.entry_hash => None,
        Ok(_) => Some(ChainBreak {
            sequence: entry.sequence,
            reason: "entry hash does not match content".into(),
        }),
        Err(err) => Some(ChainBreak {
            sequence: entry.sequence,
            reason: err.to_string(),
        }),
    }
}
