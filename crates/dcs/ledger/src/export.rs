use crate::cursor::AuditFilter;
use crate::event::AuditEvent;
use crate::ledger::AuditLedger;
use chrono::{DateTime, Utc};
use dcs_storage::AuditEntry;
use dcs_types::{Action, Actor, ContentHash, DcsError, DcsResult, EntityRef};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const BUNDLE_FORMAT_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// One JSON document carrying the filter and chain anchors.
    Json,
    /// One entry per line.
    JsonLines,
}

/// Self-describing export for external compliance tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditBundle {
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    pub filter: AuditFilter,
    /// Chain head at export time.
    pub chain_head: Option<String>,
    pub entries: Vec<AuditEntry>,
}

#[derive(Debug, Clone)]
pub struct ExportedAudit {
    pub format: ExportFormat,
    pub body: String,
    pub entry_count: usize,
    pub body_hash: ContentHash,
    /// Sequence of the entry recording this export.
    pub export_sequence: u64,
}

#[derive(Debug, Clone)]
pub struct ImportedAudit {
    pub entries: Vec<AuditEntry>,
    pub chain_head: Option<String>,
}

impl AuditLedger {
    /// Serialize a filtered view. The export is itself recorded, and fails if
    /// that record cannot be written.
    pub async fn export(
        &self,
        filter: AuditFilter,
        format: ExportFormat,
        actor: &Actor,
    ) -> DcsResult<ExportedAudit> {
        let chain_head = self.head().await?;
        let entries = self.query(filter.clone()).collect_all().await?;
        let entry_count = entries.len();

        let body = match format {
            ExportFormat::Json => {
                let bundle = AuditBundle {
                    format_version: BUNDLE_FORMAT_VERSION,
                    exported_at: self.now(),
                    filter: filter.clone(),
                    chain_head,
                    entries,
                };
                serde_json::to_string_pretty(&bundle)
                    .map_err(|e| DcsError::InvalidInput(e.to_string()))?
            }
            ExportFormat::JsonLines => {
                let mut out = String::new();
                for entry in &entries {
                    let line = serde_json::to_string(entry)
                        .map_err(|e| DcsError::InvalidInput(e.to_string()))?;
                    out.push_str(&line);
                    out.push('\n');
                }
                out
            }
        };
        let body_hash = ContentHash::of_bytes(body.as_bytes());

        let filter_json =
            serde_json::to_value(&filter).map_err(|e| DcsError::InvalidInput(e.to_string()))?;
        let recorded = self
            .append(
                AuditEvent::allow(actor, Action::AuditExport, EntityRef::Ledger)
                    .content_hash(body_hash.clone())
                    .evidence(serde_json::json!({
                        "format": format,
                        "entries": entry_count,
                        "filter": filter_json,
                    })),
            )
            .await?;

        info!(
            actor = %actor,
            entries = entry_count,
            sequence = recorded.sequence,
            "audit export recorded"
        );
        Ok(ExportedAudit {
            format,
            body,
            entry_count,
            body_hash,
            export_sequence: recorded.sequence,
        })
    }

    /// Parse and re-verify an export for offline review.
    ///
    /// Sequence order must be strictly increasing, every entry hash must
    /// match its content, and adjacent sequences must link. A filtered
    /// export may skip sequences; links are only checked across adjacent
    /// ones.
    pub fn import(body: &str, format: ExportFormat) -> DcsResult<ImportedAudit> {
        let (entries, chain_head) = match format {
            ExportFormat::Json => {
                let bundle: AuditBundle = serde_json::from_str(body)
                    .map_err(|e| DcsError::InvalidInput(format!("audit bundle: {e}")))?;
                if bundle.format_version != BUNDLE_FORMAT_VERSION {
                    return Err(DcsError::InvalidInput(format!(
                        "unsupported bundle format version {}",
                        bundle.format_version
                    )));
                }
                (bundle.entries, bundle.chain_head)
            }
            ExportFormat::JsonLines => {
                let mut entries = Vec::new();
                for (n, line) in body.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let entry: AuditEntry = serde_json::from_str(line).map_err(|e| {
                        DcsError::InvalidInput(format!("audit line {}: {e}", n + 1))
                    })?;
                    entries.push(entry);
                }
                (entries, None)
            }
        };

        verify_entries(&entries)?;
        Ok(ImportedAudit {
            entries,
            chain_head,
        })
    }
}

fn verify_entries(entries: &[AuditEntry]) -> DcsResult<()> {
    let mut previous: Option<&AuditEntry> = None;
    for entry in entries {
        if let Some(prev) = previous {
            if entry.sequence <= prev.sequence {
                warn!(sequence = entry.sequence, "imported audit out of order");
                return Err(DcsError::IntegrityViolation(format!(
                    "sequence {} follows {}",
                    entry.sequence, prev.sequence
                )));
            }
            if entry.sequence == prev.sequence + 1
                && entry.previous_hash.as_deref() != Some(prev.entry_hash.as_str())
            {
                return Err(DcsError::IntegrityViolation(format!(
                    "sequence {} does not link to {}",
                    entry.sequence, prev.sequence
                )));
            }
        }
        let recomputed = entry
            .recompute_hash()
            .map_err(|e| DcsError::IntegrityViolation(e.to_string()))?;
        if recomputed != entry.entry_hash {
            warn!(sequence = entry.sequence, "imported audit entry altered");
            return Err(DcsError::IntegrityViolation(format!(
                "entry {} hash does not match content",
                entry.sequence
            )));
        }
        previous = Some(entry);
    }
    Ok(())
}
