//! Gated access to the audit ledger for auditors and compliance officers.

use crate::engine::ContractWorkflowEngine;
use dcs_ledger::{
    AuditEntry, AuditFilter, AuditLedger, AuditReport, ChainReport, ExportFormat, ExportedAudit,
    ImportedAudit,
};
use dcs_types::{Action, Actor, DcsResult, EntityRef};
use tracing::info;

impl ContractWorkflowEngine {
    pub async fn audit_query(&self, actor: &Actor, filter: AuditFilter) -> DcsResult<Vec<AuditEntry>> {
        self.gate.authorize(actor, Action::AuditQuery, &EntityRef::Ledger).await?;
        self.ledger.query(filter).collect_all().await
    }

    /// Entry counts by action and decision.
    pub async fn audit_report(&self, actor: &Actor, filter: AuditFilter) -> DcsResult<AuditReport> {
        self.gate.authorize(actor, Action::AuditQuery, &EntityRef::Ledger).await?;
        self.ledger.report(filter).await
    }

    pub async fn audit_export(&self, actor: &Actor, filter: AuditFilter, format: ExportFormat) -> DcsResult<ExportedAudit> {
        self.gate.authorize(actor, Action::AuditExport, &EntityRef::Ledger).await?;
        let exported = self.ledger.export(filter, format, actor).await?;
        info!(actor = %actor, entries = exported.entry_count, format = ?format, "audit exported");
        Ok(exported)
    }

    /// Re-verify an exported body. Reads nothing from the ledger.
    pub async fn audit_import(&self, actor: &Actor, body: &str, format: ExportFormat) -> DcsResult<ImportedAudit> {
        self.gate.authorize(actor, Action::AuditQuery, &EntityRef::Ledger).await?;
        AuditLedger::import(body, format)
    }

    pub async fn verify_audit_chain(&self, actor: &Actor) -> DcsResult<ChainReport> {
        self.gate.authorize(actor, Action::AuditQuery, &EntityRef::Ledger).await?;
        self.ledger.verify_chain().await
    }
}
