//! DCS Audit Ledger - the non-repudiable history of the contracting service.
//!
//! Every state-affecting action, allowed or denied, becomes one
//! [`AuditEntry`]. Entries are globally ordered by a gapless sequence,
//! linked by a BLAKE3 hash chain, and partitioned by affected entity for
//! per-contract history. The public surface has no update or delete;
//! corrections are new compensating entries.

#![deny(unsafe_code)]

mod cursor;
mod event;
mod export;
mod ledger;

pub use cursor::{AuditCursor, AuditFilter};
pub use dcs_storage::{AuditEntry, Decision};
pub use event::AuditEvent;
pub use export::{AuditBundle, ExportFormat, ExportedAudit, ImportedAudit};
pub use ledger::{AuditLedger, AuditReport, ChainBreak, ChainReport};
