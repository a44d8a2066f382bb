//! DCS storage abstractions.
//!
//! This crate defines the persistence contract of the contracting service:
//! - contract records keyed by id, with their embedded version chain
//! - immutable template versions
//! - signing sessions, foreign-keyed to their contract and indexed by credential
//! - the append-only, hash-linked audit chain with a per-entity index
//!
//! Writes that replace a record are guarded by an expected revision so a
//! stale writer can never overwrite a newer state.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
mod model;
mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::InMemoryDcsStorage;
pub use model::{compute_entry_hash, AuditAppend, AuditEntry, ContractQuery, Decision, TemplateQuery};
pub use traits::{AuditStore, ContractStore, DcsStorage, QueryWindow, SessionStore, TemplateStore};
