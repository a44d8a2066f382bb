//! DCS Types - the shared model of the Digital Contracting Service.
//!
//! Every component of the contract lifecycle engine speaks in these types:
//!
//! - identifiers ([`ContractId`], [`SessionId`], [`CredentialId`], ...)
//! - the contract record and its lifecycle [`ContractState`]
//! - versioned [`Template`]s
//! - [`SigningSession`]s and per-signer [`SignerStatus`]
//! - the [`Action`] vocabulary shared by authorization and audit
//! - the [`DcsError`] taxonomy
//!
//! Behavior lives in the component crates; this crate only carries data,
//! invariant helpers, and two small runtime utilities ([`Clock`] and
//! [`KeyedLocks`]).

#![deny(unsafe_code)]

mod action;
mod actor;
mod clock;
mod contract;
mod error;
mod hash;
mod ids;
mod locks;
mod session;
mod template;

pub use action::*;
pub use actor::*;
pub use clock::*;
pub use contract::*;
pub use error::*;
pub use hash::*;
pub use ids::*;
pub use locks::*;
pub use session::*;
pub use template::*;
