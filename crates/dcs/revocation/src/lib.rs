//! DCS Revocation Propagator.
//!
//! Revocations arrive as [`RevocationSignal`]s, either from an administrator
//! through the service boundary or from the engine itself when a terminated
//! contract hands back its signer credentials. The [`RevocationPropagator`]
//! makes each one take effect everywhere it matters:
//!
//! - the credential cache and registry, so no new signature can use it
//! - open signing sessions, whose affected signers are blocked
//! - signed contracts, which are flagged or sent back for re-signing
//! - role assignments and the approvals recorded under them
//!
//! Signals are processed one at a time by a background reactor, see
//! [`spawn`].

#![deny(unsafe_code)]

mod propagator;
mod reactor;
mod signal;

pub use propagator::{PropagationReport, RevocationPropagator};
pub use reactor::{spawn, RevocationHandle};
pub use signal::RevocationSignal;
