//! DCS Credential Verifier.
//!
//! Validates identity and proof-of-authority credentials against the
//! trusted issuer chain, their validity window, PoA scope and the current
//! revocation status. `Unknown` outcomes are treated as invalid by every
//! caller. Each verification attempt is audited.

#![deny(unsafe_code)]

mod credential;
mod error;
mod registry;
mod source;
mod trust;
mod verifier;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use credential::{Credential, CredentialKind, CredentialScope};
pub use error::{verify_hex, CredentialError};
pub use registry::{
    CachedRevocationRegistry, InMemoryRevocationRegistry, Revocation, RevocationRegistry,
    RevocationStatus, MAX_REVOCATION_TTL,
};
pub use source::{CredentialSource, InMemoryCredentialSource};
pub use trust::{Endorsement, TrustStore, MAX_CHAIN_DEPTH};
pub use verifier::{
    ContractScope, CredentialVerifier, Rejection, RejectionKind, Verification, VerifiedCredential,
};
