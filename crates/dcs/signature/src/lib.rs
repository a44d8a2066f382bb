//! DCS Signature Manager.
//!
//! Owns signing sessions: binds verified identity and PoA credentials to
//! each signer entry, applies ed25519 signatures over the document hash,
//! enforces strict ordering and deadlines, and later detects tampering and
//! revocation when a signature is validated.
//!
//! Signer entries move `Pending -> CredentialsRequested -> CredentialsBound
//! -> Signed`, with `Blocked` reachable on verification failure or
//! revocation.

#![deny(unsafe_code)]

mod digest;
mod manager;
mod timestamp;
mod validation;
mod wallet;

pub use digest::signing_digest;
pub use manager::{
    RevocationImpact, RevokedSignature, SessionRequest, SignatureDeps, SignatureManager,
    SignatureTimeouts, SigningOutcome,
};
pub use timestamp::{verify_token, LocalTimestampAuthority, TimestampAuthority};
pub use validation::{CertificateStatus, ValidationReport};
pub use wallet::{LocalWallet, SigningWallet, WalletSignature};
