use dcs_types::{ContentHash, SessionId, SignerId};

/// The message a signer signs: the document hash bound to one session and
/// one signer, so a signature cannot be replayed into another session.
pub fn signing_digest(document_hash: &ContentHash, session: &SessionId, signer: &SignerId) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"dcs-signature:v1:");
    hasher.update(document_hash.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(session.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(signer.as_str().as_bytes());
    hasher.finalize().to_hex().to_string()
}
