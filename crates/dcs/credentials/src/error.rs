use thiserror::Error;

/// Failures while decoding or checking credential material.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("invalid hex: {0}")]
    Hex(String),

    #[error("invalid key: {0}")]
    Key(String),

    #[error("invalid signature: {0}")]
    Signature(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub(crate) fn verifying_key(hex_key: &str) -> Result<ed25519_dalek::VerifyingKey, CredentialError> {
    let bytes = hex::decode(hex_key).map_err(|e| CredentialError::Hex(e.to_string()))?;
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CredentialError::Key("expected 32 bytes".into()))?;
    ed25519_dalek::VerifyingKey::from_bytes(&array).map_err(|e| CredentialError::Key(e.to_string()))
}

pub(crate) fn signature(hex_sig: &str) -> Result<ed25519_dalek::Signature, CredentialError> {
    let bytes = hex::decode(hex_sig).map_err(|e| CredentialError::Hex(e.to_string()))?;
    let array: [u8; 64] = bytes
        .try_into()
        .map_err(|_| CredentialError::Signature("expected 64 bytes".into()))?;
    Ok(ed25519_dalek::Signature::from_bytes(&array))
}

/// Verify a hex signature over `message` with a hex verifying key.
pub fn verify_hex(public_key: &str, message: &[u8], sig: &str) -> Result<(), CredentialError> {
    use ed25519_dalek::Verifier;
    let key = verifying_key(public_key)?;
    let sig = signature(sig)?;
    key.verify(message, &sig)
        .map_err(|e| CredentialError::Signature(e.to_string()))
}
