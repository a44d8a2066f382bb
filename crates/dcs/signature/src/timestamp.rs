use async_trait::async_trait;
use dcs_credentials::verify_hex;
use dcs_types::{Clock, DcsResult, TimestampToken};
use ed25519_dalek::{Signer, SigningKey};
use std::sync::Arc;

/// Attaches a cryptographic timestamp to a signature digest.
#[async_trait]
pub trait TimestampAuthority: Send + Sync {
    async fn stamp(&self, digest: &str) -> DcsResult<TimestampToken>;
}

fn token_payload(authority: &str, time: &chrono::DateTime<chrono::Utc>, digest: &str) -> Vec<u8> {
    format!("dcs-timestamp:{}:{}:{}", authority, time.to_rfc3339(), digest).into_bytes()
}

/// Whether the token carries a valid authority signature over `digest`.
pub fn verify_token(token: &TimestampToken, digest: &str) -> bool {
    token.digest == digest
        && verify_hex(
            &token.authority_key,
            &token_payload(&token.authority, &token.time, &token.digest),
            &token.signature,
        )
        .is_ok()
}

/// In-process timestamp authority with its own ed25519 key.
pub struct LocalTimestampAuthority {
    name: String,
    key: SigningKey,
    clock: Arc<dyn Clock>,
}

impl LocalTimestampAuthority {
    pub fn new(name: impl Into<String>, key: SigningKey, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            key,
            clock,
        }
    }

    /// An authority with a fresh random key.
    pub fn generate(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self::new(name, SigningKey::from_bytes(&rand::random::<[u8; 32]>()), clock)
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().to_bytes())
    }
}

#[async_trait]
impl TimestampAuthority for LocalTimestampAuthority {
    async fn stamp(&self, digest: &str) -> DcsResult<TimestampToken> {
        let time = self.clock.now();
        let signature = self.key.sign(&token_payload(&self.name, &time, digest));
        Ok(TimestampToken {
            time,
            digest: digest.to_string(),
            authority: self.name.clone(),
            authority_key: self.public_key_hex(),
            signature: hex::encode(signature.to_bytes()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcs_types::ManualClock;

    #[tokio::test]
    async fn token_verifies_only_for_its_digest() {
        let tsa = LocalTimestampAuthority::generate("tsa", Arc::new(ManualClock::default()));
        let token = tsa.stamp("abc").await.unwrap();
        assert!(verify_token(&token, "abc"));
        assert!(!verify_token(&token, "abd"));

        let mut forged = token.clone();
        forged.time += chrono::Duration::seconds(1);
        assert!(!verify_token(&forged, "abc"));
    }
}
