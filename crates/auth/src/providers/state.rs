use crate::error::{AuthError, ProviderError, Result};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use authcore_models::ProviderKind;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const NONCE_LEN: usize = 12;

/// Round-trip data carried through the identity provider in the `state` or
/// `RelayState` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedState {
    pub tenant_id: Uuid,
    pub provider_kind: ProviderKind,
    /// Single-use marker for the replay guard.
    pub nonce: String,
    /// PKCE verifier; only present for OAuth-style flows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,
    pub issued_at: i64,
}

impl SealedState {
    pub fn new(tenant_id: Uuid, provider_kind: ProviderKind, code_verifier: Option<String>) -> Self {
        Self {
            tenant_id,
            provider_kind,
            nonce: random_token(16),
            code_verifier,
            issued_at: Utc::now().timestamp(),
        }
    }
}

/// Encrypts state with AES-256-GCM so it is both opaque and tamper-evident.
/// The key is the SHA-256 of the configured secret.
#[derive(Clone)]
pub struct StateSealer {
    cipher: Aes256Gcm,
    ttl: Duration,
}

impl StateSealer {
    pub fn new(secret: &str, ttl: Duration) -> Result<Self> {
        let key = Sha256::digest(secret.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| AuthError::Internal(format!("state key: {e}")))?;
        Ok(Self { cipher, ttl })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn seal(&self, state: &SealedState) -> Result<String> {
        let plaintext = serde_json::to_vec(state).map_err(|e| AuthError::Internal(e.to_string()))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|e| AuthError::Internal(format!("state encrypt: {e}")))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(payload))
    }

    /// Decrypt and check freshness. Any tampering fails authentication of
    /// the ciphertext and is reported as a state error.
    pub fn open(&self, sealed: &str) -> std::result::Result<SealedState, ProviderError> {
        let payload = URL_SAFE_NO_PAD
            .decode(sealed.trim())
            .map_err(|_| ProviderError::State("malformed state".to_string()))?;
        if payload.len() <= NONCE_LEN {
            return Err(ProviderError::State("malformed state".to_string()));
        }

        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| ProviderError::State("state failed integrity check".to_string()))?;
        let state: SealedState = serde_json::from_slice(&plaintext)
            .map_err(|_| ProviderError::State("malformed state".to_string()))?;

        let age = Utc::now().timestamp() - state.issued_at;
        if age < 0 || age > self.ttl.num_seconds() {
            return Err(ProviderError::State("state has expired".to_string()));
        }
        Ok(state)
    }
}

/// PKCE verifier and its S256 challenge.
pub fn pkce_pair() -> (String, String) {
    let verifier = random_token(32);
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    (verifier, challenge)
}

fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealer() -> StateSealer {
        StateSealer::new("state-secret", Duration::minutes(10)).unwrap()
    }

    #[test]
    fn seal_then_open() {
        let sealer = sealer();
        let state = SealedState::new(Uuid::new_v4(), ProviderKind::EnterpriseSso, Some("verifier".into()));
        let opened = sealer.open(&sealer.seal(&state).unwrap()).unwrap();
        assert_eq!(opened, state);
    }

    #[test]
    fn tampered_state_is_rejected() {
        let sealer = sealer();
        let state = SealedState::new(Uuid::new_v4(), ProviderKind::Saml, None);
        let sealed = sealer.seal(&state).unwrap();

        let mut bytes = URL_SAFE_NO_PAD.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(bytes);

        assert!(matches!(sealer.open(&tampered), Err(ProviderError::State(_))));
        assert!(sealer.open("not-base64!").is_err());
    }

    #[test]
    fn other_secret_cannot_open() {
        let state = SealedState::new(Uuid::new_v4(), ProviderKind::Saml, None);
        let sealed = sealer().seal(&state).unwrap();
        let other = StateSealer::new("another-secret", Duration::minutes(10)).unwrap();
        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn expired_state_is_rejected() {
        let sealer = sealer();
        let mut state = SealedState::new(Uuid::new_v4(), ProviderKind::Saml, None);
        state.issued_at -= 11 * 60;
        assert!(matches!(
            sealer.open(&sealer.seal(&state).unwrap()),
            Err(ProviderError::State(_))
        ));
    }

    #[test]
    fn pkce_challenge_is_s256_of_verifier() {
        let (verifier, challenge) = pkce_pair();
        assert!(verifier.len() >= 43);
        assert_eq!(challenge, URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())));
    }
}
