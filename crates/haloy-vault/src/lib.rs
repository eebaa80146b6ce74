//! Asymmetric secret encryption.
//!
//! The vault holds a long-lived X25519 identity loaded from an environment
//! variable. Secrets are sealed against the identity's public key with a
//! fresh ephemeral keypair per encryption: the X25519 shared secret is
//! hashed with SHA-256 into a ChaCha20-Poly1305 key, and the envelope
//! `ephemeral_pub(32) || nonce(12) || ciphertext` is base64-encoded for
//! storage. Decryption reverses the envelope with the static secret.
//!
//! Plaintext only ever exists transiently, on the way into a container
//! environment; it is never persisted or logged.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use haloy_core::config::EnvVar;

const EPHEMERAL_PUB_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("identity environment variable {0} is not set")]
    MissingIdentity(String),

    #[error("identity is not a valid X25519 secret: {0}")]
    InvalidIdentity(String),

    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    #[error("decryption failed: wrong identity or corrupted ciphertext")]
    DecryptFailed,

    #[error("unknown secret: {0}")]
    UnknownSecret(String),
}

impl From<VaultError> for haloy_core::Error {
    fn from(err: VaultError) -> Self {
        haloy_core::Error::Crypto(err.to_string())
    }
}

pub type VaultResult<T> = std::result::Result<T, VaultError>;

/// The process-held X25519 identity. Immutable after load.
pub struct Identity {
    secret: StaticSecret,
}

impl Identity {
    /// Generate a fresh identity (installation bootstrap and tests).
    pub fn generate() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Parse the single-line base64 form of a 32-byte X25519 secret.
    pub fn from_string(s: &str) -> VaultResult<Self> {
        let mut bytes = BASE64
            .decode(s.trim())
            .map_err(|e| VaultError::InvalidIdentity(e.to_string()))?;
        let raw: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| VaultError::InvalidIdentity(format!("expected 32 bytes, got {}", bytes.len())))?;
        bytes.zeroize();
        Ok(Self {
            secret: StaticSecret::from(raw),
        })
    }

    /// The single-line encoding suitable for an environment variable.
    pub fn encode(&self) -> String {
        BASE64.encode(self.secret.to_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(&self.secret)
    }
}

/// Supplies stored ciphertext for named secrets during env resolution.
#[async_trait]
pub trait SecretCiphertexts: Send + Sync {
    /// Fetch the base64 ciphertext for `name`, or `NotFound`.
    async fn secret_ciphertext(&self, name: &str) -> haloy_core::Result<String>;
}

/// Encrypts and decrypts secrets with the process identity.
pub struct Vault {
    identity: Identity,
    recipient: PublicKey,
}

impl Vault {
    pub fn new(identity: Identity) -> Self {
        let recipient = identity.public_key();
        Self {
            identity,
            recipient,
        }
    }

    /// Load the identity from the named environment variable.
    pub fn from_env(var: &str) -> VaultResult<Self> {
        let raw =
            std::env::var(var).map_err(|_| VaultError::MissingIdentity(var.to_string()))?;
        Ok(Self::new(Identity::from_string(&raw)?))
    }

    /// Seal `plaintext` against the identity, returning the base64 envelope.
    pub fn encrypt(&self, plaintext: &str) -> VaultResult<String> {
        let ephemeral = StaticSecret::random_from_rng(OsRng);
        let ephemeral_pub = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&self.recipient);
        let mut key: [u8; 32] = Sha256::digest(shared.as_bytes()).into();

        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| VaultError::Malformed(format!("cipher init: {e}")))?;
        key.zeroize();

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| VaultError::Malformed(format!("seal: {e}")))?;

        let mut envelope = Vec::with_capacity(EPHEMERAL_PUB_LEN + NONCE_LEN + ciphertext.len());
        envelope.extend_from_slice(ephemeral_pub.as_bytes());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(envelope))
    }

    /// Open a base64 envelope produced by [`Vault::encrypt`].
    pub fn decrypt(&self, encoded: &str) -> VaultResult<String> {
        let envelope = BASE64
            .decode(encoded.trim())
            .map_err(|e| VaultError::Malformed(e.to_string()))?;
        if envelope.len() < EPHEMERAL_PUB_LEN + NONCE_LEN {
            return Err(VaultError::Malformed(format!(
                "envelope of {} bytes is too short",
                envelope.len()
            )));
        }
        let (pub_bytes, rest) = envelope.split_at(EPHEMERAL_PUB_LEN);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);
        let ephemeral_pub: [u8; 32] = pub_bytes
            .try_into()
            .map_err(|_| VaultError::Malformed("bad ephemeral key".into()))?;

        let shared = self
            .identity
            .secret
            .diffie_hellman(&PublicKey::from(ephemeral_pub));
        let mut key: [u8; 32] = Sha256::digest(shared.as_bytes()).into();
        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|_| VaultError::DecryptFailed)?;
        key.zeroize();

        let mut plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| VaultError::DecryptFailed)?;
        let text = String::from_utf8(plaintext.clone())
            .map_err(|_| VaultError::Malformed("plaintext is not UTF-8".into()))?;
        plaintext.zeroize();
        Ok(text)
    }

    /// Resolve an app's env list into the final name→value map: secret
    /// entries are fetched from `source` and decrypted, literal entries pass
    /// through unchanged.
    pub async fn resolve_env(
        &self,
        env: &[EnvVar],
        source: &dyn SecretCiphertexts,
    ) -> haloy_core::Result<HashMap<String, String>> {
        let mut resolved = HashMap::with_capacity(env.len());
        for entry in env {
            let value = match (&entry.value, &entry.secret_name) {
                (Some(value), _) => value.clone(),
                (None, Some(secret_name)) => {
                    let ciphertext = match source.secret_ciphertext(secret_name).await {
                        Ok(ciphertext) => ciphertext,
                        Err(haloy_core::Error::NotFound(_)) => {
                            return Err(
                                VaultError::UnknownSecret(secret_name.clone()).into()
                            );
                        }
                        Err(other) => return Err(other),
                    };
                    self.decrypt(&ciphertext)?
                }
                (None, None) => {
                    return Err(haloy_core::Error::Validation(format!(
                        "env variable {:?} has neither value nor secretName",
                        entry.name
                    )));
                }
            };
            resolved.insert(entry.name.clone(), value);
        }
        Ok(resolved)
    }
}
