use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::models::SecurityError;

type HmacSha256 = Hmac<Sha256>;

const MIN_SECRET_BYTES: usize = 16;

/// The `{current, previous}` HMAC secret pair. Rotation keeps the outgoing
/// key valid so in-flight webhooks signed with it still verify.
#[derive(Debug, Clone)]
struct KeyRing {
    current: String,
    previous: Option<String>,
}

/// Verifies `X-Signature: sha256=<hex>` headers over the raw webhook body.
///
/// The ring is read on every request and replaced atomically on the rare
/// admin rotation, so reads never block behind a rotation in progress.
#[derive(Debug)]
pub struct WebhookVerifier {
    ring: RwLock<Arc<KeyRing>>,
}

impl WebhookVerifier {
    pub fn new(current: &str, previous: Option<&str>) -> Result<Self, SecurityError> {
        if current.len() < MIN_SECRET_BYTES {
            return Err(SecurityError::SecretTooShort {
                minimum: MIN_SECRET_BYTES,
            });
        }
        Ok(Self {
            ring: RwLock::new(Arc::new(KeyRing {
                current: current.to_string(),
                previous: previous.map(|s| s.to_string()),
            })),
        })
    }

    /// Checks the signature header against current and then previous key.
    /// Comparison is constant-time via `Mac::verify_slice`.
    pub fn verify(&self, raw_body: &[u8], signature_header: &str) -> Result<(), SecurityError> {
        let hex_digest = signature_header
            .strip_prefix("sha256=")
            .ok_or(SecurityError::MalformedSignature)?;
        let signature = hex::decode(hex_digest).map_err(|_| SecurityError::MalformedSignature)?;

        let ring = self.ring.read().expect("keyring lock poisoned").clone();

        if Self::matches(&ring.current, raw_body, &signature) {
            return Ok(());
        }
        if let Some(previous) = &ring.previous {
            if Self::matches(previous, raw_body, &signature) {
                return Ok(());
            }
        }

        metrics::counter!("hmac_invalid_total").increment(1);
        warn!("Webhook signature verification failed");
        Err(SecurityError::InvalidSignature)
    }

    /// Moves `current` to `previous` and installs the new secret.
    pub fn rotate(&self, new_secret: &str) -> Result<(), SecurityError> {
        if new_secret.len() < MIN_SECRET_BYTES {
            return Err(SecurityError::SecretTooShort {
                minimum: MIN_SECRET_BYTES,
            });
        }
        let mut guard = self.ring.write().expect("keyring lock poisoned");
        let rotated = KeyRing {
            current: new_secret.to_string(),
            previous: Some(guard.current.clone()),
        };
        *guard = Arc::new(rotated);
        info!("HMAC key ring rotated");
        Ok(())
    }

    /// Computes the signature a caller should send. Used by tests and by the
    /// admin synthetic-webhook tooling.
    pub fn sign(secret: &str, raw_body: &[u8]) -> String {
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
        mac.update(raw_body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn matches(secret: &str, raw_body: &[u8], signature: &[u8]) -> bool {
        let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
            Ok(m) => m,
            Err(_) => return false,
        };
        mac.update(raw_body);
        mac.verify_slice(signature).is_ok()
    }
}
