//! Webhook signature verification
//!
//! GitHub signs every delivery with an HMAC of the raw body under the shared
//! webhook secret and sends it as `X-Hub-Signature: <algorithm>=<hex-digest>`.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use tracing::{debug, warn};

use crate::error::{BuilderError, Result};

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Digest algorithms accepted in the signature header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl SignatureAlgorithm {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sha1" => Some(Self::Sha1),
            "sha256" => Some(Self::Sha256),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

/// Verifies inbound deliveries against a single shared secret
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Check `signature_header` against the HMAC of `body`.
    ///
    /// An absent header is `Unauthorized`; anything present that does not
    /// match (unknown algorithm, bad hex, wrong digest) is `Forbidden`.
    pub fn verify(&self, signature_header: Option<&str>, body: &[u8]) -> Result<()> {
        let header = signature_header.ok_or(BuilderError::Unauthorized)?;

        let (algorithm_name, digest_hex) = header
            .split_once('=')
            .ok_or_else(|| BuilderError::Forbidden("malformed signature header".to_string()))?;

        let algorithm = SignatureAlgorithm::from_name(algorithm_name).ok_or_else(|| {
            BuilderError::Forbidden(format!("unsupported algorithm '{}'", algorithm_name))
        })?;

        let expected = hex::decode(digest_hex)
            .map_err(|_| BuilderError::Forbidden("signature is not valid hex".to_string()))?;

        let secret = self.secret.as_bytes();
        let matches = match algorithm {
            SignatureAlgorithm::Sha1 => verify_mac::<HmacSha1>(secret, body, &expected),
            SignatureAlgorithm::Sha256 => verify_mac::<HmacSha256>(secret, body, &expected),
            SignatureAlgorithm::Sha512 => verify_mac::<HmacSha512>(secret, body, &expected),
        };

        if matches {
            debug!("Webhook signature verified ({})", algorithm.name());
            Ok(())
        } else {
            warn!("Webhook signature mismatch ({})", algorithm.name());
            Err(BuilderError::Forbidden("digest mismatch".to_string()))
        }
    }

    /// Produce the header value GitHub would send for `body`
    pub fn sign(&self, algorithm: SignatureAlgorithm, body: &[u8]) -> String {
        let secret = self.secret.as_bytes();
        let digest = match algorithm {
            SignatureAlgorithm::Sha1 => compute_mac::<HmacSha1>(secret, body),
            SignatureAlgorithm::Sha256 => compute_mac::<HmacSha256>(secret, body),
            SignatureAlgorithm::Sha512 => compute_mac::<HmacSha512>(secret, body),
        };
        format!("{}={}", algorithm.name(), hex::encode(digest))
    }
}

// Constant-time comparison via `verify_slice`
fn verify_mac<M: Mac + KeyInit>(secret: &[u8], body: &[u8], expected: &[u8]) -> bool {
    let mut mac = match <M as KeyInit>::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(expected).is_ok()
}

fn compute_mac<M: Mac + KeyInit>(secret: &[u8], body: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length
    match <M as KeyInit>::new_from_slice(secret) {
        Ok(mut mac) => {
            mac.update(body);
            mac.finalize().into_bytes().to_vec()
        }
        Err(_) => Vec::new(),
    }
}
