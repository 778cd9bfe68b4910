//! Request authentication for the control API.
//!
//! Every mutating request carries a `signature` header: base64 of an
//! RSA-PSS/SHA-512 signature over the exact request body, made with the
//! authority's private key. The matching public key is the trust anchor.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::pss::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha2::Sha512;
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Public key of the range authority. Loaded once, shared read-only.
#[derive(Clone)]
pub struct TrustAnchor {
    verifier: VerifyingKey<Sha512>,
}

impl fmt::Debug for TrustAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustAnchor").finish_non_exhaustive()
    }
}

impl TrustAnchor {
    /// Build from a PEM public key (SPKI or PKCS#1).
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .context("Not an RSA public key in PEM format")?;
        Ok(Self::from_key(key))
    }

    pub fn from_key(key: RsaPublicKey) -> Self {
        Self {
            verifier: VerifyingKey::<Sha512>::new(key),
        }
    }

    /// Read the trust anchor from a PEM file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let pem = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read public key: {:?}", path.as_ref()))?;
        Self::from_pem(&pem).with_context(|| format!("Invalid public key: {:?}", path.as_ref()))
    }

    /// Check `signature_b64` against the raw `body`.
    ///
    /// Undecodable base64, a signature of the wrong size and a signature that
    /// does not verify all return `false`; callers cannot tell them apart.
    pub fn verify_signature(&self, body: &[u8], signature_b64: &str) -> bool {
        let raw = match STANDARD.decode(signature_b64.trim()) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Signature is not base64: {}", e);
                return false;
            }
        };
        let signature = match Signature::try_from(raw.as_slice()) {
            Ok(sig) => sig,
            Err(e) => {
                debug!("Malformed signature: {}", e);
                return false;
            }
        };
        self.verifier.verify(body, &signature).is_ok()
    }
}

/// `|now - timestamp| <= ttl`, symmetric for past and future timestamps.
pub fn check_freshness_at(timestamp: i64, ttl: i64, now: i64) -> bool {
    let skew = (i128::from(now) - i128::from(timestamp)).abs();
    skew <= i128::from(ttl)
}

/// [`check_freshness_at`] against the wall clock.
pub fn check_freshness(timestamp: i64, ttl: i64) -> bool {
    check_freshness_at(timestamp, ttl, Utc::now().timestamp())
}
