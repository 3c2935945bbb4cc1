//! Keyed message authentication for individual packets.
//!
//! The fragmentation layer never implements a MAC itself; it talks to a
//! [`MacProvider`]. [`HmacSha256Mac`] is the stock provider: HMAC-SHA-256
//! truncated to [`MAC_SIZE`] bytes.

use crate::config::MAC_SIZE;
use crate::error::{constants, ProtocolError, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;

/// Keyed MAC over a sequence of byte slices.
///
/// The slices are authenticated as if concatenated.
pub trait MacProvider: Send + Sync {
    /// Compute the MAC of `parts`.
    fn compute(&self, parts: &[&[u8]]) -> [u8; MAC_SIZE];

    /// Check `tag` against the MAC of `parts`.
    fn verify(&self, parts: &[&[u8]], tag: &[u8; MAC_SIZE]) -> bool {
        let expected = self.compute(parts);
        // constant time
        expected
            .iter()
            .zip(tag.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// HMAC-SHA-256 truncated to the wire MAC size.
#[derive(Clone)]
pub struct HmacSha256Mac {
    keyed: HmacSha256,
}

impl HmacSha256Mac {
    /// Key a new provider. The caller's key bytes are copied into the HMAC
    /// state; callers holding secrets should zeroize their copy.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.is_empty() {
            return Err(ProtocolError::SecurityError(
                constants::ERR_MAC_KEY_EMPTY.to_string(),
            ));
        }
        let keyed = <HmacSha256 as Mac>::new_from_slice(key)
            .map_err(|e| ProtocolError::SecurityError(e.to_string()))?;
        Ok(Self { keyed })
    }

    /// Key a provider from an owned secret, wiping the secret afterwards.
    pub fn from_secret(mut secret: Vec<u8>) -> Result<Self> {
        let provider = Self::new(&secret);
        secret.zeroize();
        provider
    }

    /// Key a provider and wrap it for sharing between packets.
    pub fn shared(key: &[u8]) -> Result<Arc<dyn MacProvider>> {
        Ok(Arc::new(Self::new(key)?))
    }
}

impl fmt::Debug for HmacSha256Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HmacSha256Mac(..)")
    }
}

impl MacProvider for HmacSha256Mac {
    fn compute(&self, parts: &[&[u8]]) -> [u8; MAC_SIZE] {
        let mut mac = self.keyed.clone();
        for part in parts {
            mac.update(part);
        }
        let digest = mac.finalize().into_bytes();
        let mut tag = [0u8; MAC_SIZE];
        tag.copy_from_slice(&digest[..MAC_SIZE]);
        tag
    }

    fn verify(&self, parts: &[&[u8]], tag: &[u8; MAC_SIZE]) -> bool {
        let mut mac = self.keyed.clone();
        for part in parts {
            mac.update(part);
        }
        mac.verify_truncated_left(tag).is_ok()
    }
}

/// MAC configuration shared by every packet of an outgoing message.
#[derive(Clone)]
pub struct MacConfig {
    pub(crate) provider: Arc<dyn MacProvider>,
    pub(crate) key_id: String,
}

impl MacConfig {
    pub fn new(provider: Arc<dyn MacProvider>, key_id: impl Into<String>) -> Self {
        Self {
            provider,
            key_id: key_id.into(),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

impl fmt::Debug for MacConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacConfig")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}
