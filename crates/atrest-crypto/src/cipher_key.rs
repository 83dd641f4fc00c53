//! Cipher keys: base key material + HMAC-SHA-256 derived AES-256 key
//!
//! ```text
//! derived = HMAC-SHA256(base_key, domain_id_le || base_key_id_le || salt_le)
//! ```
//!
//! A `CipherKey` is immutable once built and shared as `Arc<CipherKey>`
//! between the cache and in-flight encryptors/decryptors. Key bytes are
//! zeroized when the last reference drops.

use std::time::{SystemTime, UNIX_EPOCH};

use atrest_core::{BaseKeyId, EncryptDomainId, RandomSalt};
use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

use crate::auth_token;
use crate::error::{CipherError, CipherResult};
use crate::AES_256_KEY_LENGTH;

pub struct CipherKey {
    domain_id: EncryptDomainId,
    base_key_id: BaseKeyId,
    salt: RandomSalt,
    creation_time: u64,
    base_key: Zeroizing<Vec<u8>>,
    derived: [u8; AES_256_KEY_LENGTH],
}

impl CipherKey {
    /// Derive a key under a freshly generated random salt.
    pub fn new(
        domain_id: EncryptDomainId,
        base_key_id: BaseKeyId,
        base_key: &[u8],
    ) -> CipherResult<Self> {
        Self::with_salt(domain_id, base_key_id, base_key, generate_salt())
    }

    /// Re-derive the key for a known identity (e.g. read back from a header).
    pub fn with_salt(
        domain_id: EncryptDomainId,
        base_key_id: BaseKeyId,
        base_key: &[u8],
        salt: RandomSalt,
    ) -> CipherResult<Self> {
        let derived = derive_cipher_key(domain_id, base_key_id, base_key, salt)?;
        Ok(Self {
            domain_id,
            base_key_id,
            salt,
            creation_time: unix_now(),
            base_key: Zeroizing::new(base_key.to_vec()),
            derived,
        })
    }

    pub fn domain_id(&self) -> EncryptDomainId {
        self.domain_id
    }

    pub fn base_key_id(&self) -> BaseKeyId {
        self.base_key_id
    }

    pub fn salt(&self) -> RandomSalt {
        self.salt
    }

    /// Seconds since the UNIX epoch at which the key was derived.
    pub fn creation_time(&self) -> u64 {
        self.creation_time
    }

    /// The derived AES-256 key.
    pub fn as_bytes(&self) -> &[u8; AES_256_KEY_LENGTH] {
        &self.derived
    }

    pub fn base_key(&self) -> &[u8] {
        &self.base_key
    }

    /// True when `base_key` is the material this key was derived from.
    pub fn has_base_key(&self, base_key: &[u8]) -> bool {
        self.base_key.len() == base_key.len() && bool::from(self.base_key.as_slice().ct_eq(base_key))
    }
}

impl PartialEq for CipherKey {
    fn eq(&self, other: &Self) -> bool {
        self.domain_id == other.domain_id
            && self.base_key_id == other.base_key_id
            && self.salt == other.salt
            && bool::from(self.derived[..].ct_eq(&other.derived[..]))
            && other.has_base_key(&self.base_key)
    }
}

impl Eq for CipherKey {}

impl Drop for CipherKey {
    fn drop(&mut self) {
        self.derived.zeroize();
    }
}

impl std::fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherKey")
            .field("domain_id", &self.domain_id)
            .field("base_key_id", &self.base_key_id)
            .field("salt", &self.salt)
            .field("creation_time", &self.creation_time)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive the AES-256 key bound to the full identity tuple.
pub fn derive_cipher_key(
    domain_id: EncryptDomainId,
    base_key_id: BaseKeyId,
    base_key: &[u8],
    salt: RandomSalt,
) -> CipherResult<[u8; AES_256_KEY_LENGTH]> {
    if base_key.is_empty() {
        return Err(CipherError::InvalidBaseKey(format!(
            "empty base key for domain={domain_id} base_key_id={base_key_id}"
        )));
    }

    let mut message = [0u8; 24];
    message[..8].copy_from_slice(&domain_id.to_le_bytes());
    message[8..16].copy_from_slice(&base_key_id.to_le_bytes());
    message[16..].copy_from_slice(&salt.to_le_bytes());

    auth_token::digest(base_key, &message)
}

/// Generate a random derivation salt.
pub fn generate_salt() -> RandomSalt {
    rand::thread_rng().next_u64()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const BASE: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn test_with_salt_is_deterministic() {
        let k1 = CipherKey::with_salt(7, 3, BASE, 42).unwrap();
        let k2 = CipherKey::with_salt(7, 3, BASE, 42).unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_random_salts_differ() {
        let k1 = CipherKey::new(7, 3, BASE).unwrap();
        let k2 = CipherKey::new(7, 3, BASE).unwrap();
        assert_ne!(k1.salt(), k2.salt(), "random salts must differ");
        assert_ne!(k1.as_bytes(), k2.as_bytes());
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_identity_fields_bind_derivation() {
        let base = CipherKey::with_salt(7, 3, BASE, 42).unwrap();
        let other_domain = CipherKey::with_salt(8, 3, BASE, 42).unwrap();
        let other_id = CipherKey::with_salt(7, 4, BASE, 42).unwrap();
        let other_salt = CipherKey::with_salt(7, 3, BASE, 43).unwrap();

        assert_ne!(base.as_bytes(), other_domain.as_bytes());
        assert_ne!(base.as_bytes(), other_id.as_bytes());
        assert_ne!(base.as_bytes(), other_salt.as_bytes());
    }

    #[test]
    fn test_empty_base_key_rejected() {
        let result = CipherKey::new(1, 1, b"");
        assert!(matches!(result, Err(CipherError::InvalidBaseKey(_))));
    }

    #[test]
    fn test_has_base_key() {
        let key = CipherKey::with_salt(1, 1, BASE, 5).unwrap();
        assert!(key.has_base_key(BASE));
        assert!(!key.has_base_key(b"0123456789abcdef0123456789abcdeX"));
        assert!(!key.has_base_key(b"short"));
    }

    #[test]
    fn test_debug_redacts_key_material() {
        let key = CipherKey::with_salt(1, 1, BASE, 5).unwrap();
        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("0123456789abcdef"));
    }

    proptest! {
        #[test]
        fn derivation_is_deterministic(
            domain in any::<i64>(),
            base_id in any::<u64>(),
            salt in any::<u64>(),
            base in proptest::collection::vec(any::<u8>(), 1..=64),
        ) {
            let d1 = derive_cipher_key(domain, base_id, &base, salt).unwrap();
            let d2 = derive_cipher_key(domain, base_id, &base, salt).unwrap();
            prop_assert_eq!(d1, d2);
        }
    }
}
