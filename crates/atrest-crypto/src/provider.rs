//! Base key sources and cache-backed key resolution
//!
//! [`BaseKeyProvider`] abstracts the key manager that owns base key material.
//! [`KeyResolver`] sits in front of a [`CipherKeyCache`]: cache hits never
//! touch the provider, misses fetch the base key once and insert it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use atrest_core::{BaseKeyId, EncryptDomainId, RandomSalt};
use parking_lot::RwLock;
use zeroize::Zeroizing;

use crate::cipher_key::CipherKey;
use crate::error::{CipherError, CipherResult};
use crate::header::EncryptionHeader;
use crate::key_cache::CipherKeyCache;

/// Source of base key material, keyed by `(domain_id, base_key_id)`.
pub trait BaseKeyProvider: Send + Sync {
    fn fetch_base_key(
        &self,
        domain_id: EncryptDomainId,
        base_key_id: BaseKeyId,
    ) -> CipherResult<Zeroizing<Vec<u8>>>;

    /// The base key new data in `domain_id` should be encrypted with.
    fn latest_base_key(
        &self,
        domain_id: EncryptDomainId,
    ) -> CipherResult<(BaseKeyId, Zeroizing<Vec<u8>>)>;
}

impl<P: BaseKeyProvider + ?Sized> BaseKeyProvider for Arc<P> {
    fn fetch_base_key(
        &self,
        domain_id: EncryptDomainId,
        base_key_id: BaseKeyId,
    ) -> CipherResult<Zeroizing<Vec<u8>>> {
        (**self).fetch_base_key(domain_id, base_key_id)
    }

    fn latest_base_key(
        &self,
        domain_id: EncryptDomainId,
    ) -> CipherResult<(BaseKeyId, Zeroizing<Vec<u8>>)> {
        (**self).latest_base_key(domain_id)
    }
}

/// In-memory provider, for tests and embedding.
///
/// The latest base key of a domain is the one with the highest id.
#[derive(Default)]
pub struct StaticKeyProvider {
    keys: RwLock<HashMap<(EncryptDomainId, BaseKeyId), Zeroizing<Vec<u8>>>>,
    fetches: AtomicUsize,
}

impl StaticKeyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, domain_id: EncryptDomainId, base_key_id: BaseKeyId, base_key: &[u8]) {
        self.keys
            .write()
            .insert((domain_id, base_key_id), Zeroizing::new(base_key.to_vec()));
    }

    /// Number of provider calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

impl BaseKeyProvider for StaticKeyProvider {
    fn fetch_base_key(
        &self,
        domain_id: EncryptDomainId,
        base_key_id: BaseKeyId,
    ) -> CipherResult<Zeroizing<Vec<u8>>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.keys
            .read()
            .get(&(domain_id, base_key_id))
            .cloned()
            .ok_or_else(|| {
                CipherError::KeyProvider(format!(
                    "no base key {base_key_id} in domain {domain_id}"
                ))
            })
    }

    fn latest_base_key(
        &self,
        domain_id: EncryptDomainId,
    ) -> CipherResult<(BaseKeyId, Zeroizing<Vec<u8>>)> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.keys
            .read()
            .iter()
            .filter(|((domain, _), _)| *domain == domain_id)
            .max_by_key(|((_, id), _)| *id)
            .map(|((_, id), key)| (*id, key.clone()))
            .ok_or_else(|| {
                CipherError::KeyProvider(format!("no base keys in domain {domain_id}"))
            })
    }
}

/// Cipher key lookup that falls back to a [`BaseKeyProvider`] on cache miss.
pub struct KeyResolver<P> {
    cache: Arc<CipherKeyCache>,
    provider: P,
}

impl<P: BaseKeyProvider> KeyResolver<P> {
    pub fn new(cache: Arc<CipherKeyCache>, provider: P) -> Self {
        Self { cache, provider }
    }

    pub fn cache(&self) -> &Arc<CipherKeyCache> {
        &self.cache
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Key for encrypting new data in `domain_id`.
    pub fn latest_cipher_key(&self, domain_id: EncryptDomainId) -> CipherResult<Arc<CipherKey>> {
        match self.cache.latest_cipher_key(domain_id) {
            Err(e) if e.is_key_not_found() => {
                let (base_key_id, base_key) = self.provider.latest_base_key(domain_id)?;
                tracing::debug!(domain_id, base_key_id, "fetched latest base key");
                self.cache.insert_cipher_key(domain_id, base_key_id, &base_key)
            }
            found => found,
        }
    }

    /// Key for a known identity, e.g. from an encryption header.
    pub fn cipher_key(
        &self,
        domain_id: EncryptDomainId,
        base_key_id: BaseKeyId,
        salt: RandomSalt,
    ) -> CipherResult<Arc<CipherKey>> {
        match self.cache.cipher_key(domain_id, base_key_id, salt) {
            Err(e) if e.is_key_not_found() => {
                let base_key = self.provider.fetch_base_key(domain_id, base_key_id)?;
                tracing::debug!(domain_id, base_key_id, salt, "fetched base key");
                self.cache
                    .insert_cipher_key_with_salt(domain_id, base_key_id, &base_key, salt)
            }
            found => found,
        }
    }

    /// `(text_key, header_key)` named by `header`.
    pub fn cipher_keys_for_header(
        &self,
        header: &EncryptionHeader,
    ) -> CipherResult<(Arc<CipherKey>, Arc<CipherKey>)> {
        let ct = &header.cipher_text_details;
        let hd = &header.cipher_header_details;
        let text_key = self.cipher_key(ct.domain_id, ct.base_key_id, ct.salt)?;
        let header_key = self.cipher_key(hd.domain_id, hd.base_key_id, hd.salt)?;
        Ok((text_key, header_key))
    }
}
