//! In-memory index of cipher keys
//!
//! ```text
//! { domain_id -> { (base_key_id, salt) -> Arc<CipherKey> } }
//! ```
//!
//! Supported lookups:
//! 1. `(domain_id, base_key_id, salt)` triplet, as recorded in an encryption header.
//! 2. Latest key inserted for a domain, used when encrypting new data.
//!
//! Cache misses are returned as [`CipherError::KeyNotFound`]; fetching base
//! key material from the key manager is the caller's job (see
//! [`crate::provider::KeyResolver`]).
//!
//! Keys are immutable: different material under an existing `base_key_id`
//! is rejected with [`CipherError::UpdateCipherKey`].

use std::collections::HashMap;
use std::sync::Arc;

use atrest_core::{BaseKeyId, EncryptDomainId, RandomSalt};
use parking_lot::RwLock;

use crate::cipher_key::CipherKey;
use crate::error::{CipherError, CipherResult};

type KeyIdCacheKey = (BaseKeyId, RandomSalt);

#[derive(Default)]
struct IndexState {
    keys: HashMap<KeyIdCacheKey, Arc<CipherKey>>,
    latest: Option<KeyIdCacheKey>,
}

impl IndexState {
    /// Any key derived from `base_key_id`, preferring the latest one.
    fn find_by_base_id(&self, base_key_id: BaseKeyId) -> Option<&Arc<CipherKey>> {
        if let Some(latest) = self.latest_for(base_key_id) {
            return Some(latest);
        }
        self.keys
            .values()
            .filter(|key| key.base_key_id() == base_key_id)
            .max_by_key(|key| key.creation_time())
    }

    /// The latest key, if it was derived from `base_key_id`.
    fn latest_for(&self, base_key_id: BaseKeyId) -> Option<&Arc<CipherKey>> {
        self.latest
            .and_then(|id| self.keys.get(&id))
            .filter(|key| key.base_key_id() == base_key_id)
    }
}

/// Cipher keys of one encryption domain, indexed by `(base_key_id, salt)`.
pub struct DomainKeyIndex {
    domain_id: EncryptDomainId,
    state: RwLock<IndexState>,
}

impl DomainKeyIndex {
    pub fn new(domain_id: EncryptDomainId) -> Self {
        Self {
            domain_id,
            state: RwLock::new(IndexState::default()),
        }
    }

    pub fn domain_id(&self) -> EncryptDomainId {
        self.domain_id
    }

    /// The key most recently added through [`Self::insert_base_key`].
    pub fn latest_cipher_key(&self) -> CipherResult<Arc<CipherKey>> {
        let state = self.state.read();
        state
            .latest
            .and_then(|id| state.keys.get(&id))
            .cloned()
            .ok_or(CipherError::KeyNotFound {
                domain_id: self.domain_id,
                base_key_id: None,
                salt: None,
            })
    }

    pub fn cipher_key(
        &self,
        base_key_id: BaseKeyId,
        salt: RandomSalt,
    ) -> CipherResult<Arc<CipherKey>> {
        self.state
            .read()
            .keys
            .get(&(base_key_id, salt))
            .cloned()
            .ok_or(CipherError::KeyNotFound {
                domain_id: self.domain_id,
                base_key_id: Some(base_key_id),
                salt: Some(salt),
            })
    }

    /// Derive a key under a fresh salt and make it the domain's latest key.
    ///
    /// If the latest key already comes from `base_key_id` with identical
    /// material it is returned and nothing changes. Material that differs
    /// from any cached key of the same `base_key_id` is rejected.
    pub fn insert_base_key(
        &self,
        base_key_id: BaseKeyId,
        base_key: &[u8],
    ) -> CipherResult<Arc<CipherKey>> {
        {
            let state = self.state.read();
            if let Some(latest) = state.latest_for(base_key_id) {
                return self.reuse_existing(latest, base_key, None);
            }
            self.check_same_material(&state, base_key_id, base_key)?;
        }

        let candidate = CipherKey::new(self.domain_id, base_key_id, base_key)?;

        let mut state = self.state.write();
        // A racing insert of the same base key may have won while we derived.
        if let Some(latest) = state.latest_for(base_key_id) {
            return self.reuse_existing(latest, base_key, None);
        }
        self.check_same_material(&state, base_key_id, base_key)?;

        let id = (base_key_id, candidate.salt());
        let key = Arc::new(candidate);
        state.keys.insert(id, Arc::clone(&key));
        state.latest = Some(id);

        tracing::debug!(
            domain_id = self.domain_id,
            base_key_id,
            salt = id.1,
            "inserted latest cipher key"
        );
        Ok(key)
    }

    /// Insert a key for a known `(base_key_id, salt)` identity, typically
    /// rebuilt from an encryption header. Never moves the latest pointer.
    pub fn insert_base_key_with_salt(
        &self,
        base_key_id: BaseKeyId,
        base_key: &[u8],
        salt: RandomSalt,
    ) -> CipherResult<Arc<CipherKey>> {
        let id = (base_key_id, salt);
        {
            let state = self.state.read();
            if let Some(existing) = state.keys.get(&id) {
                return self.reuse_existing(existing, base_key, Some(salt));
            }
        }

        let candidate = CipherKey::with_salt(self.domain_id, base_key_id, base_key, salt)?;

        let mut state = self.state.write();
        if let Some(existing) = state.keys.get(&id) {
            return self.reuse_existing(existing, base_key, Some(salt));
        }
        if state
            .find_by_base_id(base_key_id)
            .is_some_and(|sibling| !sibling.has_base_key(base_key))
        {
            return Err(self.update_rejected(base_key_id, Some(salt)));
        }

        let key = Arc::new(candidate);
        state.keys.insert(id, Arc::clone(&key));

        tracing::debug!(
            domain_id = self.domain_id,
            base_key_id,
            salt,
            "inserted cipher key"
        );
        Ok(key)
    }

    /// Point-in-time snapshot of every cached key.
    pub fn all_cipher_keys(&self) -> Vec<Arc<CipherKey>> {
        self.state.read().keys.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().keys.is_empty()
    }

    /// Drop every cached key of this domain.
    pub fn cleanup(&self) {
        let mut state = self.state.write();
        state.keys.clear();
        state.latest = None;
    }

    fn reuse_existing(
        &self,
        existing: &Arc<CipherKey>,
        base_key: &[u8],
        salt: Option<RandomSalt>,
    ) -> CipherResult<Arc<CipherKey>> {
        if existing.has_base_key(base_key) {
            Ok(Arc::clone(existing))
        } else {
            Err(self.update_rejected(existing.base_key_id(), salt))
        }
    }

    fn check_same_material(
        &self,
        state: &IndexState,
        base_key_id: BaseKeyId,
        base_key: &[u8],
    ) -> CipherResult<()> {
        match state.find_by_base_id(base_key_id) {
            Some(sibling) if !sibling.has_base_key(base_key) => {
                Err(self.update_rejected(base_key_id, None))
            }
            _ => Ok(()),
        }
    }

    fn update_rejected(&self, base_key_id: BaseKeyId, salt: Option<RandomSalt>) -> CipherError {
        tracing::warn!(
            domain_id = self.domain_id,
            base_key_id,
            "rejected attempt to update immutable cipher key"
        );
        CipherError::UpdateCipherKey {
            domain_id: self.domain_id,
            base_key_id,
            salt,
        }
    }
}

/// Process-wide cipher key cache, partitioned by encryption domain.
///
/// Build one at startup, share it as `Arc<CipherKeyCache>`, and call
/// [`CipherKeyCache::cleanup`] on shutdown so plaintext key material does not
/// outlive the process's need for it. Engines hold their own `Arc<CipherKey>`,
/// so cleanup never invalidates an operation already in flight.
#[derive(Default)]
pub struct CipherKeyCache {
    domains: RwLock<HashMap<EncryptDomainId, DomainKeyIndex>>,
}

impl CipherKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert base key material under a fresh salt; the result becomes the
    /// domain's latest key.
    pub fn insert_cipher_key(
        &self,
        domain_id: EncryptDomainId,
        base_key_id: BaseKeyId,
        base_key: &[u8],
    ) -> CipherResult<Arc<CipherKey>> {
        self.with_index(domain_id, |index| index.insert_base_key(base_key_id, base_key))
    }

    /// Insert base key material for a known salt (header-driven reconstruction).
    pub fn insert_cipher_key_with_salt(
        &self,
        domain_id: EncryptDomainId,
        base_key_id: BaseKeyId,
        base_key: &[u8],
        salt: RandomSalt,
    ) -> CipherResult<Arc<CipherKey>> {
        self.with_index(domain_id, |index| {
            index.insert_base_key_with_salt(base_key_id, base_key, salt)
        })
    }

    pub fn latest_cipher_key(&self, domain_id: EncryptDomainId) -> CipherResult<Arc<CipherKey>> {
        match self.domains.read().get(&domain_id) {
            Some(index) => index.latest_cipher_key(),
            None => Err(CipherError::KeyNotFound {
                domain_id,
                base_key_id: None,
                salt: None,
            }),
        }
    }

    pub fn cipher_key(
        &self,
        domain_id: EncryptDomainId,
        base_key_id: BaseKeyId,
        salt: RandomSalt,
    ) -> CipherResult<Arc<CipherKey>> {
        match self.domains.read().get(&domain_id) {
            Some(index) => index.cipher_key(base_key_id, salt),
            None => Err(CipherError::KeyNotFound {
                domain_id,
                base_key_id: Some(base_key_id),
                salt: Some(salt),
            }),
        }
    }

    /// Point-in-time snapshot of a domain's keys; empty for unknown domains.
    pub fn all_cipher_keys(&self, domain_id: EncryptDomainId) -> Vec<Arc<CipherKey>> {
        self.domains
            .read()
            .get(&domain_id)
            .map(DomainKeyIndex::all_cipher_keys)
            .unwrap_or_default()
    }

    /// Drop every key of one domain (e.g. the domain was destroyed).
    pub fn reset_domain(&self, domain_id: EncryptDomainId) {
        if let Some(index) = self.domains.write().remove(&domain_id) {
            tracing::debug!(domain_id, keys = index.len(), "reset encryption domain");
            index.cleanup();
        }
    }

    /// Drop every cached key of every domain.
    pub fn cleanup(&self) {
        let mut domains = self.domains.write();
        for index in domains.values() {
            index.cleanup();
        }
        let dropped = domains.len();
        domains.clear();
        tracing::info!(domains = dropped, "cipher key cache cleaned up");
    }

    pub fn domain_ids(&self) -> Vec<EncryptDomainId> {
        self.domains.read().keys().copied().collect()
    }

    /// Total number of cached keys across all domains.
    pub fn len(&self) -> usize {
        self.domains.read().values().map(DomainKeyIndex::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` against the domain's index, creating the index on first use.
    ///
    /// The outer lock stays held (shared) for the duration of `f`, so a
    /// concurrent reset or cleanup cannot detach the index mid-insert.
    fn with_index<R>(&self, domain_id: EncryptDomainId, f: impl FnOnce(&DomainKeyIndex) -> R) -> R {
        {
            let domains = self.domains.read();
            if let Some(index) = domains.get(&domain_id) {
                return f(index);
            }
        }
        let mut domains = self.domains.write();
        let index = domains
            .entry(domain_id)
            .or_insert_with(|| DomainKeyIndex::new(domain_id));
        f(index)
    }
}

impl std::fmt::Debug for CipherKeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherKeyCache")
            .field("domains", &self.domain_ids())
            .field("keys", &self.len())
            .finish()
    }
}
