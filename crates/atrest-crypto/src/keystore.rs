//! TOML file of base keys
//!
//! ```toml
//! [[keys]]
//! domain_id = 7
//! base_key_id = 3
//! key = "<base64, 32 bytes>"
//! ```
//!
//! Stands in for an external key manager in the CLI and in tests.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use atrest_core::{BaseKeyId, EncryptDomainId};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use zeroize::Zeroizing;

use crate::error::{CipherError, CipherResult};
use crate::provider::BaseKeyProvider;
use crate::AES_256_KEY_LENGTH;

#[derive(Deserialize)]
struct KeyFile {
    #[serde(default)]
    keys: Vec<KeyEntry>,
}

#[derive(Deserialize)]
struct KeyEntry {
    domain_id: EncryptDomainId,
    base_key_id: BaseKeyId,
    key: String,
}

pub struct FileKeyStore {
    path: PathBuf,
    keys: HashMap<(EncryptDomainId, BaseKeyId), SecretString>,
}

impl FileKeyStore {
    /// Load and validate every entry in `path`. A missing file is an empty store.
    pub fn open(path: &Path) -> CipherResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "key store not found, starting empty");
            return Ok(Self {
                path: path.to_path_buf(),
                keys: HashMap::new(),
            });
        }

        let content = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
            CipherError::KeyProvider(format!("reading key store {}: {e}", path.display()))
        })?);
        let keys = parse_entries(path, &content)?;

        tracing::debug!(path = %path.display(), keys = keys.len(), "loaded key store");
        Ok(Self {
            path: path.to_path_buf(),
            keys,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// `(domain_id, base_key_id)` pairs, sorted.
    pub fn key_ids(&self) -> Vec<(EncryptDomainId, BaseKeyId)> {
        let mut ids: Vec<_> = self.keys.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl BaseKeyProvider for FileKeyStore {
    fn fetch_base_key(
        &self,
        domain_id: EncryptDomainId,
        base_key_id: BaseKeyId,
    ) -> CipherResult<Zeroizing<Vec<u8>>> {
        let secret = self.keys.get(&(domain_id, base_key_id)).ok_or_else(|| {
            CipherError::KeyProvider(format!(
                "no base key {base_key_id} in domain {domain_id} ({})",
                self.path.display()
            ))
        })?;
        decode_key(secret, domain_id, base_key_id)
    }

    fn latest_base_key(
        &self,
        domain_id: EncryptDomainId,
    ) -> CipherResult<(BaseKeyId, Zeroizing<Vec<u8>>)> {
        let base_key_id = self
            .keys
            .keys()
            .filter(|(domain, _)| *domain == domain_id)
            .map(|(_, id)| *id)
            .max()
            .ok_or_else(|| {
                CipherError::KeyProvider(format!(
                    "no base keys in domain {domain_id} ({})",
                    self.path.display()
                ))
            })?;
        Ok((base_key_id, self.fetch_base_key(domain_id, base_key_id)?))
    }
}

impl std::fmt::Debug for FileKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKeyStore")
            .field("path", &self.path)
            .field("keys", &self.key_ids())
            .finish()
    }
}

/// Append a fresh random 32-byte base key to the store at `path`.
///
/// Fails if `(domain_id, base_key_id)` already exists. The file is created
/// with owner-only permissions on unix. The existence check and the append
/// happen under an exclusive lock on the store file.
pub fn generate_key(
    path: &Path,
    domain_id: EncryptDomainId,
    base_key_id: BaseKeyId,
) -> CipherResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CipherError::KeyProvider(format!("creating dir {}: {e}", parent.display()))
            })?;
        }
    }

    let mut options = std::fs::OpenOptions::new();
    options.read(true).create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(|e| {
        CipherError::KeyProvider(format!("opening key store {}: {e}", path.display()))
    })?;
    file.lock().map_err(|e| {
        CipherError::KeyProvider(format!("locking key store {}: {e}", path.display()))
    })?;

    let mut content = Zeroizing::new(String::new());
    file.read_to_string(&mut content).map_err(|e| {
        CipherError::KeyProvider(format!("reading key store {}: {e}", path.display()))
    })?;
    if parse_entries(path, &content)?.contains_key(&(domain_id, base_key_id)) {
        return Err(CipherError::KeyProvider(format!(
            "base key {base_key_id} already exists in domain {domain_id}"
        )));
    }

    let mut raw = Zeroizing::new([0u8; AES_256_KEY_LENGTH]);
    rand::thread_rng().fill_bytes(&mut raw[..]);
    let entry = Zeroizing::new(format!(
        "\n[[keys]]\ndomain_id = {domain_id}\nbase_key_id = {base_key_id}\nkey = \"{}\"\n",
        Zeroizing::new(STANDARD.encode(&raw[..])).as_str()
    ));
    file.write_all(entry.as_bytes()).map_err(|e| {
        CipherError::KeyProvider(format!("writing key store {}: {e}", path.display()))
    })?;
    // lock is released when `file` drops

    tracing::info!(domain_id, base_key_id, path = %path.display(), "generated base key");
    Ok(())
}

/// Decode and validate every `[[keys]]` entry of a store file.
///
/// An id listed twice with different key material is an error.
fn parse_entries(
    path: &Path,
    content: &str,
) -> CipherResult<HashMap<(EncryptDomainId, BaseKeyId), SecretString>> {
    let file: KeyFile = toml::from_str(content).map_err(|e| {
        CipherError::KeyProvider(format!("parsing key store {}: {e}", path.display()))
    })?;

    let mut keys: HashMap<_, SecretString> = HashMap::new();
    for entry in file.keys {
        let secret = SecretString::from(entry.key);
        decode_key(&secret, entry.domain_id, entry.base_key_id)?;
        let id = (entry.domain_id, entry.base_key_id);
        if let Some(existing) = keys.get(&id) {
            if existing.expose_secret() != secret.expose_secret() {
                return Err(CipherError::KeyProvider(format!(
                    "conflicting entries for base key {} in domain {}",
                    id.1, id.0
                )));
            }
            continue;
        }
        keys.insert(id, secret);
    }
    Ok(keys)
}

fn decode_key(
    secret: &SecretString,
    domain_id: EncryptDomainId,
    base_key_id: BaseKeyId,
) -> CipherResult<Zeroizing<Vec<u8>>> {
    let bytes = Zeroizing::new(STANDARD.decode(secret.expose_secret()).map_err(|e| {
        CipherError::KeyProvider(format!(
            "base key {base_key_id} in domain {domain_id} is not valid base64: {e}"
        ))
    })?);
    if bytes.is_empty() {
        return Err(CipherError::InvalidBaseKey(format!(
            "base key {base_key_id} in domain {domain_id} is empty"
        )));
    }
    Ok(bytes)
}
