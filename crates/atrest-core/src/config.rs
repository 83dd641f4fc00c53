use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AtrestError, AtrestResult};
use crate::types::{AuthTokenMode, EncryptDomainId};

/// Top-level configuration (loaded from atrest.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AtrestConfig {
    pub logging: LoggingConfig,
    pub cipher: CipherConfig,
    pub keystore: KeystoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// Encryption defaults applied by callers that build Encryptors/Decryptors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CipherConfig {
    /// Auth token mode for newly encrypted blobs (default: multi)
    pub auth_token_mode: AuthTokenMode,
    /// Domain whose key protects headers; `None` reuses the payload domain
    pub header_domain_id: Option<EncryptDomainId>,
    /// Refuse to decrypt blobs whose header declares a different auth token mode
    pub require_auth_token: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    /// TOML file holding base key material (default: ~/.config/atrest/keys.toml)
    pub path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for CipherConfig {
    fn default() -> Self {
        Self {
            auth_token_mode: AuthTokenMode::Multi,
            header_domain_id: None,
            require_auth_token: true,
        }
    }
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.config/atrest/keys.toml"),
        }
    }
}

impl AtrestConfig {
    /// Load configuration from `path`, falling back to defaults when the file
    /// does not exist.
    pub fn load(path: &Path) -> AtrestResult<Self> {
        if !path.exists() {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| AtrestError::Config(format!("parsing {}: {e}", path.display())))
    }
}

/// Expand a leading `~/` to `$HOME`.
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}
