//! atrest-crypto: at-rest encryption of pages and backup blobs
//!
//! Every encrypted blob is AES-256-CTR ciphertext plus a fixed-size
//! [`EncryptionHeader`] stored alongside it in plaintext. The header names the
//! keys that produced it, so a reader can rebuild them:
//!
//! ```text
//! base key (key manager, by domain_id + base_key_id)
//!   └── CipherKey = HMAC-SHA256(base_key, domain_id || base_key_id || salt)
//!         ├── text key:   AES-256-CTR over the payload
//!         └── header key: HMAC-SHA256 auth tokens over header (+ payload)
//! ```
//!
//! Derived keys live in a [`CipherKeyCache`] shared as `Arc`; a
//! [`KeyResolver`] fills it from a [`BaseKeyProvider`] on miss.

pub mod auth_token;
pub mod buf;
pub mod cipher_key;
pub mod decryptor;
pub mod encryptor;
pub mod error;
pub mod header;
pub mod key_cache;
pub mod keystore;
pub mod provider;

pub use buf::EncryptBuf;
pub use cipher_key::CipherKey;
pub use decryptor::Decryptor;
pub use encryptor::Encryptor;
pub use error::{CipherError, CipherResult};
pub use header::{
    AuthTokens, CipherHeaderDetails, CipherTextDetails, EncryptionHeader, HeaderFlags,
    HeaderSummary, ENCRYPT_HEADER_SIZE, ENCRYPT_HEADER_VERSION,
};
pub use key_cache::{CipherKeyCache, DomainKeyIndex};
pub use keystore::{generate_key, FileKeyStore};
pub use provider::{BaseKeyProvider, KeyResolver, StaticKeyProvider};

/// AES-256 key size in bytes
pub const AES_256_KEY_LENGTH: usize = 32;

/// AES block / CTR IV size in bytes
pub const AES_256_IV_LENGTH: usize = 16;

/// Stored auth token size (truncated HMAC-SHA-256)
pub const AUTH_TOKEN_SIZE: usize = 16;

/// Full HMAC-SHA-256 output size
pub const DIGEST_SIZE: usize = 32;
