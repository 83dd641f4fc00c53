use atrest_core::{BaseKeyId, EncryptDomainId, RandomSalt};
use thiserror::Error;

pub type CipherResult<T> = Result<T, CipherError>;

#[derive(Debug, Error)]
pub enum CipherError {
    /// Lookup miss. The caller fetches base key material and re-inserts.
    #[error("cipher key not found: domain={domain_id} base_key_id={base_key_id:?} salt={salt:?}")]
    KeyNotFound {
        domain_id: EncryptDomainId,
        base_key_id: Option<BaseKeyId>,
        salt: Option<RandomSalt>,
    },

    /// Attempt to replace immutable key material under an existing identity.
    #[error("cipher key update rejected: domain={domain_id} base_key_id={base_key_id} salt={salt:?}")]
    UpdateCipherKey {
        domain_id: EncryptDomainId,
        base_key_id: BaseKeyId,
        salt: Option<RandomSalt>,
    },

    #[error("encryption header metadata mismatch: {0}")]
    HeaderMetadataMismatch(String),

    #[error("auth token mismatch: {0}")]
    AuthTokenMismatch(&'static str),

    #[error("invalid encryption header: {0}")]
    InvalidHeader(String),

    #[error("invalid base key: {0}")]
    InvalidBaseKey(String),

    #[error("invalid IV length: expected {expected} bytes, got {0}", expected = crate::AES_256_IV_LENGTH)]
    InvalidIv(usize),

    #[error("logical size {logical} exceeds allocated size {allocated}")]
    InvalidBufferSize { logical: usize, allocated: usize },

    #[error("key provider error: {0}")]
    KeyProvider(String),

    #[error("cipher operation failed: {0}")]
    Crypto(String),
}

impl CipherError {
    /// True for cache misses, which are recoverable by fetching key material.
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, CipherError::KeyNotFound { .. })
    }

    /// True when tampering, corruption or a mismatched header was detected.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            CipherError::AuthTokenMismatch(_)
                | CipherError::HeaderMetadataMismatch(_)
                | CipherError::InvalidHeader(_)
        )
    }
}
