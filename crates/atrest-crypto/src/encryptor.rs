//! AES-256-CTR blob encryption
//!
//! An [`Encryptor`] performs exactly one encryption: `encrypt` consumes it.
//! The produced [`EncryptionHeader`] records both key identities and the IV,
//! and carries auth tokens according to the requested [`AuthTokenMode`]:
//!
//! ```text
//! single: token = HMAC(header_key, header[tokens zeroed] || ciphertext)
//! multi:  ciphertext token = HMAC(text_key, ciphertext)
//!         header token     = HMAC(header_key, header[header token zeroed])
//! ```

use std::sync::Arc;

use aes::Aes256;
use atrest_core::{AuthTokenMode, EncryptMode};
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;

use crate::auth_token::compute_auth_token;
use crate::buf::EncryptBuf;
use crate::cipher_key::CipherKey;
use crate::error::{CipherError, CipherResult};
use crate::header::{
    AuthTokens, CipherHeaderDetails, CipherTextDetails, EncryptionHeader, HeaderFlags,
    ENCRYPT_HEADER_SIZE, ENCRYPT_HEADER_VERSION,
};
use crate::AES_256_IV_LENGTH;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

pub struct Encryptor {
    text_key: Arc<CipherKey>,
    header_key: Arc<CipherKey>,
    iv: [u8; AES_256_IV_LENGTH],
    auth_token_mode: AuthTokenMode,
}

impl Encryptor {
    /// - `text_key`: encrypts the payload
    /// - `header_key`: authenticates the header (may be the same key)
    /// - `iv`: exactly `AES_256_IV_LENGTH` bytes
    pub fn new(
        text_key: Arc<CipherKey>,
        header_key: Arc<CipherKey>,
        iv: &[u8],
        auth_token_mode: AuthTokenMode,
    ) -> CipherResult<Self> {
        let iv: [u8; AES_256_IV_LENGTH] = iv
            .try_into()
            .map_err(|_| CipherError::InvalidIv(iv.len()))?;
        Ok(Self {
            text_key,
            header_key,
            iv,
            auth_token_mode,
        })
    }

    /// Same as [`Encryptor::new`] with a random IV.
    pub fn with_random_iv(
        text_key: Arc<CipherKey>,
        header_key: Arc<CipherKey>,
        auth_token_mode: AuthTokenMode,
    ) -> Self {
        let mut iv = [0u8; AES_256_IV_LENGTH];
        rand::thread_rng().fill_bytes(&mut iv);
        Self {
            text_key,
            header_key,
            iv,
            auth_token_mode,
        }
    }

    pub fn iv(&self) -> &[u8; AES_256_IV_LENGTH] {
        &self.iv
    }

    /// Encrypt `plaintext`, returning the ciphertext (same length) and the
    /// fully populated header.
    pub fn encrypt(self, plaintext: &[u8]) -> CipherResult<(EncryptBuf, EncryptionHeader)> {
        let mut ciphertext = plaintext.to_vec();
        apply_keystream(self.text_key.as_bytes(), &self.iv, &mut ciphertext);

        let mut header = EncryptionHeader {
            flags: HeaderFlags {
                size: ENCRYPT_HEADER_SIZE as u8,
                header_version: ENCRYPT_HEADER_VERSION,
                encrypt_mode: EncryptMode::Aes256Ctr as u8,
            },
            cipher_text_details: CipherTextDetails {
                domain_id: self.text_key.domain_id(),
                base_key_id: self.text_key.base_key_id(),
                salt: self.text_key.salt(),
                iv: self.iv,
            },
            cipher_header_details: CipherHeaderDetails {
                domain_id: self.header_key.domain_id(),
                base_key_id: self.header_key.base_key_id(),
                salt: self.header_key.salt(),
            },
            auth_tokens: AuthTokens::empty(self.auth_token_mode),
        };

        match self.auth_token_mode {
            AuthTokenMode::None => {}
            AuthTokenMode::Single => {
                let auth_token = compute_auth_token(
                    self.header_key.as_bytes(),
                    &[&header.authenticated_bytes(), &ciphertext],
                )?;
                header.auth_tokens = AuthTokens::Single { auth_token };
            }
            AuthTokenMode::Multi => {
                let cipher_text_auth_token =
                    compute_auth_token(self.text_key.as_bytes(), &[&ciphertext])?;
                header.auth_tokens = AuthTokens::Multi {
                    cipher_text_auth_token,
                    header_auth_token: [0u8; crate::AUTH_TOKEN_SIZE],
                };
                let header_auth_token = compute_auth_token(
                    self.header_key.as_bytes(),
                    &[&header.authenticated_bytes()],
                )?;
                header.auth_tokens = AuthTokens::Multi {
                    cipher_text_auth_token,
                    header_auth_token,
                };
            }
        }

        tracing::debug!(
            domain_id = self.text_key.domain_id(),
            base_key_id = self.text_key.base_key_id(),
            len = plaintext.len(),
            mode = %self.auth_token_mode,
            "encrypted blob"
        );

        Ok((EncryptBuf::from_vec(ciphertext), header))
    }
}

impl std::fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encryptor")
            .field("text_key", &self.text_key)
            .field("header_key", &self.header_key)
            .field("auth_token_mode", &self.auth_token_mode)
            .finish()
    }
}

/// AES-256-CTR (128-bit big-endian counter) in place. Encrypts and decrypts.
pub(crate) fn apply_keystream(
    key: &[u8; crate::AES_256_KEY_LENGTH],
    iv: &[u8; AES_256_IV_LENGTH],
    buf: &mut [u8],
) {
    let mut cipher = Aes256Ctr::new(key.into(), iv.into());
    cipher.apply_keystream(buf);
}
