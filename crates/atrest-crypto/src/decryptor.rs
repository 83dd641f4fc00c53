//! AES-256-CTR blob decryption with header and auth token verification
//!
//! Callers rebuild the cipher keys from the header's identity fields (see
//! [`crate::provider::KeyResolver`]) and hand them to a [`Decryptor`].
//! `decrypt` always checks header metadata and auth tokens before touching the
//! ciphertext; nothing is decrypted if any check fails.
//!
//! In multi-token mode the header token can be verified on its own via
//! [`Decryptor::verify_header_auth_token`], before the payload is even read.

use std::sync::Arc;

use atrest_core::{AuthTokenMode, EncryptMode};

use crate::auth_token::verify_auth_token;
use crate::buf::EncryptBuf;
use crate::cipher_key::CipherKey;
use crate::encryptor::apply_keystream;
use crate::error::{CipherError, CipherResult};
use crate::header::{AuthTokens, EncryptionHeader, ENCRYPT_HEADER_SIZE, ENCRYPT_HEADER_VERSION};
use crate::AES_256_IV_LENGTH;

pub struct Decryptor {
    text_key: Arc<CipherKey>,
    header_key: Arc<CipherKey>,
    iv: [u8; AES_256_IV_LENGTH],
    required_mode: Option<AuthTokenMode>,
    /// Serialized header whose header auth token already verified.
    verified_header: Option<[u8; ENCRYPT_HEADER_SIZE]>,
}

impl Decryptor {
    pub fn new(
        text_key: Arc<CipherKey>,
        header_key: Arc<CipherKey>,
        iv: &[u8],
    ) -> CipherResult<Self> {
        let iv: [u8; AES_256_IV_LENGTH] = iv
            .try_into()
            .map_err(|_| CipherError::InvalidIv(iv.len()))?;
        Ok(Self {
            text_key,
            header_key,
            iv,
            required_mode: None,
            verified_header: None,
        })
    }

    /// Decryptor using the IV recorded in `header`.
    pub fn for_header(
        text_key: Arc<CipherKey>,
        header_key: Arc<CipherKey>,
        header: &EncryptionHeader,
    ) -> Self {
        Self {
            text_key,
            header_key,
            iv: header.cipher_text_details.iv,
            required_mode: None,
            verified_header: None,
        }
    }

    /// Reject headers that declare any auth token mode other than `mode`.
    pub fn require_auth_token_mode(mut self, mode: AuthTokenMode) -> Self {
        self.required_mode = Some(mode);
        self
    }

    /// Check that `header` was produced by the configured keys and IV with a
    /// supported format version and algorithm.
    pub fn verify_header_metadata(&self, header: &EncryptionHeader) -> CipherResult<()> {
        let flags = &header.flags;
        if flags.size as usize != ENCRYPT_HEADER_SIZE {
            return Err(mismatch(format!("header size {}", flags.size)));
        }
        if flags.header_version != ENCRYPT_HEADER_VERSION {
            return Err(mismatch(format!(
                "unsupported header version {}",
                flags.header_version
            )));
        }
        if flags.encrypt_mode != EncryptMode::Aes256Ctr as u8 {
            return Err(mismatch(format!(
                "unsupported encrypt mode {}",
                flags.encrypt_mode
            )));
        }
        if let Some(required) = self.required_mode {
            if header.auth_token_mode() != required {
                return Err(mismatch(format!(
                    "auth token mode {} (required {required})",
                    header.auth_token_mode()
                )));
            }
        }

        let ct = &header.cipher_text_details;
        if ct.domain_id != self.text_key.domain_id()
            || ct.base_key_id != self.text_key.base_key_id()
            || ct.salt != self.text_key.salt()
        {
            return Err(mismatch(format!(
                "ciphertext key domain={} base_key_id={} salt={} does not match supplied key",
                ct.domain_id, ct.base_key_id, ct.salt
            )));
        }
        if ct.iv != self.iv {
            return Err(mismatch("IV does not match".into()));
        }

        let hd = &header.cipher_header_details;
        if hd.domain_id != self.header_key.domain_id()
            || hd.base_key_id != self.header_key.base_key_id()
            || hd.salt != self.header_key.salt()
        {
            return Err(mismatch(format!(
                "header key domain={} base_key_id={} salt={} does not match supplied key",
                hd.domain_id, hd.base_key_id, hd.salt
            )));
        }
        Ok(())
    }

    /// Verify the header token without the ciphertext.
    ///
    /// Only multi-token headers carry a standalone header token; for other
    /// modes this only checks metadata. Repeating the call for the same
    /// header bytes skips the HMAC.
    pub fn verify_header_auth_token(&mut self, header: &EncryptionHeader) -> CipherResult<()> {
        self.verify_header_metadata(header)?;
        if let AuthTokens::Multi {
            header_auth_token, ..
        } = &header.auth_tokens
        {
            let bytes = header.to_bytes();
            if self.verified_header.as_ref() == Some(&bytes) {
                return Ok(());
            }
            verify_auth_token(
                self.header_key.as_bytes(),
                &[&header.authenticated_bytes()],
                header_auth_token,
                "header",
            )?;
            self.verified_header = Some(bytes);
        }
        Ok(())
    }

    /// Verify every auth token the header carries against `ciphertext`.
    ///
    /// Tokens covering the ciphertext are recomputed on every call.
    pub fn verify_auth_tokens(
        &mut self,
        ciphertext: &[u8],
        header: &EncryptionHeader,
    ) -> CipherResult<()> {
        self.verify_header_metadata(header)?;
        match &header.auth_tokens {
            AuthTokens::None => {}
            AuthTokens::Single { auth_token } => {
                verify_auth_token(
                    self.header_key.as_bytes(),
                    &[&header.authenticated_bytes(), ciphertext],
                    auth_token,
                    "single",
                )?;
            }
            AuthTokens::Multi {
                cipher_text_auth_token,
                ..
            } => {
                self.verify_header_auth_token(header)?;
                verify_auth_token(
                    self.text_key.as_bytes(),
                    &[ciphertext],
                    cipher_text_auth_token,
                    "ciphertext",
                )?;
            }
        }
        tracing::debug!(mode = %header.auth_token_mode(), "auth tokens verified");
        Ok(())
    }

    /// Verify `header` and decrypt `ciphertext`.
    pub fn decrypt(
        mut self,
        ciphertext: &[u8],
        header: &EncryptionHeader,
    ) -> CipherResult<EncryptBuf> {
        self.verify_auth_tokens(ciphertext, header)?;

        let mut plaintext = ciphertext.to_vec();
        apply_keystream(self.text_key.as_bytes(), &self.iv, &mut plaintext);

        tracing::debug!(
            domain_id = self.text_key.domain_id(),
            base_key_id = self.text_key.base_key_id(),
            len = ciphertext.len(),
            mode = %header.auth_token_mode(),
            "decrypted blob"
        );
        Ok(EncryptBuf::from_vec(plaintext))
    }
}

impl std::fmt::Debug for Decryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decryptor")
            .field("text_key", &self.text_key)
            .field("header_key", &self.header_key)
            .field("required_mode", &self.required_mode)
            .field("header_verified", &self.verified_header.is_some())
            .finish()
    }
}

fn mismatch(detail: String) -> CipherError {
    tracing::warn!(%detail, "encryption header metadata mismatch");
    CipherError::HeaderMetadataMismatch(detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryptor::Encryptor;

    const IV: [u8; 16] = [0x5A; 16];

    fn keys() -> (Arc<CipherKey>, Arc<CipherKey>) {
        let text = CipherKey::with_salt(7, 3, &[0x33; 32], 100).unwrap();
        let header = CipherKey::with_salt(7, 4, &[0x44; 32], 200).unwrap();
        (Arc::new(text), Arc::new(header))
    }

    fn encrypt(mode: AuthTokenMode, plaintext: &[u8]) -> (Vec<u8>, EncryptionHeader) {
        let (text, header_key) = keys();
        let (buf, header) = Encryptor::new(text, header_key, &IV, mode)
            .unwrap()
            .encrypt(plaintext)
            .unwrap();
        (buf.to_vec(), header)
    }

    fn decryptor() -> Decryptor {
        let (text, header_key) = keys();
        Decryptor::new(text, header_key, &IV).unwrap()
    }

    #[test]
    fn test_roundtrip_all_modes() {
        let plaintext = b"hello, encrypted page!";
        for mode in [AuthTokenMode::None, AuthTokenMode::Single, AuthTokenMode::Multi] {
            let (ciphertext, header) = encrypt(mode, plaintext);
            let out = decryptor().decrypt(&ciphertext, &header).unwrap();
            assert_eq!(out.as_slice(), plaintext, "mode {mode}");
        }
    }

    #[test]
    fn test_for_header_uses_header_iv() {
        let (ciphertext, header) = encrypt(AuthTokenMode::Multi, b"abc");
        let (text, header_key) = keys();
        let out = Decryptor::for_header(text, header_key, &header)
            .decrypt(&ciphertext, &header)
            .unwrap();
        assert_eq!(out.as_slice(), b"abc");
    }

    #[test]
    fn test_wrong_text_key_is_metadata_mismatch() {
        let (ciphertext, header) = encrypt(AuthTokenMode::Single, b"abc");
        let other = Arc::new(CipherKey::with_salt(7, 3, &[0x33; 32], 101).unwrap());
        let (_, header_key) = keys();
        let err = Decryptor::new(other, header_key, &IV)
            .unwrap()
            .decrypt(&ciphertext, &header)
            .unwrap_err();
        assert!(matches!(err, CipherError::HeaderMetadataMismatch(_)));
    }

    #[test]
    fn test_wrong_header_key_is_metadata_mismatch() {
        let (_, header) = encrypt(AuthTokenMode::Multi, b"abc");
        let (text, _) = keys();
        let other = Arc::new(CipherKey::with_salt(8, 4, &[0x44; 32], 200).unwrap());
        let dec = Decryptor::new(text, other, &IV).unwrap();
        assert!(matches!(
            dec.verify_header_metadata(&header),
            Err(CipherError::HeaderMetadataMismatch(_))
        ));
    }

    #[test]
    fn test_iv_mismatch() {
        let (_, header) = encrypt(AuthTokenMode::Multi, b"abc");
        let (text, header_key) = keys();
        let dec = Decryptor::new(text, header_key, &[0u8; 16]).unwrap();
        assert!(matches!(
            dec.verify_header_metadata(&header),
            Err(CipherError::HeaderMetadataMismatch(_))
        ));
    }

    #[test]
    fn test_unsupported_version_and_algorithm() {
        let (ciphertext, mut header) = encrypt(AuthTokenMode::None, b"abc");
        header.flags.header_version = 2;
        assert!(matches!(
            decryptor().decrypt(&ciphertext, &header),
            Err(CipherError::HeaderMetadataMismatch(_))
        ));

        header.flags.header_version = ENCRYPT_HEADER_VERSION;
        header.flags.encrypt_mode = EncryptMode::None as u8;
        assert!(matches!(
            decryptor().decrypt(&ciphertext, &header),
            Err(CipherError::HeaderMetadataMismatch(_))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_single() {
        let (mut ciphertext, header) = encrypt(AuthTokenMode::Single, b"secret data");
        ciphertext[0] ^= 0x01;
        let err = decryptor().decrypt(&ciphertext, &header).unwrap_err();
        assert!(matches!(err, CipherError::AuthTokenMismatch("single")));
    }

    #[test]
    fn test_tampered_ciphertext_multi() {
        let (mut ciphertext, header) = encrypt(AuthTokenMode::Multi, b"secret data");
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x80;
        let err = decryptor().decrypt(&ciphertext, &header).unwrap_err();
        assert!(matches!(err, CipherError::AuthTokenMismatch("ciphertext")));
    }

    #[test]
    fn test_tampered_tokens() {
        let (ciphertext, mut header) = encrypt(AuthTokenMode::Multi, b"secret data");
        if let AuthTokens::Multi {
            header_auth_token, ..
        } = &mut header.auth_tokens
        {
            header_auth_token[3] ^= 0x10;
        }
        let err = decryptor().decrypt(&ciphertext, &header).unwrap_err();
        assert!(matches!(err, CipherError::AuthTokenMismatch("header")));

        let (ciphertext, mut header) = encrypt(AuthTokenMode::Multi, b"secret data");
        if let AuthTokens::Multi {
            cipher_text_auth_token,
            ..
        } = &mut header.auth_tokens
        {
            cipher_text_auth_token[0] ^= 0x01;
        }
        // the ciphertext token is covered by the header token
        let err = decryptor().decrypt(&ciphertext, &header).unwrap_err();
        assert!(matches!(err, CipherError::AuthTokenMismatch("header")));
    }

    #[test]
    fn test_header_only_verification_multi() {
        let (_, header) = encrypt(AuthTokenMode::Multi, b"large backup block");
        let mut dec = decryptor();
        dec.verify_header_auth_token(&header).unwrap();
        // second call is a no-op
        dec.verify_header_auth_token(&header).unwrap();
        assert_eq!(dec.verified_header, Some(header.to_bytes()));
    }

    #[test]
    fn test_header_only_verification_is_noop_for_single() {
        let (_, header) = encrypt(AuthTokenMode::Single, b"page");
        let mut dec = decryptor();
        dec.verify_header_auth_token(&header).unwrap();
        assert!(dec.verified_header.is_none());
    }

    #[test]
    fn test_verified_header_does_not_cover_a_different_header() {
        let (_, header) = encrypt(AuthTokenMode::Multi, b"payload");
        let mut dec = decryptor();
        dec.verify_header_auth_token(&header).unwrap();

        let mut forged = header;
        if let AuthTokens::Multi {
            cipher_text_auth_token,
            ..
        } = &mut forged.auth_tokens
        {
            cipher_text_auth_token[0] ^= 0x01;
        }
        let err = dec.verify_header_auth_token(&forged).unwrap_err();
        assert!(matches!(err, CipherError::AuthTokenMismatch("header")));
    }

    #[test]
    fn test_verify_then_decrypt() {
        let (ciphertext, header) = encrypt(AuthTokenMode::Multi, b"payload");
        let mut dec = decryptor();
        dec.verify_header_auth_token(&header).unwrap();
        dec.verify_auth_tokens(&ciphertext, &header).unwrap();
        let out = dec.decrypt(&ciphertext, &header).unwrap();
        assert_eq!(out.as_slice(), b"payload");
    }

    #[test]
    fn test_decrypt_rechecks_ciphertext_after_earlier_verification() {
        for (mode, token) in [
            (AuthTokenMode::Single, "single"),
            (AuthTokenMode::Multi, "ciphertext"),
        ] {
            let (ciphertext, header) = encrypt(mode, b"genuine payload");
            let mut dec = decryptor();
            dec.verify_auth_tokens(&ciphertext, &header).unwrap();

            let mut forged = ciphertext.clone();
            forged[0] ^= 0xFF;
            let err = dec.decrypt(&forged, &header).unwrap_err();
            assert!(
                matches!(err, CipherError::AuthTokenMismatch(t) if t == token),
                "mode {mode}: {err:?}"
            );
        }
    }

    #[test]
    fn test_required_mode_blocks_downgrade() {
        let (ciphertext, header) = encrypt(AuthTokenMode::Multi, b"payload");
        let mut downgraded = header;
        downgraded.auth_tokens = AuthTokens::None;

        let err = decryptor()
            .require_auth_token_mode(AuthTokenMode::Multi)
            .decrypt(&ciphertext, &downgraded)
            .unwrap_err();
        assert!(matches!(err, CipherError::HeaderMetadataMismatch(_)));

        let out = decryptor()
            .require_auth_token_mode(AuthTokenMode::Multi)
            .decrypt(&ciphertext, &header)
            .unwrap();
        assert_eq!(out.as_slice(), b"payload");
    }

    #[test]
    fn test_same_key_for_text_and_header() {
        let key = Arc::new(CipherKey::with_salt(1, 1, &[0x11; 32], 1).unwrap());
        let (ct, header) = Encryptor::new(Arc::clone(&key), Arc::clone(&key), &IV, AuthTokenMode::Multi)
            .unwrap()
            .encrypt(b"same key")
            .unwrap();
        let out = Decryptor::new(Arc::clone(&key), key, &IV)
            .unwrap()
            .decrypt(ct.as_slice(), &header)
            .unwrap();
        assert_eq!(out.as_slice(), b"same key");
    }
}
