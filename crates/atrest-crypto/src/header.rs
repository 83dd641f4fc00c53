//! Encryption header persisted alongside every ciphertext blob
//!
//! Binary layout (104 bytes, little-endian integers, no padding):
//! ```text
//! [0]       size (always 104; reading this byte is enough to size the header)
//! [1]       header version
//! [2]       encrypt mode
//! [3]       auth token mode
//! [4..8]    reserved (zero)
//! [8..16]   ciphertext key domain id
//! [16..24]  ciphertext key base key id
//! [24..32]  ciphertext key salt
//! [32..48]  IV
//! [48..56]  header key domain id
//! [56..64]  header key base key id
//! [64..72]  header key salt
//! [72..104] auth tokens
//!             single: [16 bytes: token][16 bytes: reserved]
//!             multi:  [16 bytes: ciphertext token][16 bytes: header token]
//! ```
//!
//! The header is stored in plaintext so readers can rebuild the cipher keys;
//! auth tokens protect it against tampering and bit rot.

use atrest_core::{AuthTokenMode, BaseKeyId, EncryptDomainId, EncryptMode, RandomSalt};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;

use crate::auth_token::AuthToken;
use crate::error::{CipherError, CipherResult};
use crate::{AES_256_IV_LENGTH, AUTH_TOKEN_SIZE};

/// Serialized header size in bytes.
pub const ENCRYPT_HEADER_SIZE: usize = 104;

/// Current header format version.
pub const ENCRYPT_HEADER_VERSION: u8 = 1;

const FLAGS_RESERVED: std::ops::Range<usize> = 4..8;
const CIPHER_TEXT_DETAILS: usize = 8;
const CIPHER_HEADER_DETAILS: usize = 48;
const AUTH_TOKENS: usize = 72;
const SECOND_TOKEN: usize = AUTH_TOKENS + AUTH_TOKEN_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderFlags {
    pub size: u8,
    pub header_version: u8,
    /// Raw algorithm id; validated when a decryptor checks the header.
    pub encrypt_mode: u8,
}

impl Default for HeaderFlags {
    fn default() -> Self {
        Self {
            size: ENCRYPT_HEADER_SIZE as u8,
            header_version: ENCRYPT_HEADER_VERSION,
            encrypt_mode: EncryptMode::Aes256Ctr as u8,
        }
    }
}

/// Identity of the key that encrypted the payload, plus the IV used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CipherTextDetails {
    pub domain_id: EncryptDomainId,
    pub base_key_id: BaseKeyId,
    pub salt: RandomSalt,
    pub iv: [u8; AES_256_IV_LENGTH],
}

/// Identity of the key that authenticates the header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CipherHeaderDetails {
    pub domain_id: EncryptDomainId,
    pub base_key_id: BaseKeyId,
    pub salt: RandomSalt,
}

/// Auth token region, tagged by the header's auth token mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthTokens {
    #[default]
    None,
    Single {
        auth_token: AuthToken,
    },
    Multi {
        cipher_text_auth_token: AuthToken,
        header_auth_token: AuthToken,
    },
}

impl AuthTokens {
    pub fn mode(&self) -> AuthTokenMode {
        match self {
            AuthTokens::None => AuthTokenMode::None,
            AuthTokens::Single { .. } => AuthTokenMode::Single,
            AuthTokens::Multi { .. } => AuthTokenMode::Multi,
        }
    }

    /// Token region with nothing filled in, for the given mode.
    pub fn empty(mode: AuthTokenMode) -> Self {
        match mode {
            AuthTokenMode::None => AuthTokens::None,
            AuthTokenMode::Single => AuthTokens::Single {
                auth_token: [0u8; AUTH_TOKEN_SIZE],
            },
            AuthTokenMode::Multi => AuthTokens::Multi {
                cipher_text_auth_token: [0u8; AUTH_TOKEN_SIZE],
                header_auth_token: [0u8; AUTH_TOKEN_SIZE],
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncryptionHeader {
    pub flags: HeaderFlags,
    pub cipher_text_details: CipherTextDetails,
    pub cipher_header_details: CipherHeaderDetails,
    pub auth_tokens: AuthTokens,
}

impl EncryptionHeader {
    pub fn auth_token_mode(&self) -> AuthTokenMode {
        self.auth_tokens.mode()
    }

    pub fn to_bytes(&self) -> [u8; ENCRYPT_HEADER_SIZE] {
        let mut out = [0u8; ENCRYPT_HEADER_SIZE];
        out[0] = self.flags.size;
        out[1] = self.flags.header_version;
        out[2] = self.flags.encrypt_mode;
        out[3] = self.auth_token_mode() as u8;

        let ct = &self.cipher_text_details;
        put_i64(&mut out, CIPHER_TEXT_DETAILS, ct.domain_id);
        put_u64(&mut out, CIPHER_TEXT_DETAILS + 8, ct.base_key_id);
        put_u64(&mut out, CIPHER_TEXT_DETAILS + 16, ct.salt);
        out[CIPHER_TEXT_DETAILS + 24..CIPHER_HEADER_DETAILS].copy_from_slice(&ct.iv);

        let hd = &self.cipher_header_details;
        put_i64(&mut out, CIPHER_HEADER_DETAILS, hd.domain_id);
        put_u64(&mut out, CIPHER_HEADER_DETAILS + 8, hd.base_key_id);
        put_u64(&mut out, CIPHER_HEADER_DETAILS + 16, hd.salt);

        match &self.auth_tokens {
            AuthTokens::None => {}
            AuthTokens::Single { auth_token } => {
                out[AUTH_TOKENS..SECOND_TOKEN].copy_from_slice(auth_token);
            }
            AuthTokens::Multi {
                cipher_text_auth_token,
                header_auth_token,
            } => {
                out[AUTH_TOKENS..SECOND_TOKEN].copy_from_slice(cipher_text_auth_token);
                out[SECOND_TOKEN..].copy_from_slice(header_auth_token);
            }
        }
        out
    }

    /// Parse a serialized header.
    ///
    /// Rejects inputs of the wrong length, a wrong size byte, an unknown
    /// auth token mode and non-zero reserved bytes. Version and algorithm are
    /// kept as-is and checked by [`crate::Decryptor`].
    pub fn from_bytes(bytes: &[u8]) -> CipherResult<Self> {
        if bytes.len() != ENCRYPT_HEADER_SIZE {
            return Err(CipherError::InvalidHeader(format!(
                "expected {ENCRYPT_HEADER_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes[0] as usize != ENCRYPT_HEADER_SIZE {
            return Err(CipherError::InvalidHeader(format!(
                "size byte {} (expected {ENCRYPT_HEADER_SIZE})",
                bytes[0]
            )));
        }
        if bytes[FLAGS_RESERVED].iter().any(|b| *b != 0) {
            return Err(CipherError::InvalidHeader(
                "reserved flag bytes are not zero".into(),
            ));
        }

        let mode = AuthTokenMode::try_from(bytes[3])
            .map_err(|e| CipherError::InvalidHeader(e.to_string()))?;

        let auth_tokens = match mode {
            AuthTokenMode::None => {
                if bytes[AUTH_TOKENS..].iter().any(|b| *b != 0) {
                    return Err(CipherError::InvalidHeader(
                        "auth token region set without an auth token mode".into(),
                    ));
                }
                AuthTokens::None
            }
            AuthTokenMode::Single => {
                if bytes[SECOND_TOKEN..].iter().any(|b| *b != 0) {
                    return Err(CipherError::InvalidHeader(
                        "reserved auth token bytes are not zero".into(),
                    ));
                }
                AuthTokens::Single {
                    auth_token: get_token(bytes, AUTH_TOKENS),
                }
            }
            AuthTokenMode::Multi => AuthTokens::Multi {
                cipher_text_auth_token: get_token(bytes, AUTH_TOKENS),
                header_auth_token: get_token(bytes, SECOND_TOKEN),
            },
        };

        let mut iv = [0u8; AES_256_IV_LENGTH];
        iv.copy_from_slice(&bytes[CIPHER_TEXT_DETAILS + 24..CIPHER_HEADER_DETAILS]);

        Ok(Self {
            flags: HeaderFlags {
                size: bytes[0],
                header_version: bytes[1],
                encrypt_mode: bytes[2],
            },
            cipher_text_details: CipherTextDetails {
                domain_id: get_i64(bytes, CIPHER_TEXT_DETAILS),
                base_key_id: get_u64(bytes, CIPHER_TEXT_DETAILS + 8),
                salt: get_u64(bytes, CIPHER_TEXT_DETAILS + 16),
                iv,
            },
            cipher_header_details: CipherHeaderDetails {
                domain_id: get_i64(bytes, CIPHER_HEADER_DETAILS),
                base_key_id: get_u64(bytes, CIPHER_HEADER_DETAILS + 8),
                salt: get_u64(bytes, CIPHER_HEADER_DETAILS + 16),
            },
            auth_tokens,
        })
    }

    /// The header bytes covered by the header-protecting token.
    ///
    /// Single mode zeroes the whole token region. Multi mode zeroes only the
    /// header token slot, so the ciphertext token is bound to the header.
    pub(crate) fn authenticated_bytes(&self) -> [u8; ENCRYPT_HEADER_SIZE] {
        let mut bytes = self.to_bytes();
        match self.auth_tokens {
            AuthTokens::Multi { .. } => bytes[SECOND_TOKEN..].fill(0),
            AuthTokens::None | AuthTokens::Single { .. } => bytes[AUTH_TOKENS..].fill(0),
        }
        bytes
    }

    pub fn summary(&self) -> HeaderSummary {
        let (cipher_text_auth_token, header_auth_token) = match &self.auth_tokens {
            AuthTokens::None => (None, None),
            AuthTokens::Single { auth_token } => (Some(STANDARD.encode(auth_token)), None),
            AuthTokens::Multi {
                cipher_text_auth_token,
                header_auth_token,
            } => (
                Some(STANDARD.encode(cipher_text_auth_token)),
                Some(STANDARD.encode(header_auth_token)),
            ),
        };
        HeaderSummary {
            size: self.flags.size,
            header_version: self.flags.header_version,
            encrypt_mode: EncryptMode::try_from(self.flags.encrypt_mode)
                .map(|m| m.to_string())
                .unwrap_or_else(|_| format!("unknown({})", self.flags.encrypt_mode)),
            auth_token_mode: self.auth_token_mode(),
            cipher_text_domain_id: self.cipher_text_details.domain_id,
            cipher_text_base_key_id: self.cipher_text_details.base_key_id,
            cipher_text_salt: self.cipher_text_details.salt,
            iv: STANDARD.encode(self.cipher_text_details.iv),
            header_domain_id: self.cipher_header_details.domain_id,
            header_base_key_id: self.cipher_header_details.base_key_id,
            header_salt: self.cipher_header_details.salt,
            cipher_text_auth_token,
            header_auth_token,
        }
    }
}

/// Human-readable header view for tooling (tokens and IV base64-encoded).
#[derive(Debug, Clone, Serialize)]
pub struct HeaderSummary {
    pub size: u8,
    pub header_version: u8,
    pub encrypt_mode: String,
    pub auth_token_mode: AuthTokenMode,
    pub cipher_text_domain_id: EncryptDomainId,
    pub cipher_text_base_key_id: BaseKeyId,
    pub cipher_text_salt: RandomSalt,
    pub iv: String,
    pub header_domain_id: EncryptDomainId,
    pub header_base_key_id: BaseKeyId,
    pub header_salt: RandomSalt,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cipher_text_auth_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_auth_token: Option<String>,
}

fn put_u64(out: &mut [u8], at: usize, value: u64) {
    out[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

fn put_i64(out: &mut [u8], at: usize, value: i64) {
    out[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

fn get_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

fn get_i64(bytes: &[u8], at: usize) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    i64::from_le_bytes(buf)
}

fn get_token(bytes: &[u8], at: usize) -> AuthToken {
    let mut token = [0u8; AUTH_TOKEN_SIZE];
    token.copy_from_slice(&bytes[at..at + AUTH_TOKEN_SIZE]);
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> EncryptionHeader {
        EncryptionHeader {
            flags: HeaderFlags::default(),
            cipher_text_details: CipherTextDetails {
                domain_id: 7,
                base_key_id: 3,
                salt: 0x0102_0304_0506_0708,
                iv: [0x11; AES_256_IV_LENGTH],
            },
            cipher_header_details: CipherHeaderDetails {
                domain_id: -2,
                base_key_id: 4,
                salt: 0xAABB,
            },
            auth_tokens: AuthTokens::Multi {
                cipher_text_auth_token: [0x22; AUTH_TOKEN_SIZE],
                header_auth_token: [0x33; AUTH_TOKEN_SIZE],
            },
        }
    }

    #[test]
    fn test_layout_is_byte_exact() {
        let bytes = sample_header().to_bytes();

        assert_eq!(bytes.len(), 104);
        assert_eq!(&bytes[0..4], &[104, ENCRYPT_HEADER_VERSION, 1, 2]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
        assert_eq!(&bytes[8..16], &7i64.to_le_bytes());
        assert_eq!(&bytes[16..24], &3u64.to_le_bytes());
        assert_eq!(&bytes[24..32], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&bytes[32..48], &[0x11; 16]);
        assert_eq!(&bytes[48..56], &(-2i64).to_le_bytes());
        assert_eq!(&bytes[56..64], &4u64.to_le_bytes());
        assert_eq!(&bytes[64..72], &0xAABBu64.to_le_bytes());
        assert_eq!(&bytes[72..88], &[0x22; 16]);
        assert_eq!(&bytes[88..104], &[0x33; 16]);
    }

    #[test]
    fn test_parse_back() {
        let header = sample_header();
        assert_eq!(EncryptionHeader::from_bytes(&header.to_bytes()).unwrap(), header);

        let single = EncryptionHeader {
            auth_tokens: AuthTokens::Single {
                auth_token: [0x44; AUTH_TOKEN_SIZE],
            },
            ..header
        };
        let bytes = single.to_bytes();
        assert_eq!(&bytes[88..104], &[0u8; 16], "single mode reserved half stays zero");
        assert_eq!(EncryptionHeader::from_bytes(&bytes).unwrap(), single);
    }

    #[test]
    fn test_reject_wrong_length() {
        let bytes = sample_header().to_bytes();
        assert!(matches!(
            EncryptionHeader::from_bytes(&bytes[..103]),
            Err(CipherError::InvalidHeader(_))
        ));
        let mut long = bytes.to_vec();
        long.push(0);
        assert!(EncryptionHeader::from_bytes(&long).is_err());
    }

    #[test]
    fn test_reject_bad_flags() {
        let good = sample_header().to_bytes();

        let mut bad_size = good;
        bad_size[0] = 96;
        assert!(EncryptionHeader::from_bytes(&bad_size).is_err());

        let mut bad_mode = good;
        bad_mode[3] = 9;
        assert!(EncryptionHeader::from_bytes(&bad_mode).is_err());

        let mut bad_reserved = good;
        bad_reserved[5] = 1;
        assert!(EncryptionHeader::from_bytes(&bad_reserved).is_err());
    }

    #[test]
    fn test_reject_tokens_in_none_mode() {
        let mut bytes = sample_header().to_bytes();
        bytes[3] = AuthTokenMode::None as u8;
        assert!(EncryptionHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_unknown_version_survives_parsing() {
        let mut bytes = sample_header().to_bytes();
        bytes[1] = 9;
        bytes[2] = 200;
        let parsed = EncryptionHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.flags.header_version, 9);
        assert_eq!(parsed.flags.encrypt_mode, 200);
    }

    #[test]
    fn test_authenticated_bytes_zero_tokens() {
        let header = sample_header();
        let multi = header.authenticated_bytes();
        assert_eq!(&multi[72..88], &[0x22; 16], "ciphertext token stays covered");
        assert_eq!(&multi[88..104], &[0u8; 16]);

        let single = EncryptionHeader {
            auth_tokens: AuthTokens::Single {
                auth_token: [0x44; AUTH_TOKEN_SIZE],
            },
            ..header
        };
        assert_eq!(&single.authenticated_bytes()[72..], &[0u8; 32]);
        assert_eq!(single.authenticated_bytes()[3], AuthTokenMode::Single as u8);
    }

    #[test]
    fn test_summary_serializes() {
        let json = serde_json::to_string(&sample_header().summary()).unwrap();
        assert!(json.contains("\"auth_token_mode\":\"multi\""));
        assert!(json.contains("\"encrypt_mode\":\"aes-256-ctr\""));
        assert!(json.contains("\"header_domain_id\":-2"));

        let none = EncryptionHeader {
            auth_tokens: AuthTokens::None,
            ..sample_header()
        };
        let json = serde_json::to_string(&none.summary()).unwrap();
        assert!(!json.contains("auth_token\""));
    }
}
