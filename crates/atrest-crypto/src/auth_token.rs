//! HMAC-SHA-256 digests for key derivation and blob authentication tokens
//!
//! Tokens stored in the encryption header are the leading `AUTH_TOKEN_SIZE`
//! bytes of the full 32-byte digest. Every comparison against a stored token
//! goes through [`verify_auth_token`], which is constant-time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::{CipherError, CipherResult};
use crate::{AUTH_TOKEN_SIZE, DIGEST_SIZE};

type HmacSha256 = Hmac<Sha256>;

/// Truncated HMAC-SHA-256 digest persisted in an encryption header.
pub type AuthToken = [u8; AUTH_TOKEN_SIZE];

/// One-shot HMAC-SHA-256 of `message` under `key`.
pub fn digest(key: &[u8], message: &[u8]) -> CipherResult<[u8; DIGEST_SIZE]> {
    digest_parts(key, &[message])
}

/// HMAC-SHA-256 over the concatenation of `parts`, without materializing it.
pub fn digest_parts(key: &[u8], parts: &[&[u8]]) -> CipherResult<[u8; DIGEST_SIZE]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| CipherError::Crypto(format!("HMAC key setup: {e}")))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Compute the auth token covering the concatenation of `parts`.
pub fn compute_auth_token(key: &[u8], parts: &[&[u8]]) -> CipherResult<AuthToken> {
    let mut full = digest_parts(key, parts)?;
    let mut token = [0u8; AUTH_TOKEN_SIZE];
    token.copy_from_slice(&full[..AUTH_TOKEN_SIZE]);
    full.zeroize();
    Ok(token)
}

/// Recompute the token over `parts` and compare it with `stored` in constant time.
///
/// `which` names the token in the error (e.g. "header", "ciphertext").
pub fn verify_auth_token(
    key: &[u8],
    parts: &[&[u8]],
    stored: &AuthToken,
    which: &'static str,
) -> CipherResult<()> {
    let mut computed = compute_auth_token(key, parts)?;
    let equal: bool = computed[..].ct_eq(&stored[..]).into();
    computed.zeroize();
    if equal {
        Ok(())
    } else {
        tracing::warn!(token = which, "auth token mismatch");
        Err(CipherError::AuthTokenMismatch(which))
    }
}
