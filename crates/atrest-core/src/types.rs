use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AtrestError;

/// Encryption domain boundary identifier (tenant, system keyspace, ...).
pub type EncryptDomainId = i64;

/// Identifier of a version of externally supplied base key material.
pub type BaseKeyId = u64;

/// Random salt binding one key derivation instance.
pub type RandomSalt = u64;

/// Cipher algorithm recorded in the encryption header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum EncryptMode {
    None = 0,
    Aes256Ctr = 1,
}

impl TryFrom<u8> for EncryptMode {
    type Error = AtrestError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EncryptMode::None),
            1 => Ok(EncryptMode::Aes256Ctr),
            _ => Err(AtrestError::InvalidValue {
                kind: "encrypt mode",
                value,
            }),
        }
    }
}

impl fmt::Display for EncryptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptMode::None => f.write_str("none"),
            EncryptMode::Aes256Ctr => f.write_str("aes-256-ctr"),
        }
    }
}

/// How authentication tokens are generated for an encrypted blob.
///
/// - `Single`: one token protects header + ciphertext jointly. Cheapest to
///   produce, but verification needs the whole payload.
/// - `Multi`: separate tokens for ciphertext and header, so the header can be
///   sanity-checked before a large payload is read (e.g. backup files).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum AuthTokenMode {
    None = 0,
    Single = 1,
    #[default]
    Multi = 2,
}

impl TryFrom<u8> for AuthTokenMode {
    type Error = AtrestError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AuthTokenMode::None),
            1 => Ok(AuthTokenMode::Single),
            2 => Ok(AuthTokenMode::Multi),
            _ => Err(AtrestError::InvalidValue {
                kind: "auth token mode",
                value,
            }),
        }
    }
}

impl fmt::Display for AuthTokenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthTokenMode::None => f.write_str("none"),
            AuthTokenMode::Single => f.write_str("single"),
            AuthTokenMode::Multi => f.write_str("multi"),
        }
    }
}

impl FromStr for AuthTokenMode {
    type Err = AtrestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(AuthTokenMode::None),
            "single" => Ok(AuthTokenMode::Single),
            "multi" => Ok(AuthTokenMode::Multi),
            other => Err(AtrestError::Config(format!(
                "unknown auth token mode '{other}' (expected none, single or multi)"
            ))),
        }
    }
}
