pub mod config;
pub mod error;
pub mod types;

pub use error::{AtrestError, AtrestResult};
pub use types::{AuthTokenMode, BaseKeyId, EncryptDomainId, EncryptMode, RandomSalt};
