//! Output buffer of one encrypt/decrypt call
//!
//! Backed by [`bytes::Bytes`], so clones share the allocation and it is freed
//! when the last holder drops it.

use bytes::Bytes;

use crate::error::{CipherError, CipherResult};

#[derive(Clone)]
pub struct EncryptBuf {
    data: Bytes,
    logical_size: usize,
}

impl EncryptBuf {
    pub(crate) fn from_vec(data: Vec<u8>) -> Self {
        let logical_size = data.len();
        Self {
            data: Bytes::from(data),
            logical_size,
        }
    }

    pub fn alloc_size(&self) -> usize {
        self.data.len()
    }

    pub fn logical_size(&self) -> usize {
        self.logical_size
    }

    /// Shrink (or restore) the visible length; never beyond the allocation.
    pub fn set_logical_size(&mut self, size: usize) -> CipherResult<()> {
        if size > self.alloc_size() {
            return Err(CipherError::InvalidBufferSize {
                logical: size,
                allocated: self.alloc_size(),
            });
        }
        self.logical_size = size;
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.logical_size]
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    /// The logical contents as a shared `Bytes` handle.
    pub fn into_bytes(self) -> Bytes {
        self.data.slice(..self.logical_size)
    }
}

impl AsRef<[u8]> for EncryptBuf {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::fmt::Debug for EncryptBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptBuf")
            .field("alloc_size", &self.alloc_size())
            .field("logical_size", &self.logical_size)
            .finish()
    }
}
