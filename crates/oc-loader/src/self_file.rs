//! SELF (signed ELF) container handling
//!
//! Only the container header is understood here. Turning a retail SELF into
//! plaintext is the job of a [`Decryptor`]; the built-in
//! [`EmbeddedImageDecryptor`] covers debug containers that carry the ELF
//! image unencrypted after the header.

use crate::elf::ELF_MAGIC;
use oc_core::error::LoaderError;
use tracing::{debug, info};

/// SELF file magic
pub const SELF_MAGIC: [u8; 4] = [0x53, 0x43, 0x45, 0x00]; // "SCE\0"

const SELF_HEADER_SIZE: usize = 32;

/// SELF file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelfHeader {
    pub version: u32,
    pub key_type: u16,
    pub header_type: u16,
    pub metadata_offset: u32,
    pub header_len: u64,
    pub data_len: u64,
}

/// Check for the SELF magic
pub fn is_self(data: &[u8]) -> bool {
    data.len() >= 4 && data[0..4] == SELF_MAGIC
}

impl SelfHeader {
    /// Parse the big-endian container header
    pub fn parse(data: &[u8]) -> Result<Self, LoaderError> {
        if data.len() < SELF_HEADER_SIZE {
            return Err(LoaderError::InvalidSelf("File too small".to_string()));
        }
        if !is_self(data) {
            return Err(LoaderError::InvalidSelf("Invalid SELF magic".to_string()));
        }

        let be32 = |o: usize| u32::from_be_bytes([data[o], data[o + 1], data[o + 2], data[o + 3]]);
        let be64 = |o: usize| ((be32(o) as u64) << 32) | be32(o + 4) as u64;

        Ok(Self {
            version: be32(4),
            key_type: u16::from_be_bytes([data[8], data[9]]),
            header_type: u16::from_be_bytes([data[10], data[11]]),
            metadata_offset: be32(12),
            header_len: be64(16),
            data_len: be64(24),
        })
    }

    /// Build a header image, used by tests and packaging tools
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SELF_HEADER_SIZE);
        out.extend_from_slice(&SELF_MAGIC);
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&self.key_type.to_be_bytes());
        out.extend_from_slice(&self.header_type.to_be_bytes());
        out.extend_from_slice(&self.metadata_offset.to_be_bytes());
        out.extend_from_slice(&self.header_len.to_be_bytes());
        out.extend_from_slice(&self.data_len.to_be_bytes());
        out
    }
}

/// Decryption collaborator
pub trait Decryptor: Send + Sync {
    /// Produce the plaintext ELF image of a SELF container
    fn decrypt(&self, image: Vec<u8>) -> Result<Vec<u8>, LoaderError>;
}

/// Extracts an unencrypted ELF stored after the SELF header
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedImageDecryptor;

impl Decryptor for EmbeddedImageDecryptor {
    fn decrypt(&self, image: Vec<u8>) -> Result<Vec<u8>, LoaderError> {
        let header = SelfHeader::parse(&image)?;
        debug!(
            "SELF header: version={}, key_type=0x{:x}, header_len=0x{:x}",
            header.version, header.key_type, header.header_len
        );

        let offset = usize::try_from(header.header_len)
            .map_err(|_| LoaderError::InvalidSelf("header length overflow".to_string()))?;

        match offset.checked_add(4).and_then(|end| image.get(offset..end)) {
            Some(magic) if magic == &ELF_MAGIC[..] => {
                info!("Found embedded unencrypted ELF at offset 0x{:x}", offset);
                Ok(image[offset..].to_vec())
            }
            _ => Err(LoaderError::DecryptionFailed(
                "no plaintext ELF image after SELF header".to_string(),
            )),
        }
    }
}
