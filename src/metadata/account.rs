//! Metadata and buffer account decoding
//!
//! Both accounts start with a 96 byte header:
//!
//! ```text
//! metadata: discriminator(1) program(32) authority(32) mutable(1) canonical(1)
//!           seed(16) encoding(1) compression(1) format(1) data_source(1)
//!           data_length(4) padding(5)
//! buffer:   discriminator(1) program(32) authority(32) canonical(1)
//!           seed(16) padding(14)
//! ```
//!
//! An all-zero key stands for "none".

use serde::Serialize;
use solana_sdk::pubkey::Pubkey;

use super::{DataFormat, MetadataError, Seed, ACCOUNT_HEADER_LENGTH, SEED_LENGTH};

const BUFFER_DISCRIMINATOR: u8 = 1;
const METADATA_DISCRIMINATOR: u8 = 2;

fn read_key(bytes: &[u8], offset: usize) -> Option<Pubkey> {
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes[offset..offset + 32]);
    (key != [0u8; 32]).then(|| Pubkey::new_from_array(key))
}

fn read_seed(bytes: &[u8], offset: usize) -> Seed {
    let mut seed = [0u8; SEED_LENGTH];
    seed.copy_from_slice(&bytes[offset..offset + SEED_LENGTH]);
    Seed::from_bytes(seed)
}

fn check_header(bytes: &[u8], discriminator: u8, kind: &str) -> Result<(), MetadataError> {
    if bytes.len() < ACCOUNT_HEADER_LENGTH {
        return Err(MetadataError::InvalidAccountData(format!(
            "{kind} account is {} bytes, header needs {ACCOUNT_HEADER_LENGTH}",
            bytes.len()
        )));
    }
    if bytes[0] != discriminator {
        return Err(MetadataError::InvalidAccountData(format!(
            "expected {kind} discriminator {discriminator}, got {}",
            bytes[0]
        )));
    }
    Ok(())
}

/// Decoded metadata account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataAccount {
    #[serde(with = "display")]
    pub program: Pubkey,
    #[serde(with = "display_option")]
    pub authority: Option<Pubkey>,
    pub mutable: bool,
    pub canonical: bool,
    #[serde(serialize_with = "serialize_seed")]
    pub seed: Seed,
    #[serde(flatten)]
    pub format: DataFormat,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl MetadataAccount {
    pub fn try_from_bytes(bytes: &[u8]) -> Result<Self, MetadataError> {
        check_header(bytes, METADATA_DISCRIMINATOR, "metadata")?;

        let program = read_key(bytes, 1)
            .ok_or_else(|| MetadataError::InvalidAccountData("metadata without program".to_string()))?;
        let data_length = u32::from_le_bytes([bytes[87], bytes[88], bytes[89], bytes[90]]) as usize;
        let data = bytes
            .get(ACCOUNT_HEADER_LENGTH..ACCOUNT_HEADER_LENGTH + data_length)
            .ok_or_else(|| {
                MetadataError::InvalidAccountData(format!("data length {data_length} exceeds the account"))
            })?;

        Ok(Self {
            program,
            authority: read_key(bytes, 33),
            mutable: bytes[65] != 0,
            canonical: bytes[66] != 0,
            seed: read_seed(bytes, 67),
            format: DataFormat {
                encoding: bytes[83].try_into()?,
                compression: bytes[84].try_into()?,
                format: bytes[85].try_into()?,
                data_source: bytes[86].try_into()?,
            },
            data: data.to_vec(),
        })
    }

    pub fn data_length(&self) -> usize {
        self.data.len()
    }
}

/// Decoded buffer account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferAccount {
    /// Set for buffers derived from a program and seed
    pub program: Option<Pubkey>,
    pub authority: Option<Pubkey>,
    pub canonical: bool,
    pub seed: Seed,
    pub data: Vec<u8>,
}

impl BufferAccount {
    pub fn try_from_bytes(bytes: &[u8]) -> Result<Self, MetadataError> {
        check_header(bytes, BUFFER_DISCRIMINATOR, "buffer")?;

        Ok(Self {
            program: read_key(bytes, 1),
            authority: read_key(bytes, 33),
            canonical: bytes[65] != 0,
            seed: read_seed(bytes, 66),
            data: bytes[ACCOUNT_HEADER_LENGTH..].to_vec(),
        })
    }
}

fn serialize_seed<S: serde::Serializer>(seed: &Seed, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(seed.as_str())
}

mod display {
    use solana_sdk::pubkey::Pubkey;

    pub fn serialize<S: serde::Serializer>(key: &Pubkey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(key)
    }
}

mod display_option {
    use solana_sdk::pubkey::Pubkey;

    pub fn serialize<S: serde::Serializer>(key: &Option<Pubkey>, serializer: S) -> Result<S::Ok, S::Error> {
        match key {
            Some(key) => serializer.collect_str(key),
            None => serializer.serialize_none(),
        }
    }
}
