//! Program-metadata program client
//!
//! - **instructions**: instruction builders with the program's account order
//! - **pda**: metadata and program data address derivation
//! - **plans**: instruction plans creating, updating and closing metadata
//! - **account**: decoding of metadata and buffer accounts

pub mod account;
pub mod instructions;
pub mod pda;
pub mod plans;

use std::{fmt, str::FromStr};

use borsh::BorshSerialize;
use serde::{Deserialize, Serialize};
use solana_sdk::{pubkey, pubkey::Pubkey};
use thiserror::Error;

use crate::instruction_plans::PlanningError;

pub use account::{BufferAccount, MetadataAccount};
pub use pda::{find_metadata_pda, program_data_address};
pub use plans::{plan_write_metadata, ExistingBuffer, MetadataTarget, WriteMetadataInput, WritePlan, WriteStrategy};

/// Program-metadata program id
pub const PROGRAM_METADATA_ID: Pubkey = pubkey!("ProgM6JCCvbYkfKqJYHePx4xxSUSqJp7rh8Lyv7nk7S");

/// Bytes before the data section of metadata and buffer accounts
pub const ACCOUNT_HEADER_LENGTH: usize = 96;

/// Seed length in bytes
pub const SEED_LENGTH: usize = 16;

/// Size of an account holding `data_length` bytes of data
pub fn account_size(data_length: usize) -> usize {
    ACCOUNT_HEADER_LENGTH + data_length
}

/// Errors raised while building metadata operations
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Invalid seed '{0}': must be at most 16 bytes of UTF-8")]
    InvalidSeed(String),

    #[error("Metadata account is immutable")]
    Immutable,

    #[error("No data to write")]
    MissingData,

    #[error("Data of {length} bytes exceeds the {max} bytes an account can hold")]
    DataTooLarge { length: usize, max: usize },

    #[error("Writing from a buffer requires an existing metadata account")]
    BufferRequiresMetadata,

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Account {0} not found")]
    AccountNotFound(Pubkey),

    #[error("Invalid account data: {0}")]
    InvalidAccountData(String),

    #[error("Program {0} is not executable")]
    NotExecutable(Pubkey),

    #[error("Unsupported loader {0}")]
    UnsupportedLoader(Pubkey),

    #[error("Planning failed: {0}")]
    Planning(#[from] PlanningError),
}

/// Seed identifying a metadata account of a program, e.g. `idl`
///
/// Stored as 16 bytes, zero padded.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshSerialize)]
pub struct Seed([u8; SEED_LENGTH]);

impl Seed {
    pub fn new(seed: &str) -> Result<Self, MetadataError> {
        let bytes = seed.as_bytes();
        if bytes.is_empty() || bytes.len() > SEED_LENGTH {
            return Err(MetadataError::InvalidSeed(seed.to_string()));
        }
        let mut padded = [0u8; SEED_LENGTH];
        padded[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(padded))
    }

    pub fn from_bytes(bytes: [u8; SEED_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SEED_LENGTH] {
        &self.0
    }

    /// The seed text without padding
    pub fn as_str(&self) -> &str {
        let end = self.0.iter().position(|b| *b == 0).unwrap_or(SEED_LENGTH);
        std::str::from_utf8(&self.0[..end]).unwrap_or_default()
    }
}

impl FromStr for Seed {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seed({:?})", self.as_str())
    }
}

/// How the stored bytes are encoded
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    None,
    Utf8,
    Base58,
    Base64,
}

/// Compression applied before encoding
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Zlib,
}

/// Format of the decoded content
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    None,
    Json,
    Yaml,
    Toml,
}

/// Where the content lives
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// The account data is the content
    #[default]
    Direct,
    /// The account data is a URL
    Url,
    /// The account data points at another account
    External,
}

macro_rules! impl_try_from_u8 {
    ($($ty:ident { $($value:literal => $variant:ident),+ $(,)? }),+ $(,)?) => {
        $(
            impl TryFrom<u8> for $ty {
                type Error = MetadataError;

                fn try_from(value: u8) -> Result<Self, Self::Error> {
                    match value {
                        $($value => Ok(Self::$variant),)+
                        other => Err(MetadataError::InvalidAccountData(format!(
                            "unknown {} {}",
                            stringify!($ty),
                            other
                        ))),
                    }
                }
            }
        )+
    };
}

impl_try_from_u8! {
    Encoding { 0 => None, 1 => Utf8, 2 => Base58, 3 => Base64 },
    Compression { 0 => None, 1 => Gzip, 2 => Zlib },
    Format { 0 => None, 1 => Json, 2 => Yaml, 3 => Toml },
    DataSource { 0 => Direct, 1 => Url, 2 => External },
}

/// Encoding, compression, format and source written alongside the data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize)]
pub struct DataFormat {
    pub encoding: Encoding,
    pub compression: Compression,
    pub format: Format,
    pub data_source: DataSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_is_zero_padded() {
        let seed = Seed::new("idl").unwrap();
        assert_eq!(&seed.as_bytes()[..3], b"idl");
        assert!(seed.as_bytes()[3..].iter().all(|b| *b == 0));
        assert_eq!(seed.to_string(), "idl");
    }

    #[test]
    fn test_seed_length_limits() {
        assert!(Seed::new("0123456789abcdef").is_ok());
        assert!(matches!(
            Seed::new("0123456789abcdefg"),
            Err(MetadataError::InvalidSeed(_))
        ));
        assert!("".parse::<Seed>().is_err());
    }

    #[test]
    fn test_data_format_encoding() {
        let format = DataFormat {
            encoding: Encoding::Utf8,
            compression: Compression::Zlib,
            format: Format::Json,
            data_source: DataSource::Url,
        };
        assert_eq!(borsh::to_vec(&format).unwrap(), vec![1, 2, 1, 1]);
        assert_eq!(Format::try_from(3).unwrap(), Format::Toml);
        assert!(Encoding::try_from(9).is_err());
    }

    #[test]
    fn test_account_size() {
        assert_eq!(account_size(0), 96);
        assert_eq!(account_size(1000), 1096);
    }
}
