//! Instruction builders for the program-metadata program
//!
//! Optional accounts are passed as the program id itself, which the program
//! reads as "not provided".

use borsh::BorshSerialize;
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program, sysvar,
};

use super::{DataFormat, Seed, PROGRAM_METADATA_ID};

/// Bytes appended to the instruction data as-is, without a length prefix
#[derive(Debug, Clone, Default)]
struct TrailingBytes(Vec<u8>);

impl BorshSerialize for TrailingBytes {
    fn serialize<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.0)
    }
}

impl From<Option<&[u8]>> for TrailingBytes {
    fn from(data: Option<&[u8]>) -> Self {
        Self(data.map(<[u8]>::to_vec).unwrap_or_default())
    }
}

/// Instruction data, one variant per discriminator
#[derive(Debug, Clone, BorshSerialize)]
enum MetadataInstruction {
    Write { offset: u32, data: TrailingBytes },
    Initialize { seed: Seed, format: DataFormat, data: TrailingBytes },
    SetAuthority { new_authority: Option<[u8; 32]> },
    SetData { format: DataFormat, data: TrailingBytes },
    SetImmutable,
    WithdrawExcessLamports,
    Close,
    Allocate { seed: TrailingBytes },
    Extend { length: u16 },
    Trim,
}

/// Program and program data accounts proving the upgrade authority
///
/// Canonical metadata passes both; third-party metadata passes the program
/// only; keypair buffers pass neither.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgramAccounts {
    pub program: Option<Pubkey>,
    pub program_data: Option<Pubkey>,
}

impl ProgramAccounts {
    pub fn new(program: Pubkey, program_data: Option<Pubkey>) -> Self {
        Self {
            program: Some(program),
            program_data,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    fn metas(&self) -> [AccountMeta; 2] {
        [optional(self.program), optional(self.program_data)]
    }
}

fn optional(account: Option<Pubkey>) -> AccountMeta {
    AccountMeta::new_readonly(account.unwrap_or(PROGRAM_METADATA_ID), false)
}

fn build(data: MetadataInstruction, accounts: Vec<AccountMeta>) -> Instruction {
    Instruction::new_with_borsh(PROGRAM_METADATA_ID, &data, accounts)
}

/// Write `data` at `offset` of a buffer
///
/// Accounts: buffer (writable), authority (signer)
pub fn write(buffer: &Pubkey, authority: &Pubkey, offset: u32, data: &[u8]) -> Instruction {
    build(
        MetadataInstruction::Write {
            offset,
            data: TrailingBytes(data.to_vec()),
        },
        vec![
            AccountMeta::new(*buffer, false),
            AccountMeta::new_readonly(*authority, true),
        ],
    )
}

/// Initialize a metadata account, with inline data or from the data
/// already written to it as a buffer
///
/// Accounts: metadata (writable), authority (signer), program, program data,
/// system program (placeholder when initializing from a buffer)
pub fn initialize(
    metadata: &Pubkey,
    authority: &Pubkey,
    programs: &ProgramAccounts,
    seed: &Seed,
    format: DataFormat,
    data: Option<&[u8]>,
) -> Instruction {
    let system = if data.is_some() {
        system_program::id()
    } else {
        PROGRAM_METADATA_ID
    };
    let [program, program_data] = programs.metas();
    build(
        MetadataInstruction::Initialize {
            seed: *seed,
            format,
            data: data.into(),
        },
        vec![
            AccountMeta::new(*metadata, false),
            AccountMeta::new_readonly(*authority, true),
            program,
            program_data,
            AccountMeta::new_readonly(system, false),
        ],
    )
}

/// Set or remove the authority of a metadata or buffer account
///
/// Accounts: account (writable), authority (signer), program, program data
pub fn set_authority(
    account: &Pubkey,
    authority: &Pubkey,
    programs: &ProgramAccounts,
    new_authority: Option<&Pubkey>,
) -> Instruction {
    let [program, program_data] = programs.metas();
    build(
        MetadataInstruction::SetAuthority {
            new_authority: new_authority.map(|key| key.to_bytes()),
        },
        vec![
            AccountMeta::new(*account, false),
            AccountMeta::new_readonly(*authority, true),
            program,
            program_data,
        ],
    )
}

/// Replace the data of a metadata account, inline or from a buffer
///
/// Accounts: metadata (writable), authority (signer), buffer (writable,
/// optional), program, program data
pub fn set_data(
    metadata: &Pubkey,
    authority: &Pubkey,
    programs: &ProgramAccounts,
    buffer: Option<&Pubkey>,
    format: DataFormat,
    data: Option<&[u8]>,
) -> Instruction {
    let buffer = match buffer {
        Some(buffer) => AccountMeta::new(*buffer, false),
        None => optional(None),
    };
    let [program, program_data] = programs.metas();
    build(
        MetadataInstruction::SetData {
            format,
            data: data.into(),
        },
        vec![
            AccountMeta::new(*metadata, false),
            AccountMeta::new_readonly(*authority, true),
            buffer,
            program,
            program_data,
        ],
    )
}

/// Make a metadata account immutable, forever
///
/// Accounts: metadata (writable), authority (signer), program, program data
pub fn set_immutable(metadata: &Pubkey, authority: &Pubkey, programs: &ProgramAccounts) -> Instruction {
    let [program, program_data] = programs.metas();
    build(
        MetadataInstruction::SetImmutable,
        vec![
            AccountMeta::new(*metadata, false),
            AccountMeta::new_readonly(*authority, true),
            program,
            program_data,
        ],
    )
}

/// Move lamports above rent exemption to `destination`
///
/// Accounts: account (writable), authority (signer), program, program data,
/// destination (writable), rent sysvar
pub fn withdraw_excess_lamports(
    account: &Pubkey,
    authority: &Pubkey,
    programs: &ProgramAccounts,
    destination: &Pubkey,
) -> Instruction {
    let [program, program_data] = programs.metas();
    build(
        MetadataInstruction::WithdrawExcessLamports,
        vec![
            AccountMeta::new(*account, false),
            AccountMeta::new_readonly(*authority, true),
            program,
            program_data,
            AccountMeta::new(*destination, false),
            AccountMeta::new_readonly(sysvar::rent::id(), false),
        ],
    )
}

/// Close a metadata or buffer account, sending its lamports to `destination`
///
/// Accounts: account (writable), authority (signer), program, program data,
/// destination (writable)
pub fn close(account: &Pubkey, authority: &Pubkey, programs: &ProgramAccounts, destination: &Pubkey) -> Instruction {
    let [program, program_data] = programs.metas();
    build(
        MetadataInstruction::Close,
        vec![
            AccountMeta::new(*account, false),
            AccountMeta::new_readonly(*authority, true),
            program,
            program_data,
            AccountMeta::new(*destination, false),
        ],
    )
}

/// Turn a funded account into a buffer
///
/// PDA buffers pass their seed; keypair buffers pass none and sign as their
/// own authority.
///
/// Accounts: buffer (writable), authority (signer), program, program data,
/// system program
pub fn allocate(buffer: &Pubkey, authority: &Pubkey, programs: &ProgramAccounts, seed: Option<&Seed>) -> Instruction {
    let [program, program_data] = programs.metas();
    build(
        MetadataInstruction::Allocate {
            seed: seed.map(|seed| seed.as_bytes().as_slice()).into(),
        },
        vec![
            AccountMeta::new(*buffer, false),
            AccountMeta::new_readonly(*authority, true),
            program,
            program_data,
            AccountMeta::new_readonly(system_program::id(), false),
        ],
    )
}

/// Grow an account by `length` bytes, at most one realloc step
///
/// Accounts: account (writable), authority (signer), program, program data
pub fn extend(account: &Pubkey, authority: &Pubkey, programs: &ProgramAccounts, length: u16) -> Instruction {
    let [program, program_data] = programs.metas();
    build(
        MetadataInstruction::Extend { length },
        vec![
            AccountMeta::new(*account, false),
            AccountMeta::new_readonly(*authority, true),
            program,
            program_data,
        ],
    )
}

/// Shrink an account to its data and refund the excess rent
///
/// Accounts: account (writable), authority (signer), program, program data,
/// destination (writable), rent sysvar
pub fn trim(account: &Pubkey, authority: &Pubkey, programs: &ProgramAccounts, destination: &Pubkey) -> Instruction {
    let [program, program_data] = programs.metas();
    build(
        MetadataInstruction::Trim,
        vec![
            AccountMeta::new(*account, false),
            AccountMeta::new_readonly(*authority, true),
            program,
            program_data,
            AccountMeta::new(*destination, false),
            AccountMeta::new_readonly(sysvar::rent::id(), false),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Encoding, Format};

    fn keys() -> (Pubkey, Pubkey, Pubkey, Pubkey) {
        (
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
        )
    }

    #[test]
    fn test_write_layout() {
        let (buffer, authority, ..) = keys();
        let ix = write(&buffer, &authority, 258, b"abc");

        assert_eq!(ix.program_id, PROGRAM_METADATA_ID);
        assert_eq!(ix.data, vec![0, 2, 1, 0, 0, b'a', b'b', b'c']);
        assert!(ix.accounts[0].is_writable && !ix.accounts[0].is_signer);
        assert!(ix.accounts[1].is_signer && !ix.accounts[1].is_writable);
    }

    #[test]
    fn test_initialize_inline_data() {
        let (metadata, authority, program, program_data) = keys();
        let seed = Seed::new("idl").unwrap();
        let format = DataFormat {
            encoding: Encoding::Utf8,
            format: Format::Json,
            ..DataFormat::default()
        };
        let ix = initialize(
            &metadata,
            &authority,
            &ProgramAccounts::new(program, Some(program_data)),
            &seed,
            format,
            Some(b"{}"),
        );

        let mut expected = vec![1];
        expected.extend_from_slice(seed.as_bytes());
        expected.extend_from_slice(&[1, 0, 1, 0, b'{', b'}']);
        assert_eq!(ix.data, expected);

        let keys: Vec<Pubkey> = ix.accounts.iter().map(|meta| meta.pubkey).collect();
        assert_eq!(keys, vec![metadata, authority, program, program_data, system_program::id()]);
    }

    #[test]
    fn test_initialize_from_buffer_uses_placeholders() {
        let (metadata, authority, program, _) = keys();
        let ix = initialize(
            &metadata,
            &authority,
            &ProgramAccounts::new(program, None),
            &Seed::new("idl").unwrap(),
            DataFormat::default(),
            None,
        );

        assert_eq!(ix.data.len(), 1 + 16 + 4);
        assert_eq!(ix.accounts[3].pubkey, PROGRAM_METADATA_ID);
        assert_eq!(ix.accounts[4].pubkey, PROGRAM_METADATA_ID);
    }

    #[test]
    fn test_set_authority_option_encoding() {
        let (account, authority, new_authority, _) = keys();

        let set = set_authority(&account, &authority, &ProgramAccounts::none(), Some(&new_authority));
        assert_eq!(set.data[..2], [2, 1]);
        assert_eq!(&set.data[2..], new_authority.as_ref());

        let remove = set_authority(&account, &authority, &ProgramAccounts::none(), None);
        assert_eq!(remove.data, vec![2, 0]);
    }

    #[test]
    fn test_set_data_with_buffer() {
        let (metadata, authority, buffer, program) = keys();
        let ix = set_data(
            &metadata,
            &authority,
            &ProgramAccounts::new(program, None),
            Some(&buffer),
            DataFormat::default(),
            None,
        );

        assert_eq!(ix.data, vec![3, 0, 0, 0, 0]);
        assert_eq!(ix.accounts[2].pubkey, buffer);
        assert!(ix.accounts[2].is_writable);
    }

    #[test]
    fn test_discriminators() {
        let (account, authority, destination, _) = keys();
        let programs = ProgramAccounts::none();

        assert_eq!(set_immutable(&account, &authority, &programs).data, vec![4]);
        assert_eq!(
            withdraw_excess_lamports(&account, &authority, &programs, &destination).data,
            vec![5]
        );
        assert_eq!(close(&account, &authority, &programs, &destination).data, vec![6]);
        assert_eq!(allocate(&account, &account, &programs, None).data, vec![7]);
        assert_eq!(extend(&account, &authority, &programs, 10_240).data, vec![8, 0x00, 0x28]);
        assert_eq!(trim(&account, &authority, &programs, &destination).data, vec![9]);
    }

    #[test]
    fn test_allocate_pda_passes_seed() {
        let (buffer, authority, program, _) = keys();
        let seed = Seed::new("idl").unwrap();
        let ix = allocate(&buffer, &authority, &ProgramAccounts::new(program, None), Some(&seed));

        assert_eq!(ix.data[0], 7);
        assert_eq!(&ix.data[1..], seed.as_bytes());
        assert_eq!(ix.accounts[4].pubkey, system_program::id());
    }

    #[test]
    fn test_trim_passes_rent_sysvar() {
        let (account, authority, destination, _) = keys();
        let ix = trim(&account, &authority, &ProgramAccounts::none(), &destination);
        assert_eq!(ix.accounts.len(), 6);
        assert_eq!(ix.accounts[5].pubkey, sysvar::rent::id());
        assert!(ix.accounts[4].is_writable);
    }
}
