//! Address derivation for metadata accounts

use solana_sdk::{bpf_loader_upgradeable, pubkey::Pubkey};

use super::{Seed, PROGRAM_METADATA_ID};

/// Derive the metadata account address
///
/// Canonical metadata (written by the program upgrade authority) is derived
/// from `[program, seed]`; third-party metadata from
/// `[program, authority, seed]`.
pub fn find_metadata_pda(program: &Pubkey, authority: Option<&Pubkey>, seed: &Seed) -> (Pubkey, u8) {
    match authority {
        None => Pubkey::find_program_address(&[program.as_ref(), seed.as_bytes()], &PROGRAM_METADATA_ID),
        Some(authority) => Pubkey::find_program_address(
            &[program.as_ref(), authority.as_ref(), seed.as_bytes()],
            &PROGRAM_METADATA_ID,
        ),
    }
}

/// Program data account of an upgradeable program
pub fn program_data_address(program: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[program.as_ref()], &bpf_loader_upgradeable::id()).0
}
