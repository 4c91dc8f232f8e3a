//! Signer-ready transaction messages
//!
//! A [`TransactionMessage`] is the unit the planner packs instructions into.
//! It stays uncompiled until it is sent so decorators can still swap its
//! lifetime or compute budget instructions.

use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    message::{v0, VersionedMessage},
    pubkey::Pubkey,
    signer::Signer,
    transaction::VersionedTransaction,
};

use super::errors::SendError;

/// Blockhash based lifetime of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockhashLifetime {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

impl BlockhashLifetime {
    pub fn new(blockhash: Hash, last_valid_block_height: u64) -> Self {
        Self {
            blockhash,
            last_valid_block_height,
        }
    }

    /// Placeholder lifetime used while planning, replaced before signing
    pub fn provisory() -> Self {
        Self::default()
    }

    pub fn is_provisory(&self) -> bool {
        *self == Self::provisory()
    }
}

/// Uncompiled v0 transaction message
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransactionMessage {
    pub fee_payer: Pubkey,
    pub instructions: Vec<Instruction>,
    pub lifetime: BlockhashLifetime,
}

impl TransactionMessage {
    /// Create an empty message with a provisory lifetime
    pub fn new(fee_payer: Pubkey) -> Self {
        Self {
            fee_payer,
            instructions: Vec::new(),
            lifetime: BlockhashLifetime::provisory(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl IntoIterator<Item = Instruction>) -> Self {
        self.instructions.extend(instructions);
        self
    }

    pub fn with_lifetime(mut self, lifetime: BlockhashLifetime) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn push_instruction(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Copy of this message with `instructions` appended
    pub fn appended(&self, instructions: &[Instruction]) -> Self {
        let mut message = self.clone();
        message.instructions.extend_from_slice(instructions);
        message
    }

    /// Compile into a v0 message without address lookup tables
    pub fn compile(&self) -> Result<VersionedMessage, SendError> {
        v0::Message::try_compile(
            &self.fee_payer,
            &self.instructions,
            &[],
            self.lifetime.blockhash,
        )
        .map(VersionedMessage::V0)
        .map_err(|e| SendError::Compilation(e.to_string()))
    }
}

/// Sign a message with the subset of `signers` it requires
///
/// Extra signers are ignored; a missing one is a [`SendError::Signing`].
pub fn sign_transaction_message(
    message: &TransactionMessage,
    signers: &[&dyn Signer],
) -> Result<VersionedTransaction, SendError> {
    let compiled = message.compile()?;
    let required = usize::from(compiled.header().num_required_signatures);

    let mut selected: Vec<&dyn Signer> = Vec::with_capacity(required);
    for key in compiled.static_account_keys().iter().take(required) {
        let signer = signers
            .iter()
            .find(|signer| signer.pubkey() == *key)
            .ok_or_else(|| SendError::Signing(format!("missing signer for {key}")))?;
        selected.push(*signer);
    }

    VersionedTransaction::try_new(compiled, selected.as_slice())
        .map_err(|e| SendError::Signing(e.to_string()))
}
