//! Instruction plans for metadata operations
//!
//! Small payloads are written inline, in the instruction data of a single
//! transaction. Anything larger goes through a buffer: the data is written
//! in parallel chunks, then copied into the metadata account in one step.
//! [`plan_write_metadata`] picks the strategy by asking the planner whether
//! the inline plan fits.

use std::sync::Arc;

use serde::Serialize;
use solana_sdk::{pubkey::Pubkey, rent::Rent, system_instruction};
use tracing::{debug, info};

use super::{
    account_size,
    account::MetadataAccount,
    find_metadata_pda,
    instructions::{self, ProgramAccounts},
    DataFormat, MetadataError, Seed, PROGRAM_METADATA_ID,
};
use crate::instruction_plans::{
    linear_instruction_plan, realloc_instruction_plan, InstructionPlan, TransactionPlan, TransactionPlanner,
    REALLOC_LIMIT,
};

/// Largest account the runtime allows
pub const MAX_ACCOUNT_SIZE: usize = 10 * 1024 * 1024;

/// Metadata account addressed by program, authority and seed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataTarget {
    pub metadata: Pubkey,
    pub program: Pubkey,
    /// Program data account, set only for canonical metadata
    pub program_data: Option<Pubkey>,
    pub authority: Pubkey,
    pub payer: Pubkey,
    pub seed: Seed,
}

impl MetadataTarget {
    /// Canonical metadata, written by the program upgrade authority
    pub fn canonical(program: Pubkey, program_data: Pubkey, authority: Pubkey, payer: Pubkey, seed: Seed) -> Self {
        let (metadata, _) = find_metadata_pda(&program, None, &seed);
        Self {
            metadata,
            program,
            program_data: Some(program_data),
            authority,
            payer,
            seed,
        }
    }

    /// Third-party metadata, derived from the authority
    pub fn third_party(program: Pubkey, authority: Pubkey, payer: Pubkey, seed: Seed) -> Self {
        let (metadata, _) = find_metadata_pda(&program, Some(&authority), &seed);
        Self {
            metadata,
            program,
            program_data: None,
            authority,
            payer,
            seed,
        }
    }

    pub fn is_canonical(&self) -> bool {
        self.program_data.is_some()
    }

    pub fn programs(&self) -> ProgramAccounts {
        ProgramAccounts::new(self.program, self.program_data)
    }
}

/// Buffer account that already holds the new data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExistingBuffer {
    pub address: Pubkey,
    pub data_length: usize,
}

/// How [`plan_write_metadata`] decided to write the data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteStrategy {
    CreateInline,
    CreateWithBuffer,
    UpdateInline,
    UpdateWithNewBuffer,
    UpdateWithExistingBuffer,
}

/// Everything needed to plan a create or update
#[derive(Debug, Clone)]
pub struct WriteMetadataInput {
    pub target: MetadataTarget,
    pub format: DataFormat,
    pub data: Vec<u8>,
    /// Current metadata account, `None` to create it
    pub existing: Option<MetadataAccount>,
    /// Use this buffer instead of `data` when updating
    pub existing_buffer: Option<ExistingBuffer>,
    /// Fresh keypair address used when an update needs a new buffer
    pub new_buffer: Pubkey,
    /// Close the buffer once its data has been copied
    pub close_buffer: bool,
    /// Skip the inline attempt
    pub force_buffer: bool,
    pub rent: Rent,
}

/// Result of [`plan_write_metadata`]
#[derive(Debug, Clone)]
pub struct WritePlan {
    pub strategy: WriteStrategy,
    pub instruction_plan: InstructionPlan,
    pub transaction_plan: TransactionPlan,
}

/// Writes `data` to `buffer` in chunks sized to fill each transaction
pub fn write_data_plan(buffer: Pubkey, authority: Pubkey, data: Arc<Vec<u8>>) -> InstructionPlan {
    InstructionPlan::parallel([linear_instruction_plan("write", data.len(), move |offset, length| {
        instructions::write(&buffer, &authority, offset as u32, &data[offset..offset + length])
    })])
}

/// Grows `account` by `extra_length` bytes, in realloc sized steps
pub fn extend_plan(account: Pubkey, authority: Pubkey, programs: ProgramAccounts, extra_length: usize) -> InstructionPlan {
    realloc_instruction_plan("extend", extra_length, |length| {
        instructions::extend(&account, &authority, &programs, length as u16)
    })
}

/// Transfer rent and initialize with the data in one transaction
pub fn create_metadata_inline_plan(target: &MetadataTarget, format: DataFormat, data: &[u8], rent: &Rent) -> InstructionPlan {
    InstructionPlan::non_divisible_sequential([
        system_instruction::transfer(
            &target.payer,
            &target.metadata,
            rent.minimum_balance(account_size(data.len())),
        )
        .into(),
        instructions::initialize(
            &target.metadata,
            &target.authority,
            &target.programs(),
            &target.seed,
            format,
            Some(data),
        )
        .into(),
    ])
}

/// Use the metadata account itself as the buffer, then initialize from it
pub fn create_metadata_with_buffer_plan(
    target: &MetadataTarget,
    format: DataFormat,
    data: Arc<Vec<u8>>,
    rent: &Rent,
) -> InstructionPlan {
    let programs = target.programs();
    let mut plans = vec![InstructionPlan::atomic([
        system_instruction::transfer(
            &target.payer,
            &target.metadata,
            rent.minimum_balance(account_size(data.len())),
        ),
        instructions::allocate(&target.metadata, &target.authority, &programs, Some(&target.seed)),
    ])];
    if data.len() > REALLOC_LIMIT {
        plans.push(extend_plan(target.metadata, target.authority, programs, data.len()));
    }
    plans.push(write_data_plan(target.metadata, target.authority, data));
    plans.push(
        instructions::initialize(&target.metadata, &target.authority, &programs, &target.seed, format, None).into(),
    );
    InstructionPlan::sequential(plans)
}

fn extra_rent(rent: &Rent, current_length: usize, new_length: usize) -> u64 {
    rent.minimum_balance(account_size(new_length))
        .saturating_sub(rent.minimum_balance(account_size(current_length)))
}

fn trim_instruction(target: &MetadataTarget) -> InstructionPlan {
    instructions::trim(&target.metadata, &target.authority, &target.programs(), &target.payer).into()
}

/// Top up rent, replace the data inline and trim any excess
pub fn update_metadata_inline_plan(
    target: &MetadataTarget,
    format: DataFormat,
    data: &[u8],
    current_length: usize,
    rent: &Rent,
) -> InstructionPlan {
    let mut plans = Vec::new();
    if data.len() > current_length {
        plans.push(
            system_instruction::transfer(
                &target.payer,
                &target.metadata,
                extra_rent(rent, current_length, data.len()),
            )
            .into(),
        );
    }
    plans.push(
        instructions::set_data(
            &target.metadata,
            &target.authority,
            &target.programs(),
            None,
            format,
            Some(data),
        )
        .into(),
    );
    if data.len() < current_length {
        plans.push(trim_instruction(target));
    }
    InstructionPlan::sequential(plans)
}

/// Copy the data of a buffer into the metadata account
///
/// Shared tail of both buffer-based updates.
fn update_from_buffer_plans(
    target: &MetadataTarget,
    format: DataFormat,
    buffer: &Pubkey,
    new_length: usize,
    current_length: usize,
    close_buffer: bool,
) -> Vec<InstructionPlan> {
    let mut plans = Vec::new();
    plans.push(
        instructions::set_data(
            &target.metadata,
            &target.authority,
            &target.programs(),
            Some(buffer),
            format,
            None,
        )
        .into(),
    );
    if close_buffer {
        plans.push(instructions::close(buffer, &target.authority, &target.programs(), &target.payer).into());
    }
    if new_length < current_length {
        plans.push(trim_instruction(target));
    }
    plans
}

fn top_up_plans(target: &MetadataTarget, new_length: usize, current_length: usize, rent: &Rent) -> Vec<InstructionPlan> {
    let mut plans = Vec::new();
    if new_length > current_length {
        plans.push(
            system_instruction::transfer(
                &target.payer,
                &target.metadata,
                extra_rent(rent, current_length, new_length),
            )
            .into(),
        );
    }
    plans
}

fn grow_metadata_plans(target: &MetadataTarget, new_length: usize, current_length: usize) -> Vec<InstructionPlan> {
    let growth = new_length.saturating_sub(current_length);
    if growth > REALLOC_LIMIT {
        vec![extend_plan(target.metadata, target.authority, target.programs(), growth)]
    } else {
        Vec::new()
    }
}

/// Write the data to a fresh keypair buffer, then copy it over
#[allow(clippy::too_many_arguments)]
pub fn update_metadata_with_new_buffer_plan(
    target: &MetadataTarget,
    format: DataFormat,
    data: Arc<Vec<u8>>,
    current_length: usize,
    buffer: Pubkey,
    close_buffer: bool,
    rent: &Rent,
) -> InstructionPlan {
    let new_length = data.len();
    let mut plans = top_up_plans(target, new_length, current_length, rent);
    plans.push(InstructionPlan::atomic([
        system_instruction::create_account(
            &target.payer,
            &buffer,
            rent.minimum_balance(account_size(new_length)),
            account_size(new_length) as u64,
            &PROGRAM_METADATA_ID,
        ),
        instructions::allocate(&buffer, &buffer, &ProgramAccounts::none(), None),
        instructions::set_authority(&buffer, &buffer, &ProgramAccounts::none(), Some(&target.authority)),
    ]));
    plans.extend(grow_metadata_plans(target, new_length, current_length));
    plans.push(write_data_plan(buffer, target.authority, data));
    plans.extend(update_from_buffer_plans(
        target,
        format,
        &buffer,
        new_length,
        current_length,
        close_buffer,
    ));
    InstructionPlan::sequential(plans)
}

/// Copy an already written buffer into the metadata account
pub fn update_metadata_with_existing_buffer_plan(
    target: &MetadataTarget,
    format: DataFormat,
    buffer: &ExistingBuffer,
    current_length: usize,
    close_buffer: bool,
    rent: &Rent,
) -> InstructionPlan {
    let new_length = buffer.data_length;
    let mut plans = top_up_plans(target, new_length, current_length, rent);
    plans.extend(grow_metadata_plans(target, new_length, current_length));
    plans.extend(update_from_buffer_plans(
        target,
        format,
        &buffer.address,
        new_length,
        current_length,
        close_buffer,
    ));
    InstructionPlan::sequential(plans)
}

/// Plan a create or update of the metadata account
///
/// The inline plan is tried first; when the planner reports it cannot fit
/// in a single transaction, the buffer-based plan is used instead.
pub fn plan_write_metadata(planner: &TransactionPlanner, input: &WriteMetadataInput) -> Result<WritePlan, MetadataError> {
    let target = &input.target;
    if let Some(existing) = &input.existing {
        if !existing.mutable {
            return Err(MetadataError::Immutable);
        }
    }

    if let Some(buffer) = &input.existing_buffer {
        let current_length = input
            .existing
            .as_ref()
            .map(MetadataAccount::data_length)
            .ok_or(MetadataError::BufferRequiresMetadata)?;
        let instruction_plan = update_metadata_with_existing_buffer_plan(
            target,
            input.format,
            buffer,
            current_length,
            input.close_buffer,
            &input.rent,
        );
        return finish(planner, WriteStrategy::UpdateWithExistingBuffer, instruction_plan);
    }

    if input.data.is_empty() {
        return Err(MetadataError::MissingData);
    }
    if account_size(input.data.len()) > MAX_ACCOUNT_SIZE {
        return Err(MetadataError::DataTooLarge {
            length: input.data.len(),
            max: MAX_ACCOUNT_SIZE - account_size(0),
        });
    }

    let current_length = input.existing.as_ref().map(MetadataAccount::data_length);
    if !input.force_buffer {
        let (strategy, inline) = match current_length {
            None => (
                WriteStrategy::CreateInline,
                create_metadata_inline_plan(target, input.format, &input.data, &input.rent),
            ),
            Some(current_length) => (
                WriteStrategy::UpdateInline,
                update_metadata_inline_plan(target, input.format, &input.data, current_length, &input.rent),
            ),
        };
        match finish(planner, strategy, inline) {
            Err(MetadataError::Planning(e)) if e.is_retryable() => {
                debug!(error = %e, length = input.data.len(), "Inline write does not fit, using a buffer");
            }
            other => return other,
        }
    }

    let data = Arc::new(input.data.clone());
    let (strategy, instruction_plan) = match current_length {
        None => (
            WriteStrategy::CreateWithBuffer,
            create_metadata_with_buffer_plan(target, input.format, data, &input.rent),
        ),
        Some(current_length) => (
            WriteStrategy::UpdateWithNewBuffer,
            update_metadata_with_new_buffer_plan(
                target,
                input.format,
                data,
                current_length,
                input.new_buffer,
                input.close_buffer,
                &input.rent,
            ),
        ),
    };
    finish(planner, strategy, instruction_plan)
}

fn finish(
    planner: &TransactionPlanner,
    strategy: WriteStrategy,
    instruction_plan: InstructionPlan,
) -> Result<WritePlan, MetadataError> {
    let transaction_plan = planner.plan(&instruction_plan)?;
    info!(
        strategy = ?strategy,
        transactions = transaction_plan.transaction_count(),
        "Metadata write planned"
    );
    Ok(WritePlan {
        strategy,
        instruction_plan,
        transaction_plan,
    })
}

/// Close the metadata account and refund its rent to the payer
pub fn close_metadata_plan(target: &MetadataTarget) -> InstructionPlan {
    instructions::close(&target.metadata, &target.authority, &target.programs(), &target.payer).into()
}

/// Close a keypair buffer and refund its rent to `destination`
pub fn close_buffer_plan(buffer: &Pubkey, authority: &Pubkey, destination: &Pubkey) -> InstructionPlan {
    instructions::close(buffer, authority, &ProgramAccounts::none(), destination).into()
}

/// Set a new metadata authority, or remove it with `None`
pub fn set_authority_plan(target: &MetadataTarget, new_authority: Option<&Pubkey>) -> InstructionPlan {
    instructions::set_authority(&target.metadata, &target.authority, &target.programs(), new_authority).into()
}

pub fn set_immutable_plan(target: &MetadataTarget) -> InstructionPlan {
    instructions::set_immutable(&target.metadata, &target.authority, &target.programs()).into()
}

pub fn withdraw_excess_lamports_plan(target: &MetadataTarget) -> InstructionPlan {
    instructions::withdraw_excess_lamports(&target.metadata, &target.authority, &target.programs(), &target.payer)
        .into()
}
