//! Compute budget helpers
//!
//! Planned messages carry a provisory `SetComputeUnitLimit(0)` instruction so
//! that its bytes are accounted for while packing. The real limit is filled
//! in right before sending, from a simulation.

use async_trait::async_trait;
use solana_sdk::{
    compute_budget::{self, ComputeBudgetInstruction},
    instruction::Instruction,
};
use tracing::debug;

use super::{errors::SendError, transaction_message::TransactionMessage};
use crate::metrics::metrics;

/// Placeholder limit set while planning
pub const PROVISORY_COMPUTE_UNIT_LIMIT: u32 = 0;
/// Maximum compute units a transaction may request
pub const MAX_COMPUTE_UNIT_LIMIT: u32 = 1_400_000;

const SET_COMPUTE_UNIT_LIMIT_TAG: u8 = 2;

/// Estimates the compute units consumed by a message
#[async_trait]
pub trait ComputeUnitEstimator: Send + Sync {
    async fn estimate_compute_units(&self, message: &TransactionMessage) -> Result<u32, SendError>;
}

/// Index and value of the `SetComputeUnitLimit` instruction, if any
pub fn compute_unit_limit_of(message: &TransactionMessage) -> Option<(usize, u32)> {
    message
        .instructions
        .iter()
        .enumerate()
        .find_map(|(index, ix)| parse_compute_unit_limit(ix).map(|units| (index, units)))
}

fn parse_compute_unit_limit(ix: &Instruction) -> Option<u32> {
    if ix.program_id != compute_budget::id() {
        return None;
    }
    match ix.data.as_slice() {
        [SET_COMPUTE_UNIT_LIMIT_TAG, a, b, c, d] => Some(u32::from_le_bytes([*a, *b, *c, *d])),
        _ => None,
    }
}

/// Set the compute unit limit, replacing the existing instruction or appending one
pub fn set_compute_unit_limit(mut message: TransactionMessage, units: u32) -> TransactionMessage {
    let ix = ComputeBudgetInstruction::set_compute_unit_limit(units);
    match compute_unit_limit_of(&message) {
        Some((index, _)) => message.instructions[index] = ix,
        None => message.instructions.push(ix),
    }
    message
}

/// Append a provisory limit instruction unless the message already has one
pub fn fill_provisory_compute_unit_limit(message: TransactionMessage) -> TransactionMessage {
    if compute_unit_limit_of(&message).is_some() {
        return message;
    }
    set_compute_unit_limit(message, PROVISORY_COMPUTE_UNIT_LIMIT)
}

/// Whether the limit still needs to be estimated before sending
pub fn needs_compute_unit_estimate(message: &TransactionMessage) -> bool {
    match compute_unit_limit_of(message) {
        None => true,
        Some((_, units)) => units == PROVISORY_COMPUTE_UNIT_LIMIT || units == MAX_COMPUTE_UNIT_LIMIT,
    }
}

/// Simulate and update the limit when it is missing, provisory or maxed out
///
/// Explicit limits chosen by the caller are left untouched.
pub async fn estimate_and_update_provisory_compute_unit_limit<E>(
    message: TransactionMessage,
    estimator: &E,
) -> Result<TransactionMessage, SendError>
where
    E: ComputeUnitEstimator + ?Sized,
{
    if !needs_compute_unit_estimate(&message) {
        return Ok(message);
    }

    // Simulate with the maximum so a provisory zero does not abort the run.
    let simulated = set_compute_unit_limit(message, MAX_COMPUTE_UNIT_LIMIT);
    let units = estimator.estimate_compute_units(&simulated).await?;
    metrics().compute_unit_estimates.inc();
    debug!(units, "Compute unit limit estimated");

    Ok(set_compute_unit_limit(simulated, units.min(MAX_COMPUTE_UNIT_LIMIT)))
}

/// Apply a 10% buffer on top of simulated units, capped at the maximum
pub fn apply_compute_unit_margin(units_consumed: u64) -> u32 {
    let with_margin = (units_consumed as f64 * 1.1).ceil() as u64;
    with_margin.min(u64::from(MAX_COMPUTE_UNIT_LIMIT)) as u32
}
