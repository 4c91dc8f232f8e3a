//! Test Utilities Module
//!
//! This module provides test-only utilities for mocking transaction sending,
//! blockhash fetching and compute unit estimation, plus a size estimator
//! that makes planner tests independent of the wire format.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use async_trait::async_trait;
use parking_lot::Mutex;
use solana_sdk::{
    compute_budget,
    hash::Hash,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;

use crate::instruction_plans::{
    errors::SendError,
    executor::SendAndConfirm,
    planner::{MessageFactory, TransactionPlanner},
    transaction_message::{BlockhashLifetime, TransactionMessage},
    transaction_plan_result::{SentTransaction, TransactionContext},
    transaction_size::TransactionSizeEstimator,
    BlockhashSource, ComputeUnitEstimator,
};

/// Program id used by every test instruction
pub const TEST_PROGRAM: Pubkey = Pubkey::new_from_array([7; 32]);

/// Fee payer used by test planners
pub const TEST_PAYER: Pubkey = Pubkey::new_from_array([9; 32]);

/// Instruction carrying exactly `size` bytes of data
///
/// The first `min(4, size)` bytes hold `id` in little endian so tests can
/// tell instructions apart after planning.
pub fn instruction_of_size(id: u32, size: usize) -> Instruction {
    let mut data = vec![0u8; size];
    let prefix = size.min(4);
    data[..prefix].copy_from_slice(&id.to_le_bytes()[..prefix]);
    Instruction::new_with_bytes(TEST_PROGRAM, &data, vec![])
}

/// Id stored by [`instruction_of_size`] in the first non compute budget instruction
pub fn message_id(message: &TransactionMessage) -> u32 {
    message
        .instructions
        .iter()
        .find(|ix| ix.program_id != compute_budget::id())
        .map(|ix| {
            let mut bytes = [0u8; 4];
            let prefix = ix.data.len().min(4);
            bytes[..prefix].copy_from_slice(&ix.data[..prefix]);
            u32::from_le_bytes(bytes)
        })
        .unwrap_or_default()
}

/// Size estimator with a fixed cost per message and per instruction
///
/// `size = base + sum(per_instruction + data.len())`
#[derive(Debug, Clone, Copy)]
pub struct FixedSizeEstimator {
    pub base: usize,
    pub per_instruction: usize,
}

impl FixedSizeEstimator {
    pub fn new(base: usize, per_instruction: usize) -> Self {
        Self { base, per_instruction }
    }
}

impl TransactionSizeEstimator for FixedSizeEstimator {
    fn transaction_size(&self, message: &TransactionMessage) -> Option<usize> {
        Some(
            self.base
                + message
                    .instructions
                    .iter()
                    .map(|ix| self.per_instruction + ix.data.len())
                    .sum::<usize>(),
        )
    }
}

/// Planner over empty messages sized by a [`FixedSizeEstimator`]
pub fn fixed_size_planner(base: usize) -> TransactionPlanner {
    let create_message: MessageFactory = Arc::new(|| TransactionMessage::new(TEST_PAYER));
    TransactionPlanner::new(create_message, Arc::new(FixedSizeEstimator::new(base, 0)))
}

#[derive(Default)]
struct MockSenderState {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    received: Mutex<Vec<TransactionMessage>>,
}

/// Mock sender for testing
///
/// Records every message it receives and succeeds unless configured to
/// fail. Clones share the same recorded state.
#[derive(Clone, Default)]
pub struct MockSender {
    /// Transaction ids that always fail
    failing_ids: HashSet<u32>,

    /// Number of initial calls that fail regardless of the message
    fail_first: usize,

    /// Simulated network latency, applied before the outcome is decided
    delay: Option<Duration>,

    state: Arc<MockSenderState>,
}

impl MockSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, id: u32) -> Self {
        self.failing_ids.insert(id);
        self
    }

    pub fn failing_first(mut self, calls: usize) -> Self {
        self.fail_first = calls;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<TransactionMessage> {
        self.state.received.lock().clone()
    }

    /// Ids of the received messages, in arrival order
    pub fn sent_ids(&self) -> Vec<u32> {
        self.state.received.lock().iter().map(message_id).collect()
    }

    fn outcome(&self, message: &TransactionMessage, id: u32, call: usize) -> Result<SentTransaction, SendError> {
        if call <= self.fail_first {
            return Err(SendError::Rpc(format!("call {call} rejected")));
        }
        if self.failing_ids.contains(&id) {
            return Err(SendError::Rpc(format!("transaction {id} rejected (call {call})")));
        }

        let mut signature = [0u8; 64];
        signature[..4].copy_from_slice(&id.to_le_bytes());
        signature[4..12].copy_from_slice(&(call as u64).to_le_bytes());
        let signature = Signature::from(signature);

        Ok(SentTransaction {
            transaction: VersionedTransaction {
                signatures: vec![signature],
                message: message.compile()?,
            },
            context: TransactionContext {
                signature,
                slot: Some(call as u64),
            },
        })
    }
}

#[async_trait]
impl SendAndConfirm for MockSender {
    async fn send_and_confirm(
        &self,
        message: TransactionMessage,
        _abort: &CancellationToken,
    ) -> Result<SentTransaction, SendError> {
        let call = self.state.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let id = message_id(&message);
        self.state.received.lock().push(message.clone());

        let in_flight = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.outcome(&message, id, call)
    }
}

/// Blockhash source returning a new hash per call
///
/// `last_valid_block_height` is the call number, so tests can tell which
/// fetch a message was stamped with.
#[derive(Clone, Default)]
pub struct CountingBlockhashSource {
    calls: Arc<AtomicUsize>,
}

impl CountingBlockhashSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockhashSource for CountingBlockhashSource {
    async fn latest_blockhash(&self) -> Result<BlockhashLifetime, SendError> {
        let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(BlockhashLifetime::new(Hash::new_unique(), calls as u64))
    }
}

/// Compute unit estimator returning a constant
#[derive(Debug, Clone, Copy)]
pub struct FixedComputeUnits(pub u32);

#[async_trait]
impl ComputeUnitEstimator for FixedComputeUnits {
    async fn estimate_compute_units(&self, _message: &TransactionMessage) -> Result<u32, SendError> {
        Ok(self.0)
    }
}
