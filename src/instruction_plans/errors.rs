//! Error types for instruction planning and transaction plan execution
//!
//! Planning errors are raised immediately by the planner. Send errors are
//! recorded per transaction inside the result tree, and the executor only
//! surfaces an [`ExecutionError`] once traversal is complete, carrying the
//! whole result tree with it.

use thiserror::Error;

use super::transaction_plan_result::TransactionPlanResult;

/// Errors raised while turning an instruction plan into a transaction plan
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanningError {
    /// The instruction plan does not contain a single instruction
    #[error("Cannot plan an empty instruction plan")]
    EmptyPlan,

    /// A subtree that must stay atomic does not fit in one transaction
    ///
    /// Callers typically react to this one by switching to another strategy,
    /// e.g. writing data through a buffer account instead of inline.
    #[error("{instructions} instruction(s) cannot fit in a single transaction of {limit} bytes")]
    CannotFitInSingleTransaction {
        /// Number of instructions that had to be packed together
        instructions: usize,
        /// Size ceiling that was exceeded
        limit: usize,
    },

    /// A message packer could not add anything to a brand new transaction
    #[error("Message packer cannot fit any instruction in an empty transaction")]
    CannotPackDynamicPlan,

    /// A planned transaction failed the final size validation
    #[error("Planned transaction does not fit in {limit} bytes (encoded size: {size:?})")]
    InvalidTransactionPlan {
        /// Encoded size, `None` when the message could not be compiled
        size: Option<usize>,
        /// Size ceiling
        limit: usize,
    },

    /// The abort signal fired while planning
    #[error("Planning aborted")]
    Aborted,
}

impl PlanningError {
    /// Check whether the caller may succeed by planning differently
    ///
    /// Only oversize atomic groups qualify: the same instructions split
    /// another way (through a buffer, for instance) can still be planned.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CannotFitInSingleTransaction { .. })
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::EmptyPlan => "empty",
            Self::CannotFitInSingleTransaction { .. } => "oversize",
            Self::CannotPackDynamicPlan => "packer",
            Self::InvalidTransactionPlan { .. } => "validation",
            Self::Aborted => "aborted",
        }
    }
}

/// Error produced by a single send-and-confirm attempt
///
/// Cloneable so it can live inside the result tree and be re-raised by the
/// retry decorator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// RPC communication failure
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Failed to sign the transaction
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Compute unit simulation failed
    #[error("Simulation failed: {0}")]
    Simulation(String),

    /// Failed to fetch a recent blockhash
    #[error("Blockhash error: {0}")]
    Blockhash(String),

    /// The transaction landed but failed, or never confirmed
    #[error("Confirmation failed: {0}")]
    Confirmation(String),

    /// Message could not be compiled into a transaction
    #[error("Message compilation failed: {0}")]
    Compilation(String),

    /// The abort signal fired while the transaction was in flight
    #[error("Send aborted")]
    Aborted,
}

impl SendError {
    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::Rpc(_) => "rpc",
            Self::Signing(_) => "signing",
            Self::Simulation(_) => "simulation",
            Self::Blockhash(_) => "blockhash",
            Self::Confirmation(_) => "confirmation",
            Self::Compilation(_) => "compilation",
            Self::Aborted => "aborted",
        }
    }

    /// Create an RPC error
    pub fn rpc(reason: impl std::fmt::Display) -> Self {
        Self::Rpc(reason.to_string())
    }

    /// Create a simulation error
    pub fn simulation(reason: impl std::fmt::Display) -> Self {
        Self::Simulation(reason.to_string())
    }
}

/// Error returned by the executor once every transaction has settled
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// At least one transaction failed; the rest were canceled or succeeded
    #[error("Transaction plan failed: {failed} failed, {canceled} canceled")]
    PlanFailed {
        /// Complete result tree
        result: TransactionPlanResult,
        /// Number of failed transactions
        failed: usize,
        /// Number of canceled transactions
        canceled: usize,
    },

    /// The abort signal fired before every transaction could be sent
    #[error("Transaction plan canceled: {canceled} transaction(s) not sent")]
    PlanCanceled {
        /// Complete result tree
        result: TransactionPlanResult,
        /// Number of canceled transactions
        canceled: usize,
    },
}

impl ExecutionError {
    /// Result tree of the execution that produced this error
    pub fn result(&self) -> &TransactionPlanResult {
        match self {
            Self::PlanFailed { result, .. } | Self::PlanCanceled { result, .. } => result,
        }
    }

    /// Take ownership of the result tree
    pub fn into_result(self) -> TransactionPlanResult {
        match self {
            Self::PlanFailed { result, .. } | Self::PlanCanceled { result, .. } => result,
        }
    }

    /// First send error encountered in traversal order, if any
    pub fn first_error(&self) -> Option<&SendError> {
        self.result().errors().into_iter().next()
    }
}
