//! Program metadata client library
//!
//! Builds instruction plans for the program-metadata program, packs them
//! into size-bounded transactions and executes them with retries, blockhash
//! refresh and compute budget estimation.

pub mod config;
pub mod instruction_plans;
pub mod metadata;
pub mod metrics;
pub mod observability;
pub mod rpc;
pub mod structured_logging;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

// Re-export commonly used types
pub use instruction_plans::{
    InstructionPlan, TransactionPlan, TransactionPlanExecutor, TransactionPlanResult, TransactionPlanner,
};
pub use metadata::{MetadataError, PROGRAM_METADATA_ID};
pub use solana_sdk::{pubkey::Pubkey, signature::Signature};
