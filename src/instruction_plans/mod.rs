//! Instruction planning and transaction plan execution
//!
//! This module turns a tree of instructions into size-bounded transactions
//! and sends them:
//!
//! ```text
//! InstructionPlan --TransactionPlanner--> TransactionPlan
//!     --TransactionPlanExecutor--> TransactionPlanResult
//! ```
//!
//! - **instruction_plan**: sequential / parallel / single / dynamic plans and
//!   the message packers behind dynamic plans
//! - **planner**: packs plans into transactions of at most 1232 bytes,
//!   honoring ordering and atomicity
//! - **executor**: sends transaction plans with chunked concurrency and
//!   cancellation on first failure
//! - **decorators**: retry, blockhash refresh and compute budget estimation
//!   around the raw send operation
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use program_metadata::instruction_plans::{InstructionPlan, PlannerConfig, TransactionPlanner};
//! # fn example(payer: solana_sdk::pubkey::Pubkey, ixs: Vec<solana_sdk::instruction::Instruction>)
//! #     -> Result<(), program_metadata::instruction_plans::PlanningError> {
//! let planner = TransactionPlanner::with_fee_payer(payer, &PlannerConfig::default());
//! let plan = InstructionPlan::sequential(ixs.into_iter().map(InstructionPlan::single));
//! let transactions = planner.plan(&plan)?;
//! println!("{} transaction(s)", transactions.transaction_count());
//! # Ok(())
//! # }
//! ```

pub mod compute_budget;
pub mod decorators;
pub mod errors;
pub mod executor;
pub mod instruction_plan;
pub mod planner;
pub mod timed_cache;
pub mod transaction_message;
pub mod transaction_plan;
pub mod transaction_plan_result;
pub mod transaction_size;

pub use compute_budget::{ComputeUnitEstimator, MAX_COMPUTE_UNIT_LIMIT, PROVISORY_COMPUTE_UNIT_LIMIT};
pub use decorators::{
    default_send_and_confirm, BlockhashRefreshSender, BlockhashSource, ComputeBudgetSender, DefaultSender,
    RetrySender, SenderConfig,
};
pub use errors::{ExecutionError, PlanningError, SendError};
pub use executor::{ExecutorConfig, SendAndConfirm, SendFn, TransactionPlanExecutor};
pub use instruction_plan::{
    instructions_plan, linear_instruction_plan, realloc_instruction_plan, InstructionPlan, MessagePacker,
    REALLOC_LIMIT,
};
pub use planner::{MessageFactory, MessageTransformer, PlannerConfig, TransactionPlanner};
pub use transaction_message::{sign_transaction_message, BlockhashLifetime, TransactionMessage};
pub use transaction_plan::TransactionPlan;
pub use transaction_plan_result::{SentTransaction, TransactionContext, TransactionPlanResult, TransactionStatus};
pub use transaction_size::{TransactionSizeEstimator, WireSizeEstimator, TRANSACTION_SIZE_LIMIT};
