//! Outcome of executing a transaction plan, shaped like the plan itself

use serde::Serialize;
use solana_sdk::{signature::Signature, transaction::VersionedTransaction};

use super::{errors::SendError, transaction_message::TransactionMessage};

/// Details reported by the network for a confirmed transaction
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransactionContext {
    pub signature: Signature,
    /// Slot the transaction landed in, when the sender reported it
    pub slot: Option<u64>,
}

/// Signed transaction together with its confirmation context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTransaction {
    pub transaction: VersionedTransaction,
    pub context: TransactionContext,
}

/// Final status of one planned transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    Successful {
        transaction: VersionedTransaction,
        context: TransactionContext,
    },
    Failed {
        error: SendError,
    },
    /// Never sent because an earlier failure or the abort signal canceled it
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionPlanResult {
    Sequential {
        plans: Vec<TransactionPlanResult>,
        divisible: bool,
    },
    Parallel {
        plans: Vec<TransactionPlanResult>,
    },
    Single {
        message: TransactionMessage,
        status: TransactionStatus,
    },
}

impl TransactionPlanResult {
    /// Statuses of every transaction in depth-first order
    pub fn statuses(&self) -> Vec<&TransactionStatus> {
        let mut out = Vec::new();
        self.collect_statuses(&mut out);
        out
    }

    fn collect_statuses<'a>(&'a self, out: &mut Vec<&'a TransactionStatus>) {
        match self {
            Self::Sequential { plans, .. } | Self::Parallel { plans } => {
                for child in plans {
                    child.collect_statuses(out);
                }
            }
            Self::Single { status, .. } => out.push(status),
        }
    }

    pub fn errors(&self) -> Vec<&SendError> {
        self.statuses()
            .into_iter()
            .filter_map(|status| match status {
                TransactionStatus::Failed { error } => Some(error),
                _ => None,
            })
            .collect()
    }

    /// Signatures of confirmed transactions in depth-first order
    pub fn signatures(&self) -> Vec<Signature> {
        self.statuses()
            .into_iter()
            .filter_map(|status| match status {
                TransactionStatus::Successful { context, .. } => Some(context.signature),
                _ => None,
            })
            .collect()
    }

    pub fn counts(&self) -> ResultCounts {
        let mut counts = ResultCounts::default();
        for status in self.statuses() {
            match status {
                TransactionStatus::Successful { .. } => counts.successful += 1,
                TransactionStatus::Failed { .. } => counts.failed += 1,
                TransactionStatus::Canceled => counts.canceled += 1,
            }
        }
        counts
    }

    pub fn is_successful(&self) -> bool {
        let counts = self.counts();
        counts.failed == 0 && counts.canceled == 0
    }

    /// Serializable outline of the result tree
    pub fn summary(&self) -> ResultSummary {
        match self {
            Self::Sequential { plans, divisible } => ResultSummary::Sequential {
                divisible: *divisible,
                plans: plans.iter().map(TransactionPlanResult::summary).collect(),
            },
            Self::Parallel { plans } => ResultSummary::Parallel {
                plans: plans.iter().map(TransactionPlanResult::summary).collect(),
            },
            Self::Single { status, .. } => match status {
                TransactionStatus::Successful { context, .. } => ResultSummary::Successful {
                    signature: context.signature.to_string(),
                    slot: context.slot,
                },
                TransactionStatus::Failed { error } => ResultSummary::Failed {
                    error: error.to_string(),
                },
                TransactionStatus::Canceled => ResultSummary::Canceled,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResultCounts {
    pub successful: usize,
    pub failed: usize,
    pub canceled: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResultSummary {
    Sequential {
        divisible: bool,
        plans: Vec<ResultSummary>,
    },
    Parallel {
        plans: Vec<ResultSummary>,
    },
    Successful {
        signature: String,
        slot: Option<u64>,
    },
    Failed {
        error: String,
    },
    Canceled,
}
