//! Frozen output of the planner

use serde::Serialize;

use super::transaction_message::TransactionMessage;

/// Tree of transaction messages ready to be executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionPlan {
    Sequential {
        plans: Vec<TransactionPlan>,
        divisible: bool,
    },
    Parallel {
        plans: Vec<TransactionPlan>,
    },
    Single {
        message: TransactionMessage,
    },
}

impl TransactionPlan {
    /// All messages in depth-first order
    pub fn messages(&self) -> Vec<&TransactionMessage> {
        let mut out = Vec::new();
        self.collect_messages(&mut out);
        out
    }

    fn collect_messages<'a>(&'a self, out: &mut Vec<&'a TransactionMessage>) {
        match self {
            Self::Sequential { plans, .. } | Self::Parallel { plans } => {
                for child in plans {
                    child.collect_messages(out);
                }
            }
            Self::Single { message } => out.push(message),
        }
    }

    pub fn transaction_count(&self) -> usize {
        match self {
            Self::Sequential { plans, .. } | Self::Parallel { plans } => {
                plans.iter().map(TransactionPlan::transaction_count).sum()
            }
            Self::Single { .. } => 1,
        }
    }

    /// Serializable outline of the plan, used for dry runs
    pub fn summary(&self) -> PlanSummary {
        match self {
            Self::Sequential { plans, divisible } => PlanSummary::Sequential {
                divisible: *divisible,
                plans: plans.iter().map(TransactionPlan::summary).collect(),
            },
            Self::Parallel { plans } => PlanSummary::Parallel {
                plans: plans.iter().map(TransactionPlan::summary).collect(),
            },
            Self::Single { message } => PlanSummary::Single {
                instructions: message.instructions.len(),
                programs: message
                    .instructions
                    .iter()
                    .map(|ix| ix.program_id.to_string())
                    .collect(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PlanSummary {
    Sequential { divisible: bool, plans: Vec<PlanSummary> },
    Parallel { plans: Vec<PlanSummary> },
    Single { instructions: usize, programs: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::instruction_of_size;
    use solana_sdk::pubkey::Pubkey;

    fn single(id: u32) -> TransactionPlan {
        TransactionPlan::Single {
            message: TransactionMessage::new(Pubkey::new_unique())
                .with_instructions([instruction_of_size(id, 8)]),
        }
    }

    #[test]
    fn test_messages_depth_first() {
        let plan = TransactionPlan::Sequential {
            divisible: true,
            plans: vec![
                single(1),
                TransactionPlan::Parallel {
                    plans: vec![single(2), single(3)],
                },
                single(4),
            ],
        };

        let ids: Vec<u8> = plan
            .messages()
            .iter()
            .map(|m| m.instructions[0].data[0])
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(plan.transaction_count(), 4);
    }

    #[test]
    fn test_summary_serializes_with_kind_tag() {
        let plan = TransactionPlan::Parallel {
            plans: vec![single(1)],
        };
        let json = serde_json::to_value(plan.summary()).unwrap();
        assert_eq!(json["kind"], "parallel");
        assert_eq!(json["plans"][0]["kind"], "single");
        assert_eq!(json["plans"][0]["instructions"], 1);
    }
}
