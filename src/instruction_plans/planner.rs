//! Transaction planner: packs an instruction plan into size-bounded transactions
//!
//! Planning is a recursive descent over the instruction plan. Each node
//! receives a list of candidate messages it may append to, and returns the
//! plan for the messages it created itself (`None` when everything went into
//! existing candidates). Messages live in an arena and are only moved into
//! the immutable [`TransactionPlan`] once the whole tree has been planned and
//! validated.
//!
//! Packing rules:
//! - A non-divisible sequential plan, or any sequential plan whose parent is
//!   parallel, must fit a single transaction.
//! - A divisible sequential plan carries its last transaction forward as the
//!   only candidate of the next child.
//! - A parallel plan lets each child use any candidate accumulated so far and
//!   plans dynamic children last, so they fill leftover space.
//! - A dynamic plan fills candidates first and opens new transactions as
//!   needed.
//!
//! An optional [`MessageTransformer`] rewrites a message every time
//! instructions are added to it, before its size is checked.

use std::sync::Arc;

use solana_sdk::{compute_budget::ComputeBudgetInstruction, pubkey::Pubkey};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    compute_budget::fill_provisory_compute_unit_limit,
    errors::PlanningError,
    instruction_plan::{DynamicInstructionPlan, InstructionPlan},
    transaction_message::TransactionMessage,
    transaction_plan::TransactionPlan,
    transaction_size::{TransactionSizeEstimator, WireSizeEstimator},
};
use crate::metrics::{metrics, Timer};

/// Builds the empty message every new transaction starts from
pub type MessageFactory = Arc<dyn Fn() -> TransactionMessage + Send + Sync>;

/// Rewrites a message after new instructions were appended to it
pub type MessageTransformer = Arc<dyn Fn(TransactionMessage) -> TransactionMessage + Send + Sync>;

/// Settings of the default planner
#[derive(Debug, Clone, Default)]
pub struct PlannerConfig {
    /// Optional priority fee in micro-lamports per compute unit
    pub compute_unit_price: Option<u64>,
}

/// Packs instruction plans into transaction plans
#[derive(Clone)]
pub struct TransactionPlanner {
    create_message: MessageFactory,
    estimator: Arc<dyn TransactionSizeEstimator>,
    transform: Option<MessageTransformer>,
}

impl TransactionPlanner {
    pub fn new(create_message: MessageFactory, estimator: Arc<dyn TransactionSizeEstimator>) -> Self {
        Self {
            create_message,
            estimator,
            transform: None,
        }
    }

    /// Apply `transform` to every message that receives new instructions
    pub fn with_message_transformer(mut self, transform: MessageTransformer) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Planner producing v0 messages paid by `fee_payer`
    ///
    /// Every message starts with a provisory compute unit limit and, when
    /// configured, a compute unit price.
    pub fn with_fee_payer(fee_payer: Pubkey, config: &PlannerConfig) -> Self {
        let compute_unit_price = config.compute_unit_price;
        let create_message: MessageFactory = Arc::new(move || {
            let mut message = fill_provisory_compute_unit_limit(TransactionMessage::new(fee_payer));
            if let Some(price) = compute_unit_price {
                message.push_instruction(ComputeBudgetInstruction::set_compute_unit_price(price));
            }
            message
        });
        Self::new(create_message, Arc::new(WireSizeEstimator))
    }

    pub fn estimator(&self) -> &dyn TransactionSizeEstimator {
        self.estimator.as_ref()
    }

    pub fn plan(&self, plan: &InstructionPlan) -> Result<TransactionPlan, PlanningError> {
        self.run(plan, None)
    }

    /// Plan, checking `abort` before visiting each node
    pub fn plan_with_abort(
        &self,
        plan: &InstructionPlan,
        abort: &CancellationToken,
    ) -> Result<TransactionPlan, PlanningError> {
        self.run(plan, Some(abort))
    }

    fn run(
        &self,
        plan: &InstructionPlan,
        abort: Option<&CancellationToken>,
    ) -> Result<TransactionPlan, PlanningError> {
        let timer = Timer::new();
        let mut builder = PlanBuilder {
            create_message: self.create_message.as_ref(),
            estimator: self.estimator.as_ref(),
            transform: self.transform.as_deref(),
            messages: Vec::new(),
            abort,
        };

        let result = builder
            .traverse(plan, Parent::Root, &[])
            .and_then(|draft| draft.ok_or(PlanningError::EmptyPlan))
            .and_then(|draft| builder.freeze(draft));

        match &result {
            Ok(frozen) => {
                let count = frozen.transaction_count();
                metrics().transactions_planned.inc_by(count as u64);
                timer.observe_duration(&metrics().planning_latency);
                debug!(transactions = count, "Instruction plan packed");
            }
            Err(e) => {
                warn!(error = %e, category = e.category(), "Planning failed");
            }
        }
        result
    }
}

type CandidateId = usize;

/// Mutable plan tree referencing messages in the builder's arena
#[derive(Debug)]
enum DraftPlan {
    Sequential { plans: Vec<DraftPlan>, divisible: bool },
    Parallel { plans: Vec<DraftPlan> },
    Single(CandidateId),
}

impl DraftPlan {
    fn singles(&self, out: &mut Vec<CandidateId>) {
        match self {
            Self::Sequential { plans, .. } | Self::Parallel { plans } => {
                for child in plans {
                    child.singles(out);
                }
            }
            Self::Single(id) => out.push(*id),
        }
    }

    /// Transaction that later siblings of a sequence may still grow
    ///
    /// Nothing after a parallel plan can join one of its transactions, since
    /// they may land in any order.
    fn last_single(&self) -> Option<CandidateId> {
        match self {
            Self::Sequential { plans, .. } => plans.last().and_then(DraftPlan::last_single),
            Self::Parallel { .. } => None,
            Self::Single(id) => Some(*id),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Parent {
    Root,
    Sequential { divisible: bool },
    Parallel,
}

struct PlanBuilder<'a> {
    create_message: &'a (dyn Fn() -> TransactionMessage + Send + Sync),
    estimator: &'a dyn TransactionSizeEstimator,
    transform: Option<&'a (dyn Fn(TransactionMessage) -> TransactionMessage + Send + Sync)>,
    messages: Vec<TransactionMessage>,
    abort: Option<&'a CancellationToken>,
}

impl PlanBuilder<'_> {
    fn traverse(
        &mut self,
        plan: &InstructionPlan,
        parent: Parent,
        candidates: &[CandidateId],
    ) -> Result<Option<DraftPlan>, PlanningError> {
        if self.abort.is_some_and(CancellationToken::is_cancelled) {
            return Err(PlanningError::Aborted);
        }

        match plan {
            InstructionPlan::Sequential { plans, divisible } => {
                self.traverse_sequential(plan, plans, *divisible, parent, candidates)
            }
            InstructionPlan::Parallel { plans } => self.traverse_parallel(plans, candidates),
            InstructionPlan::Single { .. } => self.fit_entirely(plan, candidates),
            InstructionPlan::Dynamic(dynamic) => self.traverse_dynamic(dynamic, parent, candidates),
        }
    }

    fn traverse_sequential(
        &mut self,
        plan: &InstructionPlan,
        plans: &[InstructionPlan],
        divisible: bool,
        parent: Parent,
        candidates: &[CandidateId],
    ) -> Result<Option<DraftPlan>, PlanningError> {
        if !divisible || matches!(parent, Parent::Parallel) {
            return self.fit_entirely(plan, candidates);
        }

        let mut candidate: Vec<CandidateId> = candidates.first().copied().into_iter().collect();
        let mut out = Vec::new();
        for child in plans {
            let Some(result) = self.traverse(child, Parent::Sequential { divisible }, &candidate)? else {
                continue;
            };
            candidate = result.last_single().into_iter().collect();
            match result {
                DraftPlan::Sequential {
                    plans,
                    divisible: child_divisible,
                } if child_divisible || !divisible => out.extend(plans),
                other => out.push(other),
            }
        }

        Ok(collapse(out, |plans| DraftPlan::Sequential { plans, divisible }))
    }

    fn traverse_parallel(
        &mut self,
        plans: &[InstructionPlan],
        candidates: &[CandidateId],
    ) -> Result<Option<DraftPlan>, PlanningError> {
        let mut ordered: Vec<&InstructionPlan> = plans.iter().collect();
        ordered.sort_by_key(|plan| plan.is_dynamic());

        let mut pool = candidates.to_vec();
        let mut out = Vec::new();
        for child in ordered {
            let Some(result) = self.traverse(child, Parent::Parallel, &pool)? else {
                continue;
            };
            result.singles(&mut pool);
            match result {
                DraftPlan::Parallel { plans } => out.extend(plans),
                other => out.push(other),
            }
        }

        Ok(collapse(out, |plans| DraftPlan::Parallel { plans }))
    }

    fn traverse_dynamic(
        &mut self,
        dynamic: &DynamicInstructionPlan,
        parent: Parent,
        candidates: &[CandidateId],
    ) -> Result<Option<DraftPlan>, PlanningError> {
        let mut packer = dynamic.create_packer();
        let mut pool = candidates.to_vec();
        let mut out = Vec::new();

        while !packer.done() {
            let packed_into_candidate = pool.iter().copied().find_map(|id| {
                packer
                    .pack_message(&self.messages[id], self.estimator)
                    .map(|message| (id, message))
            });
            // The packer has already consumed its chunk, so an oversized
            // transformed message is left for `freeze` to reject.
            if let Some((id, message)) = packed_into_candidate {
                let message = self.transformed(message);
                self.messages[id] = message;
                continue;
            }

            let fresh = (self.create_message)();
            let message = packer
                .pack_message(&fresh, self.estimator)
                .ok_or(PlanningError::CannotPackDynamicPlan)?;
            let message = self.transformed(message);
            let id = self.push_message(message);
            out.push(DraftPlan::Single(id));

            // Outside a parallel parent only the newest transaction may grow,
            // otherwise later chunks could land before earlier ones.
            match parent {
                Parent::Parallel => pool.push(id),
                Parent::Root | Parent::Sequential { .. } => pool = vec![id],
            }
        }

        Ok(match parent {
            Parent::Parallel => collapse(out, |plans| DraftPlan::Parallel { plans }),
            Parent::Sequential { divisible } => {
                collapse(out, |plans| DraftPlan::Sequential { plans, divisible })
            }
            Parent::Root => collapse(out, |plans| DraftPlan::Sequential {
                plans,
                divisible: true,
            }),
        })
    }

    /// Put every instruction of `plan` in one transaction
    ///
    /// Tries the candidates first, then a new transaction. Returns `None`
    /// when an existing candidate absorbed the whole plan.
    fn fit_entirely(
        &mut self,
        plan: &InstructionPlan,
        candidates: &[CandidateId],
    ) -> Result<Option<DraftPlan>, PlanningError> {
        if plan.is_empty() {
            return Ok(None);
        }

        for &id in candidates {
            if let Some(message) = self.append_all(plan, self.messages[id].clone()) {
                self.messages[id] = message;
                return Ok(None);
            }
        }

        match self.append_all(plan, (self.create_message)()) {
            Some(message) => Ok(Some(DraftPlan::Single(self.push_message(message)))),
            None => Err(PlanningError::CannotFitInSingleTransaction {
                instructions: plan.static_instructions().len(),
                limit: self.estimator.size_limit(),
            }),
        }
    }

    /// Append all of `plan`'s instructions to `message`, `None` if they do not fit
    fn append_all(&self, plan: &InstructionPlan, message: TransactionMessage) -> Option<TransactionMessage> {
        let message = self.transformed(self.append_descendants(plan, message)?);
        self.estimator.fits(&message).then_some(message)
    }

    fn transformed(&self, message: TransactionMessage) -> TransactionMessage {
        match self.transform {
            Some(transform) => transform(message),
            None => message,
        }
    }

    fn append_descendants(
        &self,
        plan: &InstructionPlan,
        mut message: TransactionMessage,
    ) -> Option<TransactionMessage> {
        match plan {
            InstructionPlan::Sequential { plans, .. } | InstructionPlan::Parallel { plans } => {
                for child in plans {
                    message = self.append_descendants(child, message)?;
                }
                Some(message)
            }
            InstructionPlan::Single { instructions } => {
                message.instructions.extend(instructions.iter().cloned());
                Some(message)
            }
            InstructionPlan::Dynamic(dynamic) => {
                let mut packer = dynamic.create_packer();
                while !packer.done() {
                    message = packer.pack_message(&message, self.estimator)?;
                }
                Some(message)
            }
        }
    }

    fn push_message(&mut self, message: TransactionMessage) -> CandidateId {
        self.messages.push(message);
        self.messages.len() - 1
    }

    /// Validate every transaction and move messages out of the arena
    fn freeze(&mut self, draft: DraftPlan) -> Result<TransactionPlan, PlanningError> {
        let mut ids = Vec::new();
        draft.singles(&mut ids);
        for id in ids {
            let message = &self.messages[id];
            if !self.estimator.fits(message) {
                return Err(PlanningError::InvalidTransactionPlan {
                    size: self.estimator.transaction_size(message),
                    limit: self.estimator.size_limit(),
                });
            }
        }
        Ok(self.take(draft))
    }

    fn take(&mut self, draft: DraftPlan) -> TransactionPlan {
        match draft {
            DraftPlan::Sequential { plans, divisible } => TransactionPlan::Sequential {
                plans: plans.into_iter().map(|child| self.take(child)).collect(),
                divisible,
            },
            DraftPlan::Parallel { plans } => TransactionPlan::Parallel {
                plans: plans.into_iter().map(|child| self.take(child)).collect(),
            },
            DraftPlan::Single(id) => TransactionPlan::Single {
                message: std::mem::take(&mut self.messages[id]),
            },
        }
    }
}

fn collapse(mut plans: Vec<DraftPlan>, wrap: impl FnOnce(Vec<DraftPlan>) -> DraftPlan) -> Option<DraftPlan> {
    match plans.len() {
        0 => None,
        1 => plans.pop(),
        _ => Some(wrap(plans)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        instruction_plans::instruction_plan::linear_instruction_plan,
        test_utils::{fixed_size_planner, instruction_of_size},
    };

    fn leaf(id: u32, size: usize) -> InstructionPlan {
        InstructionPlan::single(instruction_of_size(id, size))
    }

    fn message_sizes(plan: &TransactionPlan) -> Vec<usize> {
        plan.messages()
            .iter()
            .map(|m| m.instructions.iter().map(|ix| ix.data.len()).sum())
            .collect()
    }

    #[test]
    fn test_sequential_leaves_share_one_transaction() {
        let planner = fixed_size_planner(150);
        let plan = InstructionPlan::sequential([leaf(1, 100), leaf(2, 100), leaf(3, 100)]);

        let planned = planner.plan(&plan).unwrap();
        let TransactionPlan::Single { message } = planned else {
            panic!("expected a single transaction, got {planned:?}");
        };
        assert_eq!(message.instructions.len(), 3);
    }

    #[test]
    fn test_parallel_leaves_collapse_to_one_transaction() {
        let planner = fixed_size_planner(150);
        let plan = InstructionPlan::parallel([leaf(1, 100), leaf(2, 100), leaf(3, 100)]);

        let planned = planner.plan(&plan).unwrap();
        let TransactionPlan::Single { message } = planned else {
            panic!("expected a single transaction, got {planned:?}");
        };
        assert_eq!(message.instructions.len(), 3);
    }

    /// Transformer appending a 200 byte marker instruction once per message
    fn padding_transformer() -> MessageTransformer {
        Arc::new(|mut message: TransactionMessage| {
            let marker = instruction_of_size(u32::MAX, 200);
            if !message.instructions.contains(&marker) {
                message.push_instruction(marker);
            }
            message
        })
    }

    #[test]
    fn test_transformed_messages_are_size_checked() {
        let plan = InstructionPlan::parallel([leaf(1, 500), leaf(2, 500)]);
        assert_eq!(message_sizes(&fixed_size_planner(100).plan(&plan).unwrap()), vec![1000]);

        let planner = fixed_size_planner(100).with_message_transformer(padding_transformer());
        let planned = planner.plan(&plan).unwrap();
        // 100 + 500 + 500 + 200 no longer fits, so each leaf gets its own message.
        assert_eq!(message_sizes(&planned), vec![700, 700]);
        assert!(planned
            .messages()
            .iter()
            .all(|m| m.instructions.last() == Some(&instruction_of_size(u32::MAX, 200))));
    }

    #[test]
    fn test_transformer_applies_to_dynamic_plans() {
        let planner = fixed_size_planner(100).with_message_transformer(padding_transformer());
        let plan = InstructionPlan::parallel([linear_instruction_plan("write", 500, |offset, length| {
            instruction_of_size(offset as u32, length.max(4))
        })]);

        let planned = planner.plan(&plan).unwrap();
        let TransactionPlan::Single { message } = planned else {
            panic!("expected a single transaction, got {planned:?}");
        };
        assert_eq!(message.instructions.len(), 2);
        assert_eq!(message.instructions[1], instruction_of_size(u32::MAX, 200));
    }

    #[test]
    fn test_transformer_overflowing_a_packed_message_is_rejected() {
        let planner = fixed_size_planner(100).with_message_transformer(padding_transformer());
        let plan = InstructionPlan::parallel([linear_instruction_plan("write", 5000, |offset, length| {
            instruction_of_size(offset as u32, length.max(4))
        })]);

        assert!(matches!(
            planner.plan(&plan),
            Err(PlanningError::InvalidTransactionPlan { limit: 1232, .. })
        ));
    }

    #[test]
    fn test_parallel_oversized_leaves_get_own_transactions() {
        let planner = fixed_size_planner(100);
        let plan = InstructionPlan::parallel([leaf(1, 1100), leaf(2, 1100), leaf(3, 1100)]);

        let planned = planner.plan(&plan).unwrap();
        let TransactionPlan::Parallel { plans } = &planned else {
            panic!("expected a parallel plan, got {planned:?}");
        };
        assert_eq!(plans.len(), 3);
        assert!(plans.iter().all(|p| matches!(p, TransactionPlan::Single { .. })));
    }

    #[test]
    fn test_divisible_sequential_splits_in_order() {
        let planner = fixed_size_planner(100);
        let plan = InstructionPlan::sequential([leaf(1, 600), leaf(2, 600), leaf(3, 600)]);

        let planned = planner.plan(&plan).unwrap();
        assert!(matches!(planned, TransactionPlan::Sequential { divisible: true, .. }));
        assert_eq!(message_sizes(&planned), vec![600, 600, 600]);
    }

    #[test]
    fn test_non_divisible_sequential_too_large() {
        let planner = fixed_size_planner(100);
        let plan = InstructionPlan::non_divisible_sequential([leaf(1, 600), leaf(2, 600)]);

        let err = planner.plan(&plan).unwrap_err();
        assert_eq!(
            err,
            PlanningError::CannotFitInSingleTransaction {
                instructions: 2,
                limit: 1232
            }
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_divisible_sequential_under_parallel_must_fit() {
        let planner = fixed_size_planner(100);
        let plan = InstructionPlan::parallel([
            InstructionPlan::sequential([leaf(1, 600), leaf(2, 600)]),
            leaf(3, 10),
        ]);

        assert!(matches!(
            planner.plan(&plan),
            Err(PlanningError::CannotFitInSingleTransaction { .. })
        ));
    }

    #[test]
    fn test_empty_plans() {
        let planner = fixed_size_planner(100);
        assert_eq!(
            planner.plan(&InstructionPlan::sequential([])).unwrap_err(),
            PlanningError::EmptyPlan
        );
        assert_eq!(
            planner
                .plan(&InstructionPlan::parallel([InstructionPlan::sequential([])]))
                .unwrap_err(),
            PlanningError::EmptyPlan
        );
        assert_eq!(
            planner
                .plan(&linear_instruction_plan("nothing", 0, |o, _| instruction_of_size(o as u32, 4)))
                .unwrap_err(),
            PlanningError::EmptyPlan
        );
    }

    #[test]
    fn test_parallel_children_reuse_sibling_transactions() {
        let planner = fixed_size_planner(100);
        let plan = InstructionPlan::parallel([
            leaf(1, 700),
            leaf(2, 700),
            leaf(3, 300),
            leaf(4, 300),
        ]);

        let planned = planner.plan(&plan).unwrap();
        assert_eq!(message_sizes(&planned), vec![1000, 1000]);
    }

    #[test]
    fn test_dynamic_children_are_planned_last_in_parallel() {
        let planner = fixed_size_planner(100);
        let plan = InstructionPlan::parallel([
            linear_instruction_plan("write", 1500, |offset, length| {
                instruction_of_size(offset as u32, length.max(4))
            }),
            leaf(1, 1000),
        ]);

        let planned = planner.plan(&plan).unwrap();
        // The leaf opens the first transaction, the writer fills it and spills over.
        let sizes = message_sizes(&planned);
        assert_eq!(sizes[0], 1000 + 127);
        assert_eq!(sizes.iter().sum::<usize>(), 1000 + 1500);
    }

    #[test]
    fn test_dynamic_plan_in_sequence_keeps_order() {
        let planner = fixed_size_planner(100);
        let plan = InstructionPlan::sequential([
            leaf(1, 900),
            linear_instruction_plan("write", 3000, |offset, length| {
                instruction_of_size(offset as u32, length.max(4))
            }),
            leaf(2, 50),
        ]);

        let planned = planner.plan(&plan).unwrap();
        let offsets: Vec<u32> = planned
            .messages()
            .iter()
            .flat_map(|m| m.instructions.iter())
            .map(|ix| u32::from_le_bytes(ix.data[..4].try_into().unwrap()))
            .collect();

        // Writer ids are offsets: strictly increasing between the two leaves.
        assert_eq!(offsets.first(), Some(&1));
        assert_eq!(offsets.last(), Some(&2));
        let writes = &offsets[1..offsets.len() - 1];
        assert!(writes.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_instructions_after_parallel_get_new_transaction() {
        let planner = fixed_size_planner(100);
        let plan = InstructionPlan::sequential([
            InstructionPlan::parallel([leaf(1, 700), leaf(2, 700)]),
            leaf(3, 10),
        ]);

        let planned = planner.plan(&plan).unwrap();
        assert_eq!(message_sizes(&planned), vec![700, 700, 10]);
        let TransactionPlan::Sequential { plans, .. } = &planned else {
            panic!("expected a sequential plan, got {planned:?}");
        };
        assert!(matches!(plans[0], TransactionPlan::Parallel { .. }));
    }

    #[test]
    fn test_single_leaf_too_large() {
        let planner = fixed_size_planner(100);
        assert!(matches!(
            planner.plan(&leaf(1, 1200)),
            Err(PlanningError::CannotFitInSingleTransaction { instructions: 1, .. })
        ));
    }

    #[test]
    fn test_abort_stops_planning() {
        let planner = fixed_size_planner(100);
        let abort = CancellationToken::new();
        abort.cancel();

        let plan = InstructionPlan::sequential([leaf(1, 10)]);
        assert_eq!(
            planner.plan_with_abort(&plan, &abort).unwrap_err(),
            PlanningError::Aborted
        );
    }

    #[test]
    fn test_deep_nesting() {
        let planner = fixed_size_planner(100);
        let mut plan = leaf(0, 200);
        for depth in 1..64u32 {
            plan = if depth % 2 == 0 {
                InstructionPlan::sequential([plan, leaf(depth, 200)])
            } else {
                InstructionPlan::sequential([leaf(depth, 200), plan])
            };
        }

        let planned = planner.plan(&plan).unwrap();
        assert_eq!(planned.messages().iter().map(|m| m.instructions.len()).sum::<usize>(), 64);
        assert!(planned
            .messages()
            .iter()
            .all(|m| planner.estimator().fits(m)));
    }

    #[test]
    fn test_default_planner_adds_compute_budget() {
        let payer = Pubkey::new_unique();
        let planner = TransactionPlanner::with_fee_payer(
            payer,
            &PlannerConfig {
                compute_unit_price: Some(1_000),
            },
        );

        let planned = planner.plan(&leaf(1, 10)).unwrap();
        let TransactionPlan::Single { message } = planned else {
            panic!("expected a single transaction");
        };
        assert_eq!(message.fee_payer, payer);
        assert_eq!(message.instructions.len(), 3);
        assert!(message.lifetime.is_provisory());
    }
}
