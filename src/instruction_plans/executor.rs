//! Transaction plan executor
//!
//! Walks a [`TransactionPlan`] and sends each transaction through a
//! [`SendAndConfirm`] implementation:
//! - sequential children are sent one after another,
//! - parallel children are sent in chunks of `parallel_chunk_size`,
//!   concurrently within a chunk,
//! - after the first failure (or once the abort signal fires) every
//!   transaction that has not started yet is marked canceled.
//!
//! The executor never stops halfway: it always returns the full result tree,
//! wrapped in an [`ExecutionError`] when anything failed or was canceled.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{
    errors::{ExecutionError, SendError},
    transaction_message::TransactionMessage,
    transaction_plan::TransactionPlan,
    transaction_plan_result::{SentTransaction, TransactionPlanResult, TransactionStatus},
};
use crate::{
    metrics::{metrics, Timer},
    observability::TraceContext,
    structured_logging::ExecutionLogger,
};

/// Default number of parallel transactions in flight
pub const DEFAULT_PARALLEL_CHUNK_SIZE: usize = 5;

/// Signs, sends and confirms one transaction message
#[async_trait]
pub trait SendAndConfirm: Send + Sync {
    async fn send_and_confirm(
        &self,
        message: TransactionMessage,
        abort: &CancellationToken,
    ) -> Result<SentTransaction, SendError>;
}

#[async_trait]
impl<T: SendAndConfirm + ?Sized> SendAndConfirm for Arc<T> {
    async fn send_and_confirm(
        &self,
        message: TransactionMessage,
        abort: &CancellationToken,
    ) -> Result<SentTransaction, SendError> {
        (**self).send_and_confirm(message, abort).await
    }
}

/// Adapts an async closure into a [`SendAndConfirm`]
pub struct SendFn<F>(pub F);

#[async_trait]
impl<F, Fut> SendAndConfirm for SendFn<F>
where
    F: Fn(TransactionMessage, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<SentTransaction, SendError>> + Send,
{
    async fn send_and_confirm(
        &self,
        message: TransactionMessage,
        abort: &CancellationToken,
    ) -> Result<SentTransaction, SendError> {
        (self.0)(message, abort.clone()).await
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub parallel_chunk_size: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            parallel_chunk_size: DEFAULT_PARALLEL_CHUNK_SIZE,
        }
    }
}

/// Cancellation state shared by one execution
struct ExecutionContext {
    canceled: AtomicBool,
    abort: CancellationToken,
    logger: ExecutionLogger,
}

impl ExecutionContext {
    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst) || self.abort.is_cancelled()
    }

    fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }
}

pub struct TransactionPlanExecutor<S> {
    sender: S,
    config: ExecutorConfig,
    trace: TraceContext,
}

impl<S: SendAndConfirm> TransactionPlanExecutor<S> {
    pub fn new(sender: S, config: ExecutorConfig) -> Self {
        Self {
            sender,
            config,
            trace: TraceContext::new("transaction_plan_executor"),
        }
    }

    /// Attach executions to an existing trace
    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = trace;
        self
    }

    pub async fn execute(&self, plan: &TransactionPlan) -> Result<TransactionPlanResult, ExecutionError> {
        self.execute_with_abort(plan, CancellationToken::new()).await
    }

    /// Execute `plan`, canceling unsent transactions once `abort` fires
    pub async fn execute_with_abort(
        &self,
        plan: &TransactionPlan,
        abort: CancellationToken,
    ) -> Result<TransactionPlanResult, ExecutionError> {
        let trace = self.trace.child_span("execute_transaction_plan");
        let context = ExecutionContext {
            canceled: AtomicBool::new(false),
            abort,
            logger: ExecutionLogger::new(&trace),
        };
        context.logger.log_execution_started(plan.transaction_count());

        let result = self.traverse(plan, &context).instrument(trace.span()).await;

        let counts = result.counts();
        context.logger.log_execution_finished(&counts);
        if counts.failed > 0 {
            Err(ExecutionError::PlanFailed {
                result,
                failed: counts.failed,
                canceled: counts.canceled,
            })
        } else if counts.canceled > 0 {
            Err(ExecutionError::PlanCanceled {
                result,
                canceled: counts.canceled,
            })
        } else {
            Ok(result)
        }
    }

    fn traverse<'a>(
        &'a self,
        plan: &'a TransactionPlan,
        context: &'a ExecutionContext,
    ) -> BoxFuture<'a, TransactionPlanResult> {
        async move {
            match plan {
                TransactionPlan::Sequential { plans, divisible } => {
                    let mut results = Vec::with_capacity(plans.len());
                    for child in plans {
                        results.push(self.traverse(child, context).await);
                    }
                    TransactionPlanResult::Sequential {
                        plans: results,
                        divisible: *divisible,
                    }
                }
                TransactionPlan::Parallel { plans } => {
                    let mut results = Vec::with_capacity(plans.len());
                    for chunk in plans.chunks(self.config.parallel_chunk_size.max(1)) {
                        let chunk_results =
                            join_all(chunk.iter().map(|child| self.traverse(child, context))).await;
                        results.extend(chunk_results);
                    }
                    TransactionPlanResult::Parallel { plans: results }
                }
                TransactionPlan::Single { message } => TransactionPlanResult::Single {
                    message: message.clone(),
                    status: self.execute_single(message, context).await,
                },
            }
        }
        .boxed()
    }

    async fn execute_single(&self, message: &TransactionMessage, context: &ExecutionContext) -> TransactionStatus {
        if context.is_canceled() {
            metrics().transactions_canceled.inc();
            context.logger.log_transaction_canceled();
            return TransactionStatus::Canceled;
        }

        let timer = Timer::new();
        metrics().transactions_sent.inc();
        let outcome = self
            .sender
            .send_and_confirm(message.clone(), &context.abort)
            .await;
        timer.observe_duration(&metrics().send_latency);

        match outcome {
            Ok(SentTransaction {
                transaction,
                context: tx_context,
            }) => {
                metrics().transactions_succeeded.inc();
                context.logger.log_transaction_confirmed(&tx_context.signature);
                TransactionStatus::Successful {
                    transaction,
                    context: tx_context,
                }
            }
            Err(SendError::Aborted) => {
                context.cancel();
                metrics().transactions_canceled.inc();
                context.logger.log_transaction_canceled();
                TransactionStatus::Canceled
            }
            Err(error) => {
                context.cancel();
                metrics().transactions_failed.inc();
                context.logger.log_transaction_failed(&error);
                TransactionStatus::Failed { error }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{instruction_of_size, MockSender};
    use solana_sdk::pubkey::Pubkey;
    use std::time::Duration;

    fn single(id: u32) -> TransactionPlan {
        TransactionPlan::Single {
            message: TransactionMessage::new(Pubkey::new_unique())
                .with_instructions([instruction_of_size(id, 8)]),
        }
    }

    fn status_kinds(result: &TransactionPlanResult) -> Vec<&'static str> {
        result
            .statuses()
            .into_iter()
            .map(|status| match status {
                TransactionStatus::Successful { .. } => "successful",
                TransactionStatus::Failed { .. } => "failed",
                TransactionStatus::Canceled => "canceled",
            })
            .collect()
    }

    #[tokio::test]
    async fn test_successful_plan_mirrors_shape() {
        let sender = MockSender::new();
        let executor = TransactionPlanExecutor::new(sender.clone(), ExecutorConfig::default());
        let plan = TransactionPlan::Sequential {
            divisible: false,
            plans: vec![
                single(1),
                TransactionPlan::Parallel {
                    plans: vec![single(2), single(3)],
                },
            ],
        };

        let result = executor.execute(&plan).await.unwrap();
        let TransactionPlanResult::Sequential { plans, divisible } = &result else {
            panic!("expected a sequential result");
        };
        assert!(!divisible);
        assert!(matches!(&plans[1], TransactionPlanResult::Parallel { plans } if plans.len() == 2));
        assert_eq!(status_kinds(&result), vec!["successful"; 3]);
        assert_eq!(sender.sent_ids(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failure_cancels_remaining_sequential() {
        let sender = MockSender::new().failing_on(1);
        let executor = TransactionPlanExecutor::new(sender.clone(), ExecutorConfig::default());
        let plan = TransactionPlan::Sequential {
            divisible: true,
            plans: vec![single(1), single(2)],
        };

        let err = executor.execute(&plan).await.unwrap_err();
        assert!(matches!(err, ExecutionError::PlanFailed { failed: 1, canceled: 1, .. }));
        assert_eq!(status_kinds(err.result()), vec!["failed", "canceled"]);
        assert!(err.first_error().is_some());
        assert_eq!(sender.sent_ids(), vec![1]);
    }

    #[tokio::test]
    async fn test_failure_in_the_middle() {
        let sender = MockSender::new().failing_on(2);
        let executor = TransactionPlanExecutor::new(sender, ExecutorConfig::default());
        let plan = TransactionPlan::Sequential {
            divisible: true,
            plans: vec![single(1), single(2), single(3)],
        };

        let err = executor.execute(&plan).await.unwrap_err();
        assert_eq!(status_kinds(err.result()), vec!["successful", "failed", "canceled"]);
    }

    #[tokio::test]
    async fn test_parallel_chunks_bound_concurrency() {
        let sender = MockSender::new().with_delay(Duration::from_millis(10));
        let executor = TransactionPlanExecutor::new(
            sender.clone(),
            ExecutorConfig {
                parallel_chunk_size: 2,
            },
        );
        let plan = TransactionPlan::Parallel {
            plans: (1..=5).map(single).collect(),
        };

        let result = executor.execute(&plan).await.unwrap();
        assert_eq!(result.counts().successful, 5);
        assert_eq!(sender.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_failure_in_chunk_cancels_later_chunks() {
        let sender = MockSender::new()
            .failing_on(1)
            .with_delay(Duration::from_millis(5));
        let executor = TransactionPlanExecutor::new(
            sender.clone(),
            ExecutorConfig {
                parallel_chunk_size: 2,
            },
        );
        let plan = TransactionPlan::Parallel {
            plans: (1..=4).map(single).collect(),
        };

        let err = executor.execute(&plan).await.unwrap_err();
        assert_eq!(
            status_kinds(err.result()),
            vec!["failed", "successful", "canceled", "canceled"]
        );
        assert_eq!(sender.sent_ids().len(), 2);
    }

    #[tokio::test]
    async fn test_abort_before_execution() {
        let sender = MockSender::new();
        let executor = TransactionPlanExecutor::new(sender.clone(), ExecutorConfig::default());
        let abort = CancellationToken::new();
        abort.cancel();

        let err = executor
            .execute_with_abort(&single(1), abort)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::PlanCanceled { canceled: 1, .. }));
        assert!(sender.sent_ids().is_empty());
    }

    #[tokio::test]
    async fn test_abort_while_in_flight() {
        let abort = CancellationToken::new();
        let trigger = abort.clone();
        let sender = SendFn(move |_message: TransactionMessage, abort: CancellationToken| {
            let trigger = trigger.clone();
            async move {
                trigger.cancel();
                abort.cancelled().await;
                Err(SendError::Aborted)
            }
        });
        let executor = TransactionPlanExecutor::new(sender, ExecutorConfig::default());
        let plan = TransactionPlan::Sequential {
            divisible: true,
            plans: vec![single(1), single(2)],
        };

        let err = executor.execute_with_abort(&plan, abort).await.unwrap_err();
        assert_eq!(status_kinds(err.result()), vec!["canceled", "canceled"]);
    }
}
