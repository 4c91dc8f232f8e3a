//! Structured logging for transaction plan execution

use solana_sdk::signature::Signature;

use crate::{
    instruction_plans::{errors::SendError, transaction_plan_result::ResultCounts},
    observability::{CorrelationId, TraceContext},
};

/// Structured logger for executor events
#[derive(Debug, Clone)]
pub struct ExecutionLogger {
    correlation_id: CorrelationId,
    span_id: String,
}

impl ExecutionLogger {
    pub fn new(trace: &TraceContext) -> Self {
        Self {
            correlation_id: trace.correlation_id.clone(),
            span_id: trace.span_id.clone(),
        }
    }

    pub fn log_execution_started(&self, transactions: usize) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            span_id = %self.span_id,
            transactions = %transactions,
            "Executing transaction plan"
        );
    }

    pub fn log_execution_finished(&self, counts: &ResultCounts) {
        if counts.failed > 0 || counts.canceled > 0 {
            tracing::warn!(
                correlation_id = %self.correlation_id,
                successful = %counts.successful,
                failed = %counts.failed,
                canceled = %counts.canceled,
                "Transaction plan did not complete"
            );
        } else {
            tracing::info!(
                correlation_id = %self.correlation_id,
                successful = %counts.successful,
                "Transaction plan completed"
            );
        }
    }

    pub fn log_transaction_confirmed(&self, signature: &Signature) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            signature = %signature,
            "Transaction confirmed"
        );
    }

    pub fn log_transaction_failed(&self, error: &SendError) {
        tracing::error!(
            correlation_id = %self.correlation_id,
            error = %error,
            category = error.category(),
            "Transaction failed"
        );
    }

    pub fn log_transaction_canceled(&self) {
        tracing::debug!(
            correlation_id = %self.correlation_id,
            "Transaction canceled"
        );
    }
}
