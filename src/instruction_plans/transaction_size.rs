//! Transaction wire size estimation

use solana_sdk::{signature::Signature, transaction::VersionedTransaction};

use super::transaction_message::TransactionMessage;

/// IPv6 minimum MTU
pub const PACKET_SIZE: usize = 1280;
/// IPv6 header
pub const IP_HEADER_SIZE: usize = 40;
/// IPv6 fragment header
pub const FRAGMENT_HEADER_SIZE: usize = 8;
/// Maximum encoded size of a transaction
pub const TRANSACTION_SIZE_LIMIT: usize = PACKET_SIZE - IP_HEADER_SIZE - FRAGMENT_HEADER_SIZE;

/// Computes the encoded size of a candidate transaction
pub trait TransactionSizeEstimator: Send + Sync {
    /// Encoded size in bytes, `None` if the message cannot be compiled
    fn transaction_size(&self, message: &TransactionMessage) -> Option<usize>;

    fn size_limit(&self) -> usize {
        TRANSACTION_SIZE_LIMIT
    }

    fn fits(&self, message: &TransactionMessage) -> bool {
        self.transaction_size(message)
            .is_some_and(|size| size <= self.size_limit())
    }
}

/// Exact size of the signed, serialized v0 transaction
#[derive(Debug, Default, Clone, Copy)]
pub struct WireSizeEstimator;

impl TransactionSizeEstimator for WireSizeEstimator {
    fn transaction_size(&self, message: &TransactionMessage) -> Option<usize> {
        let compiled = message.compile().ok()?;
        let signatures = usize::from(compiled.header().num_required_signatures);
        let transaction = VersionedTransaction {
            signatures: vec![Signature::default(); signatures],
            message: compiled,
        };
        bincode::serialized_size(&transaction)
            .ok()
            .map(|size| size as usize)
    }
}
