//! Solana RPC adapters
//!
//! Implements the executor seams ([`SendAndConfirm`], [`BlockhashSource`],
//! [`ComputeUnitEstimator`]) on top of the nonblocking [`RpcClient`], plus
//! the account lookups the CLI needs before planning.

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_rpc_client_api::config::RpcSimulateTransactionConfig;
use solana_sdk::{
    account::Account,
    bpf_loader, bpf_loader_deprecated,
    bpf_loader_upgradeable::{self, UpgradeableLoaderState},
    commitment_config::CommitmentConfig,
    pubkey::Pubkey,
    rent::Rent,
    signature::{Keypair, Signature, Signer},
    sysvar,
    transaction::VersionedTransaction,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    instruction_plans::{
        compute_budget::apply_compute_unit_margin, sign_transaction_message, BlockhashLifetime, BlockhashSource,
        ComputeUnitEstimator, SendAndConfirm, SendError, SentTransaction, TransactionContext, TransactionMessage,
    },
    metadata::{program_data_address, BufferAccount, MetadataAccount, MetadataError},
};

/// Delay between two signature status polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Load a keypair file
///
/// Accepts raw 64 bytes, the JSON array written by `solana-keygen`, or a
/// base58 encoded secret key as exported by wallets.
pub fn load_keypair(path: impl AsRef<Path>) -> Result<Keypair> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read keypair file: {}", path.display()))?;

    let secret = if bytes.len() == 64 {
        bytes
    } else if bytes.trim_ascii_start().starts_with(b"[") {
        serde_json::from_slice::<Vec<u8>>(&bytes).context("Failed to parse keypair JSON")?
    } else {
        let text = std::str::from_utf8(&bytes).context("Keypair file is neither JSON nor base58")?;
        bs58::decode(text.trim())
            .into_vec()
            .context("Failed to decode base58 keypair")?
    };
    if secret.len() != 64 {
        anyhow::bail!("Invalid keypair length: expected 64 bytes, got {}", secret.len());
    }
    if secret.iter().all(|&b| b == 0) {
        anyhow::bail!("Invalid keypair: all-zero key rejected");
    }
    Keypair::try_from(secret.as_slice()).context("Invalid keypair bytes")
}

/// Signs, sends and polls transactions until they reach the configured
/// commitment
pub struct RpcSendAndConfirm {
    client: Arc<RpcClient>,
    signers: Vec<Arc<Keypair>>,
    commitment: CommitmentConfig,
    poll_interval: Duration,
}

impl RpcSendAndConfirm {
    pub fn new(client: Arc<RpcClient>, signers: Vec<Arc<Keypair>>, commitment: CommitmentConfig) -> Self {
        Self {
            client,
            signers,
            commitment,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn sign(&self, message: &TransactionMessage) -> Result<VersionedTransaction, SendError> {
        let signers: Vec<&dyn Signer> = self.signers.iter().map(|k| k.as_ref() as &dyn Signer).collect();
        sign_transaction_message(message, &signers)
    }

    /// Poll until confirmed, failed, or past the last valid block height
    async fn confirm(
        &self,
        signature: &Signature,
        lifetime: &BlockhashLifetime,
        abort: &CancellationToken,
    ) -> Result<Option<u64>, SendError> {
        let started_at = Instant::now();
        loop {
            let statuses = self
                .client
                .get_signature_statuses(&[*signature])
                .await
                .map_err(SendError::rpc)?;

            if let Some(Some(status)) = statuses.value.first() {
                if let Some(err) = &status.err {
                    return Err(SendError::Confirmation(format!("transaction {signature} failed: {err}")));
                }
                if status.satisfies_commitment(self.commitment) {
                    debug!(
                        signature = %signature,
                        slot = status.slot,
                        latency_ms = started_at.elapsed().as_millis() as u64,
                        "Transaction confirmed"
                    );
                    return Ok(Some(status.slot));
                }
            } else {
                let block_height = self
                    .client
                    .get_block_height_with_commitment(self.commitment)
                    .await
                    .map_err(SendError::rpc)?;
                if block_height > lifetime.last_valid_block_height {
                    return Err(SendError::Confirmation(format!(
                        "blockhash expired before {signature} landed (block height {block_height})"
                    )));
                }
            }

            tokio::select! {
                _ = abort.cancelled() => return Err(SendError::Aborted),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

#[async_trait]
impl SendAndConfirm for RpcSendAndConfirm {
    async fn send_and_confirm(
        &self,
        message: TransactionMessage,
        abort: &CancellationToken,
    ) -> Result<SentTransaction, SendError> {
        if abort.is_cancelled() {
            return Err(SendError::Aborted);
        }
        let transaction = self.sign(&message)?;

        let signature = tokio::select! {
            _ = abort.cancelled() => return Err(SendError::Aborted),
            sent = self.client.send_transaction(&transaction) => sent.map_err(|e| match e.get_transaction_error() {
                Some(err) => SendError::Confirmation(err.to_string()),
                None => SendError::rpc(e),
            })?,
        };
        debug!(signature = %signature, "Transaction sent");

        let slot = self.confirm(&signature, &message.lifetime, abort).await?;
        Ok(SentTransaction {
            transaction,
            context: TransactionContext { signature, slot },
        })
    }
}

/// Latest blockhash at the configured commitment
pub struct RpcBlockhashSource {
    client: Arc<RpcClient>,
    commitment: CommitmentConfig,
}

impl RpcBlockhashSource {
    pub fn new(client: Arc<RpcClient>, commitment: CommitmentConfig) -> Self {
        Self { client, commitment }
    }
}

#[async_trait]
impl BlockhashSource for RpcBlockhashSource {
    async fn latest_blockhash(&self) -> Result<BlockhashLifetime, SendError> {
        let (blockhash, last_valid_block_height) = self
            .client
            .get_latest_blockhash_with_commitment(self.commitment)
            .await
            .map_err(|e| SendError::Blockhash(e.to_string()))?;
        Ok(BlockhashLifetime::new(blockhash, last_valid_block_height))
    }
}

/// Estimates compute units by simulating the unsigned message
pub struct RpcComputeUnitEstimator {
    client: Arc<RpcClient>,
    commitment: CommitmentConfig,
}

impl RpcComputeUnitEstimator {
    pub fn new(client: Arc<RpcClient>, commitment: CommitmentConfig) -> Self {
        Self { client, commitment }
    }
}

#[async_trait]
impl ComputeUnitEstimator for RpcComputeUnitEstimator {
    async fn estimate_compute_units(&self, message: &TransactionMessage) -> Result<u32, SendError> {
        let compiled = message.compile()?;
        let transaction = VersionedTransaction {
            signatures: vec![Signature::default(); usize::from(compiled.header().num_required_signatures)],
            message: compiled,
        };
        let config = RpcSimulateTransactionConfig {
            sig_verify: false,
            replace_recent_blockhash: true,
            commitment: Some(self.commitment),
            ..RpcSimulateTransactionConfig::default()
        };

        let response = self
            .client
            .simulate_transaction_with_config(&transaction, config)
            .await
            .map_err(SendError::simulation)?;
        let result = response.value;
        if let Some(err) = result.err {
            let logs = result.logs.unwrap_or_default();
            warn!(error = %err, logs = ?logs, "Compute unit simulation failed");
            return Err(SendError::simulation(err));
        }
        let units_consumed = result
            .units_consumed
            .ok_or_else(|| SendError::simulation("simulation did not report consumed units"))?;
        Ok(apply_compute_unit_margin(units_consumed))
    }
}

/// Upgrade authority of a program and its program data account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramAuthority {
    pub authority: Option<Pubkey>,
    pub program_data: Option<Pubkey>,
}

async fn fetch_account(
    client: &RpcClient,
    address: &Pubkey,
    commitment: CommitmentConfig,
) -> Result<Option<Account>, MetadataError> {
    client
        .get_account_with_commitment(address, commitment)
        .await
        .map(|response| response.value)
        .map_err(|e| MetadataError::Rpc(e.to_string()))
}

async fn fetch_existing_account(
    client: &RpcClient,
    address: &Pubkey,
    commitment: CommitmentConfig,
) -> Result<Account, MetadataError> {
    fetch_account(client, address, commitment)
        .await?
        .ok_or(MetadataError::AccountNotFound(*address))
}

/// Resolve who may write canonical metadata for `program`
///
/// Loader v1 and v2 programs are their own authority. Upgradeable programs
/// report the upgrade authority stored in their program data account.
pub async fn fetch_program_authority(
    client: &RpcClient,
    program: &Pubkey,
    commitment: CommitmentConfig,
) -> Result<ProgramAuthority, MetadataError> {
    let account = fetch_existing_account(client, program, commitment).await?;
    if !account.executable {
        return Err(MetadataError::NotExecutable(*program));
    }

    if account.owner == bpf_loader::id() || account.owner == bpf_loader_deprecated::id() {
        return Ok(ProgramAuthority {
            authority: Some(*program),
            program_data: None,
        });
    }
    if account.owner != bpf_loader_upgradeable::id() {
        return Err(MetadataError::UnsupportedLoader(account.owner));
    }

    let program_data = program_data_address(program);
    match decode_loader_state(&account.data)? {
        UpgradeableLoaderState::Program { programdata_address } if programdata_address == program_data => {}
        _ => {
            return Err(MetadataError::InvalidAccountData(format!(
                "{program} does not point to its program data account"
            )))
        }
    }

    let data_account = fetch_existing_account(client, &program_data, commitment).await?;
    if data_account.executable {
        return Err(MetadataError::InvalidAccountData(format!(
            "program data account {program_data} must not be executable"
        )));
    }
    match decode_loader_state(&data_account.data)? {
        UpgradeableLoaderState::ProgramData {
            upgrade_authority_address,
            ..
        } => Ok(ProgramAuthority {
            authority: upgrade_authority_address,
            program_data: Some(program_data),
        }),
        _ => Err(MetadataError::InvalidAccountData(format!(
            "{program_data} is not a program data account"
        ))),
    }
}

fn decode_loader_state(data: &[u8]) -> Result<UpgradeableLoaderState, MetadataError> {
    bincode::deserialize(data).map_err(|e| MetadataError::InvalidAccountData(e.to_string()))
}

/// Metadata account at `address`, `None` when it does not exist yet
pub async fn fetch_metadata_account(
    client: &RpcClient,
    address: &Pubkey,
    commitment: CommitmentConfig,
) -> Result<Option<MetadataAccount>, MetadataError> {
    fetch_account(client, address, commitment)
        .await?
        .map(|account| MetadataAccount::try_from_bytes(&account.data))
        .transpose()
}

pub async fn fetch_buffer_account(
    client: &RpcClient,
    address: &Pubkey,
    commitment: CommitmentConfig,
) -> Result<BufferAccount, MetadataError> {
    let account = fetch_existing_account(client, address, commitment).await?;
    BufferAccount::try_from_bytes(&account.data)
}

/// Current rent parameters from the rent sysvar
pub async fn fetch_rent(client: &RpcClient, commitment: CommitmentConfig) -> Result<Rent, MetadataError> {
    let account = fetch_existing_account(client, &sysvar::rent::id(), commitment).await?;
    bincode::deserialize(&account.data).map_err(|e| MetadataError::InvalidAccountData(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_keypair_json_and_raw() {
        let keypair = Keypair::new();
        let bytes = keypair.to_bytes();

        let mut json = NamedTempFile::new().unwrap();
        write!(json, "{}", serde_json::to_string(&bytes.to_vec()).unwrap()).unwrap();
        assert_eq!(load_keypair(json.path()).unwrap().pubkey(), keypair.pubkey());

        let mut raw = NamedTempFile::new().unwrap();
        raw.write_all(&bytes).unwrap();
        assert_eq!(load_keypair(raw.path()).unwrap().pubkey(), keypair.pubkey());

        let mut base58 = NamedTempFile::new().unwrap();
        writeln!(base58, "{}", keypair.to_base58_string()).unwrap();
        assert_eq!(load_keypair(base58.path()).unwrap().pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_load_keypair_rejects_bad_input() {
        let mut zeros = NamedTempFile::new().unwrap();
        zeros.write_all(&[0u8; 64]).unwrap();
        assert!(load_keypair(zeros.path()).is_err());

        let mut short = NamedTempFile::new().unwrap();
        write!(short, "[1, 2, 3]").unwrap();
        assert!(load_keypair(short.path()).is_err());

        assert!(load_keypair("/nonexistent/keypair.json").is_err());
    }

    #[test]
    fn test_decode_upgradeable_program_state() {
        let program_data = Pubkey::new_unique();
        let authority = Pubkey::new_unique();

        let program = bincode::serialize(&UpgradeableLoaderState::Program {
            programdata_address: program_data,
        })
        .unwrap();
        assert_eq!(
            decode_loader_state(&program).unwrap(),
            UpgradeableLoaderState::Program {
                programdata_address: program_data
            }
        );

        let mut data = bincode::serialize(&UpgradeableLoaderState::ProgramData {
            slot: 42,
            upgrade_authority_address: Some(authority),
        })
        .unwrap();
        // Program bytes follow the header.
        data.extend_from_slice(&[0xAB; 32]);
        let UpgradeableLoaderState::ProgramData {
            upgrade_authority_address, ..
        } = decode_loader_state(&data).unwrap()
        else {
            panic!("expected program data");
        };
        assert_eq!(upgrade_authority_address, Some(authority));
    }
}
