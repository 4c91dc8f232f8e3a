//! End-to-end metadata writes against mock senders
//!
//! Plans real program-metadata instructions with the wire size estimator,
//! then runs them through the default decorator stack.

#[cfg(test)]
mod metadata_write_tests {
    use std::time::Duration;

    use program_metadata::{
        instruction_plans::{
            compute_budget::compute_unit_limit_of, default_send_and_confirm, ExecutionError, ExecutorConfig,
            PlannerConfig, SenderConfig, TransactionMessage, TransactionPlanExecutor, TransactionPlanner,
        },
        metadata::{
            plan_write_metadata, DataFormat, Format, MetadataTarget, Seed, WriteMetadataInput, WriteStrategy,
            PROGRAM_METADATA_ID,
        },
        test_utils::{CountingBlockhashSource, FixedComputeUnits, MockSender},
    };
    use solana_sdk::{pubkey::Pubkey, rent::Rent};
    use tokio_util::sync::CancellationToken;

    fn write_input(data: Vec<u8>) -> WriteMetadataInput {
        let authority = Pubkey::new_unique();
        WriteMetadataInput {
            target: MetadataTarget::third_party(Pubkey::new_unique(), authority, authority, Seed::new("idl").unwrap()),
            format: DataFormat {
                format: Format::Json,
                ..DataFormat::default()
            },
            data,
            existing: None,
            existing_buffer: None,
            new_buffer: Pubkey::new_unique(),
            close_buffer: true,
            force_buffer: false,
            rent: Rent::default(),
        }
    }

    fn sender_config(max_retries: usize) -> SenderConfig {
        SenderConfig {
            max_retries,
            blockhash_ttl: Duration::from_secs(60),
            simulate_compute_units: true,
        }
    }

    fn written_data(messages: &[TransactionMessage]) -> Vec<u8> {
        let mut chunks: Vec<(u32, Vec<u8>)> = messages
            .iter()
            .flat_map(|m| m.instructions.iter())
            .filter(|ix| ix.program_id == PROGRAM_METADATA_ID && ix.data[0] == 0)
            .map(|ix| (u32::from_le_bytes(ix.data[1..5].try_into().unwrap()), ix.data[5..].to_vec()))
            .collect();
        chunks.sort_by_key(|(offset, _)| *offset);
        chunks.into_iter().flat_map(|(_, chunk)| chunk).collect()
    }

    #[tokio::test]
    async fn test_buffered_create_executes_every_transaction() {
        let data: Vec<u8> = (0..3000u32).map(|i| (i % 97) as u8).collect();
        let input = write_input(data.clone());
        let planner = TransactionPlanner::with_fee_payer(input.target.payer, &PlannerConfig::default());
        let plan = plan_write_metadata(&planner, &input).unwrap();
        assert_eq!(plan.strategy, WriteStrategy::CreateWithBuffer);

        let sender = MockSender::new();
        let blockhashes = CountingBlockhashSource::new();
        let executor = TransactionPlanExecutor::new(
            default_send_and_confirm(sender.clone(), blockhashes.clone(), FixedComputeUnits(5_000), &sender_config(0)),
            ExecutorConfig::default(),
        );

        let result = executor.execute(&plan.transaction_plan).await.unwrap();
        assert!(result.is_successful());
        assert_eq!(result.signatures().len(), plan.transaction_plan.transaction_count());

        let received = sender.received();
        assert_eq!(received.len(), plan.transaction_plan.transaction_count());
        for message in &received {
            assert!(!message.lifetime.is_provisory());
            assert_eq!(compute_unit_limit_of(message).map(|(_, units)| units), Some(5_000));
        }
        assert!(blockhashes.calls() >= 1);
        assert_eq!(written_data(&received), data);
    }

    #[tokio::test]
    async fn test_first_failure_cancels_the_rest() {
        let input = write_input(vec![1u8; 3000]);
        let planner = TransactionPlanner::with_fee_payer(input.target.payer, &PlannerConfig::default());
        let plan = plan_write_metadata(&planner, &input).unwrap();
        let total = plan.transaction_plan.transaction_count();

        let sender = MockSender::new().failing_first(usize::MAX);
        let executor = TransactionPlanExecutor::new(
            default_send_and_confirm(
                sender.clone(),
                CountingBlockhashSource::new(),
                FixedComputeUnits(5_000),
                &sender_config(1),
            ),
            ExecutorConfig::default(),
        );

        let error = executor.execute(&plan.transaction_plan).await.unwrap_err();
        let ExecutionError::PlanFailed { failed, canceled, .. } = &error else {
            panic!("expected a failed plan, got {error:?}");
        };
        assert_eq!(*failed, 1);
        assert_eq!(*canceled, total - 1);
        assert_eq!(sender.calls(), 2, "one attempt plus one retry");
        assert!(error.first_error().is_some());

        let result = error.into_result();
        assert_eq!(result.counts().canceled, total - 1);
        assert!(result.signatures().is_empty());
    }

    #[tokio::test]
    async fn test_abort_cancels_everything() {
        let input = write_input(b"{\"name\":\"demo\"}".to_vec());
        let planner = TransactionPlanner::with_fee_payer(input.target.payer, &PlannerConfig::default());
        let plan = plan_write_metadata(&planner, &input).unwrap();
        assert_eq!(plan.strategy, WriteStrategy::CreateInline);

        let sender = MockSender::new();
        let executor = TransactionPlanExecutor::new(
            default_send_and_confirm(
                sender.clone(),
                CountingBlockhashSource::new(),
                FixedComputeUnits(5_000),
                &sender_config(3),
            ),
            ExecutorConfig::default(),
        );

        let abort = CancellationToken::new();
        abort.cancel();
        let error = executor
            .execute_with_abort(&plan.transaction_plan, abort)
            .await
            .unwrap_err();
        assert!(matches!(error, ExecutionError::PlanCanceled { canceled: 1, .. }));
        assert_eq!(sender.calls(), 0);
    }

    #[test]
    fn test_plan_summary_serializes() {
        let input = write_input(vec![7u8; 2500]);
        let planner = TransactionPlanner::with_fee_payer(input.target.payer, &PlannerConfig::default());
        let plan = plan_write_metadata(&planner, &input).unwrap();

        assert!(plan.transaction_plan.transaction_count() >= 3);
        let summary = serde_json::to_value(plan.transaction_plan.summary()).unwrap();
        assert!(summary["kind"].is_string());
        let rendered = summary.to_string();
        assert!(rendered.contains(&PROGRAM_METADATA_ID.to_string()));
        assert!(rendered.contains("\"kind\":\"single\""));
    }
}
