//! Benchmarks for transaction planning

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use program_metadata::{
    instruction_plans::{linear_instruction_plan, InstructionPlan, PlannerConfig, TransactionPlanner},
    test_utils::{fixed_size_planner, instruction_of_size, TEST_PAYER, TEST_PROGRAM},
};
use solana_sdk::instruction::Instruction;

fn bench_static_sequential(c: &mut Criterion) {
    let planner = fixed_size_planner(100);
    let plan = InstructionPlan::sequential((0..500).map(|id| InstructionPlan::single(instruction_of_size(id, 120))));

    c.bench_function("plan_sequential_500", |b| {
        b.iter(|| black_box(planner.plan(black_box(&plan)).unwrap()));
    });
}

fn bench_nested_parallel(c: &mut Criterion) {
    let planner = fixed_size_planner(100);
    let plan = InstructionPlan::parallel((0..50).map(|group| {
        InstructionPlan::sequential((0..10).map(move |i| InstructionPlan::single(instruction_of_size(group * 10 + i, 90))))
    }));

    c.bench_function("plan_parallel_50x10", |b| {
        b.iter(|| black_box(planner.plan(black_box(&plan)).unwrap()));
    });
}

fn bench_linear_writes(c: &mut Criterion) {
    let planner = TransactionPlanner::with_fee_payer(TEST_PAYER, &PlannerConfig::default());
    let mut group = c.benchmark_group("plan_linear_writes");

    for size in [10_000usize, 100_000, 1_000_000] {
        let data = Arc::new(vec![0xABu8; size]);
        let plan = InstructionPlan::parallel([linear_instruction_plan("write", size, move |offset, length| {
            Instruction::new_with_bytes(TEST_PROGRAM, &data[offset..offset + length], vec![])
        })]);

        group.bench_with_input(BenchmarkId::from_parameter(size), &plan, |b, plan| {
            b.iter(|| black_box(planner.plan(black_box(plan)).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_static_sequential, bench_nested_parallel, bench_linear_writes);
criterion_main!(benches);
