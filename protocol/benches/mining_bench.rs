// Mining benchmarks for the Ember protocol.
//
// Covers both transaction selection strategies over mempools of growing
// size, and proof of work at low difficulties.

use std::collections::BTreeMap;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio_util::sync::CancellationToken;

use ember_protocol::crypto::{Account, KeyPair};
use ember_protocol::events::EventSink;
use ember_protocol::network::selector::Strategy;
use ember_protocol::storage::{Block, BlockArgs, BlockHeader};
use ember_protocol::transaction::{BlockTx, Tx};

/// `accounts` senders with `per_account` queued transactions each. Tips vary
/// so that the strategies have something to choose between.
fn grouped_mempool(accounts: usize, per_account: u64) -> BTreeMap<Account, Vec<BlockTx>> {
    let receiver = KeyPair::generate();
    let mut grouped = BTreeMap::new();

    for i in 0..accounts {
        let sender = KeyPair::generate();
        let queue = (1..=per_account)
            .map(|nonce| {
                let signed = Tx {
                    chain_id: 1,
                    nonce,
                    to: receiver.account().clone(),
                    value: 10,
                    tip: (i as u64 * 7 + nonce * 13) % 50,
                    data: vec![],
                }
                .sign(&sender)
                .expect("signing never fails for a fresh key");
                BlockTx::new(signed, 15, 1)
            })
            .collect();
        grouped.insert(sender.account().clone(), queue);
    }

    grouped
}

fn bench_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("selector");

    for accounts in [4usize, 16, 64] {
        let grouped = grouped_mempool(accounts, 4);
        let total = accounts as u64 * 4;
        let capacity = Some(total as usize / 3);
        group.throughput(Throughput::Elements(total));

        for strategy in [Strategy::Tip, Strategy::TipAdvanced] {
            group.bench_with_input(
                BenchmarkId::new(strategy.as_str(), accounts),
                &grouped,
                |b, grouped| {
                    b.iter(|| strategy.select(grouped, capacity));
                },
            );
        }
    }

    group.finish();
}

fn parent_header() -> BlockHeader {
    BlockHeader {
        number: 0,
        parent_hash: [0u8; 32],
        beneficiary: Account::zero(),
        difficulty: 0,
        mining_reward: 700,
        total_tip: 0,
        total_gas: 0,
        timestamp: 1_704_067_200_000,
        nonce: 0,
        trans_root: [0u8; 32],
    }
}

fn bench_proof_of_work(c: &mut Criterion) {
    let mut group = c.benchmark_group("pow");
    group.sample_size(20);

    let beneficiary = KeyPair::generate().account().clone();
    let transactions: Vec<BlockTx> = grouped_mempool(2, 2).into_values().flatten().collect();
    let cancel = CancellationToken::new();
    let events = EventSink::default();

    for difficulty in [1u16, 2, 3] {
        let args = BlockArgs {
            beneficiary: beneficiary.clone(),
            difficulty,
            mining_reward: 700,
            capacity: transactions.len(),
            parent: parent_header(),
            transactions: transactions.clone(),
        };

        group.bench_with_input(
            BenchmarkId::from_parameter(difficulty),
            &args,
            |b, args| {
                b.iter(|| Block::pow(args.clone(), &cancel, &events).expect("not cancelled"));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_selection, bench_proof_of_work);
criterion_main!(benches);
