//! Task queue benchmark suite.
//!
//! Benchmarks the scheduling primitives on a single process:
//! - push/dequeue cycles through the slot heaps
//! - task generation from received reference subtables
//! - query subtree splitting with task duplication

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use dualtree_queue::{
    DistributedDualtreeTaskQueue, Euclidean, LocalExchange, QueryResult, QueueConfig, Rank,
    SubTable, Tree, World,
};
use parking_lot::Mutex;
use std::sync::Arc;

fn line_tree(rank: u32, n: usize, leaf_capacity: usize) -> Arc<Tree> {
    let points: Vec<Vec<f64>> = (0..n).map(|i| vec![i as f64]).collect();
    Arc::new(Tree::build(Rank(rank), &points, leaf_capacity))
}

fn build_queue(
    n_points: usize,
    num_threads: usize,
    max_subtree_size: u64,
) -> (DistributedDualtreeTaskQueue<LocalExchange>, Arc<Tree>) {
    let query_tree = line_tree(0, n_points, 8);
    let reference_tree = line_tree(0, n_points, 8);
    let world = World::single(n_points as u64, n_points as u64);
    let exchange = LocalExchange::new(world, Arc::clone(&reference_tree), true, 1 << 20);
    let result = Arc::new(Mutex::new(QueryResult::new(n_points)));
    let config = QueueConfig {
        num_threads,
        max_subtree_size,
        slots_per_thread: 4,
        do_load_balancing: true,
        rank_favor_factor: 0.0,
    };
    let queue = DistributedDualtreeTaskQueue::new(world, config, exchange, &query_tree, &result);
    (queue, reference_tree)
}

fn reference_leaves(tree: &Arc<Tree>, leaf_size: u64) -> Vec<SubTable> {
    let total = tree.n_entries();
    (0..total / leaf_size)
        .map(|i| {
            let node = tree
                .find_by_begin_count(i * leaf_size, leaf_size)
                .expect("leaf exists");
            SubTable::new(Arc::clone(tree), node)
        })
        .collect()
}

fn bench_push_dequeue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue/push_dequeue");

    for &n_tasks in &[16usize, 128, 1024] {
        group.throughput(Throughput::Elements(n_tasks as u64));
        group.bench_function(format!("cycle_{n_tasks}"), |b| {
            b.iter_batched(
                || {
                    let (queue, reference_tree) = build_queue(64, 1, 64);
                    let leaves = reference_leaves(&reference_tree, 8);
                    (queue, leaves)
                },
                |(queue, leaves)| {
                    for i in 0..n_tasks {
                        queue.push_task(&Euclidean, 0, leaves[i % leaves.len()].clone());
                    }
                    while let Some(dequeued) = queue.dequeue_task(&Euclidean, false) {
                        black_box(dequeued.task.priority());
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_generate_tasks(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue/generate_tasks");

    for &n_received in &[8usize, 64] {
        group.throughput(Throughput::Elements(n_received as u64));
        group.bench_function(format!("received_{n_received}"), |b| {
            b.iter_batched(
                || {
                    let (queue, _) = build_queue(64, 4, 16);
                    // One rank per arrival keeps the reference grids
                    // disjoint, so every arrival generates tasks.
                    let received: Vec<_> = (0..n_received)
                        .map(|i| {
                            queue.with_exchange_mut(|exchange| {
                                let tree = line_tree(1 + i as u32, 8, 8);
                                exchange
                                    .inject_received(SubTable::new(Arc::clone(&tree), tree.root()))
                            })
                        })
                        .collect();
                    (queue, received)
                },
                |(queue, received)| {
                    black_box(queue.generate_tasks(&Euclidean, &received));
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue/split");

    for &n_tasks in &[4usize, 32] {
        group.bench_function(format!("tasks_{n_tasks}"), |b| {
            b.iter_batched(
                || {
                    let (queue, reference_tree) = build_queue(256, 2, 256);
                    let leaves = reference_leaves(&reference_tree, 8);
                    for i in 0..n_tasks {
                        queue.push_task(&Euclidean, 0, leaves[i % leaves.len()].clone());
                    }
                    queue
                },
                |queue| {
                    queue.redistribute_among_cores(&Euclidean);
                    black_box(queue.num_slots());
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_push_dequeue, bench_generate_tasks, bench_split);
criterion_main!(benches);
