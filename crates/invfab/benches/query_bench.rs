//! Microbenchmarks over the in-process fabric: k-way intersection and
//! union throughput, the insert path with splits, and the full dispatcher
//! loop draining a query queue.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use invfab::catalog::Catalog;
use invfab::config::{Config, IndexKind, Operation};
use invfab::dispatcher::Dispatcher;
use invfab::fabric::arena::Arena;
use invfab::free_list::{freelist_bytes, initialize_freelist, FreeList};
use invfab::index_file::IndexBuilder;
use invfab::worker::Worker;
use invfab::{Query, QueryType, RemotePtr};

const BS: u32 = 1024;

struct Bench {
    arena: Arc<Arena>,
    catalog: Arc<Catalog>,
    total_blocks: u32,
}

fn build(builder: &IndexBuilder, extra_blocks: u32) -> Bench {
    let parts = builder.build(IndexKind::BlockDynamic, BS, 1);
    let p = &parts[0];
    let total_blocks = p.num_blocks() + extra_blocks;
    let len = total_blocks as u64 * BS as u64 + freelist_bytes(total_blocks);

    let arena = Arc::new(Arena::anonymous(len as usize).unwrap());
    arena.write_words(0, &p.blocks);
    initialize_freelist(&arena, BS, p.num_blocks(), total_blocks);

    let mut entries = vec![RemotePtr::NULL; p.meta.universe_size as usize + 1];
    for &(term, offset) in &p.meta.entries {
        entries[term as usize] = RemotePtr::new(0, offset);
    }

    Bench {
        arena,
        catalog: Arc::new(Catalog::from_entries(entries)),
        total_blocks,
    }
}

fn three_term_builder() -> IndexBuilder {
    let mut builder = IndexBuilder::new(2);
    builder.add_list(0, (1..=100_000).collect());
    builder.add_list(1, (1..=100_000).filter(|v| v % 3 == 0).collect());
    builder.add_list(2, (1..=100_000).filter(|v| v % 7 == 0).collect());
    builder
}

fn bench_intersection(c: &mut Criterion) {
    let bench = build(&three_term_builder(), 0);
    let heads: Vec<RemotePtr> = (0..3).map(|t| bench.catalog.get(t)).collect();
    let mut worker = Worker::new(0, BS, true, 1024, std::slice::from_ref(&bench.arena));

    c.bench_function("intersection_3way_100k", |b| {
        b.iter(|| {
            let mut count = 0u64;
            worker.block_intersection(black_box(&heads), &mut |_| count += 1);
            worker.wait_outstanding();
            black_box(count)
        })
    });
}

fn bench_union(c: &mut Criterion) {
    let mut builder = IndexBuilder::new(1);
    builder.add_list(0, (1..=50_000).map(|v| v * 2).collect());
    builder.add_list(1, (1..=33_000).map(|v| v * 3).collect());
    let bench = build(&builder, 0);

    let heads: Vec<RemotePtr> = (0..2).map(|t| bench.catalog.get(t)).collect();
    let mut worker = Worker::new(0, BS, true, 1024, std::slice::from_ref(&bench.arena));

    c.bench_function("union_2way_83k", |b| {
        b.iter(|| {
            let mut count = 0u64;
            worker.block_union(black_box(&heads), &mut |_| count += 1);
            worker.wait_outstanding();
            black_box(count)
        })
    });
}

fn bench_insert(c: &mut Criterion) {
    c.bench_function("insert_ascending_with_splits", |b| {
        b.iter_batched(
            || {
                let builder = IndexBuilder::new(0);
                let bench = build(&builder, 4096);
                let worker = Worker::new(0, BS, true, 1024, std::slice::from_ref(&bench.arena));
                (bench, worker)
            },
            |(bench, mut worker)| {
                let free_lists = vec![FreeList::new(BS, 0, bench.total_blocks)];
                let head = bench.catalog.get(0);
                for id in 1..=2_000u32 {
                    while !worker.find_block_and_insert(head, id, 0, &free_lists) {}
                }
                worker.wait_outstanding();
            },
            BatchSize::LargeInput,
        )
    });
}

fn bench_dispatcher(c: &mut Criterion) {
    let bench = build(&three_term_builder(), 0);

    let config = Config {
        num_compute_threads: 2,
        block_size: BS,
        operation: Operation::Intersection,
        index_kind: IndexKind::BlockDynamic,
        disable_thread_pinning: true,
        ..Config::default()
    };
    let dispatcher = Dispatcher::new(
        config,
        vec![Arc::clone(&bench.arena)],
        Arc::clone(&bench.catalog),
        vec![FreeList::new(BS, 0, bench.total_blocks)],
    );

    let queries: Vec<Query> = (0..64)
        .map(|id| Query {
            id,
            kind: QueryType::Read,
            update_id: 0,
            keys: vec![0, 1, 2],
        })
        .collect();

    c.bench_function("dispatcher_64_reads_2_workers", |b| {
        b.iter_batched(
            || queries.clone(),
            |qs| black_box(dispatcher.run(qs).unwrap()),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_intersection,
    bench_union,
    bench_insert,
    bench_dispatcher
);
criterion_main!(benches);
