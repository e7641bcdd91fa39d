//! The query dispatcher: a pool of compute workers draining a shared
//! queue of query indices.
//!
//! Workers are plain OS threads, each owning its full per-thread state
//! (queue pairs, buffers, counters). They synchronize twice per run, at a
//! start barrier and an end barrier; in between the only shared mutable
//! thing is the lock-free queue, so work stealing is implicit. The main
//! thread participates as worker 0.

use std::sync::{Arc, Barrier};

use crossbeam::queue::SegQueue;

use crate::catalog::Catalog;
use crate::config::{Config, Operation};
use crate::constants::READ_BUFFER_LENGTH;
use crate::error::Result;
use crate::fabric::arena::Arena;
use crate::free_list::FreeList;
use crate::pinning::{pin_current_thread, CoreAssignment};
use crate::query::{Query, QueryType};
use crate::stats::Counters;
use crate::worker::Worker;

/// Per-worker outcome, merged into the run statistics.
pub struct WorkerReport {
    pub counters: Counters,
    pub processed_queries: u64,
    pub operation_ms: f64,
    pub read_list_ms: f64,
    pub polling_ms: f64,
}

pub struct Dispatcher {
    config: Config,
    arenas: Vec<Arc<Arena>>,
    catalog: Arc<Catalog>,
    free_lists: Arc<Vec<FreeList>>,
}

impl Dispatcher {
    pub fn new(
        config: Config,
        arenas: Vec<Arc<Arena>>,
        catalog: Arc<Catalog>,
        free_lists: Vec<FreeList>,
    ) -> Self {
        Dispatcher {
            config,
            arenas,
            catalog,
            free_lists: Arc::new(free_lists),
        }
    }

    /// Runs all `queries` to completion and returns one report per worker.
    pub fn run(&self, queries: Vec<Query>) -> Result<Vec<WorkerReport>> {
        let num_threads = self.config.num_compute_threads;
        let queue = Arc::new(SegQueue::new());
        for idx in 0..queries.len() as u32 {
            queue.push(idx);
        }
        let queries = Arc::new(queries);
        let start_barrier = Arc::new(Barrier::new(num_threads as usize));
        let end_barrier = Arc::new(Barrier::new(num_threads as usize));

        let mut assignment = CoreAssignment::new();
        let pin = !self.config.disable_thread_pinning;
        let mut reports = Vec::with_capacity(num_threads as usize);

        std::thread::scope(|scope| {
            let mut handles = Vec::new();

            for id in 1..num_threads {
                let core = assignment.next_core();
                let queue = Arc::clone(&queue);
                let queries = Arc::clone(&queries);
                let start_barrier = Arc::clone(&start_barrier);
                let end_barrier = Arc::clone(&end_barrier);

                handles.push(scope.spawn(move || {
                    if pin {
                        pin_current_thread(core);
                    }
                    let mut worker = self.make_worker(id);
                    self.process_queries(&mut worker, &queue, &queries, &start_barrier, &end_barrier);
                    report_of(&worker)
                }));
            }

            // worker 0 runs on the calling thread
            if pin {
                pin_current_thread(assignment.next_core());
            }
            let mut worker = self.make_worker(0);
            self.process_queries(&mut worker, &queue, &queries, &start_barrier, &end_barrier);
            reports.push(report_of(&worker));

            for handle in handles {
                reports.push(handle.join().expect("worker thread panicked"));
            }
        });

        Ok(reports)
    }

    fn make_worker(&self, id: u32) -> Worker {
        Worker::new(
            id,
            self.config.block_size,
            self.config.index_kind.versioned(),
            self.config.max_send_queue_wr,
            &self.arenas,
        )
    }

    fn process_queries(
        &self,
        worker: &mut Worker,
        queue: &SegQueue<u32>,
        queries: &[Query],
        start_barrier: &Barrier,
        end_barrier: &Barrier,
    ) {
        let progress_step = (queries.len() / 10).max(1) as u64;
        start_barrier.wait();

        while let Some(q) = queue.pop() {
            worker.processed_queries += 1;
            let query = &queries[q as usize];

            if worker.processed_queries % progress_step == 0 {
                log::debug!("worker {}: {query}", worker.id);
            }

            match query.kind {
                QueryType::Insert => {
                    for (k_idx, &key) in query.keys.iter().enumerate() {
                        let col = (k_idx % READ_BUFFER_LENGTH) as u32;
                        loop {
                            let head = self.catalog.get(key);
                            if worker.find_block_and_insert(
                                head,
                                query.update_id,
                                col,
                                &self.free_lists,
                            ) {
                                break;
                            }
                        }
                    }
                }
                QueryType::Read => {
                    assert!(
                        query.len() <= READ_BUFFER_LENGTH,
                        "query exceeds the read buffer"
                    );
                    let heads: Vec<_> = query.keys.iter().map(|&k| self.catalog.get(k)).collect();

                    let mut results = 0u64;
                    worker.t_operation.start();
                    match self.config.operation {
                        Operation::Intersection => {
                            worker.block_intersection(&heads, &mut |_| results += 1);
                        }
                        Operation::Union => {
                            worker.block_union(&heads, &mut |_| results += 1);
                        }
                    }
                    worker.t_operation.stop();
                    worker.local_num_result += results;
                }
                QueryType::Delete => {
                    log::warn!("delete queries are not implemented, skipping {query}");
                }
            }

            // the operation may finish with prefetched READs still posted
            worker.wait_outstanding();
        }

        end_barrier.wait();
        assert_eq!(worker.post_balance, 0, "incomplete posts after the run");
    }
}

fn report_of(worker: &Worker) -> WorkerReport {
    WorkerReport {
        counters: worker.counters(),
        processed_queries: worker.processed_queries,
        operation_ms: worker.t_operation.ms(),
        read_list_ms: worker.t_read_list.ms(),
        polling_ms: worker.t_poll.ms(),
    }
}
