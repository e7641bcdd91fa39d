//! The compute-node (client) role.
//!
//! Bootstraps against every memory node, builds the catalog from the meta
//! files, obtains its query share (reading the query file as initiator,
//! or receiving a batch from the initiator), runs the dispatcher, and
//! finally gathers statistics. The initiator prints the JSON report on
//! stdout.

use std::sync::Arc;

use crate::catalog::Catalog;
use crate::config::{Config, IndexKind};
use crate::dispatcher::{Dispatcher, WorkerReport};
use crate::error::{Error, Result};
use crate::fabric::arena::Arena;
use crate::fabric::bootstrap::{accept_peers, Channel, Message};
use crate::free_list::FreeList;
use crate::query::{self, Query};
use crate::stats::{Counters, Statistics};
use crate::timing::Interval;
use crate::verify::verify_inserts;
use crate::worker::Worker;

const CONNECT_ATTEMPTS: u32 = 150;

pub struct ComputeNode;

impl ComputeNode {
    pub fn run(config: &Config) -> Result<()> {
        config.validate()?;
        let mut stats = Statistics::new();

        // connect to every memory node and map its arena
        let mut server_channels = Vec::new();
        let mut arenas: Vec<Arc<Arena>> = Vec::new();
        let mut free_lists = Vec::new();

        for (node, addr) in config.servers.iter().enumerate() {
            log::info!("connecting to memory node {node} at {addr}");
            let mut channel = Channel::connect(addr, CONNECT_ATTEMPTS)?;

            let (initial_index_size, index_buffer_size, freelist_offset) =
                match channel.recv()? {
                    Message::IndexSizes {
                        initial_index_size,
                        index_buffer_size,
                        freelist_offset_blocks,
                    } => (initial_index_size, index_buffer_size, freelist_offset_blocks),
                    other => {
                        return Err(Error::Protocol(format!("expected IndexSizes, got {other:?}")))
                    }
                };

            let token = match channel.recv()? {
                Message::Token(token) => token,
                other => return Err(Error::Protocol(format!("expected Token, got {other:?}"))),
            };

            stats.counters.total_initial_index_size += initial_index_size;
            stats.counters.total_index_buffer_size += index_buffer_size;

            arenas.push(Arc::new(Arena::open_token(&token)?));
            free_lists.push(FreeList::new(
                config.block_size,
                node as u32,
                freelist_offset,
            ));
            server_channels.push(channel);
        }

        // the catalog comes from the meta files on local disk
        log::info!("read meta data and assign remote pointers");
        let catalog = Arc::new(Catalog::load(
            &config.index_dir,
            config.index_kind,
            config.block_size,
            config.num_servers(),
        )?);
        stats.counters.universe_size = catalog.universe_size() as u64;
        stats.counters.catalog_size = catalog.byte_size();

        // obtain this node's query share
        let (queries, mut peer_channels) = Self::obtain_queries(config, &catalog, &mut stats)?;
        log::info!("processing {} queries", queries.len());

        // workers may start; tell the memory nodes
        for channel in &mut server_channels {
            channel.send(&Message::Ready)?;
        }

        let mut t_query = Interval::new("query");
        t_query.start();
        let dispatcher = Dispatcher::new(
            config.clone(),
            arenas.clone(),
            Arc::clone(&catalog),
            free_lists,
        );
        let verify_queries = config.verify.then(|| queries.clone());
        let reports = dispatcher.run(queries)?;
        t_query.stop();

        if let Some(queries) = verify_queries {
            let mut worker = Worker::new(
                0,
                config.block_size,
                config.index_kind.versioned(),
                config.max_send_queue_wr,
                &arenas,
            );
            verify_inserts(&mut worker, &queries, &catalog);
        }

        Self::gather_and_report(config, &mut stats, reports, &mut peer_channels, t_query)?;

        for channel in &mut server_channels {
            channel.send(&Message::Done)?;
        }
        Ok(())
    }

    /// Initiator: read and distribute; peer: receive a batch.
    fn obtain_queries(
        config: &Config,
        catalog: &Catalog,
        stats: &mut Statistics,
    ) -> Result<(Vec<Query>, Vec<Channel>)> {
        if !config.initiator {
            let mut initiator = Channel::connect(&config.initiator_addr, CONNECT_ATTEMPTS)?;
            let batch = match initiator.recv()? {
                Message::QueryBatch(batch) => batch,
                other => {
                    return Err(Error::Protocol(format!("expected QueryBatch, got {other:?}")))
                }
            };
            return Ok((query::decode_batch(&batch)?, vec![initiator]));
        }

        let (queries, file_stats) = query::read_queries(&config.query_file)?;
        if file_stats.universe_size > catalog.universe_size() {
            return Err(Error::InvalidQuery(format!(
                "query keys reach {} but the universe ends at {}",
                file_stats.universe_size,
                catalog.universe_size()
            )));
        }
        if config.index_kind == IndexKind::BlockStatic && file_stats.num_inserts > 0 {
            return Err(Error::InvalidQuery(
                "the static index does not support inserts".into(),
            ));
        }

        stats.counters.num_queries = queries.len() as u64;
        stats.counters.num_read_queries = file_stats.num_reads;
        stats.counters.num_insert_queries = file_stats.num_inserts;

        if config.num_clients <= 1 {
            return Ok((queries, Vec::new()));
        }

        // distribute round-robin by query id, keep our own share
        log::info!("distribute queries to {} peers", config.num_clients - 1);
        let initiator_port = config
            .initiator_addr
            .rsplit(':')
            .next()
            .and_then(|p| p.parse::<u16>().ok())
            .ok_or_else(|| Error::Config("initiator address needs a port".into()))?;
        let mut peers = accept_peers(initiator_port, config.num_clients as usize - 1)?;

        let mut batches = query::encode_batches(&queries, config.num_clients);
        for (peer, batch) in peers.iter_mut().zip(batches.drain(1..)) {
            peer.send(&Message::QueryBatch(batch))?;
        }
        let own = query::decode_batch(&batches[0])?;
        Ok((own, peers))
    }

    /// Sums worker reports, merges peer reports (initiator), prints.
    fn gather_and_report(
        config: &Config,
        stats: &mut Statistics,
        reports: Vec<WorkerReport>,
        peer_channels: &mut [Channel],
        t_query: Interval,
    ) -> Result<()> {
        let mut local = Counters::default();
        let mut operation_ms: f64 = 0.0;
        let mut read_list_ms: f64 = 0.0;
        let mut polling_ms: f64 = 0.0;
        for report in &reports {
            local.merge(&report.counters);
            operation_ms = operation_ms.max(report.operation_ms);
            read_list_ms = read_list_ms.max(report.read_list_ms);
            polling_ms = polling_ms.max(report.polling_ms);
            log::info!(
                "worker processed {} queries, {} results",
                report.processed_queries,
                report.counters.num_result
            );
        }

        if !config.initiator {
            // ship the sums to the initiator
            peer_channels[0].send(&Message::StatsReport(local))?;
            return Ok(());
        }

        stats.counters.merge(&local);
        for peer in peer_channels.iter_mut() {
            match peer.recv()? {
                Message::StatsReport(remote) => stats.counters.merge(&remote),
                other => {
                    return Err(Error::Protocol(format!("expected StatsReport, got {other:?}")))
                }
            }
        }

        let query_secs = t_query.ms() / 1000.0;
        if query_secs > 0.0 {
            stats.add_derived(
                "queries_per_sec",
                (stats.counters.num_queries as f64 / query_secs) as u64,
            );
            stats.add_derived(
                "mb_per_sec",
                stats.counters.remote_reads_in_bytes as f64 / 1.0e6 / query_secs,
            );
        }

        stats.add_meta("compute_nodes", config.num_clients);
        stats.add_meta("memory_nodes", config.num_servers());
        stats.add_meta(
            "compute_threads",
            config.num_clients * config.num_compute_threads,
        );
        stats.add_meta("algorithm", config.index_kind.file_prefix());
        stats.add_meta("operation", config.operation.name());
        stats.add_meta("block_size", config.block_size);
        stats.add_meta("threads_pinned", !config.disable_thread_pinning);
        stats.add_timing("query", t_query.ms());
        stats.add_timing("operation_max", operation_ms);
        stats.add_timing("read_list_max", read_list_ms);
        stats.add_timing("polling_max", polling_ms);

        println!("{}", stats.render());
        Ok(())
    }
}
