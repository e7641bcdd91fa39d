//! The memory-node (server) role.
//!
//! A memory node loads its partition of the initial index into a shared
//! arena, chains the remaining blocks into the free list, hands every
//! compute node the region token, and then goes idle: it serves no query,
//! parses nothing, and only waits for the final done notifications.

use std::fs::File;
use std::io::Read;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fabric::arena::{Arena, RegionToken};
use crate::fabric::bootstrap::{accept_peers, Message};
use crate::free_list::{freelist_bytes, initialize_freelist};
use crate::index_file::index_file_name;
use crate::timing::Interval;

pub struct MemoryNode;

impl MemoryNode {
    /// Serves one run, then returns.
    pub fn run(config: &Config) -> Result<()> {
        config.validate()?;
        let node_id = config.node_id;
        let block_size = config.block_size;

        let index_path = config.index_dir.join(index_file_name(
            config.index_kind,
            block_size,
            node_id,
            config.num_servers(),
        ));
        log::info!("memory node {node_id}: index file {}", index_path.display());

        let mut index_bytes = Vec::new();
        File::open(&index_path)?.read_to_end(&mut index_bytes)?;
        if index_bytes.len() % block_size as usize != 0 {
            return Err(Error::Config(format!(
                "{}: size is not a multiple of the block size",
                index_path.display()
            )));
        }

        let num_index_blocks = (index_bytes.len() / block_size as usize) as u32;
        let total_blocks = num_index_blocks + config.extra_blocks;
        let arena_len = total_blocks as u64 * block_size as u64 + freelist_bytes(total_blocks);
        log::info!(
            "memory node {node_id}: {num_index_blocks} index blocks, \
             {total_blocks} total, arena {arena_len} bytes"
        );

        let arena_path = config
            .shm_dir
            .join(format!("invfab_node{node_id}.arena"));
        let arena = Arc::new(Arena::create_file(&arena_path, arena_len)?);

        let mut t_load = Interval::new("read_index_into_memory");
        t_load.start();
        arena.write(0, &index_bytes);
        t_load.stop();
        log::info!(
            "memory node {node_id}: loaded index in {:.1} ms",
            t_load.ms()
        );

        initialize_freelist(&arena, block_size, num_index_blocks, total_blocks);

        let token = RegionToken {
            path: arena_path.clone(),
            len: arena_len,
        };

        // every compute node connects, learns the sizes, and maps the
        // arena through the token
        log::info!(
            "memory node {node_id}: waiting for {} clients on port {}",
            config.num_clients,
            config.port
        );
        let mut clients = accept_peers(config.port, config.num_clients as usize)?;

        for client in &mut clients {
            client.send(&Message::IndexSizes {
                initial_index_size: index_bytes.len() as u64,
                index_buffer_size: arena_len,
                freelist_offset_blocks: total_blocks,
            })?;
            client.send(&Message::Token(token.clone()))?;
        }

        // all clients ready, then idle until all are done
        for client in &mut clients {
            match client.recv()? {
                Message::Ready => {}
                other => {
                    return Err(Error::Protocol(format!("expected Ready, got {other:?}")))
                }
            }
        }
        log::info!("memory node {node_id}: idle");

        for client in &mut clients {
            match client.recv()? {
                Message::Done => {}
                other => return Err(Error::Protocol(format!("expected Done, got {other:?}"))),
            }
        }

        log::info!("memory node {node_id}: all clients done");
        std::fs::remove_file(&arena_path).ok();
        Ok(())
    }
}
