//! Two-sided bootstrap channel.
//!
//! Everything that is not a one-sided data-path operation — region-token
//! exchange, index size announcement, query distribution, statistics
//! gather, ready/done synchronization — travels as length-prefixed bincode
//! frames over TCP. After bootstrap the channels fall silent; queries never
//! touch them.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::arena::RegionToken;
use crate::error::{Error, Result};
use crate::stats::Counters;

/// Frames exchanged during bootstrap and teardown.
#[derive(Debug, Serialize, Deserialize)]
pub enum Message {
    /// Memory node -> compute node: sizes of the served partition.
    IndexSizes {
        initial_index_size: u64,
        index_buffer_size: u64,
        /// Block offset where the free-list head area begins.
        freelist_offset_blocks: u32,
    },
    /// Memory node -> compute node: capability to map the arena.
    Token(RegionToken),
    /// Initiator -> peer compute node: flat-encoded query batch.
    QueryBatch(Vec<u32>),
    /// Peer compute node -> initiator: end-of-run counters.
    StatsReport(Counters),
    /// Compute node -> memory node: workers are about to start.
    Ready,
    /// Compute node -> memory node: run finished, arena no longer needed.
    Done,
}

/// One bootstrap connection.
pub struct Channel {
    stream: TcpStream,
}

impl Channel {
    /// Connects to `addr`, retrying while the peer is still starting up.
    pub fn connect(addr: &str, attempts: u32) -> Result<Channel> {
        let mut last_err = None;
        for _ in 0..attempts {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(Channel { stream });
                }
                Err(e) => {
                    last_err = Some(e);
                    thread::sleep(Duration::from_millis(200));
                }
            }
        }
        Err(Error::Io(last_err.expect("attempts > 0")))
    }

    pub fn send(&mut self, msg: &Message) -> Result<()> {
        let payload =
            bincode::serialize(msg).map_err(|e| Error::Protocol(format!("encode: {e}")))?;
        self.stream.write_all(&(payload.len() as u64).to_le_bytes())?;
        self.stream.write_all(&payload)?;
        self.stream.flush()?;
        Ok(())
    }

    pub fn recv(&mut self) -> Result<Message> {
        let mut len_buf = [0u8; 8];
        self.stream.read_exact(&mut len_buf)?;
        let len = u64::from_le_bytes(len_buf) as usize;

        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload)?;
        bincode::deserialize(&payload).map_err(|e| Error::Protocol(format!("decode: {e}")))
    }
}

/// Accepts exactly `n` connections on `port`.
pub fn accept_peers(port: u16, n: usize) -> Result<Vec<Channel>> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    let mut channels = Vec::with_capacity(n);
    for _ in 0..n {
        let (stream, peer) = listener.accept()?;
        stream.set_nodelay(true)?;
        log::info!("accepted bootstrap connection from {peer}");
        channels.push(Channel { stream });
    }
    Ok(channels)
}
