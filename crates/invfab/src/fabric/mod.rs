//! The remote-memory fabric.
//!
//! Memory nodes expose their arena as a passive, addressable region;
//! compute nodes drive every READ, WRITE, and CAS themselves. The fabric
//! here is realized over shared memory: an arena is a `memmap2` mapping
//! (file-backed across processes, anonymous inside one), one-sided
//! operations are raw copies and 64-bit atomics on the mapping, and the
//! posting surface keeps the verbs shape — asynchronous posts identified
//! by a 64-bit work-request id, completions drained from a completion
//! queue, reliable in-order semantics per queue pair, and unsignaled posts
//! that produce no completion.
//!
//! Two-sided SEND/RECV exists only for bootstrap and runs over TCP.

pub mod arena;
pub mod bootstrap;
pub mod queue_pair;
pub mod wc;

pub use arena::{Arena, RegionToken};
pub use queue_pair::{CompletionQueue, QueuePair};
pub use wc::{Wc, WcOpcode, WcStatus};
