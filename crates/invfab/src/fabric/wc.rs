//! Work completions.

use thiserror::Error;

/// Opcode of a completion queue entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WcOpcode {
    /// One-sided read.
    RdmaRead,
    /// One-sided write.
    RdmaWrite,
    /// 64-bit compare-and-swap.
    CompSwap,
    /// Two-sided send (bootstrap only).
    Send,
}

/// Status of a completion queue entry. Anything but `Success` is fatal.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum WcStatus {
    #[error("success")]
    Success,
    /// The operation referenced memory outside the remote region.
    #[error("remote access error")]
    RemoteAccessError,
    /// Local buffer length did not match the requested transfer.
    #[error("local length error")]
    LocalLengthError,
}

/// A drained completion: the posting work-request id, what completed, and
/// how it ended.
#[derive(Clone, Copy, Debug)]
pub struct Wc {
    pub wr_id: u64,
    pub opcode: WcOpcode,
    pub status: WcStatus,
}
