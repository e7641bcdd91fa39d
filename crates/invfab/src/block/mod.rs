//! On-wire block format: the tagged remote pointer, the work-request id
//! encoding, and the accessors over a raw block image.

pub mod layout;
pub mod remote_ptr;
pub mod wr_id;
