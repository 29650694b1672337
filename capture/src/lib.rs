//! Real-time video capture pipeline.
//!
//! A single producer pulls raw frames from a camera as fast as the device
//! delivers them and fans each frame out to three consumers with different
//! loss policies: a disk writer (lossless FIFO into a SER container), a live
//! preview and an automatic gain controller (both lossy-latest). Frames live
//! in a fixed [`pool`](crate::pool) of reusable buffers and travel between
//! tasks as reference-counted handles; the pool size is the only queue bound
//! in the system.

pub mod agc;
pub mod disk;
pub mod framerate;
pub mod histogram;
pub mod pool;
pub mod preview;
pub mod producer;
pub mod queue;
pub mod runtime;
pub mod sched;

/*
 * Total number of frame buffers allocated at startup. A larger number
 * increases memory usage but decreases the risk that the pool runs dry if
 * the to-disk queue gets backed up momentarily.
 */
/// Default frame pool cardinality.
pub const FRAME_POOL_SIZE: usize = 64;
