//! ringnet-core — wire format, checksums, outbound queue, and configuration.
//! The other ringnet crates depend on this one.

pub mod config;
pub mod crc;
pub mod frame;
pub mod queue;

pub use config::{ConfigError, RingConfig};
pub use frame::{Control, DataFrame, Frame, FrameError, BROADCAST, MAX_DATAGRAM};
pub use queue::{QueueError, QueuedMessage, SendQueue, QUEUE_CAPACITY};
