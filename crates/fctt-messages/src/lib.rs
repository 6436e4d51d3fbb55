//! Message types exchanged with the controller under test.
//!
//! Every transport the harness drives (the raw framed socket, the RPC bus and
//! the pub/sub bus) ultimately carries the same three shapes: a [`Request`]
//! issued by test code, exactly one [`Reply`] answering it, and any number of
//! asynchronous [`Notification`]s. The chunked body used by the RPC bus for
//! oversized requests is described by [`ChunkEnvelope`].

mod chunk;
mod filter;
mod message;
mod subset;

pub use chunk::{CHUNK_SIZE, ChunkEnvelope, ChunkPayload};
pub use filter::NotificationFilter;
pub use message::{MessageKind, Notification, Reply, Request};
pub use subset::matches_subset;
