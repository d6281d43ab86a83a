//! Wire protocol for the spool daemon
//!
//! Length-prefixed MessagePack messages over a Unix stream socket. Every
//! request variant carries the shared session key as its first field;
//! streamed responses (info queries, object batches) end with a sentinel
//! message of empty strings and unset numerics.

mod codec;
mod messages;

pub use codec::{FramedStream, ProtoError, Result, MAX_PAYLOAD};
pub use messages::{AddOutcome, Request, Response};
