//! # Adapters Layer
//!
//! Node backends that live outside the lifecycle crate.

mod lnd;

pub use lnd::{classify_node_error, decode_update_line, LndRestClient, NdjsonDecoder};
