//! Blocking execution model: same pipeline, same semantics, no internal
//! concurrency.

pub mod client;
pub mod dispatcher;
pub mod token_manager;
