//! # Retrieval Modules
//!
//! Transports that execute single HTTP exchanges, and the retry schedule used
//! by the dispatchers built on top of them.

pub mod backoff;
pub mod ky_http;
#[cfg(feature = "blocking")]
pub mod ky_http_blocking;
