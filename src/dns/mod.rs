//! DNS wire protocol, packet buffers, response cache and the authoritative
//! server built on top of the watch-driven record assembler.
//!
//! # Module structure
//!
//! * `protocol` - DNS packet structures and wire encoding/decoding
//! * `buffer` - low-level packet buffer operations
//! * `cache` - TTL-aware response cache for upstream-forwarded answers
//! * `upstream` - forwarding client for non-local queries
//! * `context` - shared state handed to the listeners
//! * `server` - UDP and TCP listeners
//! * `metrics` - Prometheus metrics for query handling

pub mod buffer;
pub mod cache;
pub mod context;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod upstream;
