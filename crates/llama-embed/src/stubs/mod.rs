//! Stub implementations for testing.
//!
//! # TEST ONLY
//!
//! Exported under `cfg(test)` or the `test-utils` feature. Downstream test
//! crates opt in with:
//!
//! ```toml
//! [dev-dependencies]
//! llama-embed = { workspace = true, features = ["test-utils"] }
//! ```
//!
//! - [`StubBackend`]: deterministic in-memory engine with per-resource
//!   allocation/release counters and fault injection.

mod backend;

pub use backend::{DecodedToken, StubBackend, StubBatch, StubContext, StubCounts, StubModel};
