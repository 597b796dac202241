//! Reference query server
//!
//! A small in-memory query engine served over the same wire protocol the
//! runner speaks. The `mock_server` binary runs it standalone; tests run
//! it in-process as both reference and (fault-injected) candidate.

pub mod engine;
pub mod listener;
pub mod local;

pub use engine::{Engine, EngineOptions};
pub use listener::QueryServer;
pub use local::LocalConnection;
