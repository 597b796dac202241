//! difftest - differential query test runner
//!
//! Test cases are written as query construction expressions with an
//! expected result. Each case runs against a reference and a candidate
//! server, and both results are judged against the expectation
//! independently, so a divergence shows up as one server passing and the
//! other failing.

pub mod cli;
pub mod commands;
pub mod common;
pub mod compare;
pub mod connection;
pub mod datum;
pub mod environment;
pub mod query;
pub mod report;
pub mod runner;
pub mod script;
pub mod sequencer;
pub mod server;

// Re-export commonly used types for tests
pub use common::{Error, QueryError, Result};
pub use compare::Expectation;
pub use datum::Datum;
pub use environment::Environment;
pub use report::SessionReport;
pub use runner::{CaseOutcome, CaseReport, RunOptions, ServerRole, ServerVerdict, TestCase};
pub use sequencer::{SessionState, Sequencer};
