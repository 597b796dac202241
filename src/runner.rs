//! Dual-server runner
//!
//! Runs one test case against the reference and the candidate server and
//! judges each server's outcome independently against the expectation.

use std::fmt;
use std::time::Duration;

use futures_util::future;

use crate::common::{Error, QueryError, Result};
use crate::compare::{EqualityMode, Expectation, Matcher, Verdict};
use crate::connection::Connection;
use crate::datum::Datum;
use crate::environment::Environment;
use crate::query::{self, Term};

/// One test: a construction expression and what each server should return
#[derive(Debug, Clone)]
pub struct TestCase {
    pub construction: String,
    pub expectation: String,
    /// Pre-resolved expectation; takes precedence over `expectation`
    resolved: Option<Expectation>,
}

impl TestCase {
    pub fn new(construction: impl Into<String>, expectation: impl Into<String>) -> Self {
        Self {
            construction: construction.into(),
            expectation: expectation.into(),
            resolved: None,
        }
    }

    /// A case with an already-built expectation, e.g. a custom predicate
    pub fn with_expectation(construction: impl Into<String>, expectation: Expectation) -> Self {
        Self {
            construction: construction.into(),
            expectation: String::new(),
            resolved: Some(expectation),
        }
    }

    /// The expectation to judge results against
    pub fn expectation(&self) -> Result<Expectation> {
        match &self.resolved {
            Some(expectation) => Ok(expectation.clone()),
            None => Expectation::from_source(&self.expectation),
        }
    }
}

/// Which of the two servers a result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRole {
    Reference,
    Candidate,
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerRole::Reference => f.write_str("reference"),
            ServerRole::Candidate => f.write_str("candidate"),
        }
    }
}

/// Settings applied to every case of a session
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: EqualityMode,
    /// Bound on one server's run plus materialization
    pub case_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: EqualityMode::Subset,
            case_timeout: Duration::from_secs(30),
        }
    }
}

/// How one server fared on one case
#[derive(Debug, Clone, PartialEq)]
pub enum ServerVerdict {
    Pass,
    Mismatch { actual: Datum, expected: String },
    QueryError(QueryError),
}

impl ServerVerdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, ServerVerdict::Pass)
    }

    /// Whether two verdicts fall in the same category
    fn same_kind(&self, other: &ServerVerdict) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaseOutcome {
    /// The case could not be built; no server was queried
    Construction(String),
    Ran {
        reference: ServerVerdict,
        candidate: ServerVerdict,
    },
}

/// Result of one test case
#[derive(Debug, Clone, PartialEq)]
pub struct CaseReport {
    /// Position of the case in the session, starting at 1
    pub index: usize,
    pub source: String,
    pub outcome: CaseOutcome,
}

impl CaseReport {
    /// Both servers ran and both passed
    pub fn passed(&self) -> bool {
        matches!(
            &self.outcome,
            CaseOutcome::Ran { reference, candidate } if reference.is_pass() && candidate.is_pass()
        )
    }

    /// The two servers' verdicts fall in different categories
    pub fn diverged(&self) -> bool {
        match &self.outcome {
            CaseOutcome::Ran {
                reference,
                candidate,
            } => !reference.same_kind(candidate),
            CaseOutcome::Construction(_) => false,
        }
    }

    pub fn verdict(&self, role: ServerRole) -> Option<&ServerVerdict> {
        match &self.outcome {
            CaseOutcome::Ran {
                reference,
                candidate,
            } => Some(match role {
                ServerRole::Reference => reference,
                ServerRole::Candidate => candidate,
            }),
            CaseOutcome::Construction(_) => None,
        }
    }
}

/// Run one test case on both servers
///
/// Returns only after both servers' results (including cursor
/// materialization) have been judged. Never fails: construction problems,
/// query errors and mismatches are all captured in the report.
pub async fn run_one(
    index: usize,
    case: &TestCase,
    env: &Environment,
    reference: &mut dyn Connection,
    candidate: &mut dyn Connection,
    options: &RunOptions,
) -> CaseReport {
    let source = case.construction.clone();
    let report = |outcome| CaseReport {
        index,
        source: source.clone(),
        outcome,
    };

    let (term, matcher) = match prepare(case, env, options.mode) {
        Ok(prepared) => prepared,
        Err(e) => {
            tracing::error!(case = index, "{}", e);
            return report(CaseOutcome::Construction(e.to_string()));
        }
    };

    let (reference_result, candidate_result) = future::join(
        execute(reference, &term, options.case_timeout),
        execute(candidate, &term, options.case_timeout),
    )
    .await;

    let reference = judge(ServerRole::Reference, &source, reference_result, &matcher);
    let candidate = judge(ServerRole::Candidate, &source, candidate_result, &matcher);

    if reference.is_pass() && candidate.is_pass() {
        tracing::info!(case = index, "Passed: {}", source);
    }

    report(CaseOutcome::Ran {
        reference,
        candidate,
    })
}

/// Build the query and resolve the expectation
fn prepare(case: &TestCase, env: &Environment, mode: EqualityMode) -> Result<(Term, Matcher)> {
    let term = query::construct(&case.construction, env)?;
    let expectation = case.expectation().map_err(|e| {
        Error::construction(&case.construction, format!("invalid expectation: {}", e))
    })?;
    Ok((term, expectation.resolve(mode)))
}

/// Run the query on one server and materialize any cursor
async fn execute(
    conn: &mut dyn Connection,
    term: &Term,
    timeout: Duration,
) -> std::result::Result<Datum, QueryError> {
    let run = async {
        let outcome = conn.run(term).await?;
        outcome.materialize().await
    };
    tokio::time::timeout(timeout, run)
        .await
        .unwrap_or_else(|_| Err(QueryError::timeout(timeout.as_secs())))
}

fn judge(
    role: ServerRole,
    source: &str,
    result: std::result::Result<Datum, QueryError>,
    matcher: &Matcher,
) -> ServerVerdict {
    match result {
        Err(error) => {
            tracing::warn!(
                server = %role,
                error = %error.name,
                "Error when evaluating on {} server: {}",
                role,
                error.message
            );
            ServerVerdict::QueryError(error)
        }
        Ok(actual) => match matcher.check(&actual) {
            Verdict::Pass => ServerVerdict::Pass,
            Verdict::Mismatch { actual, expected } => {
                tracing::warn!(
                    server = %role,
                    value = %actual,
                    expected = %expected,
                    "Mismatch in {} version of: {}",
                    role,
                    source
                );
                ServerVerdict::Mismatch { actual, expected }
            }
        },
    }
}
