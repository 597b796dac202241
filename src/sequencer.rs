//! Test sequencer
//!
//! Queues test cases and define directives in order, then runs them one at a
//! time against a reference and a candidate connection. A session moves
//! through `Idle -> Running -> Draining -> Closed` and cannot be reused.

use std::collections::{BTreeSet, VecDeque};

use crate::common::{Error, Result};
use crate::compare::Expectation;
use crate::connection::Connection;
use crate::environment::{Definition, Environment};
use crate::report::SessionReport;
use crate::runner::{self, RunOptions, ServerRole, TestCase};

/// Lifecycle of a test session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting steps
    Idle,
    /// Executing queued steps
    Running,
    /// Queue empty; closing connections
    Draining,
    Closed,
}

/// One queued unit of work
#[derive(Debug, Clone)]
pub enum Step {
    Test(TestCase),
    Define(Definition),
}

pub struct Sequencer {
    queue: VecDeque<Step>,
    env: Environment,
    /// Names bound by queued defines, for validating later defines
    declared: BTreeSet<String>,
    options: RunOptions,
    state: SessionState,
}

impl Sequencer {
    pub fn new(options: RunOptions) -> Self {
        Self {
            queue: VecDeque::new(),
            env: Environment::new(),
            declared: BTreeSet::new(),
            options,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Number of steps waiting to run
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Queue a test case
    pub fn enqueue(&mut self, case: TestCase) -> Result<()> {
        self.ensure_idle()?;
        self.queue.push_back(Step::Test(case));
        Ok(())
    }

    /// Queue a test from construction and expectation source
    pub fn test(&mut self, construction: &str, expectation: &str) -> Result<()> {
        self.enqueue(TestCase::new(construction, expectation))
    }

    /// Queue a test with an already-built expectation
    pub fn test_with(&mut self, construction: &str, expectation: Expectation) -> Result<()> {
        self.enqueue(TestCase::with_expectation(construction, expectation))
    }

    /// Queue a define directive
    ///
    /// The directive is parsed now, and every name it uses must already be
    /// bound by an earlier define. It takes effect for cases queued after it.
    pub fn define(&mut self, source: &str) -> Result<()> {
        self.ensure_idle()?;
        let definition = Definition::parse(source)?;
        if let Some(unbound) = definition
            .free_names()
            .into_iter()
            .find(|name| !self.declared.contains(*name))
        {
            return Err(Error::definition(
                source,
                format!("Unbound name '{}'", unbound),
            ));
        }
        self.declared.insert(definition.name.clone());
        self.queue.push_back(Step::Define(definition));
        Ok(())
    }

    /// Build an unordered expectation from a literal list
    pub fn bag(&self, source: &str) -> Result<Expectation> {
        Expectation::bag_from_source(source)
    }

    /// Run every queued step, then close both connections
    ///
    /// Mismatches and query errors are recorded in the report and never
    /// stop the session.
    /// Run every queued step, then close both connections
    ///
    /// Mismatches and query errors are recorded in the report and never
    /// stop the session. A define that fails to apply ends the session: the
    /// connections are still closed and the error is returned.
    pub async fn run(
        &mut self,
        mut reference: Box<dyn Connection>,
        mut candidate: Box<dyn Connection>,
    ) -> Result<SessionReport> {
        match self.state {
            SessionState::Idle => {}
            SessionState::Closed => return Err(Error::SessionClosed),
            SessionState::Running | SessionState::Draining => return Err(Error::SessionRunning),
        }
        self.state = SessionState::Running;
        tracing::info!(
            reference = reference.endpoint(),
            candidate = candidate.endpoint(),
            steps = self.queue.len(),
            "Starting session"
        );

        let mut report = SessionReport::default();
        let mut failure = None;
        while let Some(step) = self.queue.pop_front() {
            match step {
                Step::Define(definition) => match self.env.apply(&definition) {
                    Ok(()) => report.defines += 1,
                    Err(e) => {
                        tracing::error!(skipped = self.queue.len(), "{}", e);
                        self.queue.clear();
                        failure = Some(e);
                    }
                },
                Step::Test(case) => {
                    let index = report.cases.len() + 1;
                    let case_report = runner::run_one(
                        index,
                        &case,
                        &self.env,
                        reference.as_mut(),
                        candidate.as_mut(),
                        &self.options,
                    )
                    .await;
                    report.cases.push(case_report);
                }
            }
        }

        self.state = SessionState::Draining;
        close(ServerRole::Reference, reference.as_mut()).await;
        close(ServerRole::Candidate, candidate.as_mut()).await;
        self.state = SessionState::Closed;

        if let Some(e) = failure {
            return Err(e);
        }
        tracing::info!(
            passed = report.passed(),
            failed = report.failed(),
            "Session finished"
        );
        Ok(report)
    }

    fn ensure_idle(&self) -> Result<()> {
        match self.state {
            SessionState::Idle => Ok(()),
            SessionState::Closed => Err(Error::SessionClosed),
            SessionState::Running | SessionState::Draining => Err(Error::SessionRunning),
        }
    }
}

async fn close(role: ServerRole, conn: &mut dyn Connection) {
    if let Err(e) = conn.close().await {
        tracing::warn!("Failed to close {} connection to {}: {}", role, conn.endpoint(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::QueryError;
    use crate::connection::QueryOutcome;
    use crate::query::Term;
    use crate::runner::{CaseOutcome, ServerVerdict};
    use crate::server::{EngineOptions, LocalConnection};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn local(name: &str) -> Box<dyn Connection> {
        Box::new(LocalConnection::new(name, EngineOptions::default(), 2))
    }

    #[tokio::test]
    async fn test_cases_run_in_enqueue_order() {
        let mut seq = Sequencer::new(RunOptions::default());
        seq.test("table_create('t')", "").unwrap();
        seq.test("insert('t', {id: 1})", "{inserted: 1}").unwrap();
        seq.test("table('t').count()", "1").unwrap();

        let report = seq.run(local("ref"), local("cand")).await.unwrap();
        assert_eq!(report.cases.len(), 3);
        assert_eq!(
            report.cases.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(report.is_success(), "{:?}", report);
    }

    #[tokio::test]
    async fn test_define_visible_only_to_later_cases() {
        let mut seq = Sequencer::new(RunOptions::default());
        seq.test("x + 1", "6").unwrap();
        seq.define("x = 5").unwrap();
        seq.test("x + 1", "6").unwrap();

        let report = seq.run(local("ref"), local("cand")).await.unwrap();
        assert!(matches!(report.cases[0].outcome, CaseOutcome::Construction(_)));
        assert!(report.cases[1].passed());
        assert_eq!(report.defines, 1);
        assert_eq!(report.construction_errors(), 1);
        assert!(seq.environment().contains("x"));
    }

    #[tokio::test]
    async fn test_define_chain() {
        let mut seq = Sequencer::new(RunOptions::default());
        seq.define("base = [1, 2, 3]").unwrap();
        seq.define("total = sum(base)").unwrap();
        seq.test("total * 2", "12").unwrap();
        let report = seq.run(local("ref"), local("cand")).await.unwrap();
        assert!(report.is_success());
    }

    #[test]
    fn test_invalid_define_rejected_eagerly() {
        let mut seq = Sequencer::new(RunOptions::default());
        assert!(matches!(seq.define("= 5"), Err(Error::Definition { .. })));
        assert!(matches!(
            seq.define("y = missing + 1"),
            Err(Error::Definition { .. })
        ));
        assert_eq!(seq.pending(), 0);
    }

    #[test]
    fn test_bag_entry_point() {
        let seq = Sequencer::new(RunOptions::default());
        assert!(matches!(seq.bag("[2, 1]"), Ok(Expectation::Bag(items)) if items.len() == 2));
        assert!(seq.bag("5").is_err());
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_session() {
        let mut seq = Sequencer::new(RunOptions::default());
        seq.test("error('first')", "1").unwrap();
        seq.test("1 + 1", "3").unwrap();
        seq.test("1 + 1", "2").unwrap();

        let report = seq.run(local("ref"), local("cand")).await.unwrap();
        assert_eq!(report.cases.len(), 3);
        assert_eq!(report.query_errors(), 2);
        assert!(report.cases[2].passed());
        assert_eq!(report.passed(), 1);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_everything() {
        let mut seq = Sequencer::new(RunOptions::default());
        seq.test("1", "1").unwrap();
        seq.run(local("ref"), local("cand")).await.unwrap();
        assert_eq!(seq.state(), SessionState::Closed);

        assert!(matches!(seq.test("1", "1"), Err(Error::SessionClosed)));
        assert!(matches!(seq.define("x = 1"), Err(Error::SessionClosed)));
        assert!(matches!(
            seq.run(local("ref"), local("cand")).await,
            Err(Error::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_empty_session_closes_immediately() {
        let mut seq = Sequencer::new(RunOptions::default());
        let report = seq.run(local("ref"), local("cand")).await.unwrap();
        assert!(report.cases.is_empty());
        assert_eq!(seq.state(), SessionState::Closed);
    }

    /// Connection that counts closes and fails to close cleanly
    struct Counting {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connection for Counting {
        fn endpoint(&self) -> &str {
            "counting"
        }

        async fn run<'c>(
            &'c mut self,
            _query: &Term,
        ) -> std::result::Result<QueryOutcome<'c>, QueryError> {
            Ok(QueryOutcome::Datum(crate::datum::Datum::from(1i64)))
        }

        async fn close(&mut self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Err(Error::Internal("socket already gone".to_string()))
        }
    }

    #[tokio::test]
    async fn test_connections_closed_exactly_once() {
        let reference_closes = Arc::new(AtomicUsize::new(0));
        let candidate_closes = Arc::new(AtomicUsize::new(0));
        let mut seq = Sequencer::new(RunOptions::default());
        seq.test("1", "1").unwrap();
        // Both connections answer 1 to everything
        seq.test("1", "2").unwrap();

        let report = seq
            .run(
                Box::new(Counting {
                    closes: Arc::clone(&reference_closes),
                }),
                Box::new(Counting {
                    closes: Arc::clone(&candidate_closes),
                }),
            )
            .await
            .unwrap();

        assert_eq!(reference_closes.load(Ordering::SeqCst), 1);
        assert_eq!(candidate_closes.load(Ordering::SeqCst), 1);
        assert!(report.cases[0].passed());
        assert!(matches!(
            report.cases[1].verdict(ServerRole::Candidate),
            Some(ServerVerdict::Mismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_define_ends_session() {
        let reference_closes = Arc::new(AtomicUsize::new(0));
        let candidate_closes = Arc::new(AtomicUsize::new(0));
        let mut seq = Sequencer::new(RunOptions::default());
        seq.test("1", "1").unwrap();
        // Bypasses the eager check in `define`
        seq.queue
            .push_back(Step::Define(Definition::parse("y = missing").unwrap()));
        seq.test("1", "1").unwrap();

        let result = seq
            .run(
                Box::new(Counting {
                    closes: Arc::clone(&reference_closes),
                }),
                Box::new(Counting {
                    closes: Arc::clone(&candidate_closes),
                }),
            )
            .await;

        assert!(matches!(result, Err(Error::Definition { .. })));
        assert_eq!(seq.state(), SessionState::Closed);
        assert_eq!(seq.pending(), 0);
        assert!(!seq.environment().contains("y"));
        assert_eq!(reference_closes.load(Ordering::SeqCst), 1);
        assert_eq!(candidate_closes.load(Ordering::SeqCst), 1);
    }
}
