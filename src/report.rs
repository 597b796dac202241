//! Session reports and the end-of-run summary

use colored::Colorize;

use crate::runner::{CaseOutcome, CaseReport, ServerRole, ServerVerdict};

/// Everything a session produced, in case order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionReport {
    pub cases: Vec<CaseReport>,
    /// Define steps applied
    pub defines: usize,
}

impl SessionReport {
    /// Cases where both servers matched the expectation
    pub fn passed(&self) -> usize {
        self.cases.iter().filter(|c| c.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.cases.len() - self.passed()
    }

    pub fn construction_errors(&self) -> usize {
        self.cases
            .iter()
            .filter(|c| matches!(c.outcome, CaseOutcome::Construction(_)))
            .count()
    }

    /// Query errors across both servers
    pub fn query_errors(&self) -> usize {
        self.cases
            .iter()
            .flat_map(|c| [c.verdict(ServerRole::Reference), c.verdict(ServerRole::Candidate)])
            .flatten()
            .filter(|v| matches!(v, ServerVerdict::QueryError(_)))
            .count()
    }

    /// Cases where the two servers disagreed
    pub fn divergences(&self) -> usize {
        self.cases.iter().filter(|c| c.diverged()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Print a colored summary of the session to stdout
    pub fn print_summary(&self, title: &str) {
        println!("\n{} {}", "Script:".blue().bold(), title.white().bold());

        for case in self.cases.iter().filter(|c| !c.passed()) {
            println!("  {} Case {}: {}", "✗".red(), case.index, case.source.dimmed());
            match &case.outcome {
                CaseOutcome::Construction(message) => {
                    println!("      {} {}", "construction:".yellow(), message);
                }
                CaseOutcome::Ran {
                    reference,
                    candidate,
                } => {
                    print_verdict(ServerRole::Reference, reference);
                    print_verdict(ServerRole::Candidate, candidate);
                }
            }
        }

        let status = if self.is_success() {
            format!("{} passed", self.passed()).green().bold()
        } else {
            format!("{} passed, {} failed", self.passed(), self.failed())
                .red()
                .bold()
        };
        println!(
            "  {} {} ({} cases, {} defines, {} divergent)",
            if self.is_success() { "✓".green() } else { "✗".red() },
            status,
            self.cases.len(),
            self.defines,
            self.divergences()
        );
    }
}

fn print_verdict(role: ServerRole, verdict: &ServerVerdict) {
    let label = format!("{}:", role);
    match verdict {
        ServerVerdict::Pass => println!("      {:<11}{}", label, "ok".green()),
        ServerVerdict::Mismatch { actual, expected } => println!(
            "      {:<11}{} got {} expected {}",
            label,
            "mismatch".red(),
            actual,
            expected
        ),
        ServerVerdict::QueryError(error) => {
            println!("      {:<11}{} {}", label, "error".red(), error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::QueryError;
    use crate::datum::Datum;

    fn ran(index: usize, reference: ServerVerdict, candidate: ServerVerdict) -> CaseReport {
        CaseReport {
            index,
            source: format!("case{}", index),
            outcome: CaseOutcome::Ran {
                reference,
                candidate,
            },
        }
    }

    #[test]
    fn test_counters() {
        let mismatch = ServerVerdict::Mismatch {
            actual: Datum::from(1i64),
            expected: "2".to_string(),
        };
        let report = SessionReport {
            cases: vec![
                ran(1, ServerVerdict::Pass, ServerVerdict::Pass),
                ran(2, ServerVerdict::Pass, ServerVerdict::QueryError(QueryError::runtime("x"))),
                ran(3, mismatch.clone(), mismatch),
                CaseReport {
                    index: 4,
                    source: "bad".to_string(),
                    outcome: CaseOutcome::Construction("oops".to_string()),
                },
            ],
            defines: 2,
        };
        assert_eq!(report.passed(), 1);
        assert_eq!(report.failed(), 3);
        assert_eq!(report.construction_errors(), 1);
        assert_eq!(report.query_errors(), 1);
        assert_eq!(report.divergences(), 1);
        assert!(!report.is_success());
    }

    #[test]
    fn test_empty_session_is_success() {
        let report = SessionReport::default();
        assert!(report.is_success());
        assert_eq!(report.failed(), 0);
    }
}
