//! Expectation evaluation
//!
//! A declared expectation is resolved once per test case into a [`Matcher`],
//! a uniform check over one server's materialized result.

use std::fmt;
use std::sync::Arc;

use crate::common::{Error, Result};
use crate::datum::Datum;
use crate::query::parser::{self, Expr};

use super::equality::EqualityMode;

/// Signature of a custom result check
pub type PredicateFn = dyn Fn(&Datum) -> bool + Send + Sync;

/// A named custom check over an actual result
#[derive(Clone)]
pub struct Predicate {
    name: String,
    check: Arc<PredicateFn>,
}

impl Predicate {
    pub fn new(name: impl Into<String>, check: impl Fn(&Datum) -> bool + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn test(&self, actual: &Datum) -> bool {
        (self.check)(actual)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate").field("name", &self.name).finish()
    }
}

/// What a test case expects from each server
#[derive(Debug, Clone)]
pub enum Expectation {
    /// Compare structurally against this value
    Literal(Datum),
    /// Apply a custom check
    Predicate(Predicate),
    /// Compare as an unordered collection
    Bag(Vec<Datum>),
    /// Only the absence of a query error is checked
    Absent,
}

impl Expectation {
    /// Evaluate expectation source text
    ///
    /// Empty source means no expectation. `bag(<list>)` builds an unordered
    /// expectation; anything else must be a closed literal.
    pub fn from_source(source: &str) -> Result<Self> {
        if source.trim().is_empty() {
            return Ok(Self::Absent);
        }

        let expr = parser::parse_expression(source)?;
        if let Expr::Call { name, args, .. } = &expr {
            if name == "bag" {
                return match args.as_slice() {
                    [list] => Self::bag_from_expr(list),
                    _ => Err(Error::parse(0, "bag() takes exactly one list argument")),
                };
            }
        }

        expr.to_datum()
            .map(Self::Literal)
            .ok_or_else(|| Error::parse(expr.offset(), "Expected value must be a literal"))
    }

    /// Build a bag expectation from literal list source text
    pub fn bag_from_source(source: &str) -> Result<Self> {
        let expr = parser::parse_expression(source)?;
        Self::bag_from_expr(&expr)
    }

    fn bag_from_expr(expr: &Expr) -> Result<Self> {
        match expr.to_datum() {
            Some(Datum::Array(items)) => Ok(Self::Bag(items)),
            _ => Err(Error::parse(expr.offset(), "bag() expects a literal list")),
        }
    }

    pub fn predicate(
        name: impl Into<String>,
        check: impl Fn(&Datum) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::Predicate(Predicate::new(name, check))
    }

    /// Resolve into a single check over an actual result
    pub fn resolve(&self, mode: EqualityMode) -> Matcher {
        match self {
            Self::Absent => Matcher::new(|_| Verdict::Pass),
            Self::Predicate(predicate) => {
                let predicate = predicate.clone();
                Matcher::new(move |actual| {
                    if predicate.test(actual) {
                        Verdict::Pass
                    } else {
                        Verdict::mismatch(actual, format!("<predicate {}>", predicate.name()))
                    }
                })
            }
            Self::Literal(expected) => {
                let expected = expected.clone();
                Matcher::new(move |actual| {
                    if mode.equal(actual, &expected) {
                        Verdict::Pass
                    } else {
                        tracing::debug!(value = %actual, expected = %expected, "Equality comparison failed");
                        Verdict::mismatch(actual, expected.to_string())
                    }
                })
            }
            Self::Bag(items) => {
                let expected = Datum::Array(Datum::sorted(items));
                Matcher::new(move |actual| {
                    let Some(actual_items) = actual.as_array() else {
                        return Verdict::mismatch(actual, format!("bag({})", expected));
                    };
                    let sorted = Datum::Array(Datum::sorted(actual_items));
                    if mode.equal(&expected, &sorted) {
                        Verdict::Pass
                    } else {
                        tracing::debug!(value = %sorted, expected = %expected, "Bag comparison failed");
                        Verdict::mismatch(actual, format!("bag({})", expected))
                    }
                })
            }
        }
    }
}

/// Outcome of checking one result against an expectation
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Pass,
    Mismatch { actual: Datum, expected: String },
}

impl Verdict {
    fn mismatch(actual: &Datum, expected: String) -> Self {
        Self::Mismatch {
            actual: actual.clone(),
            expected,
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// A resolved expectation
pub struct Matcher {
    check: Box<dyn Fn(&Datum) -> Verdict + Send + Sync>,
}

impl Matcher {
    fn new(check: impl Fn(&Datum) -> Verdict + Send + Sync + 'static) -> Self {
        Self {
            check: Box::new(check),
        }
    }

    pub fn check(&self, actual: &Datum) -> Verdict {
        (self.check)(actual)
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Matcher")
    }
}
