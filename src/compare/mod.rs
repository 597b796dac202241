//! Result comparison: structural equality and expectations

pub mod equality;
pub mod expectation;

pub use equality::{equal, equal_strict, EqualityMode};
pub use expectation::{Expectation, Matcher, Predicate, Verdict};
