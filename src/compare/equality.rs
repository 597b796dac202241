//! Structural equality over datums
//!
//! [`equal`] is one-directional for objects: every key of the left-hand
//! object must be present and equal on the right, while keys only present
//! on the right are ignored. [`equal_strict`] additionally requires
//! identical key sets.

use crate::datum::Datum;

/// Which object comparison rule to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EqualityMode {
    /// Keys present only on the right-hand side are not checked
    #[default]
    Subset,
    /// Both objects must have the same key set
    Strict,
}

impl EqualityMode {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            Self::Strict
        } else {
            Self::Subset
        }
    }

    pub fn equal(self, a: &Datum, b: &Datum) -> bool {
        match self {
            Self::Subset => equal(a, b),
            Self::Strict => equal_strict(a, b),
        }
    }
}

/// Compare `a` against `b`, recursing into arrays and objects
///
/// Never fails: incomparable shapes are simply unequal.
pub fn equal(a: &Datum, b: &Datum) -> bool {
    compare(a, b, EqualityMode::Subset)
}

/// Symmetric deep equality
pub fn equal_strict(a: &Datum, b: &Datum) -> bool {
    compare(a, b, EqualityMode::Strict)
}

fn compare(a: &Datum, b: &Datum, mode: EqualityMode) -> bool {
    match (a, b) {
        (Datum::Array(xs), Datum::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| compare(x, y, mode))
        }
        (Datum::Array(_), _) => false,
        (Datum::Object(xs), Datum::Object(ys)) => {
            if mode == EqualityMode::Strict && xs.len() != ys.len() {
                return false;
            }
            // A key missing on the right compares unequal
            xs.iter()
                .all(|(key, x)| ys.get(key).is_some_and(|y| compare(x, y, mode)))
        }
        (Datum::Object(_), _) => false,
        (Datum::Null, Datum::Null) => true,
        (Datum::Bool(x), Datum::Bool(y)) => x == y,
        (Datum::Number(x), Datum::Number(y)) => x == y,
        (Datum::String(x), Datum::String(y)) => x == y,
        _ => false,
    }
}
