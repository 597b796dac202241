//! Result value model
//!
//! Every server result and every expectation literal is converted into a
//! [`Datum`] once, at the boundary, so comparison code dispatches on an
//! explicit shape instead of probing values ad hoc.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A fully materialized query result value
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Datum>),
    Object(BTreeMap<String, Datum>),
}

impl Datum {
    /// Type name as reported by `type_of` and in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Datum::Null => "NULL",
            Datum::Bool(_) => "BOOL",
            Datum::Number(_) => "NUMBER",
            Datum::String(_) => "STRING",
            Datum::Array(_) => "ARRAY",
            Datum::Object(_) => "OBJECT",
        }
    }

    /// Rank used to order values of different types
    fn type_rank(&self) -> u8 {
        match self {
            Datum::Array(_) => 0,
            Datum::Bool(_) => 1,
            Datum::Null => 2,
            Datum::Number(_) => 3,
            Datum::Object(_) => 4,
            Datum::String(_) => 5,
        }
    }

    pub fn as_array(&self) -> Option<&[Datum]> {
        match self {
            Datum::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Datum::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::String(s) => Some(s),
            _ => None,
        }
    }

    /// Truthiness used by logical operators: only `null` and `false` are falsy
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Datum::Null | Datum::Bool(false))
    }

    /// Total order over all datums
    ///
    /// Values of different types order by type rank
    /// (array < bool < null < number < object < string); arrays and objects
    /// compare lexicographically, numbers by `f64::total_cmp`.
    pub fn total_cmp(&self, other: &Datum) -> Ordering {
        match (self, other) {
            (Datum::Null, Datum::Null) => Ordering::Equal,
            (Datum::Bool(a), Datum::Bool(b)) => a.cmp(b),
            (Datum::Number(a), Datum::Number(b)) => a.total_cmp(b),
            (Datum::String(a), Datum::String(b)) => a.cmp(b),
            (Datum::Array(a), Datum::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Datum::Object(a), Datum::Object(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ord = ka.cmp(kb).then_with(|| va.total_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }

    /// Sorted copy of a list under [`Datum::total_cmp`]
    pub fn sorted(items: &[Datum]) -> Vec<Datum> {
        let mut items = items.to_vec();
        items.sort_by(Datum::total_cmp);
        items
    }
}

impl From<Value> for Datum {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Datum::Null,
            Value::Bool(b) => Datum::Bool(b),
            // serde_json numbers are always representable as f64 here
            Value::Number(n) => Datum::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => Datum::String(s),
            Value::Array(items) => Datum::Array(items.into_iter().map(Datum::from).collect()),
            Value::Object(map) => {
                Datum::Object(map.into_iter().map(|(k, v)| (k, Datum::from(v))).collect())
            }
        }
    }
}

impl From<&Datum> for Value {
    fn from(datum: &Datum) -> Self {
        match datum {
            Datum::Null => Value::Null,
            Datum::Bool(b) => Value::Bool(*b),
            Datum::Number(n) => number_to_json(*n),
            Datum::String(s) => Value::String(s.clone()),
            Datum::Array(items) => Value::Array(items.iter().map(Value::from).collect()),
            Datum::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Integral values serialize without a fractional part
fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

impl Serialize for Datum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Value::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Datum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Datum::from)
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::from(self))
    }
}

impl From<f64> for Datum {
    fn from(n: f64) -> Self {
        Datum::Number(n)
    }
}

impl From<i64> for Datum {
    fn from(n: i64) -> Self {
        Datum::Number(n as f64)
    }
}

impl From<bool> for Datum {
    fn from(b: bool) -> Self {
        Datum::Bool(b)
    }
}

impl From<&str> for Datum {
    fn from(s: &str) -> Self {
        Datum::String(s.to_string())
    }
}

impl From<Vec<Datum>> for Datum {
    fn from(items: Vec<Datum>) -> Self {
        Datum::Array(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_conversion() {
        let datum = Datum::from(json!({"a": [1, 2.5, "x"], "b": null, "c": true}));
        match &datum {
            Datum::Object(map) => {
                assert_eq!(
                    map["a"],
                    Datum::Array(vec![
                        Datum::Number(1.0),
                        Datum::Number(2.5),
                        Datum::String("x".into())
                    ])
                );
                assert_eq!(map["b"], Datum::Null);
            }
            other => panic!("Expected object, got {:?}", other),
        }
        assert_eq!(datum.to_string(), r#"{"a":[1,2.5,"x"],"b":null,"c":true}"#);
    }

    #[test]
    fn test_total_order_across_types() {
        let mut items = vec![
            Datum::from("s"),
            Datum::Null,
            Datum::from(3i64),
            Datum::Array(vec![]),
            Datum::from(true),
            Datum::Object(BTreeMap::new()),
        ];
        items.sort_by(Datum::total_cmp);
        let names: Vec<_> = items.iter().map(|d| d.type_name()).collect();
        assert_eq!(names, ["ARRAY", "BOOL", "NULL", "NUMBER", "OBJECT", "STRING"]);
    }

    #[test]
    fn test_numbers_sort_numerically() {
        let sorted = Datum::sorted(&[Datum::from(10i64), Datum::from(9i64), Datum::from(-1i64)]);
        assert_eq!(
            sorted,
            vec![Datum::from(-1i64), Datum::from(9i64), Datum::from(10i64)]
        );
    }

    #[test]
    fn test_array_prefix_orders_first() {
        let short = Datum::Array(vec![Datum::from(1i64)]);
        let long = Datum::Array(vec![Datum::from(1i64), Datum::from(0i64)]);
        assert_eq!(short.total_cmp(&long), Ordering::Less);
    }

    #[test]
    fn test_truthiness() {
        assert!(!Datum::Null.is_truthy());
        assert!(!Datum::Bool(false).is_truthy());
        assert!(Datum::from(0i64).is_truthy());
        assert!(Datum::from("").is_truthy());
    }
}
