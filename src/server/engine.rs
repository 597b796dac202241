//! Reference query engine
//!
//! Evaluates [`Term`]s against in-memory tables. Table state persists
//! across queries, so earlier test cases can set up data later ones read.
//! Faults can be injected through [`EngineOptions`] to stand in for a
//! divergent candidate implementation.

use std::collections::BTreeMap;

use crate::common::QueryError;
use crate::compare::equal_strict;
use crate::datum::Datum;
use crate::query::{BinaryOp, Term, UnaryOp};

/// Upper bound on `range` sizes
const MAX_RANGE: i64 = 1_000_000;

/// Largest magnitude at which every integer has an exact `f64`
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

type EvalResult<T> = std::result::Result<T, QueryError>;

/// Fault injection settings
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Calls to these functions fail with a runtime error
    pub broken_functions: Vec<String>,
    /// Sequence results are produced in reverse order
    pub reverse_streams: bool,
}

/// Value produced by evaluating a term
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluated {
    Datum(Datum),
    /// A sequence delivered to clients as a cursor
    Stream(Vec<Datum>),
}

impl Evaluated {
    fn into_datum(self) -> Datum {
        match self {
            Evaluated::Datum(datum) => datum,
            Evaluated::Stream(items) => Datum::Array(items),
        }
    }
}

#[derive(Debug, Default)]
pub struct Engine {
    tables: BTreeMap<String, Vec<Datum>>,
    options: EngineOptions,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            tables: BTreeMap::new(),
            options,
        }
    }

    /// Evaluate a query term
    pub fn evaluate(&mut self, term: &Term) -> EvalResult<Evaluated> {
        match self.eval(term)? {
            Evaluated::Stream(mut items) if self.options.reverse_streams => {
                items.reverse();
                Ok(Evaluated::Stream(items))
            }
            other => Ok(other),
        }
    }

    fn eval(&mut self, term: &Term) -> EvalResult<Evaluated> {
        match term {
            Term::Datum { value } => Ok(Evaluated::Datum(value.clone())),
            Term::MakeArray { items } => {
                let items = items
                    .iter()
                    .map(|item| self.eval_datum(item))
                    .collect::<EvalResult<_>>()?;
                Ok(Evaluated::Datum(Datum::Array(items)))
            }
            Term::MakeObject { fields } => {
                let mut object = BTreeMap::new();
                for (key, value) in fields {
                    object.insert(key.clone(), self.eval_datum(value)?);
                }
                Ok(Evaluated::Datum(Datum::Object(object)))
            }
            Term::Unary { op, operand } => {
                let value = self.eval_datum(operand)?;
                let result = match op {
                    UnaryOp::Not => Datum::Bool(!value.is_truthy()),
                    UnaryOp::Neg => Datum::Number(-expect_number(&value)?),
                };
                Ok(Evaluated::Datum(result))
            }
            Term::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs).map(Evaluated::Datum),
            Term::GetField { target, field } => match self.eval(target)? {
                Evaluated::Stream(items) => items
                    .iter()
                    .map(|item| get_field(item, field))
                    .collect::<EvalResult<_>>()
                    .map(Evaluated::Stream),
                Evaluated::Datum(value) => get_field(&value, field).map(Evaluated::Datum),
            },
            Term::Bracket { target, index } => {
                let target = self.eval_datum(target)?;
                let index = self.eval_datum(index)?;
                bracket(&target, &index).map(Evaluated::Datum)
            }
            Term::Call { name, args } => self.call(name, args),
        }
    }

    fn eval_datum(&mut self, term: &Term) -> EvalResult<Datum> {
        self.eval(term).map(Evaluated::into_datum)
    }

    fn eval_binary(&mut self, op: BinaryOp, lhs: &Term, rhs: &Term) -> EvalResult<Datum> {
        let left = self.eval_datum(lhs)?;

        // Logical operators short-circuit and return the deciding operand
        match op {
            BinaryOp::And if !left.is_truthy() => return Ok(left),
            BinaryOp::Or if left.is_truthy() => return Ok(left),
            BinaryOp::And | BinaryOp::Or => return self.eval_datum(rhs),
            _ => {}
        }

        let right = self.eval_datum(rhs)?;
        let result = match op {
            BinaryOp::Add => match (&left, &right) {
                (Datum::Number(a), Datum::Number(b)) => Datum::Number(a + b),
                (Datum::String(a), Datum::String(b)) => Datum::String(format!("{}{}", a, b)),
                (Datum::Array(a), Datum::Array(b)) => {
                    Datum::Array(a.iter().chain(b.iter()).cloned().collect())
                }
                _ => {
                    return Err(QueryError::runtime(format!(
                        "Cannot add {} and {}",
                        left.type_name(),
                        right.type_name()
                    )))
                }
            },
            BinaryOp::Sub => Datum::Number(expect_number(&left)? - expect_number(&right)?),
            BinaryOp::Mul => Datum::Number(expect_number(&left)? * expect_number(&right)?),
            BinaryOp::Div => {
                let divisor = expect_number(&right)?;
                if divisor == 0.0 {
                    return Err(QueryError::runtime("Cannot divide by zero."));
                }
                Datum::Number(expect_number(&left)? / divisor)
            }
            BinaryOp::Mod => {
                let a = expect_integer(&left)?;
                let b = expect_integer(&right)?;
                if b == 0 {
                    return Err(QueryError::runtime("Cannot take a number modulo 0."));
                }
                let rem = a
                    .checked_rem(b)
                    .ok_or_else(|| QueryError::runtime(format!("Cannot compute {} % {}", a, b)))?;
                Datum::Number(rem as f64)
            }
            BinaryOp::Eq => Datum::Bool(equal_strict(&left, &right)),
            BinaryOp::Ne => Datum::Bool(!equal_strict(&left, &right)),
            BinaryOp::Lt => Datum::Bool(left.total_cmp(&right).is_lt()),
            BinaryOp::Le => Datum::Bool(left.total_cmp(&right).is_le()),
            BinaryOp::Gt => Datum::Bool(left.total_cmp(&right).is_gt()),
            BinaryOp::Ge => Datum::Bool(left.total_cmp(&right).is_ge()),
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        };
        Ok(result)
    }

    fn call(&mut self, name: &str, args: &[Term]) -> EvalResult<Evaluated> {
        if self.options.broken_functions.iter().any(|f| f == name) {
            return Err(QueryError::runtime(format!("`{}` is not implemented", name)));
        }

        match name {
            "range" => {
                let (start, end) = match args {
                    [end] => (0, expect_integer(&self.eval_datum(end)?)?),
                    [start, end] => (
                        expect_integer(&self.eval_datum(start)?)?,
                        expect_integer(&self.eval_datum(end)?)?,
                    ),
                    _ => return Err(arity(name, "1 or 2", args.len())),
                };
                // Both bounds are within +-2^53, so this cannot overflow
                let count = (end - start).max(0);
                if count > MAX_RANGE {
                    return Err(QueryError::runtime("Range too large"));
                }
                let items = (0..count)
                    .map(|i| Datum::Number((start + i) as f64))
                    .collect();
                Ok(Evaluated::Stream(items))
            }
            "count" => {
                let [target] = args else {
                    return Err(arity(name, "1", args.len()));
                };
                let count = match self.eval_datum(target)? {
                    Datum::Array(items) => items.len(),
                    Datum::Object(fields) => fields.len(),
                    Datum::String(s) => s.chars().count(),
                    other => return Err(type_error("a sequence", &other)),
                };
                Ok(Evaluated::Datum(Datum::Number(count as f64)))
            }
            "sum" => {
                let [target] = args else {
                    return Err(arity(name, "1", args.len()));
                };
                let items = expect_sequence(self.eval_datum(target)?)?;
                let total = items
                    .iter()
                    .map(expect_number)
                    .sum::<EvalResult<f64>>()?;
                Ok(Evaluated::Datum(Datum::Number(total)))
            }
            "reverse" => {
                let [target] = args else {
                    return Err(arity(name, "1", args.len()));
                };
                match self.eval(target)? {
                    Evaluated::Stream(mut items) => {
                        items.reverse();
                        Ok(Evaluated::Stream(items))
                    }
                    Evaluated::Datum(Datum::Array(mut items)) => {
                        items.reverse();
                        Ok(Evaluated::Datum(Datum::Array(items)))
                    }
                    Evaluated::Datum(other) => Err(type_error("a sequence", &other)),
                }
            }
            "keys" => {
                let [target] = args else {
                    return Err(arity(name, "1", args.len()));
                };
                match self.eval_datum(target)? {
                    Datum::Object(fields) => Ok(Evaluated::Datum(Datum::Array(
                        fields.into_keys().map(Datum::String).collect(),
                    ))),
                    other => Err(type_error("an object", &other)),
                }
            }
            "type_of" => {
                let [target] = args else {
                    return Err(arity(name, "1", args.len()));
                };
                let type_name = match self.eval(target)? {
                    Evaluated::Stream(_) => "STREAM",
                    Evaluated::Datum(value) => value.type_name(),
                };
                Ok(Evaluated::Datum(Datum::from(type_name)))
            }
            "error" => {
                let message = match args {
                    [] => "Error".to_string(),
                    [message] => match self.eval_datum(message)? {
                        Datum::String(s) => s,
                        other => other.to_string(),
                    },
                    _ => return Err(arity(name, "0 or 1", args.len())),
                };
                Err(QueryError::runtime(message))
            }
            "table_create" => {
                let table = self.table_name(name, args, 1)?;
                if self.tables.contains_key(&table) {
                    return Err(QueryError::runtime(format!(
                        "Table `{}` already exists.",
                        table
                    )));
                }
                self.tables.insert(table, Vec::new());
                Ok(Evaluated::Datum(summary("tables_created", 1)))
            }
            "table" => {
                let table = self.table_name(name, args, 1)?;
                self.tables
                    .get(&table)
                    .cloned()
                    .map(Evaluated::Stream)
                    .ok_or_else(|| missing_table(&table))
            }
            "insert" => {
                let table = self.table_name(name, args, 2)?;
                let docs = match self.eval_datum(&args[1])? {
                    Datum::Array(docs) => docs,
                    doc => vec![doc],
                };
                if let Some(bad) = docs.iter().find(|d| !matches!(d, Datum::Object(_))) {
                    return Err(type_error("an object", bad));
                }
                let rows = self
                    .tables
                    .get_mut(&table)
                    .ok_or_else(|| missing_table(&table))?;
                let inserted = docs.len();
                rows.extend(docs);
                Ok(Evaluated::Datum(summary("inserted", inserted)))
            }
            _ => Err(QueryError::compile(format!("Unknown function `{}`", name))),
        }
    }

    /// Table name from the first argument: a string, or a `table(name)` term
    fn table_name(&mut self, name: &str, args: &[Term], expected: usize) -> EvalResult<String> {
        if args.len() != expected {
            return Err(arity(name, &expected.to_string(), args.len()));
        }
        let target = match &args[0] {
            Term::Call { name, args } if name == "table" && args.len() == 1 => &args[0],
            other => other,
        };
        match self.eval_datum(target)? {
            Datum::String(table) => Ok(table),
            other => Err(type_error("a table name", &other)),
        }
    }
}

fn expect_number(value: &Datum) -> EvalResult<f64> {
    value
        .as_number()
        .ok_or_else(|| type_error("a number", value))
}

fn expect_integer(value: &Datum) -> EvalResult<i64> {
    let n = expect_number(value)?;
    if n.fract() != 0.0 {
        return Err(QueryError::runtime(format!("Number not an integer: {}", n)));
    }
    if n.abs() > MAX_SAFE_INTEGER {
        return Err(QueryError::runtime(format!(
            "Number not an integer (out of range): {}",
            n
        )));
    }
    Ok(n as i64)
}

fn expect_sequence(value: Datum) -> EvalResult<Vec<Datum>> {
    match value {
        Datum::Array(items) => Ok(items),
        other => Err(type_error("a sequence", &other)),
    }
}

fn get_field(value: &Datum, field: &str) -> EvalResult<Datum> {
    match value {
        Datum::Object(fields) => fields
            .get(field)
            .cloned()
            .ok_or_else(|| QueryError::runtime(format!("No attribute `{}` in object", field))),
        Datum::Array(items) => items
            .iter()
            .map(|item| get_field(item, field))
            .collect::<EvalResult<_>>()
            .map(Datum::Array),
        other => Err(type_error("an object", other)),
    }
}

fn bracket(target: &Datum, index: &Datum) -> EvalResult<Datum> {
    match (target, index) {
        (Datum::Array(items), Datum::Number(_)) => {
            let i = expect_integer(index)?;
            let len = items.len() as i64;
            let pos = if i < 0 { len + i } else { i };
            if pos < 0 || pos >= len {
                return Err(QueryError::runtime(format!("Index out of bounds: {}", i)));
            }
            Ok(items[pos as usize].clone())
        }
        (Datum::Object(_), Datum::String(field)) => get_field(target, field),
        _ => Err(QueryError::runtime(format!(
            "Cannot index {} with {}",
            target.type_name(),
            index.type_name()
        ))),
    }
}

fn summary(key: &str, count: usize) -> Datum {
    let mut fields = BTreeMap::new();
    fields.insert(key.to_string(), Datum::Number(count as f64));
    Datum::Object(fields)
}

fn missing_table(table: &str) -> QueryError {
    QueryError::runtime(format!("Table `{}` does not exist.", table))
}

fn type_error(expected: &str, actual: &Datum) -> QueryError {
    QueryError::runtime(format!(
        "Expected {} but found {}",
        expected,
        actual.type_name()
    ))
}

fn arity(name: &str, expected: &str, actual: usize) -> QueryError {
    QueryError::compile(format!(
        "`{}` takes {} arguments, {} provided",
        name, expected, actual
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use crate::query::construct;
    use serde_json::json;

    fn eval(engine: &mut Engine, source: &str) -> EvalResult<Evaluated> {
        let term = construct(source, &Environment::new()).unwrap();
        engine.evaluate(&term)
    }

    fn eval_datum(engine: &mut Engine, source: &str) -> Datum {
        eval(engine, source).unwrap().into_datum()
    }

    #[test]
    fn test_arithmetic() {
        let mut engine = Engine::default();
        assert_eq!(eval_datum(&mut engine, "1 + 1"), Datum::from(2i64));
        assert_eq!(eval_datum(&mut engine, "10 - 4 - 3"), Datum::from(3i64));
        assert_eq!(eval_datum(&mut engine, "7 % 3 * 2"), Datum::from(2i64));
        assert_eq!(eval_datum(&mut engine, "'a' + 'b'"), Datum::from("ab"));
        assert_eq!(
            eval_datum(&mut engine, "[1] + [2]"),
            Datum::from(json!([1, 2]))
        );
        assert_eq!(
            eval(&mut engine, "1 / 0").unwrap_err().message,
            "Cannot divide by zero."
        );
        assert!(eval(&mut engine, "1 + 'a'").is_err());
    }

    #[test]
    fn test_logic_and_comparison() {
        let mut engine = Engine::default();
        assert_eq!(eval_datum(&mut engine, "1 < 2 && 'b' > 'a'"), Datum::Bool(true));
        assert_eq!(eval_datum(&mut engine, "null || 5"), Datum::from(5i64));
        assert_eq!(eval_datum(&mut engine, "false && error('x')"), Datum::Bool(false));
        assert_eq!(eval_datum(&mut engine, "!0"), Datum::Bool(false));
        assert_eq!(eval_datum(&mut engine, "{a: 1} == {a: 1}"), Datum::Bool(true));
        assert_eq!(eval_datum(&mut engine, "{a: 1} != {a: 1, b: 2}"), Datum::Bool(true));
    }

    #[test]
    fn test_streams() {
        let mut engine = Engine::default();
        assert_eq!(
            eval(&mut engine, "range(3)").unwrap(),
            Evaluated::Stream(vec![Datum::from(0i64), Datum::from(1i64), Datum::from(2i64)])
        );
        assert_eq!(eval_datum(&mut engine, "range(2, 5).count()"), Datum::from(3i64));
        assert_eq!(eval_datum(&mut engine, "sum(range(5))"), Datum::from(10i64));
        assert_eq!(eval_datum(&mut engine, "range(4)[-1]"), Datum::from(3i64));
        assert_eq!(eval_datum(&mut engine, "type_of(range(1))"), Datum::from("STREAM"));
        assert_eq!(eval_datum(&mut engine, "type_of([1])"), Datum::from("ARRAY"));
    }

    #[test]
    fn test_field_access() {
        let mut engine = Engine::default();
        assert_eq!(eval_datum(&mut engine, "{a: {b: 2}}.a.b"), Datum::from(2i64));
        assert_eq!(eval_datum(&mut engine, "{a: 1}['a']"), Datum::from(1i64));
        assert_eq!(
            eval_datum(&mut engine, "[{a: 1}, {a: 2}].a"),
            Datum::from(json!([1, 2]))
        );
        assert!(eval(&mut engine, "{a: 1}.b").is_err());
        assert!(eval(&mut engine, "[1, 2][5]").is_err());
    }

    #[test]
    fn test_tables_persist_across_queries() {
        let mut engine = Engine::default();
        assert_eq!(
            eval_datum(&mut engine, "table_create('t')"),
            Datum::from(json!({"tables_created": 1}))
        );
        assert_eq!(
            eval_datum(&mut engine, "table('t').insert([{id: 1}, {id: 2}])"),
            Datum::from(json!({"inserted": 2}))
        );
        assert_eq!(eval_datum(&mut engine, "insert('t', {id: 3})"), Datum::from(json!({"inserted": 1})));
        assert_eq!(eval_datum(&mut engine, "table('t').count()"), Datum::from(3i64));
        assert_eq!(
            eval_datum(&mut engine, "table('t').id"),
            Datum::from(json!([1, 2, 3]))
        );
        assert!(eval(&mut engine, "table_create('t')").is_err());
        assert!(eval(&mut engine, "table('missing')").is_err());
        assert!(eval(&mut engine, "insert('t', 5)").is_err());
    }

    #[test]
    fn test_unknown_function_is_compile_error() {
        let mut engine = Engine::default();
        let err = eval(&mut engine, "frobnicate(1)").unwrap_err();
        assert_eq!(err.name, QueryError::COMPILE);
        let err = eval(&mut engine, "count(1, 2)").unwrap_err();
        assert_eq!(err.name, QueryError::COMPILE);
    }

    #[test]
    fn test_injected_faults() {
        let mut engine = Engine::new(EngineOptions {
            broken_functions: vec!["count".to_string()],
            reverse_streams: true,
        });
        assert_eq!(
            eval(&mut engine, "range(3)").unwrap(),
            Evaluated::Stream(vec![Datum::from(2i64), Datum::from(1i64), Datum::from(0i64)])
        );
        let err = eval(&mut engine, "[1].count()").unwrap_err();
        assert_eq!(err.name, QueryError::RUNTIME);
        assert_eq!(err.message, "`count` is not implemented");
    }

    #[test]
    fn test_integer_bounds() {
        let mut engine = Engine::default();
        assert_eq!(
            eval_datum(&mut engine, "-9007199254740991 % -1"),
            Datum::from(0i64)
        );
        assert_eq!(eval_datum(&mut engine, "-7 % 3"), Datum::from(-1i64));

        let err = eval(&mut engine, "-10000000000000000000 % -1").unwrap_err();
        assert_eq!(err.name, QueryError::RUNTIME);
        assert!(err.message.contains("out of range"), "{}", err.message);
    }

    #[test]
    fn test_range_bounds() {
        let mut engine = Engine::default();
        // Adding one no longer changes a float this large
        let err = eval(&mut engine, "range(100000000000000000, 100000000000000016)").unwrap_err();
        assert_eq!(err.name, QueryError::RUNTIME);

        assert!(eval(&mut engine, "range(1.5)").is_err());
        assert!(eval(&mut engine, "range(2000000)").is_err());
        assert_eq!(eval(&mut engine, "range(3, 1)").unwrap(), Evaluated::Stream(Vec::new()));
        assert_eq!(
            eval(&mut engine, "range(9007199254740990, 9007199254740992)").unwrap(),
            Evaluated::Stream(vec![
                Datum::Number(9_007_199_254_740_990.0),
                Datum::Number(9_007_199_254_740_991.0),
            ])
        );
    }
}
