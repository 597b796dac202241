//! Query terms
//!
//! A [`Term`] is the closed query value sent to a server: every name in the
//! source expression has been replaced by the term it was defined as.
//! Function names are not interpreted here; servers decide what they mean.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};
use crate::datum::Datum;
use crate::environment::Environment;

use super::parser::{BinaryOp, Expr, UnaryOp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "term", rename_all = "snake_case")]
pub enum Term {
    Datum { value: Datum },
    MakeArray { items: Vec<Term> },
    MakeObject { fields: BTreeMap<String, Term> },
    Unary { op: UnaryOp, operand: Box<Term> },
    Binary { op: BinaryOp, lhs: Box<Term>, rhs: Box<Term> },
    GetField { target: Box<Term>, field: String },
    Bracket { target: Box<Term>, index: Box<Term> },
    Call { name: String, args: Vec<Term> },
}

impl Term {
    pub fn datum(value: impl Into<Datum>) -> Self {
        Term::Datum {
            value: value.into(),
        }
    }

    /// Build a term from a parsed expression, resolving names through `env`
    pub fn from_expr(expr: &Expr, env: &Environment) -> Result<Self> {
        // Closed literal subtrees travel as a single datum
        if let Some(value) = expr.to_datum() {
            return Ok(Term::Datum { value });
        }

        let boxed = |e: &Expr| Term::from_expr(e, env).map(Box::new);

        Ok(match expr {
            Expr::Literal { value, .. } => Term::Datum {
                value: value.clone(),
            },
            Expr::Name { name, offset } => {
                env.lookup(name)
                    .cloned()
                    .ok_or_else(|| Error::UnboundName {
                        name: name.clone(),
                        offset: *offset,
                    })?
            }
            Expr::Array { items, .. } => Term::MakeArray {
                items: items
                    .iter()
                    .map(|item| Term::from_expr(item, env))
                    .collect::<Result<_>>()?,
            },
            Expr::Object { fields, .. } => Term::MakeObject {
                fields: fields
                    .iter()
                    .map(|(key, value)| -> Result<(String, Term)> {
                        Ok((key.clone(), Term::from_expr(value, env)?))
                    })
                    .collect::<Result<_>>()?,
            },
            Expr::Unary { op, operand, .. } => Term::Unary {
                op: *op,
                operand: boxed(operand)?,
            },
            Expr::Binary { op, lhs, rhs, .. } => Term::Binary {
                op: *op,
                lhs: boxed(lhs)?,
                rhs: boxed(rhs)?,
            },
            Expr::Field { target, field, .. } => Term::GetField {
                target: boxed(target)?,
                field: field.clone(),
            },
            Expr::Index { target, index, .. } => Term::Bracket {
                target: boxed(target)?,
                index: boxed(index)?,
            },
            Expr::Call { name, args, .. } => Term::Call {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|arg| Term::from_expr(arg, env))
                    .collect::<Result<_>>()?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::parse_expression;
    use serde_json::json;

    fn build(source: &str, env: &Environment) -> Result<Term> {
        Term::from_expr(&parse_expression(source)?, env)
    }

    #[test]
    fn test_literals_fold_to_datum() {
        let term = build("[1, {a: 'b'}]", &Environment::new()).unwrap();
        assert_eq!(
            term,
            Term::Datum {
                value: Datum::from(json!([1, {"a": "b"}]))
            }
        );
    }

    #[test]
    fn test_names_are_substituted() {
        let mut env = Environment::new();
        env.bind("x", Term::datum(5i64));
        let term = build("x + 1", &env).unwrap();
        assert_eq!(
            term,
            Term::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(Term::datum(5i64)),
                rhs: Box::new(Term::datum(1i64)),
            }
        );
    }

    #[test]
    fn test_unbound_name() {
        let err = build("undefinedName.field", &Environment::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::UnboundName { ref name, offset: 0 } if name == "undefinedName"
        ));
    }

    #[test]
    fn test_wire_shape() {
        let term = build("table('users').count()", &Environment::new()).unwrap();
        let json = serde_json::to_value(&term).unwrap();
        assert_eq!(
            json,
            json!({
                "term": "call",
                "name": "count",
                "args": [{
                    "term": "call",
                    "name": "table",
                    "args": [{"term": "datum", "value": "users"}]
                }]
            })
        );
        let back: Term = serde_json::from_value(json).unwrap();
        assert_eq!(back, term);
    }
}
