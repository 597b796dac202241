//! Query expression front end
//!
//! Source text from test scripts is parsed by an explicit interpreter and
//! turned into closed [`Term`]s; the definition environment is passed in
//! as an argument rather than injected as ambient scope.

pub mod lexer;
pub mod parser;
pub mod term;

pub use parser::{parse_assignment, parse_expression, BinaryOp, Expr, UnaryOp};
pub use term::Term;

use crate::common::{Error, Result};
use crate::environment::Environment;

/// Evaluate a construction expression into the query to run on both servers
///
/// Any failure is reported as a construction error naming the source text.
pub fn construct(source: &str, env: &Environment) -> Result<Term> {
    parse_expression(source)
        .and_then(|expr| Term::from_expr(&expr, env))
        .map_err(|e| Error::construction(source, e))
}
