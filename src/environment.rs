//! Definition environment
//!
//! Session-scoped bindings created by define directives. A binding is
//! visible to every construction expression evaluated after it; nothing is
//! ever removed and there is no scoping between test cases.

use std::collections::BTreeMap;

use crate::common::{Error, Result};
use crate::query::{self, Expr, Term};

/// A parsed `name = expression` directive
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub source: String,
    pub name: String,
    expr: Expr,
}

impl Definition {
    /// Parse a define directive without resolving any names
    pub fn parse(source: &str) -> Result<Self> {
        let (name, expr) =
            query::parse_assignment(source).map_err(|e| Error::definition(source, e))?;
        Ok(Self {
            source: source.to_string(),
            name,
            expr,
        })
    }

    /// Names the right-hand side refers to
    pub fn free_names(&self) -> Vec<&str> {
        self.expr.free_names()
    }
}

/// Named terms available to construction expressions
#[derive(Debug, Default, Clone)]
pub struct Environment {
    bindings: BTreeMap<String, Term>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and apply a define directive
    pub fn define(&mut self, source: &str) -> Result<()> {
        let definition = Definition::parse(source)?;
        self.apply(&definition)
    }

    /// Construct the right-hand side with the current bindings and bind it
    ///
    /// Redefining a name replaces the earlier binding for later cases only.
    pub fn apply(&mut self, definition: &Definition) -> Result<()> {
        let term = Term::from_expr(&definition.expr, self)
            .map_err(|e| Error::definition(&definition.source, e))?;
        tracing::debug!(name = %definition.name, "Defined");
        self.bind(&definition.name, term);
        Ok(())
    }

    pub fn bind(&mut self, name: &str, term: Term) {
        self.bindings.insert(name.to_string(), term);
    }

    pub fn lookup(&self, name: &str) -> Option<&Term> {
        self.bindings.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
