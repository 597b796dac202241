//! In-process connection to a reference engine

use async_trait::async_trait;

use crate::common::{QueryError, Result};
use crate::connection::{BufferedCursor, Connection, QueryOutcome};
use crate::datum::Datum;
use crate::query::Term;

use super::engine::{Engine, EngineOptions, Evaluated};

/// A [`Connection`] that evaluates queries directly, without a socket
///
/// Sequence results are still delivered through a cursor in batches.
pub struct LocalConnection {
    name: String,
    engine: Engine,
    batch_size: usize,
    queries: usize,
    closed: bool,
}

impl LocalConnection {
    pub fn new(name: &str, options: EngineOptions, batch_size: usize) -> Self {
        Self {
            name: name.to_string(),
            engine: Engine::new(options),
            batch_size: batch_size.max(1),
            queries: 0,
            closed: false,
        }
    }

    /// Number of queries run so far
    pub fn queries(&self) -> usize {
        self.queries
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl Connection for LocalConnection {
    fn endpoint(&self) -> &str {
        &self.name
    }

    async fn run<'c>(
        &'c mut self,
        query: &Term,
    ) -> std::result::Result<QueryOutcome<'c>, QueryError> {
        if self.closed {
            return Err(QueryError::client("Connection is closed"));
        }
        self.queries += 1;
        match self.engine.evaluate(query)? {
            Evaluated::Datum(datum) => Ok(QueryOutcome::Datum(datum)),
            Evaluated::Stream(items) => {
                let batches: Vec<Vec<Datum>> = items
                    .chunks(self.batch_size)
                    .map(<[Datum]>::to_vec)
                    .collect();
                Ok(QueryOutcome::Cursor(Box::new(BufferedCursor::new(batches))))
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
