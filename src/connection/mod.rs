//! Server connections
//!
//! The runner talks to both servers through the [`Connection`] trait. A
//! query yields either a single value or a [`Cursor`] over a lazily
//! delivered sequence, which must be materialized before it can be judged.

pub mod protocol;
pub mod tcp;
pub mod transport;

use async_trait::async_trait;

use crate::common::{QueryError, Result};
use crate::datum::Datum;
use crate::query::Term;

pub use tcp::TcpConnection;

/// Result of running one query
pub enum QueryOutcome<'c> {
    Datum(Datum),
    Cursor(Box<dyn Cursor + 'c>),
}

impl std::fmt::Debug for QueryOutcome<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryOutcome::Datum(datum) => f.debug_tuple("Datum").field(datum).finish(),
            QueryOutcome::Cursor(_) => f.write_str("Cursor"),
        }
    }
}

impl QueryOutcome<'_> {
    /// Turn the outcome into a concrete value, draining a cursor into an array
    pub async fn materialize(self) -> std::result::Result<Datum, QueryError> {
        match self {
            QueryOutcome::Datum(datum) => Ok(datum),
            QueryOutcome::Cursor(mut cursor) => cursor.materialize().await.map(Datum::Array),
        }
    }
}

/// A lazily delivered sequence result
#[async_trait]
pub trait Cursor: Send {
    /// Fetch the next batch, or `None` once the sequence is exhausted
    async fn next_batch(&mut self) -> std::result::Result<Option<Vec<Datum>>, QueryError>;

    /// Drain the remaining batches into one ordered sequence
    async fn materialize(&mut self) -> std::result::Result<Vec<Datum>, QueryError> {
        let mut items = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            items.extend(batch);
        }
        Ok(items)
    }
}

/// A connection to one query server
#[async_trait]
pub trait Connection: Send {
    /// Human-readable address of the server
    fn endpoint(&self) -> &str;

    /// Run a query
    ///
    /// Errors are scoped to this server and this query.
    async fn run<'c>(
        &'c mut self,
        query: &Term,
    ) -> std::result::Result<QueryOutcome<'c>, QueryError>;

    /// Close the connection
    async fn close(&mut self) -> Result<()>;
}

/// A cursor over batches that are already in memory
pub struct BufferedCursor {
    batches: std::collections::VecDeque<Vec<Datum>>,
}

impl BufferedCursor {
    pub fn new(batches: impl IntoIterator<Item = Vec<Datum>>) -> Self {
        Self {
            batches: batches.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Cursor for BufferedCursor {
    async fn next_batch(&mut self) -> std::result::Result<Option<Vec<Datum>>, QueryError> {
        Ok(self.batches.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_materialize_concatenates_batches_in_order() {
        let cursor = BufferedCursor::new(vec![
            vec![Datum::from(1i64), Datum::from(2i64)],
            vec![],
            vec![Datum::from(3i64)],
        ]);
        let outcome = QueryOutcome::Cursor(Box::new(cursor));
        assert_eq!(
            outcome.materialize().await.unwrap(),
            Datum::Array(vec![Datum::from(1i64), Datum::from(2i64), Datum::from(3i64)])
        );
    }

    #[tokio::test]
    async fn test_materialize_datum_passthrough() {
        let outcome = QueryOutcome::Datum(Datum::from("x"));
        assert_eq!(outcome.materialize().await.unwrap(), Datum::from("x"));
    }
}
