//! Wire protocol message types
//!
//! Client and server exchange length-prefixed JSON messages (see
//! [`super::transport`]). Every request carries a token; responses echo it.
//! A query producing a sequence may answer with `partial` batches, each
//! followed by a `continue` request, until a final `sequence` batch.

use serde::{Deserialize, Serialize};

use crate::common::QueryError;
use crate::datum::Datum;
use crate::query::Term;

/// Client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Run a new query
    Start { token: u64, query: Term },
    /// Fetch the next batch of a partial sequence
    Continue { token: u64 },
    /// Discard the rest of a partial sequence
    Stop { token: u64 },
}

impl Request {
    pub fn token(&self) -> u64 {
        match self {
            Request::Start { token, .. }
            | Request::Continue { token }
            | Request::Stop { token } => *token,
        }
    }
}

/// Server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// A single value
    Atom { token: u64, data: Datum },
    /// The final batch of a sequence
    Sequence { token: u64, data: Vec<Datum> },
    /// A batch of a sequence with more to come
    Partial { token: u64, data: Vec<Datum> },
    /// The query failed
    Error { token: u64, error: QueryError },
}

impl Response {
    pub fn token(&self) -> u64 {
        match self {
            Response::Atom { token, .. }
            | Response::Sequence { token, .. }
            | Response::Partial { token, .. }
            | Response::Error { token, .. } => *token,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let request = Request::Start {
            token: 3,
            query: Term::datum(1i64),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"type": "start", "token": 3, "query": {"term": "datum", "value": 1}})
        );
        let parsed: Request = serde_json::from_value(json!({"type": "continue", "token": 9})).unwrap();
        assert_eq!(parsed, Request::Continue { token: 9 });
        assert_eq!(parsed.token(), 9);
    }

    #[test]
    fn test_response_wire_format() {
        let parsed: Response = serde_json::from_value(json!({
            "type": "error",
            "token": 4,
            "error": {"name": "ReqlRuntimeError", "message": "boom"}
        }))
        .unwrap();
        assert_eq!(
            parsed,
            Response::Error {
                token: 4,
                error: QueryError::runtime("boom")
            }
        );

        let partial = Response::Partial {
            token: 2,
            data: vec![Datum::from(1i64), Datum::from("a")],
        };
        assert_eq!(
            serde_json::to_value(&partial).unwrap(),
            json!({"type": "partial", "token": 2, "data": [1, "a"]})
        );
    }
}
