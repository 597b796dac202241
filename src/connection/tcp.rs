//! TCP client connection to a query server

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::common::{Error, QueryError, Result};
use crate::datum::Datum;
use crate::query::Term;

use super::protocol::{Request, Response};
use super::transport;
use super::{Connection, Cursor, QueryOutcome};

/// Client for one query server
///
/// An exchange interrupted mid-frame (a case timeout dropping the future)
/// leaves the stream out of sync; the next query reconnects first. Server
/// state is shared between clients, so nothing is lost by reconnecting.
pub struct TcpConnection {
    endpoint: String,
    connect_timeout: Duration,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_token: u64,
    /// A request/response exchange started and did not finish
    desynced: bool,
    /// Tokens of cursors dropped before the server finished the sequence
    abandoned: Vec<u64>,
    closed: bool,
}

impl TcpConnection {
    /// Connect to a server at `host:port`
    pub async fn connect(endpoint: &str, timeout: Duration) -> Result<Self> {
        let (reader, writer) = open_stream(endpoint, timeout).await?;
        tracing::debug!(endpoint, "Connected");

        Ok(Self {
            endpoint: endpoint.to_string(),
            connect_timeout: timeout,
            reader,
            writer,
            next_token: 1,
            desynced: false,
            abandoned: Vec::new(),
            closed: false,
        })
    }

    /// Replace the stream with a fresh one; open cursors die with the old one
    async fn reconnect(&mut self) -> std::result::Result<(), QueryError> {
        tracing::warn!(endpoint = %self.endpoint, "Reconnecting after an interrupted exchange");
        let (reader, writer) = open_stream(&self.endpoint, self.connect_timeout)
            .await
            .map_err(|e| QueryError::client(e.to_string()))?;
        self.reader = reader;
        self.writer = writer;
        self.desynced = false;
        self.abandoned.clear();
        Ok(())
    }

    /// Tell the server to drop sequences nobody will read
    ///
    /// Replies carry older tokens and are discarded by the next `recv`.
    async fn release_abandoned(&mut self) -> std::result::Result<(), QueryError> {
        for token in std::mem::take(&mut self.abandoned) {
            tracing::debug!(endpoint = %self.endpoint, token, "Stopping abandoned cursor");
            self.desynced = true;
            self.send(&Request::Stop { token }).await?;
            self.desynced = false;
        }
        Ok(())
    }

    fn next_token(&mut self) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        token
    }

    async fn send(&mut self, request: &Request) -> std::result::Result<(), QueryError> {
        if self.closed {
            return Err(QueryError::client("Connection is closed"));
        }
        let json = serde_json::to_vec(request).map_err(|e| QueryError::client(e.to_string()))?;
        tracing::debug!(endpoint = %self.endpoint, "Request: {}", String::from_utf8_lossy(&json));
        transport::send_message(&mut self.writer, &json)
            .await
            .map_err(|e| QueryError::client(format!("Send failed: {}", e)))
    }

    /// Read responses until one for `token` arrives
    ///
    /// Responses for earlier tokens belong to queries abandoned after a
    /// timeout and are discarded.
    async fn recv(&mut self, token: u64) -> std::result::Result<Response, QueryError> {
        loop {
            let data = transport::recv_message(&mut self.reader)
                .await
                .map_err(|e| QueryError::client(format!("Receive failed: {}", e)))?;
            let response: Response = serde_json::from_slice(&data)
                .map_err(|e| QueryError::client(format!("Invalid response: {}", e)))?;

            match response.token() {
                t if t == token => return Ok(response),
                t if t < token => {
                    tracing::debug!(endpoint = %self.endpoint, token = t, "Discarding stale response");
                }
                t => {
                    return Err(QueryError::client(format!(
                        "Response token mismatch: expected {}, got {}",
                        token, t
                    )))
                }
            }
        }
    }

    async fn request(&mut self, request: Request) -> std::result::Result<Response, QueryError> {
        let token = request.token();
        // Cleared only when the whole exchange completes
        self.desynced = true;
        self.send(&request).await?;
        let response = self.recv(token).await?;
        self.desynced = false;
        Ok(response)
    }
}

async fn open_stream(
    endpoint: &str,
    timeout: Duration,
) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(endpoint))
        .await
        .map_err(|_| Error::ConnectTimeout {
            endpoint: endpoint.to_string(),
            secs: timeout.as_secs(),
        })?
        .map_err(|e| Error::connect(endpoint, e))?;
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader), writer))
}

#[async_trait]
impl Connection for TcpConnection {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn run<'c>(
        &'c mut self,
        query: &Term,
    ) -> std::result::Result<QueryOutcome<'c>, QueryError> {
        if self.closed {
            return Err(QueryError::client("Connection is closed"));
        }
        if self.desynced {
            self.reconnect().await?;
        }
        self.release_abandoned().await?;

        let token = self.next_token();
        let response = self
            .request(Request::Start {
                token,
                query: query.clone(),
            })
            .await?;

        match response {
            Response::Atom { data, .. } => Ok(QueryOutcome::Datum(data)),
            Response::Error { error, .. } => Err(error),
            Response::Sequence { data, .. } => Ok(QueryOutcome::Cursor(Box::new(TcpCursor {
                conn: self,
                token,
                pending: Some(data),
                more: false,
            }))),
            Response::Partial { data, .. } => Ok(QueryOutcome::Cursor(Box::new(TcpCursor {
                conn: self,
                token,
                pending: Some(data),
                more: true,
            }))),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer.shutdown().await?;
        tracing::debug!(endpoint = %self.endpoint, "Connection closed");
        Ok(())
    }
}

/// Cursor over a sequence streamed in batches
struct TcpCursor<'c> {
    conn: &'c mut TcpConnection,
    token: u64,
    /// Batch received but not yet handed out
    pending: Option<Vec<Datum>>,
    /// Whether the server has more batches after `pending`
    more: bool,
}

#[async_trait]
impl<'c> Cursor for TcpCursor<'c> {
    async fn next_batch(&mut self) -> std::result::Result<Option<Vec<Datum>>, QueryError> {
        if let Some(batch) = self.pending.take() {
            return Ok(Some(batch));
        }
        if !self.more {
            return Ok(None);
        }

        let response = self
            .conn
            .request(Request::Continue { token: self.token })
            .await?;
        match response {
            Response::Partial { data, .. } => Ok(Some(data)),
            Response::Sequence { data, .. } => {
                self.more = false;
                Ok(Some(data))
            }
            Response::Error { error, .. } => {
                self.more = false;
                Err(error)
            }
            Response::Atom { .. } => {
                self.more = false;
                Err(QueryError::client("Unexpected atom while reading a sequence"))
            }
        }
    }
}

impl Drop for TcpCursor<'_> {
    fn drop(&mut self) {
        if self.more {
            self.conn.abandoned.push(self.token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn read_request(stream: &mut TcpStream) -> Request {
        let data = transport::recv_message(stream).await.unwrap();
        serde_json::from_slice(&data).unwrap()
    }

    async fn write_response(stream: &mut TcpStream, response: &Response) {
        let json = serde_json::to_vec(response).unwrap();
        transport::send_message(stream, &json).await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnects_after_interrupted_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            // First client stream: header promises 100 bytes, only 5 arrive
            let (mut first, _) = listener.accept().await.unwrap();
            let stalled = read_request(&mut first).await;
            first.write_all(&100u32.to_le_bytes()).await.unwrap();
            first.write_all(b"{\"typ").await.unwrap();
            first.flush().await.unwrap();

            let (mut second, _) = listener.accept().await.unwrap();
            let retried = read_request(&mut second).await;
            write_response(
                &mut second,
                &Response::Atom {
                    token: retried.token(),
                    data: Datum::from(7i64),
                },
            )
            .await;
            drop(first);
            (stalled, retried)
        });

        let mut conn = TcpConnection::connect(&addr.to_string(), Duration::from_secs(5))
            .await
            .unwrap();
        let query = Term::datum(7i64);

        let interrupted = tokio::time::timeout(Duration::from_millis(200), conn.run(&query))
            .await
            .is_err();
        assert!(interrupted);

        let value = conn.run(&query).await.unwrap().materialize().await.unwrap();
        assert_eq!(value, Datum::from(7i64));

        let (stalled, retried) = server.await.unwrap();
        assert_eq!(stalled.token(), 1);
        assert_eq!(retried.token(), 2);
    }

    #[tokio::test]
    async fn test_dropped_cursor_sends_stop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut requests = Vec::new();
            loop {
                let request = read_request(&mut stream).await;
                let response = match &request {
                    Request::Start { token: 1, .. } => Response::Partial {
                        token: 1,
                        data: vec![Datum::from(1i64)],
                    },
                    Request::Stop { token } => Response::Sequence {
                        token: *token,
                        data: Vec::new(),
                    },
                    other => Response::Atom {
                        token: other.token(),
                        data: Datum::from(2i64),
                    },
                };
                let done = matches!(request, Request::Start { token: 2, .. });
                requests.push(request);
                write_response(&mut stream, &response).await;
                if done {
                    return requests;
                }
            }
        });

        let mut conn = TcpConnection::connect(&addr.to_string(), Duration::from_secs(5))
            .await
            .unwrap();
        let query = Term::datum(1i64);

        let outcome = conn.run(&query).await.unwrap();
        assert!(matches!(outcome, QueryOutcome::Cursor(_)));
        drop(outcome);

        // The stop reply for token 1 is skipped as stale
        let value = conn.run(&query).await.unwrap().materialize().await.unwrap();
        assert_eq!(value, Datum::from(2i64));

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 3);
        assert!(matches!(requests[0], Request::Start { token: 1, .. }));
        assert_eq!(requests[1], Request::Stop { token: 1 });
        assert!(matches!(requests[2], Request::Start { token: 2, .. }));
    }

    #[tokio::test]
    async fn test_finished_cursor_sends_no_stop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut requests = Vec::new();
            for _ in 0..2 {
                let request = read_request(&mut stream).await;
                let response = Response::Sequence {
                    token: request.token(),
                    data: vec![Datum::from(1i64)],
                };
                requests.push(request);
                write_response(&mut stream, &response).await;
            }
            requests
        });

        let mut conn = TcpConnection::connect(&addr.to_string(), Duration::from_secs(5))
            .await
            .unwrap();
        let query = Term::datum(1i64);
        drop(conn.run(&query).await.unwrap());
        conn.run(&query).await.unwrap();

        let requests = server.await.unwrap();
        assert!(requests.iter().all(|r| matches!(r, Request::Start { .. })));
    }
}
