//! Query server: serves the wire protocol over TCP

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::common::{QueryError, Result};
use crate::connection::protocol::{Request, Response};
use crate::connection::transport;
use crate::datum::Datum;

use super::engine::{Engine, EngineOptions, Evaluated};

/// A query server backed by the reference engine
///
/// All clients share one engine, so state created by one connection is
/// visible to the others.
pub struct QueryServer {
    listener: TcpListener,
    engine: Arc<Mutex<Engine>>,
    batch_size: usize,
}

impl QueryServer {
    /// Bind to `addr` (use port 0 for an ephemeral port)
    pub async fn bind(addr: &str, options: EngineOptions, batch_size: usize) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            engine: Arc::new(Mutex::new(Engine::new(options))),
            batch_size: batch_size.max(1),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients until the task is dropped
    pub async fn serve(self) -> Result<()> {
        tracing::info!("Query server listening on {}", self.local_addr()?);
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "Client connected");
                    let engine = Arc::clone(&self.engine);
                    let batch_size = self.batch_size;
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, engine, batch_size).await {
                            tracing::error!("Error handling client {}: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Serve one client until it disconnects
async fn handle_client(
    stream: TcpStream,
    engine: Arc<Mutex<Engine>>,
    batch_size: usize,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    // Remaining batches of partially delivered sequences, by token
    let mut open_cursors: HashMap<u64, VecDeque<Vec<Datum>>> = HashMap::new();

    loop {
        let request_data = match transport::recv_message(&mut reader).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::debug!("Client disconnected");
                break;
            }
            Err(e) => {
                tracing::error!("Error reading request: {}", e);
                break;
            }
        };

        let request: Request = match serde_json::from_slice(&request_data) {
            Ok(req) => req,
            Err(e) => {
                tracing::error!("Invalid request: {}", e);
                let response = Response::Error {
                    token: 0,
                    error: QueryError::client(format!("Invalid request: {}", e)),
                };
                let json = serde_json::to_vec(&response)?;
                transport::send_message(&mut writer, &json).await?;
                continue;
            }
        };

        tracing::debug!("Received request: {:?}", request);

        let response = match request {
            Request::Start { token, query } => {
                let result = engine.lock().await.evaluate(&query);
                match result {
                    Ok(Evaluated::Datum(data)) => Response::Atom { token, data },
                    Ok(Evaluated::Stream(items)) => {
                        let mut batches: VecDeque<Vec<Datum>> = items
                            .chunks(batch_size)
                            .map(<[Datum]>::to_vec)
                            .collect();
                        let first = batches.pop_front().unwrap_or_default();
                        if batches.is_empty() {
                            Response::Sequence { token, data: first }
                        } else {
                            open_cursors.insert(token, batches);
                            Response::Partial { token, data: first }
                        }
                    }
                    Err(error) => Response::Error { token, error },
                }
            }
            Request::Continue { token } => match open_cursors.get_mut(&token) {
                Some(batches) => {
                    let data = batches.pop_front().unwrap_or_default();
                    if batches.is_empty() {
                        open_cursors.remove(&token);
                        Response::Sequence { token, data }
                    } else {
                        Response::Partial { token, data }
                    }
                }
                None => Response::Error {
                    token,
                    error: QueryError::client(format!("No open cursor for token {}", token)),
                },
            },
            Request::Stop { token } => {
                open_cursors.remove(&token);
                Response::Sequence {
                    token,
                    data: Vec::new(),
                }
            }
        };

        let json = serde_json::to_vec(&response)?;
        transport::send_message(&mut writer, &json).await?;
    }

    Ok(())
}
