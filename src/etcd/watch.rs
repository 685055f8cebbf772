//! Watch streams
//!
//! The gateway answers a watch request with one JSON document per line for
//! as long as the connection stays open. A background task turns those lines
//! into [`WatchEvent`]s. Dropping the [`Watcher`] ends the task and closes the
//! connection; there is no other way to cancel.

use super::client::Session;
use super::wire::{self, WatchCreateRequest, WatchEvent, WatchLine, WatchRequest, WatchResult};
use crate::error::{Result, StevedoreError};
use futures::Stream;
use reqwest::Response;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Events buffered between the connection and the consumer
const EVENT_BUFFER: usize = 64;

/// Stream of changes under a watched prefix
///
/// Yields `Ok` events until the connection ends. A transport or server
/// failure is yielded once as `Err`, after which the stream ends.
pub struct Watcher {
    watch_id: i64,
    rx: mpsc::Receiver<Result<WatchEvent>>,
}

impl Watcher {
    pub(crate) async fn start(session: Session, prefix: &str) -> Result<Self> {
        let (key, range_end) = wire::key_range(prefix, true);
        let request = WatchRequest {
            create_request: WatchCreateRequest {
                key,
                range_end,
                prev_kv: false,
            },
        };

        // The stream itself has no deadline; only its creation does.
        let opening = async {
            let response = session.send("watch", &request, None).await?;
            let mut lines = LineBuffer::new(response);
            let first = lines.next_result().await?;
            Ok::<_, StevedoreError>((lines, first))
        };
        let (lines, first) = tokio::time::timeout(session.request_timeout(), opening)
            .await
            .map_err(|_| {
                StevedoreError::EtcdTimeout(format!("watch on {} was not confirmed", prefix))
            })??;

        let created = match first {
            Some(result) if result.created => result,
            Some(result) if result.canceled => {
                return Err(StevedoreError::EtcdServer {
                    code: 0,
                    message: format!("watch canceled: {}", result.cancel_reason),
                })
            }
            Some(_) => {
                return Err(StevedoreError::EtcdProtocol(
                    "watch stream did not confirm creation".to_string(),
                ))
            }
            None => {
                return Err(StevedoreError::EtcdProtocol(
                    "watch stream closed before creation".to_string(),
                ))
            }
        };
        debug!("etcd watch {} created on {}", created.watch_id, prefix);

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        // Events may arrive in the same result that confirmed creation.
        let pending = created.events;
        tokio::spawn(forward(lines, pending, tx));

        Ok(Self {
            watch_id: created.watch_id,
            rx,
        })
    }

    /// Identifier the store assigned to this watch
    pub fn watch_id(&self) -> i64 {
        self.watch_id
    }

    /// Next change, or `None` once the stream has ended
    pub async fn next(&mut self) -> Option<Result<WatchEvent>> {
        self.rx.recv().await
    }
}

impl Stream for Watcher {
    type Item = Result<WatchEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

async fn forward(
    mut lines: LineBuffer,
    pending: Vec<WatchEvent>,
    tx: mpsc::Sender<Result<WatchEvent>>,
) {
    for event in pending {
        if tx.send(Ok(event)).await.is_err() {
            return;
        }
    }

    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                debug!("etcd watch consumer went away");
                return;
            }
            next = lines.next_result() => next,
        };
        let result = match next {
            Ok(Some(result)) => result,
            Ok(None) => {
                debug!("etcd watch stream closed");
                return;
            }
            Err(e) => {
                warn!("etcd watch stream failed: {}", e);
                let _ = tx.send(Err(e)).await;
                return;
            }
        };

        for event in result.events {
            if tx.send(Ok(event)).await.is_err() {
                debug!("etcd watch consumer went away");
                return;
            }
        }

        if result.canceled {
            let reason = result.cancel_reason;
            warn!("etcd watch canceled: {}", reason);
            let _ = tx
                .send(Err(StevedoreError::EtcdServer {
                    code: 0,
                    message: format!("watch canceled: {}", reason),
                }))
                .await;
            return;
        }
    }
}

/// Splits a streaming response body into newline-delimited JSON documents
struct LineBuffer {
    response: Response,
    buf: Vec<u8>,
}

impl LineBuffer {
    fn new(response: Response) -> Self {
        Self {
            response,
            buf: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                return Ok(Some(line));
            }

            match self.response.chunk().await? {
                Some(chunk) => self.buf.extend_from_slice(&chunk),
                None if self.buf.iter().all(u8::is_ascii_whitespace) => return Ok(None),
                None => return Ok(Some(std::mem::take(&mut self.buf))),
            }
        }
    }

    async fn next_result(&mut self) -> Result<Option<WatchResult>> {
        loop {
            let line = match self.next_line().await? {
                Some(line) => line,
                None => return Ok(None),
            };
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let parsed: WatchLine = serde_json::from_slice(&line)
                .map_err(|e| StevedoreError::EtcdProtocol(format!("watch: {}", e)))?;

            if let Some(error) = parsed.error {
                let message = error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                let code = error
                    .get("grpc_code")
                    .or_else(|| error.get("code"))
                    .and_then(|c| c.as_i64())
                    .unwrap_or_default() as i32;
                return Err(StevedoreError::EtcdServer { code, message });
            }

            if let Some(result) = parsed.result {
                return Ok(Some(result));
            }
        }
    }
}
