use async_trait::async_trait;
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{CommandError, ConnectionError};

use super::protocol::{ReplyFrame, RequestFrame};
use super::{resolve_target, Connector, DeviceLink};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

type ReplySender = oneshot::Sender<Result<Value, CommandError>>;

struct Exchange {
    frame: RequestFrame,
    reply_tx: ReplySender,
}

/// Opens [`TcpDeviceLink`]s, polling until the controller accepts.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    poll_interval: Duration,
}

impl TcpConnector {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Box<dyn DeviceLink>, ConnectionError> {
        let target = resolve_target(address, port)?;
        let link = TcpDeviceLink::connect(target, timeout, self.poll_interval).await?;
        Ok(Box::new(link))
    }
}

/// Newline-delimited JSON link to a controller.
///
/// A worker task owns the socket and handles one exchange at a time; each
/// `send_command` hands it the request plus a one-shot sender for the reply.
pub struct TcpDeviceLink {
    peer: SocketAddr,
    requests: Option<mpsc::Sender<Exchange>>,
    cancel_token: Option<CancellationToken>,
    worker: Option<JoinHandle<()>>,
    next_id: u64,
}

impl TcpDeviceLink {
    pub async fn connect(
        target: SocketAddr,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self, ConnectionError> {
        let stream = wait_for_stream(target, timeout, poll_interval).await?;
        Ok(Self::from_stream(target, stream))
    }

    fn from_stream(peer: SocketAddr, stream: TcpStream) -> Self {
        let cancel_token = CancellationToken::new();
        let (requests_tx, requests_rx) = mpsc::channel(1);
        let worker = tokio::spawn(link_worker(peer, stream, requests_rx, cancel_token.clone()));

        Self {
            peer,
            requests: Some(requests_tx),
            cancel_token: Some(cancel_token),
            worker: Some(worker),
            next_id: 0,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

#[async_trait]
impl DeviceLink for TcpDeviceLink {
    async fn send_command(&mut self, name: &str, payload: Value) -> Result<Value, CommandError> {
        let requests = self.requests.as_ref().ok_or(CommandError::NotConnected)?;
        let closed = || CommandError::LinkClosed {
            command: name.to_string(),
        };

        self.next_id += 1;
        let frame = RequestFrame {
            id: self.next_id,
            command: name.to_string(),
            payload,
        };
        let (reply_tx, reply_rx) = oneshot::channel();

        log_debug!("-> {} #{} '{}'", self.peer, frame.id, name);
        requests
            .send(Exchange { frame, reply_tx })
            .await
            .map_err(|_| closed())?;

        let reply = reply_rx.await.map_err(|_| closed())?;
        log_debug!("<- {} '{}' {}", self.peer, name, if reply.is_ok() { "ok" } else { "failed" });
        reply
    }

    async fn disconnect(&mut self) {
        self.requests = None;
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        if let Some(worker) = self.worker.take() {
            if let Err(err) = worker.await {
                log_warn!("link worker for {} failed to join: {}", self.peer, err);
            }
            log_info!("disconnected from {}", self.peer);
        }
    }

    fn is_connected(&self) -> bool {
        self.requests
            .as_ref()
            .map(|requests| !requests.is_closed())
            .unwrap_or(false)
    }
}

impl Drop for TcpDeviceLink {
    fn drop(&mut self) {
        if let Some(token) = &self.cancel_token {
            token.cancel();
        }
    }
}

async fn wait_for_stream(
    target: SocketAddr,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<TcpStream, ConnectionError> {
    let deadline = Instant::now() + timeout;
    let timed_out = || ConnectionError::Timeout {
        address: target.to_string(),
        waited_ms: timeout.as_millis() as u64,
    };

    let mut ticker = time::interval(poll_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut attempts: u32 = 0;

    loop {
        ticker.tick().await;
        let now = Instant::now();
        if now >= deadline {
            log_warn!("gave up on {} after {} attempts", target, attempts);
            return Err(timed_out());
        }

        attempts += 1;
        match time::timeout(deadline - now, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => {
                log_info!("connected to {} after {} attempt(s)", target, attempts);
                return Ok(stream);
            }
            Ok(Err(err)) => log_debug!("attempt {} to {} failed: {}", attempts, target, err),
            Err(_) => return Err(timed_out()),
        }
    }
}

async fn link_worker(
    peer: SocketAddr,
    stream: TcpStream,
    mut requests: mpsc::Receiver<Exchange>,
    cancel_token: CancellationToken,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let Exchange { frame, reply_tx } = tokio::select! {
            _ = cancel_token.cancelled() => break,
            next = requests.recv() => match next {
                Some(exchange) => exchange,
                None => break,
            },
        };

        let result = tokio::select! {
            _ = cancel_token.cancelled() => {
                let _ = reply_tx.send(Err(CommandError::LinkClosed { command: frame.command.clone() }));
                break;
            }
            result = exchange_once(&mut write_half, &mut lines, &frame) => result,
        };

        let link_lost = matches!(result, Err(CommandError::LinkClosed { .. }));
        let _ = reply_tx.send(result);
        if link_lost {
            log_warn!("link to {} lost during '{}'", peer, frame.command);
            break;
        }
    }

    let _ = write_half.shutdown().await;
}

async fn exchange_once(
    writer: &mut OwnedWriteHalf,
    lines: &mut Lines<BufReader<OwnedReadHalf>>,
    frame: &RequestFrame,
) -> Result<Value, CommandError> {
    let closed = || CommandError::LinkClosed {
        command: frame.command.clone(),
    };

    let mut encoded = serde_json::to_string(frame).map_err(|err| CommandError::Encode {
        command: frame.command.clone(),
        reason: err.to_string(),
    })?;
    encoded.push('\n');
    writer.write_all(encoded.as_bytes()).await.map_err(|_| closed())?;

    loop {
        let line = lines.next_line().await.map_err(|_| closed())?.ok_or_else(closed)?;
        if line.trim().is_empty() {
            continue;
        }

        let reply: ReplyFrame =
            serde_json::from_str(&line).map_err(|err| CommandError::MalformedReply {
                command: frame.command.clone(),
                reason: err.to_string(),
            })?;

        if reply.id != frame.id {
            log_warn!("discarding reply #{} while waiting for #{}", reply.id, frame.id);
            continue;
        }

        return reply.into_result(&frame.command);
    }
}
