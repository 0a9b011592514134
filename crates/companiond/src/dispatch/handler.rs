//! Connection handler that dispatches JSONL commands.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, BufReader};
use tracing::{debug, warn};

use crate::events::{DispatchRecord, EventSink, OutcomeKind, ServerEvent};
use crate::executor::{CommandExecutor, Invocation};
use crate::ports::ChannelName;
use crate::server::{DispatchGuard, LifecycleCell};
use crate::target::Target;
use crate::transport::{Connection, ConnectionHandler};

use super::errors::DispatchError;
use super::request::CommandRequest;
use super::response::ResponseWriter;
use super::{DISPATCH_TARGET, MAX_REQUEST_BYTES};

/// Bound on writing a response once dispatches are being force-cancelled.
const ABORT_WRITE_TIMEOUT: Duration = Duration::from_millis(250);

/// Connection handler that parses, admits and executes JSONL commands.
///
/// Requests on one connection are served one at a time; concurrency comes
/// from serving many connections at once.
pub(crate) struct CommandDispatcher {
    executor: Arc<dyn CommandExecutor>,
    target: Arc<dyn Target>,
    scratch: PathBuf,
    lifecycle: Arc<LifecycleCell>,
    events: Arc<EventSink>,
}

struct Peer<'a> {
    channel: &'a ChannelName,
    address: SocketAddr,
}

impl CommandDispatcher {
    pub(crate) fn new(
        executor: Arc<dyn CommandExecutor>,
        target: Arc<dyn Target>,
        scratch: PathBuf,
        lifecycle: Arc<LifecycleCell>,
        events: Arc<EventSink>,
    ) -> Self {
        Self {
            executor,
            target,
            scratch,
            lifecycle,
            events,
        }
    }

    async fn serve(&self, connection: Connection) {
        let Connection {
            stream,
            peer,
            channel,
        } = connection;
        let peer = Peer {
            channel: &channel,
            address: peer,
        };
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut writer = ResponseWriter::new(write_half);
        let drain = self.lifecycle.drain_token();

        loop {
            let line = tokio::select! {
                biased;
                () = drain.cancelled() => {
                    debug!(target: DISPATCH_TARGET, peer = %peer.address, "closing idle connection for drain");
                    break;
                }
                line = read_request_line(&mut reader) => line,
            };
            let received = Instant::now();
            let request = match line.and_then(|bytes| bytes.map(|bytes| decode(&bytes)).transpose()) {
                Ok(Some(request)) => request,
                Ok(None) => {
                    debug!(target: DISPATCH_TARGET, peer = %peer.address, "client disconnected");
                    break;
                }
                Err(error) => {
                    warn!(target: DISPATCH_TARGET, peer = %peer.address, %error, "rejecting request");
                    self.reply_error(&mut writer, None, &error).await;
                    self.record(&peer, None, received, error.outcome());
                    break;
                }
            };

            let Some(guard) = self
                .lifecycle
                .admit(peer.channel, peer.address, request.command())
            else {
                debug!(
                    target: DISPATCH_TARGET,
                    peer = %peer.address,
                    command = request.command(),
                    "dispatch refused; companion is not running"
                );
                self.reply_error(&mut writer, request.id, &DispatchError::Unavailable)
                    .await;
                break;
            };

            if !self
                .dispatch(request, guard, &mut writer, &peer, received)
                .await
            {
                break;
            }
        }
    }

    /// Runs one admitted request. Returns whether the connection stays open.
    async fn dispatch<W: AsyncWrite + Unpin + Send>(
        &self,
        request: CommandRequest,
        guard: DispatchGuard,
        writer: &mut ResponseWriter<W>,
        peer: &Peer<'_>,
        received: Instant,
    ) -> bool {
        let id = request.id;
        let command = request.command().to_owned();
        debug!(
            target: DISPATCH_TARGET,
            channel = %peer.channel,
            command = %command,
            "dispatching request"
        );
        let invocation = Invocation::new(
            Arc::clone(&self.target),
            self.scratch.clone(),
            guard.cancellation(),
        );

        let result = tokio::select! {
            biased;
            () = guard.aborted() => {
                guard.record_force_cancel();
                Err(DispatchError::force_cancelled(command.as_str()))
            }
            result = self.executor.execute(request, invocation) => {
                result.map_err(|source| DispatchError::command(command.as_str(), source))
            }
        };

        let (mut outcome, mut keep_open) = match &result {
            Ok(_) => (OutcomeKind::Success, true),
            Err(error) => {
                warn!(
                    target: DISPATCH_TARGET,
                    command = %command,
                    category = ?error.category(),
                    %error,
                    "dispatch failed"
                );
                (error.outcome(), !error.closes_connection())
            }
        };
        match respond(writer, &guard, id, result).await {
            Delivery::Written => {}
            Delivery::Failed(error) => {
                debug!(target: DISPATCH_TARGET, %error, "failed to write response");
                keep_open = false;
            }
            Delivery::Abandoned => {
                warn!(
                    target: DISPATCH_TARGET,
                    command = %command,
                    "response abandoned after force cancellation"
                );
                outcome = OutcomeKind::InternalError;
                keep_open = false;
            }
        }

        self.record(peer, Some(command), received, outcome);
        drop(guard);
        keep_open
    }

    async fn reply_error<W: AsyncWrite + Unpin + Send>(
        &self,
        writer: &mut ResponseWriter<W>,
        id: Option<u64>,
        error: &DispatchError,
    ) {
        if let Err(write_error) = writer.write_error(id, error).await {
            debug!(target: DISPATCH_TARGET, error = %write_error, "failed to write error response");
        }
    }

    fn record(&self, peer: &Peer<'_>, command: Option<String>, received: Instant, outcome: OutcomeKind) {
        self.events.emit(ServerEvent::Dispatched(DispatchRecord {
            channel: peer.channel.clone(),
            peer: peer.address,
            command,
            duration: received.elapsed(),
            outcome,
        }));
    }
}

#[async_trait]
impl ConnectionHandler for CommandDispatcher {
    async fn handle(&self, connection: Connection) {
        self.serve(connection).await;
    }
}

/// How writing a dispatch response ended.
enum Delivery {
    Written,
    Failed(DispatchError),
    /// The dispatch was force-cancelled before the client took the response.
    Abandoned,
}

/// Writes a dispatch response without outliving force cancellation.
///
/// A response to an already force-cancelled dispatch gets
/// [`ABORT_WRITE_TIMEOUT`]; any other write is raced against the abort.
async fn respond<W: AsyncWrite + Unpin + Send>(
    writer: &mut ResponseWriter<W>,
    guard: &DispatchGuard,
    id: Option<u64>,
    result: Result<Value, DispatchError>,
) -> Delivery {
    let write = async move {
        match result {
            Ok(payload) => writer.write_result(id, payload).await,
            Err(error) => writer.write_error(id, &error).await,
        }
    };
    let written = if guard.is_aborted() {
        match tokio::time::timeout(ABORT_WRITE_TIMEOUT, write).await {
            Ok(written) => written,
            Err(_) => return Delivery::Abandoned,
        }
    } else {
        tokio::select! {
            biased;
            () = guard.aborted() => {
                guard.record_force_cancel();
                return Delivery::Abandoned;
            }
            written = write => written,
        }
    };
    match written {
        Ok(()) => Delivery::Written,
        Err(error) => Delivery::Failed(error),
    }
}

fn decode(bytes: &[u8]) -> Result<CommandRequest, DispatchError> {
    let request = CommandRequest::parse(bytes)?;
    request.validate()?;
    Ok(request)
}

/// Reads a bounded JSONL request line.
///
/// Returns `Ok(None)` if the client disconnects without sending data, and
/// `Ok(Some(bytes))` for a complete line or a partial line at end of stream.
async fn read_request_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Vec<u8>>, DispatchError> {
    let mut buffer = Vec::new();
    let limit = u64::try_from(MAX_REQUEST_BYTES.saturating_add(1)).unwrap_or(u64::MAX);
    let read = (&mut *reader)
        .take(limit)
        .read_until(b'\n', &mut buffer)
        .await?;
    if read == 0 {
        return Ok(None);
    }
    if buffer.len() > MAX_REQUEST_BYTES {
        return Err(DispatchError::request_too_large(buffer.len(), MAX_REQUEST_BYTES));
    }
    Ok(Some(buffer))
}
