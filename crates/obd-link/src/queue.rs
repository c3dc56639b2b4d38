//! Command queue for ELM327 adapters
//!
//! The adapter is half-duplex and answers one command at a time, ending each
//! reply with a `>` prompt. The queue runs as a task that owns the in-flight
//! request, the response buffer and the timeout; callers reach it through a
//! cloneable [`CommandQueue`] handle and wait on a oneshot reply.

use crate::error::LinkError;
use crate::log::{LogKind, TransactionLog};
use crate::transport::Transport;
use crate::{with_cr, PROMPT};
use obd_protocol::{decode, SensorSnapshot};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, info, trace, warn};

/// Default timeout for a single command
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Default pause between a reply and the next command
const DEFAULT_INTER_COMMAND_DELAY_MS: u64 = 20;

/// Queue timing
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long to wait for the prompt before failing a command
    pub command_timeout: Duration,
    /// Pause after each completion before the next write
    pub inter_command_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            inter_command_delay: Duration::from_millis(DEFAULT_INTER_COMMAND_DELAY_MS),
        }
    }
}

type Reply = oneshot::Sender<Result<String, LinkError>>;

enum Request {
    Send { command: String, reply: Reply },
    Clear,
}

/// Handle to the queue task
#[derive(Debug, Clone)]
pub struct CommandQueue {
    requests: mpsc::UnboundedSender<Request>,
}

impl CommandQueue {
    /// Start the queue task for an open link.
    ///
    /// Decoded values are published to `sensors` before the caller's reply
    /// is sent. The task ends when every handle is dropped or the chunk
    /// stream closes.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        chunks: mpsc::UnboundedReceiver<String>,
        sensors: watch::Sender<SensorSnapshot>,
        log: TransactionLog,
        config: QueueConfig,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = QueueWorker {
            transport,
            chunks,
            requests: rx,
            sensors,
            log,
            config,
            pending: VecDeque::new(),
            in_flight: None,
            buffer: String::new(),
            resume_at: None,
        };
        let handle = tokio::spawn(worker.run());
        (Self { requests: tx }, handle)
    }

    /// Queue a command and wait for its cleaned response
    pub async fn enqueue(&self, command: impl Into<String>) -> Result<String, LinkError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::Send {
                command: command.into(),
                reply,
            })
            .map_err(|_| LinkError::Closed)?;
        response.await.map_err(|_| LinkError::Closed)?
    }

    /// Drop every queued and in-flight request; their callers get
    /// [`LinkError::Cleared`]
    pub fn clear(&self) {
        let _ = self.requests.send(Request::Clear);
    }
}

struct Pending {
    command: String,
    created_at: Instant,
    reply: Reply,
}

struct InFlight {
    request: Pending,
    deadline: Instant,
}

struct QueueWorker {
    transport: Arc<dyn Transport>,
    chunks: mpsc::UnboundedReceiver<String>,
    requests: mpsc::UnboundedReceiver<Request>,
    sensors: watch::Sender<SensorSnapshot>,
    log: TransactionLog,
    config: QueueConfig,
    pending: VecDeque<Pending>,
    in_flight: Option<InFlight>,
    buffer: String,
    /// Earliest time the next command may be written
    resume_at: Option<Instant>,
}

impl QueueWorker {
    async fn run(mut self) {
        debug!("Command queue started");
        loop {
            self.start_next().await;

            let deadline = self.in_flight.as_ref().map(|f| f.deadline);
            let resume_at = self
                .resume_at
                .filter(|_| self.in_flight.is_none() && !self.pending.is_empty());
            let far = Instant::now() + Duration::from_secs(86_400);

            tokio::select! {
                biased;

                chunk = self.chunks.recv() => match chunk {
                    Some(chunk) => self.on_data(&chunk),
                    None => {
                        info!("Link closed, failing {} pending command(s)", self.pending.len());
                        self.fail_all(|| LinkError::Disconnected);
                        break;
                    }
                },
                _ = sleep_until(deadline.unwrap_or(far)), if deadline.is_some() => {
                    self.on_timeout();
                }
                request = self.requests.recv() => match request {
                    Some(Request::Send { command, reply }) => self.pending.push_back(Pending {
                        command,
                        created_at: Instant::now(),
                        reply,
                    }),
                    Some(Request::Clear) => self.clear(),
                    None => break,
                },
                _ = sleep_until(resume_at.unwrap_or(far)), if resume_at.is_some() => {
                    self.resume_at = None;
                }
            }
        }
        debug!("Command queue stopped");
    }

    /// Write the head of the queue if nothing is in flight
    async fn start_next(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        if self.resume_at.is_some_and(|t| t > Instant::now()) {
            return;
        }
        self.resume_at = None;
        let Some(request) = self.pending.pop_front() else {
            return;
        };

        self.buffer.clear();
        let text = with_cr(&request.command);
        trace!(
            "Starting {} after {:?} in queue",
            request.command,
            request.created_at.elapsed()
        );
        self.log.push(LogKind::Tx, request.command.clone());
        let deadline = Instant::now() + self.config.command_timeout;
        self.in_flight = Some(InFlight { request, deadline });

        // A stalled write counts against the command deadline
        match timeout_at(deadline, self.transport.write(&text)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Write failed: {}", e);
                self.finish(Err(e));
            }
            Err(_) => self.on_timeout(),
        }
    }

    fn on_data(&mut self, chunk: &str) {
        let Some(in_flight) = &self.in_flight else {
            trace!("Dropping unsolicited data: {:?}", chunk);
            return;
        };
        self.buffer.push_str(chunk);

        if let Some(end) = self.buffer.find(PROMPT) {
            let response = clean_response(&in_flight.request.command, &self.buffer[..end]);
            self.finish(Ok(response));
        }
    }

    fn on_timeout(&mut self) {
        let Some(in_flight) = &self.in_flight else {
            return;
        };
        let command = in_flight.request.command.clone();
        warn!("Timeout: {}", command);
        self.finish(Err(LinkError::Timeout {
            command,
            timeout_ms: self.config.command_timeout.as_millis() as u64,
        }));
    }

    /// Complete the in-flight request and arm the inter-command delay
    fn finish(&mut self, result: Result<String, LinkError>) {
        let Some(InFlight { request, .. }) = self.in_flight.take() else {
            return;
        };
        self.buffer.clear();

        match &result {
            Ok(response) => {
                debug!("{} -> {:?}", request.command, response);
                self.log.push(LogKind::Rx, response.clone());
                self.apply(&request.command, response);
            }
            Err(e) => self.log.push(LogKind::Err, e.to_string()),
        }
        let _ = request.reply.send(result);
        self.resume_at = Some(Instant::now() + self.config.inter_command_delay);
    }

    /// Run the decoder and publish the update, before the caller wakes
    fn apply(&self, command: &str, response: &str) {
        match decode(command, response) {
            Ok(Some(update)) => {
                let now = now_ms();
                self.sensors.send_modify(|snapshot| snapshot.apply(update, now));
            }
            Ok(None) => trace!("No sensor update from {}", command),
            Err(e) => debug!("Ignoring undecodable response: {}", e),
        }
    }

    fn clear(&mut self) {
        let dropped = self.pending.len() + usize::from(self.in_flight.is_some());
        if dropped > 0 {
            info!("Clearing {} queued command(s)", dropped);
        }
        self.fail_all(|| LinkError::Cleared);
        self.buffer.clear();
        self.resume_at = None;
    }

    fn fail_all(&mut self, error: impl Fn() -> LinkError) {
        if let Some(InFlight { request, .. }) = self.in_flight.take() {
            let _ = request.reply.send(Err(error()));
        }
        for request in self.pending.drain(..) {
            let _ = request.reply.send(Err(error()));
        }
    }
}

// Aborting the task drops the worker: everything still waiting is cleared,
// including requests not yet received
impl Drop for QueueWorker {
    fn drop(&mut self) {
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            if let Request::Send { reply, .. } = request {
                let _ = reply.send(Err(LinkError::Cleared));
            }
        }
        self.fail_all(|| LinkError::Cleared);
    }
}

/// Turn the text before the prompt into a response: trim, then strip an
/// echo of `command` if the adapter still has echo on
pub fn clean_response(command: &str, body: &str) -> String {
    let text = body.trim();
    let command = command.trim_end_matches('\r');
    match text.strip_prefix(command) {
        Some(rest) if !command.is_empty() => rest.trim().to_string(),
        _ => text.to_string(),
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
