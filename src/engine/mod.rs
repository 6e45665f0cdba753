//! Request engine
//!
//! One task owns the transport, the request queue, the retry timers and the
//! device state. Callers reach it through [`EngineHandle`], a cheap clone over
//! a command channel, so every queue mutation happens on that single task and
//! the matching algorithm never sees concurrent mutation.

pub mod batch;
pub mod dataflash;
pub mod observer;
pub(crate) mod queue;
pub mod timers;
pub mod uploads;

pub use self::batch::{BatchResult, BatchStep};
pub use self::observer::EngineObserver;

use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::core::{ApiVersion, EngineConfig, Error, Result, WireMode};
use crate::messages::batch::encode_batch_request;
use crate::messages::{DeviceState, EncodeContext, Registry};
use crate::protocol::message::{self as codes, describe};
use crate::protocol::{Frame, MspCodec, RequestId, RequestInfo};
use self::batch::BatchProgress;
use self::observer::ObserverSlot;
use self::queue::{QueuedRequest, RequestQueue, Responder};
use self::timers::RetryTimers;

enum Command {
    Submit {
        code: u16,
        payload: Bytes,
        reply: oneshot::Sender<Result<Frame>>,
    },
    SubmitBatch {
        sub_codes: Vec<u16>,
        reply: oneshot::Sender<Result<Vec<BatchResult>>>,
    },
    State {
        reply: oneshot::Sender<DeviceState>,
    },
    Pending {
        reply: oneshot::Sender<Vec<RequestInfo>>,
    },
    Reset {
        reply: oneshot::Sender<usize>,
    },
    Attach {
        observer: Arc<dyn EngineObserver>,
        reply: oneshot::Sender<Result<()>>,
    },
    Detach {
        reply: oneshot::Sender<bool>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// The engine task. Create it with [`Engine::new`] and drive it with
/// [`Engine::run`], or use [`Engine::spawn`].
pub struct Engine<T> {
    framed: Framed<T, MspCodec>,
    config: Arc<EngineConfig>,
    registry: Arc<Registry>,
    queue: RequestQueue,
    timers: RetryTimers,
    state: DeviceState,
    commands: mpsc::Receiver<Command>,
    observer: ObserverSlot,
    version_tx: watch::Sender<ApiVersion>,
}

impl<T> Engine<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Creates an engine over `transport` with the standard message registry
    pub fn new(transport: T, config: EngineConfig) -> Result<(Self, EngineHandle)> {
        Self::with_registry(transport, config, Registry::shared())
    }

    /// Creates an engine with a caller-supplied registry
    pub fn with_registry(transport: T, config: EngineConfig, registry: Arc<Registry>) -> Result<(Self, EngineHandle)> {
        config.validate()?;
        let codec = MspCodec::with_max_payload(config.max_payload_size)
            .force_v2(config.wire_mode == WireMode::V2Only);
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer);
        let (version_tx, version_rx) = watch::channel(ApiVersion::UNKNOWN);
        let config = Arc::new(config);

        let engine = Engine {
            framed: Framed::new(transport, codec),
            queue: RequestQueue::new(config.max_queue_size),
            timers: RetryTimers::new(config.request_timeout),
            state: DeviceState::new(ApiVersion::UNKNOWN),
            commands: command_rx,
            observer: ObserverSlot::default(),
            version_tx,
            registry: registry.clone(),
            config: config.clone(),
        };
        let handle = EngineHandle {
            commands: command_tx,
            registry,
            version: version_rx,
            config,
        };
        Ok((engine, handle))
    }

    /// Creates an engine and runs it on a new task
    pub fn spawn(transport: T, config: EngineConfig) -> Result<(EngineHandle, JoinHandle<Result<()>>)> {
        let (engine, handle) = Self::new(transport, config)?;
        Ok((handle, tokio::spawn(engine.run())))
    }

    /// Runs until shutdown, until every handle is dropped or until the
    /// transport closes. Outstanding requests fail with `ConnectionReset`.
    pub async fn run(mut self) -> Result<()> {
        info!(
            capacity = self.queue.capacity(),
            timeout_ms = self.config.request_timeout.as_millis() as u64,
            max_attempts = self.config.max_attempts,
            "Engine started"
        );

        let outcome = loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            break Ok(());
                        }
                    }
                    None => {
                        debug!("Every handle dropped, stopping engine");
                        break Ok(());
                    }
                },
                frame = self.framed.next() => match frame {
                    Some(Ok(frame)) => self.handle_frame(frame).await,
                    Some(Err(e)) => {
                        error!(error = %e, "Transport read failed");
                        break Err(e);
                    }
                    None => {
                        info!("Transport closed");
                        break Ok(());
                    }
                },
                Some(id) = self.timers.expired(), if !self.timers.is_empty() => {
                    self.handle_expiry(id).await;
                }
            }
        };

        self.teardown();
        outcome
    }

    /// Returns false when the engine should stop
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Submit { code, payload, reply } => {
                self.submit(Frame::request(code, payload), Responder::Frame(reply)).await;
            }
            Command::SubmitBatch { sub_codes, reply } => match encode_batch_request(&sub_codes) {
                Ok(payload) => {
                    let responder = Responder::Batch(BatchProgress::new(sub_codes, reply));
                    self.submit(Frame::request(codes::MULTIPLE_MSP, payload), responder).await;
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::State { reply } => {
                let _ = reply.send(self.state.clone());
            }
            Command::Pending { reply } => {
                let _ = reply.send(self.queue.snapshot(Instant::now()));
            }
            Command::Reset { reply } => {
                let failed = self.teardown();
                self.framed.codec_mut().reset();
                self.framed.read_buffer_mut().clear();
                info!(failed, "Connection reset");
                let _ = reply.send(failed);
            }
            Command::Attach { observer, reply } => {
                let _ = reply.send(self.observer.attach(observer));
            }
            Command::Detach { reply } => {
                let _ = reply.send(self.observer.detach());
            }
            Command::Shutdown { reply } => {
                self.teardown();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    async fn submit(&mut self, frame: Frame, responder: Responder) {
        let code = frame.code;
        if let Err(e) = self.queue.admit(&frame) {
            debug!(code, error = %e, "Submission rejected");
            self.observer.notify(|o| o.on_rejected(code, &e));
            responder.fail(e);
            return;
        }
        let id = self.queue.push(frame, responder, Instant::now());
        let queue_len = self.queue.len();
        self.observer.notify(|o| o.on_submit(id, code, queue_len));
        self.observer.notify(|o| o.on_queue_len(queue_len));
        self.transmit(id).await;
    }

    async fn transmit(&mut self, id: RequestId) {
        let request = match self.queue.get_mut(id) {
            Some(request) => request,
            None => return,
        };
        let attempt = match request.state.transmit(Instant::now()) {
            Ok(attempt) => attempt,
            Err(e) => {
                error!(%id, error = %e, "Refusing to transmit");
                return;
            }
        };
        request.timer = Some(self.timers.arm(id, request.timer.take()));
        let code = request.code;
        let frame = request.frame.clone();

        if attempt > 1 {
            warn!(code, attempt, "Retransmitting {}", describe(code));
        }
        self.observer.notify(|o| o.on_transmit(id, code, attempt));

        if let Err(e) = self.framed.send(frame).await {
            error!(code, error = %e, "Failed to write request");
            if let Some(request) = self.take(id) {
                self.fail(request, Error::transport(format!("write failed: {}", e)));
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame) {
        let code = frame.code;
        let id = match self.queue.oldest_for(code) {
            Some(id) => id,
            None => {
                debug!(code, crc_error = frame.crc_error, "Dropping unsolicited {}", describe(code));
                self.observer.notify(|o| o.on_unmatched(code));
                return;
            }
        };
        let request = match self.take(id) {
            Some(request) => request,
            None => return,
        };

        if frame.crc_error {
            warn!(code, "Checksum failed for {}", describe(code));
            self.fail(request, Error::ChecksumMismatch { code });
            return;
        }
        if frame.unsupported {
            warn!(code, "Controller does not support {}", describe(code));
            self.fail(request, Error::UnsupportedMessage { code });
            return;
        }
        if request.is_batch() {
            self.continue_batch(request, frame).await;
            return;
        }

        match self.decode(code, &frame.payload) {
            Ok(()) => self.complete(request, frame),
            Err(e) => {
                warn!(code, error = %e, "Failed to decode {}", describe(code));
                self.fail(request, e);
            }
        }
    }

    async fn continue_batch(&mut self, mut request: QueuedRequest, frame: Frame) {
        let step = match &mut request.responder {
            Responder::Batch(progress) => {
                let registry = &self.registry;
                let state = &mut self.state;
                progress.absorb(&frame.payload, |code, payload| apply(registry, code, state, payload))
            }
            Responder::Frame(_) => BatchStep::Done,
        };
        self.publish_version();

        match step {
            BatchStep::Done => self.complete(request, frame),
            BatchStep::Resubmit(payload) => {
                let id = request.id;
                debug!(%id, remaining = payload.len(), "Resubmitting unanswered batch codes");
                self.queue.requeue(request, Frame::request(codes::MULTIPLE_MSP, payload));
                self.observer.notify(|o| o.on_queue_len(self.queue.len()));
                self.transmit(id).await;
            }
            BatchStep::Stalled { remaining } => {
                warn!(remaining, "Batch reply answered none of the outstanding codes");
                self.fail(request, Error::BatchStalled { remaining });
            }
        }
    }

    async fn handle_expiry(&mut self, id: RequestId) {
        let (code, attempts) = match self.queue.get_mut(id) {
            Some(request) => {
                request.timer = None;
                (request.code, request.state.attempts())
            }
            None => return,
        };

        if attempts < self.config.max_attempts {
            debug!(code, attempts, "No response to {}", describe(code));
            self.transmit(id).await;
        } else if let Some(request) = self.take(id) {
            warn!(code, attempts, "Giving up on {}", describe(code));
            self.fail(request, Error::Timeout { code, attempts });
        }
    }

    /// Applies a payload to the device state
    fn decode(&mut self, code: u16, payload: &[u8]) -> Result<()> {
        apply(&self.registry, code, &mut self.state, payload)?;
        self.publish_version();
        Ok(())
    }

    fn publish_version(&self) {
        let version = self.state.api_version;
        if *self.version_tx.borrow() != version {
            self.version_tx.send_replace(version);
        }
    }

    /// Removes a request and cancels its timer
    fn take(&mut self, id: RequestId) -> Option<QueuedRequest> {
        let mut request = self.queue.remove(id)?;
        if let Some(key) = request.timer.take() {
            self.timers.cancel(key);
        }
        let queue_len = self.queue.len();
        self.observer.notify(|o| o.on_queue_len(queue_len));
        Some(request)
    }

    fn complete(&mut self, mut request: QueuedRequest, frame: Frame) {
        let latency = request
            .state
            .complete(request.submitted_at, Instant::now())
            .unwrap_or_default();
        let attempts = request.state.attempts();
        self.observer
            .notify(|o| o.on_complete(request.id, request.code, latency, attempts));
        match request.responder {
            Responder::Frame(reply) => {
                let _ = reply.send(Ok(frame));
            }
            Responder::Batch(progress) => progress.finish(),
        }
    }

    fn fail(&mut self, mut request: QueuedRequest, error: Error) {
        if let Err(e) = request.state.fail(error.kind()) {
            debug!(id = %request.id, error = %e, "Request already finished");
        }
        self.observer
            .notify(|o| o.on_failure(request.id, request.code, &error));
        request.responder.fail(error);
    }

    /// Fails every outstanding request and cancels every timer
    fn teardown(&mut self) -> usize {
        self.timers.clear();
        let outstanding = self.queue.drain();
        let count = outstanding.len();
        if count > 0 {
            warn!(count, "Failing outstanding requests");
            self.observer.notify(|o| o.on_queue_len(0));
        }
        for mut request in outstanding {
            request.timer = None;
            self.fail(request, Error::ConnectionReset);
        }
        count
    }
}

/// Applies a reply to the device state. Replies the registry cannot
/// interpret leave the state alone and still complete their request.
fn apply(registry: &Registry, code: u16, state: &mut DeviceState, payload: &[u8]) -> Result<()> {
    let version = state.api_version;
    match registry.decode(code, state, version, payload) {
        Ok(true) => Ok(()),
        Ok(false) | Err(Error::NotDecodable { .. }) => {
            debug!(code, "No decoder for {}", describe(code));
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Cloneable front end of a running engine
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    registry: Arc<Registry>,
    version: watch::Receiver<ApiVersion>,
    config: Arc<EngineConfig>,
}

impl EngineHandle {
    async fn call<R>(&self, command: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| Error::EngineStopped)?;
        rx.await.map_err(|_| Error::EngineStopped)
    }

    /// Sends a request and waits for the frame that answers it.
    ///
    /// The payload has already been decoded into the device state when this
    /// returns. Fails fast with `QueueFull` or `DuplicateRequest`.
    pub async fn submit(&self, code: u16, payload: impl Into<Bytes>) -> Result<Frame> {
        let payload = payload.into();
        self.call(|reply| Command::Submit { code, payload, reply }).await?
    }

    /// Requests `code` with no payload and returns the updated state
    pub async fn fetch(&self, code: u16) -> Result<DeviceState> {
        self.submit(code, Bytes::new()).await?;
        self.state().await
    }

    /// Encodes `code` from `state` at the negotiated version
    pub fn encode(&self, code: u16, state: &DeviceState, index: usize) -> Result<Bytes> {
        let ctx = EncodeContext::new(self.api_version()).with_index(index);
        self.registry.encode(code, state, &ctx)
    }

    /// Encodes `code` from `state` and submits it
    pub async fn send(&self, code: u16, state: &DeviceState) -> Result<Frame> {
        self.send_indexed(code, state, 0).await
    }

    /// Encodes element `index` of a list message and submits it
    pub async fn send_indexed(&self, code: u16, state: &DeviceState, index: usize) -> Result<Frame> {
        let payload = self.encode(code, state, index)?;
        self.submit(code, payload).await
    }

    /// Requests several codes in one `MULTIPLE_MSP` exchange.
    ///
    /// Results come back in the order of `sub_codes`. Codes the controller
    /// had no room to answer are resubmitted automatically.
    pub async fn submit_batch(&self, sub_codes: &[u16]) -> Result<Vec<BatchResult>> {
        let sub_codes = sub_codes.to_vec();
        self.call(|reply| Command::SubmitBatch { sub_codes, reply }).await?
    }

    /// Negotiates the API version. Must be the first exchange on a connection.
    pub async fn handshake(&self) -> Result<ApiVersion> {
        self.submit(codes::API_VERSION, Bytes::new()).await?;
        let version = self.api_version();
        if !version.is_known() {
            return Err(Error::protocol("controller reported API version 0.0"));
        }
        if version < ApiVersion::MIN_SUPPORTED {
            warn!(%version, minimum = %ApiVersion::MIN_SUPPORTED, "Controller API is older than supported");
        } else if version > ApiVersion::MAX_SUPPORTED {
            warn!(%version, maximum = %ApiVersion::MAX_SUPPORTED, "Controller API is newer than known layouts");
        }
        info!(%version, "Negotiated API version");
        Ok(version)
    }

    /// Version negotiated by the last handshake
    pub fn api_version(&self) -> ApiVersion {
        *self.version.borrow()
    }

    /// Snapshot of the device state
    pub async fn state(&self) -> Result<DeviceState> {
        self.call(|reply| Command::State { reply }).await
    }

    /// Outstanding requests, oldest first
    pub async fn pending(&self) -> Result<Vec<RequestInfo>> {
        self.call(|reply| Command::Pending { reply }).await
    }

    /// Fails every outstanding request with `ConnectionReset` and drops any
    /// partial frame. The engine keeps running. Returns the number failed.
    pub async fn reset(&self) -> Result<usize> {
        self.call(|reply| Command::Reset { reply }).await
    }

    pub async fn attach_observer(&self, observer: Arc<dyn EngineObserver>) -> Result<()> {
        self.call(|reply| Command::Attach { observer, reply }).await?
    }

    pub async fn detach_observer(&self) -> Result<bool> {
        self.call(|reply| Command::Detach { reply }).await
    }

    /// Stops the engine after failing every outstanding request
    pub async fn shutdown(&self) -> Result<()> {
        self.call(|reply| Command::Shutdown { reply }).await
    }

    /// Returns true once the engine task has stopped
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
