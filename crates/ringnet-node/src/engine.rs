//! The ring protocol engine — a single-owner actor.
//!
//! One task owns all engine state; everything else (the transport receive
//! loop, the token-hold timer, the watchdog ticker, the operator console)
//! talks to it by posting [`Event`]s onto its input channel. That makes
//! every transition atomic without a lock, and the engine never blocks on
//! the network: outbound datagrams leave through an outbox channel drained
//! by the transport send task.
//!
//! The token-hold timer is a spawned sleep that posts [`Event::HoldExpired`]
//! tagged with an epoch. Re-arming bumps the epoch, so a stale timer firing
//! is simply ignored — there is nothing to cancel.

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use ringnet_core::config::RingConfig;
use ringnet_core::frame::{self, Control, DataFrame, Frame};
use ringnet_core::queue::{QueueError, QueuedMessage, SendQueue};

use crate::status::{Counters, EngineState, StatusSnapshot};
use crate::watchdog;

/// Chance of corrupting an outgoing unicast checksum. Exercises the
/// NAK/retransmit path in live rings.
pub const DEFAULT_ERROR_PROBABILITY: f64 = 0.1;

/// Retransmissions allowed for one queued message before it is dropped.
/// The protocol itself imposes no ceiling; without one a dead destination
/// would keep the head circulating forever.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

const EVENT_CHANNEL_DEPTH: usize = 64;
const OUTBOX_DEPTH: usize = 64;

// ── Inputs ────────────────────────────────────────────────────────────────────

/// Everything that can happen to the engine.
pub enum Event {
    /// A raw datagram from the transport receive loop.
    Datagram(Vec<u8>),
    /// The token-hold timer fired. Stale epochs are ignored.
    HoldExpired { epoch: u64 },
    /// Periodic watchdog tick (generator nodes only).
    WatchdogTick,
    /// An operator request.
    Command(Command),
}

/// Operator requests, each answered on a oneshot channel.
pub enum Command {
    Enqueue {
        destination: String,
        payload: String,
        reply: oneshot::Sender<Result<(), QueueError>>,
    },
    Status {
        reply: oneshot::Sender<StatusSnapshot>,
    },
    Queue {
        reply: oneshot::Sender<Vec<QueuedMessage>>,
    },
    GenerateToken {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Stop,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("node already holds the token")]
    AlreadyHolding,
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("engine stopped")]
    Stopped,
}

// ── Identity and tuning ───────────────────────────────────────────────────────

/// The immutable facts about this node, fixed at configuration time.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub name: String,
    pub hold: Duration,
    pub generator: bool,
}

impl NodeIdentity {
    pub fn from_config(config: &RingConfig) -> Self {
        NodeIdentity {
            name: config.name.clone(),
            hold: config.hold_duration(),
            generator: config.generates_token,
        }
    }
}

/// Policy knobs. Defaults match the deployed behaviour.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub error_probability: f64,
    pub max_retries: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            error_probability: DEFAULT_ERROR_PROBABILITY,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

// ── State ─────────────────────────────────────────────────────────────────────

/// Engine state as an explicit variant so the illegal combinations
/// (awaiting without a frame, a hold timer without the token) cannot exist.
#[derive(Debug)]
enum State {
    /// No token, nothing in flight.
    Idle,
    /// Token held; the hold timer for `epoch` is running.
    Holding { epoch: u64 },
    /// A frame has been released into the ring; the token is retained
    /// until the frame circulates back.
    Awaiting { frame: DataFrame },
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Cheap, cloneable client side of the engine actor.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    events: mpsc::Sender<Event>,
}

impl EngineHandle {
    /// Sender for raw events. Used to wire up the transport receive loop
    /// and the watchdog ticker.
    pub fn events(&self) -> mpsc::Sender<Event> {
        self.events.clone()
    }

    pub async fn enqueue(&self, destination: &str, payload: &str) -> Result<(), EngineError> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(Event::Command(Command::Enqueue {
                destination: destination.to_string(),
                payload: payload.to_string(),
                reply,
            }))
            .await
            .map_err(|_| EngineError::Stopped)?;
        response.await.map_err(|_| EngineError::Stopped)??;
        Ok(())
    }

    pub async fn status(&self) -> Result<StatusSnapshot, EngineError> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(Event::Command(Command::Status { reply }))
            .await
            .map_err(|_| EngineError::Stopped)?;
        response.await.map_err(|_| EngineError::Stopped)
    }

    pub async fn queue(&self) -> Result<Vec<QueuedMessage>, EngineError> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(Event::Command(Command::Queue { reply }))
            .await
            .map_err(|_| EngineError::Stopped)?;
        response.await.map_err(|_| EngineError::Stopped)
    }

    /// One-shot token generation. Fails if the node already holds the token.
    pub async fn generate_token(&self) -> Result<(), EngineError> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(Event::Command(Command::GenerateToken { reply }))
            .await
            .map_err(|_| EngineError::Stopped)?;
        response.await.map_err(|_| EngineError::Stopped)?
    }

    pub async fn stop(&self) {
        let _ = self.events.send(Event::Command(Command::Stop)).await;
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// The ring state machine. Constructed with [`Engine::new`], consumed by
/// [`Engine::run`] on its owning task.
pub struct Engine {
    identity: NodeIdentity,
    settings: EngineSettings,
    state: State,
    queue: SendQueue,
    counters: Counters,
    last_activity: Instant,
    last_token_seen: Instant,
    circulation_bound: Duration,
    hold_epoch: u64,
    events_rx: mpsc::Receiver<Event>,
    events_tx: mpsc::Sender<Event>,
    outbox: mpsc::Sender<Vec<u8>>,
}

impl Engine {
    /// Build an engine plus its handle and the outbound datagram stream the
    /// transport send task must drain.
    pub fn new(
        identity: NodeIdentity,
        settings: EngineSettings,
    ) -> (Engine, EngineHandle, mpsc::Receiver<Vec<u8>>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
        let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_DEPTH);
        let circulation_bound = watchdog::circulation_bound(identity.hold);
        let now = Instant::now();

        let engine = Engine {
            identity,
            settings,
            state: State::Idle,
            queue: SendQueue::new(),
            counters: Counters::default(),
            last_activity: now,
            last_token_seen: now,
            circulation_bound,
            hold_epoch: 0,
            events_rx,
            events_tx: events_tx.clone(),
            outbox: outbox_tx,
        };
        let handle = EngineHandle { events: events_tx };
        (engine, handle, outbox_rx)
    }

    /// Run until [`Command::Stop`].
    pub async fn run(mut self) {
        info!(
            name = %self.identity.name,
            generator = self.identity.generator,
            hold_secs = self.identity.hold.as_secs(),
            "ring engine started"
        );

        if self.identity.generator {
            // The ring has no token yet. Synthesise one by conceptually
            // receiving it from the wire; the hold timer then paces the
            // first forward exactly like any other possession.
            info!("synthesising startup token");
            self.counters.tokens_generated += 1;
            self.accept_token();
        }

        while let Some(event) = self.events_rx.recv().await {
            match event {
                Event::Datagram(bytes) => self.on_datagram(bytes).await,
                Event::HoldExpired { epoch } => self.on_hold_expired(epoch).await,
                Event::WatchdogTick => self.on_watchdog_tick().await,
                Event::Command(command) => {
                    if !self.on_command(command).await {
                        break;
                    }
                }
            }
        }
        info!(name = %self.identity.name, "ring engine stopped");
    }

    // ── Inbound datagrams ─────────────────────────────────────────────────────

    async fn on_datagram(&mut self, bytes: Vec<u8>) {
        self.last_activity = Instant::now();
        match frame::decode(&bytes) {
            Ok(Frame::Token) => self.on_token().await,
            Ok(Frame::Data(data)) => self.on_data(data).await,
            Err(error) => warn!(%error, len = bytes.len(), "dropping undecodable datagram"),
        }
    }

    async fn on_token(&mut self) {
        match self.state {
            State::Idle => {
                debug!("token received");
                self.accept_token();
            }
            State::Holding { .. } => {
                // Duplicate-token suspicion: accept it as a normal arrival.
                // The resulting asymmetry resolves on the next cycle.
                warn!("token received while already holding one, re-arming");
                self.accept_token();
            }
            State::Awaiting { .. } => {
                warn!("token received while a frame is in flight, absorbing");
            }
        }
    }

    async fn on_data(&mut self, data: DataFrame) {
        trace!(
            origin = %data.origin,
            destination = %data.destination,
            control = %data.control,
            "data frame received"
        );

        if data.origin == self.identity.name {
            // Our own frame came back around. Classified before destination
            // matching so a self-addressed unicast terminates normally.
            self.on_returned(data).await;
        } else if data.is_broadcast() {
            // Relay hop of someone else's broadcast: deliver locally, then
            // forward untouched. Termination is the origin's job.
            info!(origin = %data.origin, payload = %data.payload, "broadcast received");
            self.counters.frames_received += 1;
            self.forward(data).await;
        } else if data.destination == self.identity.name {
            self.deliver(data).await;
        } else {
            self.forward(data).await;
        }
    }

    /// A unicast addressed to this node: verify, rewrite control, send on.
    async fn deliver(&mut self, mut data: DataFrame) {
        if data.verify() {
            info!(origin = %data.origin, payload = %data.payload, "message received");
            data.set_control(Control::Ack);
            self.counters.frames_received += 1;
        } else {
            warn!(origin = %data.origin, "checksum mismatch, rejecting");
            data.set_control(Control::Nak);
            self.counters.integrity_errors += 1;
        }
        self.emit(data.encode().into_bytes()).await;
    }

    /// A frame we originated has circulated back to us.
    async fn on_returned(&mut self, data: DataFrame) {
        let in_flight = match std::mem::replace(&mut self.state, State::Idle) {
            State::Awaiting { frame } => frame,
            other => {
                self.state = other;
                warn!(
                    destination = %data.destination,
                    "unexpected returned frame, discarding"
                );
                return;
            }
        };

        if data.is_broadcast() {
            info!("broadcast completed the cycle");
            self.queue.drop_head();
            self.pass_token().await;
            return;
        }

        if data.destination != in_flight.destination || data.payload != in_flight.payload {
            warn!(
                destination = %data.destination,
                "returned frame does not match the frame in flight, discarding"
            );
            self.state = State::Awaiting { frame: in_flight };
            return;
        }

        match data.control {
            Control::Ack => {
                info!(destination = %data.destination, "delivery acknowledged");
                self.queue.drop_head();
            }
            Control::Nak => {
                let retries = self.queue.bump_retry();
                if retries > self.settings.max_retries {
                    warn!(
                        destination = %data.destination,
                        retries,
                        "retry limit reached, dropping message"
                    );
                    self.queue.drop_head();
                } else {
                    info!(
                        destination = %data.destination,
                        retries,
                        "delivery rejected, will retransmit"
                    );
                }
            }
            Control::NotDelivered => {
                warn!(
                    destination = %data.destination,
                    "destination does not exist or is offline, dropping message"
                );
                self.queue.drop_head();
            }
            Control::Other(ref value) => {
                // Head stays put: the destination rewrites control properly
                // on the next circulation.
                warn!(control = %value, "returned frame carries an unknown control value");
            }
        }

        self.pass_token().await;
    }

    async fn forward(&mut self, data: DataFrame) {
        debug!(
            origin = %data.origin,
            destination = %data.destination,
            "forwarding frame"
        );
        self.emit(data.encode().into_bytes()).await;
    }

    // ── Token possession ──────────────────────────────────────────────────────

    fn accept_token(&mut self) {
        self.counters.tokens_received += 1;
        self.last_token_seen = Instant::now();
        self.hold_epoch += 1;
        self.state = State::Holding {
            epoch: self.hold_epoch,
        };

        let events = self.events_tx.clone();
        let epoch = self.hold_epoch;
        let hold = self.identity.hold;
        tokio::spawn(async move {
            tokio::time::sleep(hold).await;
            let _ = events.send(Event::HoldExpired { epoch }).await;
        });
    }

    async fn on_hold_expired(&mut self, epoch: u64) {
        match self.state {
            State::Holding { epoch: current } if current == epoch => {}
            // A stale timer from an earlier possession, or the token moved on.
            _ => return,
        }

        let Some(head) = self.queue.peek_head().cloned() else {
            debug!("queue empty, passing token");
            self.pass_token().await;
            return;
        };

        let mut data = DataFrame::new(&self.identity.name, &head.destination, &head.payload);
        if data.is_broadcast() {
            info!(payload = %head.payload, "transmitting broadcast");
        } else {
            // Unicast only: a corrupted broadcast would cost every recipient
            // a redelivery, so broadcasts are exempt from injection.
            if data.corrupt_checksum(self.settings.error_probability) {
                info!(destination = %head.destination, "corrupted outgoing checksum");
            }
            info!(
                destination = %head.destination,
                payload = %head.payload,
                retries = head.retries,
                "transmitting frame"
            );
        }

        self.counters.frames_sent += 1;
        self.emit(data.encode().into_bytes()).await;
        self.state = State::Awaiting { frame: data };
    }

    async fn pass_token(&mut self) {
        self.state = State::Idle;
        self.last_token_seen = Instant::now();
        self.emit(frame::token_wire().to_vec()).await;
        debug!("token passed downstream");
    }

    // ── Watchdog ──────────────────────────────────────────────────────────────

    async fn on_watchdog_tick(&mut self) {
        if !matches!(self.state, State::Idle) {
            // Holding the token (or retaining it across a frame's return
            // trip) counts as seeing it.
            self.last_token_seen = Instant::now();
            return;
        }

        let silence = self.last_token_seen.elapsed();
        if silence > self.circulation_bound {
            warn!(
                silence_secs = silence.as_secs(),
                "token lost, generating a replacement"
            );
            self.counters.tokens_generated += 1;
            self.last_token_seen = Instant::now();
            self.emit(frame::token_wire().to_vec()).await;
        }
    }

    // ── Operator commands ─────────────────────────────────────────────────────

    /// Returns false when the engine should stop.
    async fn on_command(&mut self, command: Command) -> bool {
        match command {
            Command::Enqueue {
                destination,
                payload,
                reply,
            } => {
                let result = self.queue.enqueue(&self.identity.name, &destination, &payload);
                match &result {
                    Ok(()) => info!(%destination, "message queued"),
                    Err(error) => warn!(%destination, %error, "enqueue rejected"),
                }
                let _ = reply.send(result);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Queue { reply } => {
                let _ = reply.send(self.queue.snapshot());
            }
            Command::GenerateToken { reply } => {
                let result = if matches!(self.state, State::Idle) {
                    info!("generating token on operator request");
                    self.counters.tokens_generated += 1;
                    self.emit(frame::token_wire().to_vec()).await;
                    Ok(())
                } else {
                    Err(EngineError::AlreadyHolding)
                };
                let _ = reply.send(result);
            }
            Command::Stop => {
                info!("engine stopping");
                return false;
            }
        }
        true
    }

    fn snapshot(&self) -> StatusSnapshot {
        let state = match self.state {
            State::Idle => EngineState::Idle,
            State::Holding { .. } => EngineState::Holding,
            State::Awaiting { .. } => EngineState::Awaiting,
        };
        StatusSnapshot {
            name: self.identity.name.clone(),
            state,
            has_token: !matches!(self.state, State::Idle),
            queue_len: self.queue.len(),
            last_activity: self.last_activity,
            counters: self.counters,
        }
    }

    // ── Output ────────────────────────────────────────────────────────────────

    async fn emit(&self, bytes: Vec<u8>) {
        if self.outbox.send(bytes).await.is_err() {
            debug!("outbox closed, dropping outbound datagram");
        }
    }
}
