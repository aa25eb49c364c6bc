//! Request/response correlation over a fire-and-forget message protocol.
//!
//! OSC has no request ids. A reply is recognised by its address and, where
//! several requests share an address, by leading arguments the peer echoes
//! back (the track index for `/live/track/get/volume`). Waiters on the same
//! key are served strictly in the order they were issued.
//!
//! Architecture: reactor pattern
//! - Transport owned by a dedicated reactor task
//! - Callers talk to it through an mpsc command channel
//! - Responses come back on oneshot channels
//! - The pending table has a single writer, so a waiter is always registered
//!   before its request leaves and an instant reply cannot be lost
//!
//! Peer errors (`/live/error`) carry no address of their own and are handed
//! to the oldest armed entry. Mutations that expect no reply still take a
//! place in that queue as error slots, so an error they cause cannot land on
//! a later read. A slot clears as passed once a request issued after it is
//! answered, or when its window runs out.
//!
//! Usage:
//! ```ignore
//! let correlator = Correlator::connect(&config).await?;
//! let reply = correlator
//!     .request(Message::new("/live/song/get/tempo"), ResponseKey::new("/live/song/get/tempo"), timeout)
//!     .await?;
//! ```

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use liveconf::{LiveConfig, PeerErrorMode};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, trace, warn};

use crate::channel::{Channel, Transport};
use crate::codec::{Arg, Message};
use crate::error::{ChannelError, CorrelationError};
use crate::retry::RetryPolicy;

/// Address AbletonOSC reports command failures on.
pub const ERROR_ADDRESS: &str = "/live/error";

/// Buffered updates per subscribed address before slow readers lag.
const SUBSCRIPTION_BUFFER: usize = 256;

const COMMAND_BUFFER: usize = 256;

/// What a reply must look like to satisfy a request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseKey {
    pub address: String,
    /// Leading arguments the reply must start with
    pub token: Vec<Arg>,
}

impl ResponseKey {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: Vec::new(),
        }
    }

    pub fn with_token(address: impl Into<String>, token: Vec<Arg>) -> Self {
        Self {
            address: address.into(),
            token,
        }
    }

    pub fn matches(&self, msg: &Message) -> bool {
        msg.address == self.address && msg.starts_with(&self.token)
    }
}

/// Correlator lifecycle, as seen from outside the reactor.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No reactor, or it has shut down
    Disconnected = 0,
    /// Reactor running, peer has not sent anything yet
    Connecting = 1,
    /// At least one message has arrived from the peer
    Connected = 2,
}

impl ConnectionState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorrelatorOptions {
    /// Prefix for log lines
    pub name: String,
    pub peer_errors: PeerErrorMode,
}

impl Default for CorrelatorOptions {
    fn default() -> Self {
        Self {
            name: "livebridge".to_string(),
            peer_errors: PeerErrorMode::default(),
        }
    }
}

type ResponseTx = oneshot::Sender<Result<Message, CorrelationError>>;
type OutcomeTx = oneshot::Sender<Result<(), CorrelationError>>;

/// Command sent to the reactor task
enum ReactorCommand {
    /// Register a waiter for `key`, then send `outbound`
    Request {
        id: u64,
        outbound: Message,
        key: ResponseKey,
        timeout: Duration,
        response_tx: ResponseTx,
    },
    /// Send without waiting for anything
    Send {
        outbound: Message,
        done_tx: oneshot::Sender<Result<(), CorrelationError>>,
    },
    /// Arm an error slot for `outbound`, then send it
    Command {
        id: u64,
        outbound: Message,
        window: Duration,
        done_tx: oneshot::Sender<Result<(), CorrelationError>>,
        outcome_tx: OutcomeTx,
    },
    Subscribe {
        address: String,
        reply_tx: oneshot::Sender<broadcast::Receiver<Message>>,
    },
    /// Cancel everything and close the transport
    Shutdown { done_tx: oneshot::Sender<()> },
}

/// A waiter for one reply
struct PendingRequest {
    key: ResponseKey,
    response_tx: ResponseTx,
    deadline: Instant,
    timeout: Duration,
}

/// Holds a sent mutation's place in the peer error queue
struct ErrorSlot {
    address: String,
    outcome_tx: OutcomeTx,
    deadline: Instant,
}

/// Reactor-owned state. Only the reactor task touches it.
struct PendingTable {
    requests: HashMap<u64, PendingRequest>,
    /// Waiter ids per address, oldest first
    by_address: HashMap<String, VecDeque<u64>>,
    /// Waiters and slots that accept a peer error report, oldest first
    error_armed: VecDeque<u64>,
    /// Not counted by the gauge
    slots: HashMap<u64, ErrorSlot>,
    gauge: Arc<AtomicUsize>,
}

impl PendingTable {
    fn new(gauge: Arc<AtomicUsize>) -> Self {
        Self {
            requests: HashMap::new(),
            by_address: HashMap::new(),
            error_armed: VecDeque::new(),
            slots: HashMap::new(),
            gauge,
        }
    }

    fn insert_slot(&mut self, id: u64, slot: ErrorSlot) {
        self.error_armed.push_back(id);
        self.slots.insert(id, slot);
    }

    fn remove_slot(&mut self, id: u64) -> Option<ErrorSlot> {
        let slot = self.slots.remove(&id)?;
        self.error_armed.retain(|&armed| armed != id);
        Some(slot)
    }

    /// Slots armed before waiter `id`. Once `id` is answered the peer has
    /// handled them without error.
    fn slots_ahead_of(&self, id: u64) -> Vec<u64> {
        match self.error_armed.iter().position(|&armed| armed == id) {
            Some(pos) => self
                .error_armed
                .iter()
                .take(pos)
                .copied()
                .filter(|armed| self.slots.contains_key(armed))
                .collect(),
            None => Vec::new(),
        }
    }

    fn insert(&mut self, id: u64, req: PendingRequest, arm_error: bool) {
        self.by_address
            .entry(req.key.address.clone())
            .or_default()
            .push_back(id);
        if arm_error {
            self.error_armed.push_back(id);
        }
        self.requests.insert(id, req);
        self.gauge.store(self.requests.len(), Ordering::Release);
    }

    /// Unlink a waiter from every index. The gauge is updated before the
    /// caller resolves it.
    fn remove(&mut self, id: u64) -> Option<PendingRequest> {
        let req = self.requests.remove(&id)?;
        if let Some(queue) = self.by_address.get_mut(&req.key.address) {
            queue.retain(|&queued| queued != id);
            if queue.is_empty() {
                self.by_address.remove(&req.key.address);
            }
        }
        self.error_armed.retain(|&armed| armed != id);
        self.gauge.store(self.requests.len(), Ordering::Release);
        Some(req)
    }

    /// Oldest waiter whose key matches `msg`.
    fn first_match(&self, msg: &Message) -> Option<u64> {
        self.by_address.get(&msg.address)?.iter().copied().find(|id| {
            self.requests
                .get(id)
                .map(|req| req.key.matches(msg))
                .unwrap_or(false)
        })
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.requests
            .values()
            .map(|req| req.deadline)
            .chain(self.slots.values().map(|slot| slot.deadline))
            .min()
    }

    fn expired(&self, now: Instant) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .requests
            .iter()
            .filter(|(_, req)| req.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn expired_slots(&self, now: Instant) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn drain_slots(&mut self) -> Vec<ErrorSlot> {
        let mut ids: Vec<u64> = self.slots.keys().copied().collect();
        ids.sort_unstable();
        let drained = ids.into_iter().filter_map(|id| self.slots.remove(&id)).collect();
        self.error_armed.retain(|armed| self.requests.contains_key(armed));
        drained
    }

    fn drain(&mut self) -> Vec<PendingRequest> {
        let mut ids: Vec<u64> = self.requests.keys().copied().collect();
        ids.sort_unstable();
        let drained = ids.into_iter().filter_map(|id| self.requests.remove(&id)).collect();
        self.by_address.clear();
        self.error_armed.clear();
        self.gauge.store(0, Ordering::Release);
        drained
    }
}

/// The reactor task - owns the transport, the pending table and the
/// subscriber table.
///
/// Interleaves:
/// - commands from callers (requests, sends, subscriptions)
/// - cancellations from dropped request futures
/// - inbound messages from the transport
/// - expiry of the earliest deadline
async fn reactor_task<T: Transport>(
    mut transport: T,
    mut cmd_rx: mpsc::Receiver<ReactorCommand>,
    mut cancel_rx: mpsc::UnboundedReceiver<u64>,
    state: Arc<AtomicU8>,
    gauge: Arc<AtomicUsize>,
    options: CorrelatorOptions,
) {
    let name = options.name.as_str();
    let arm_errors = options.peer_errors == PeerErrorMode::Explicit;
    let mut pending = PendingTable::new(gauge);
    let mut subscribers: HashMap<String, broadcast::Sender<Message>> = HashMap::new();
    let mut inbound = transport.take_inbound();
    let mut shutdown_ack: Option<oneshot::Sender<()>> = None;

    debug!("{}: Reactor task started", name);

    loop {
        let next_deadline = pending.next_deadline();

        tokio::select! {
            // Commands before cancels, so a cancel never overtakes its request
            biased;

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ReactorCommand::Request { id, outbound, key, timeout, response_tx }) => {
                        pending.insert(id, PendingRequest {
                            key,
                            response_tx,
                            deadline: Instant::now() + timeout,
                            timeout,
                        }, arm_errors);
                        trace!("{}: Request {} registered, {} pending", name, id, pending.requests.len());

                        if let Err(e) = transport.send(&outbound).await {
                            warn!("{}: Send failed for {} ({}): {}", name, id, outbound.address, e);
                            if let Some(req) = pending.remove(id) {
                                let _ = req.response_tx.send(Err(CorrelationError::Send(e.to_string())));
                            }
                        }
                    }
                    Some(ReactorCommand::Send { outbound, done_tx }) => {
                        let result = transport
                            .send(&outbound)
                            .await
                            .map_err(|e| CorrelationError::Send(e.to_string()));
                        if let Err(e) = &result {
                            warn!("{}: Send failed ({}): {}", name, outbound.address, e);
                        }
                        let _ = done_tx.send(result);
                    }
                    Some(ReactorCommand::Command { id, outbound, window, done_tx, outcome_tx }) => {
                        if arm_errors {
                            pending.insert_slot(id, ErrorSlot {
                                address: outbound.address.clone(),
                                outcome_tx,
                                deadline: Instant::now() + window,
                            });
                        } else {
                            // Nothing to listen for
                            let _ = outcome_tx.send(Ok(()));
                        }

                        let result = transport
                            .send(&outbound)
                            .await
                            .map_err(|e| CorrelationError::Send(e.to_string()));
                        if let Err(e) = &result {
                            warn!("{}: Send failed for command {} ({}): {}", name, id, outbound.address, e);
                            pending.remove_slot(id);
                        }
                        let _ = done_tx.send(result);
                    }
                    Some(ReactorCommand::Subscribe { address, reply_tx }) => {
                        let rx = subscribers
                            .entry(address.clone())
                            .or_insert_with(|| broadcast::channel(SUBSCRIPTION_BUFFER).0)
                            .subscribe();
                        debug!("{}: Subscribed to {}", name, address);
                        let _ = reply_tx.send(rx);
                    }
                    Some(ReactorCommand::Shutdown { done_tx }) => {
                        shutdown_ack = Some(done_tx);
                        break;
                    }
                    None => {
                        info!("{}: Command channel closed, reactor exiting", name);
                        break;
                    }
                }
            }

            Some(id) = cancel_rx.recv() => {
                if pending.remove(id).is_some() {
                    trace!("{}: Request {} cancelled by caller, {} pending", name, id, pending.requests.len());
                }
            }

            msg = recv_inbound(&mut inbound) => {
                match msg {
                    Some(msg) => {
                        if state.load(Ordering::Acquire) == ConnectionState::Connecting as u8 {
                            state.store(ConnectionState::Connected as u8, Ordering::Release);
                            info!("{}: Peer is responding", name);
                        }
                        route_inbound(name, msg, arm_errors, &mut pending, &mut subscribers);
                    }
                    None => {
                        warn!("{}: Inbound stream ended", name);
                        inbound = None;
                    }
                }
            }

            _ = sleep_until(next_deadline), if next_deadline.is_some() => {
                let now = Instant::now();
                for id in pending.expired_slots(now) {
                    if let Some(slot) = pending.remove_slot(id) {
                        trace!("{}: No error for command {} on {}", name, id, slot.address);
                        let _ = slot.outcome_tx.send(Ok(()));
                    }
                }
                let expired = pending.expired(now);
                for id in &expired {
                    if let Some(req) = pending.remove(*id) {
                        debug!("{}: Request {} on {} timed out", name, id, req.key.address);
                        let _ = req.response_tx.send(Err(CorrelationError::Timeout {
                            address: req.key.address,
                            timeout_ms: req.timeout.as_millis() as u64,
                        }));
                    }
                }
            }
        }
    }

    // Teardown: every waiter is released in this one step
    for slot in pending.drain_slots() {
        let _ = slot.outcome_tx.send(Err(CorrelationError::Cancelled { address: slot.address }));
    }
    let drained = pending.drain();
    info!("{}: Reactor shutting down, cancelling {} pending requests", name, drained.len());
    for req in drained {
        let _ = req.response_tx.send(Err(CorrelationError::Cancelled {
            address: req.key.address,
        }));
    }
    subscribers.clear();
    state.store(ConnectionState::Disconnected as u8, Ordering::Release);
    // Release the receiver first so a receive task blocked on it can finish
    drop(inbound);
    transport.close().await;
    if let Some(ack) = shutdown_ack {
        let _ = ack.send(());
    }

    debug!("{}: Reactor task exiting", name);
}

async fn recv_inbound(inbound: &mut Option<mpsc::Receiver<Message>>) -> Option<Message> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Deliver one inbound message: subscribers first, then the oldest waiter.
fn route_inbound(
    name: &str,
    msg: Message,
    arm_errors: bool,
    pending: &mut PendingTable,
    subscribers: &mut HashMap<String, broadcast::Sender<Message>>,
) {
    if let Some(tx) = subscribers.get(&msg.address) {
        if tx.send(msg.clone()).is_err() {
            debug!("{}: No subscribers left on {}", name, msg.address);
            subscribers.remove(&msg.address);
        }
    }

    if arm_errors && msg.address == ERROR_ADDRESS {
        let detail = error_detail(&msg);
        match pending.error_armed.front().copied() {
            Some(id) if pending.slots.contains_key(&id) => {
                if let Some(slot) = pending.remove_slot(id) {
                    debug!("{}: Peer error for command {} on {}: {}", name, id, slot.address, detail);
                    let _ = slot.outcome_tx.send(Err(CorrelationError::Peer(detail)));
                }
            }
            Some(id) => {
                if let Some(req) = pending.remove(id) {
                    debug!("{}: Peer error for request {} on {}: {}", name, id, req.key.address, detail);
                    let _ = req.response_tx.send(Err(CorrelationError::Peer(detail)));
                }
            }
            None => warn!("{}: Peer error with nothing waiting: {}", name, detail),
        }
        return;
    }

    match pending.first_match(&msg) {
        Some(id) => {
            for slot_id in pending.slots_ahead_of(id) {
                if let Some(slot) = pending.remove_slot(slot_id) {
                    trace!("{}: Command {} on {} passed", name, slot_id, slot.address);
                    let _ = slot.outcome_tx.send(Ok(()));
                }
            }
            if let Some(req) = pending.remove(id) {
                trace!("{}: Resolved request {} with {}", name, id, msg.address);
                let _ = req.response_tx.send(Ok(msg));
            }
        }
        None => {
            trace!("{}: Unsolicited {}", name, msg);
        }
    }
}

fn error_detail(msg: &Message) -> String {
    let parts: Vec<String> = msg
        .args
        .iter()
        .map(|arg| match arg {
            Arg::Str(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    if parts.is_empty() {
        "unspecified error".to_string()
    } else {
        parts.join(" ")
    }
}

/// Sends a cancel for its request unless disarmed.
struct CancelGuard {
    id: u64,
    cancel_tx: mpsc::UnboundedSender<u64>,
    armed: bool,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.cancel_tx.send(self.id);
        }
    }
}

/// Push-style updates for one address.
///
/// Ends when the correlator shuts down. A reader that falls behind skips
/// the messages it missed.
pub struct Subscription {
    address: String,
    inner: BroadcastStream<Message>,
}

impl Subscription {
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        loop {
            match futures::ready!(Pin::new(&mut self.inner).poll_next(cx)) {
                Some(Ok(msg)) => return Poll::Ready(Some(msg)),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!("subscription on {} lagged, skipped {} messages", self.address, skipped);
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

/// Result of a [`Correlator::command`], available once the peer has had its
/// chance to object.
pub struct CommandOutcome {
    rx: oneshot::Receiver<Result<(), CorrelationError>>,
}

impl CommandOutcome {
    /// `Ok` when no peer error was reported for the command, otherwise the
    /// error. Dropping the outcome leaves the slot armed until it clears.
    pub async fn confirmed(self) -> Result<(), CorrelationError> {
        self.rx.await.unwrap_or(Err(CorrelationError::Disconnected))
    }
}

/// Handle to a correlation reactor. Clones share the same reactor.
#[derive(Clone)]
pub struct Correlator {
    name: Arc<str>,
    cmd_tx: mpsc::Sender<ReactorCommand>,
    cancel_tx: mpsc::UnboundedSender<u64>,
    next_id: Arc<AtomicU64>,
    state: Arc<AtomicU8>,
    pending: Arc<AtomicUsize>,
}

impl Correlator {
    /// Spawn a reactor that owns `transport`.
    pub fn spawn<T: Transport>(transport: T, options: CorrelatorOptions) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (cancel_tx, cancel_rx) = mpsc::unbounded_channel();
        let state = Arc::new(AtomicU8::new(ConnectionState::Connecting as u8));
        let pending = Arc::new(AtomicUsize::new(0));

        let name: Arc<str> = Arc::from(options.name.as_str());
        tokio::spawn(reactor_task(
            transport,
            cmd_rx,
            cancel_rx,
            state.clone(),
            pending.clone(),
            options,
        ));

        Self {
            name,
            cmd_tx,
            cancel_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            state,
            pending,
        }
    }

    /// Open a UDP channel to the configured peer and spawn a reactor on it.
    pub async fn connect(config: &LiveConfig) -> Result<Self, ChannelError> {
        let channel = Channel::from_peer(&config.peer).await?;
        Ok(Self::spawn(
            channel,
            CorrelatorOptions {
                peer_errors: config.peer_errors,
                ..Default::default()
            },
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Live waiters in the reactor.
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Send `outbound` and wait for the first reply matching `key`.
    ///
    /// Dropping the returned future withdraws the waiter.
    pub async fn request(
        &self,
        outbound: Message,
        key: ResponseKey,
        timeout: Duration,
    ) -> Result<Message, CorrelationError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (response_tx, response_rx) = oneshot::channel();

        trace!("{}: Request {} {} -> {}", self.name, id, outbound.address, key.address);
        self.cmd_tx
            .send(ReactorCommand::Request {
                id,
                outbound,
                key,
                timeout,
                response_tx,
            })
            .await
            .map_err(|_| CorrelationError::Disconnected)?;

        let mut guard = CancelGuard {
            id,
            cancel_tx: self.cancel_tx.clone(),
            armed: true,
        };
        let result = response_rx.await;
        guard.armed = false;

        result.map_err(|_| CorrelationError::Disconnected)?
    }

    /// [`request`](Self::request) with Lazy Pirate retries for idempotent
    /// reads. Only timeouts are retried.
    pub async fn request_with_retry(
        &self,
        outbound: Message,
        key: ResponseKey,
        policy: &RetryPolicy,
    ) -> Result<Message, CorrelationError> {
        let max_attempts = policy.max_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.request(outbound.clone(), key.clone(), policy.timeout).await {
                Err(e) if e.is_timeout() && attempt < max_attempts => {
                    let delay = policy.backoff_for_attempt(attempt);
                    warn!(
                        "{}: {} attempt {}/{} timed out, retrying in {:?}",
                        self.name, outbound.address, attempt, max_attempts, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Fire-and-forget send through the reactor.
    pub async fn send(&self, outbound: Message) -> Result<(), CorrelationError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.cmd_tx
            .send(ReactorCommand::Send { outbound, done_tx })
            .await
            .map_err(|_| CorrelationError::Disconnected)?;
        done_rx.await.map_err(|_| CorrelationError::Disconnected)?
    }

    /// Send a mutation that has no reply of its own, holding its place in
    /// the peer error queue for up to `window`.
    ///
    /// Returns once the message is on the wire. The outcome resolves when
    /// the peer reports an error for it, when a later request is answered,
    /// or when `window` elapses.
    pub async fn command(&self, outbound: Message, window: Duration) -> Result<CommandOutcome, CorrelationError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = oneshot::channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        trace!("{}: Command {} {}", self.name, id, outbound.address);
        self.cmd_tx
            .send(ReactorCommand::Command {
                id,
                outbound,
                window,
                done_tx,
                outcome_tx,
            })
            .await
            .map_err(|_| CorrelationError::Disconnected)?;
        done_rx.await.map_err(|_| CorrelationError::Disconnected)??;

        Ok(CommandOutcome { rx: outcome_rx })
    }

    /// Every message arriving on `address` from now on, independent of
    /// request matching.
    #[doc(alias = "notify")]
    pub async fn subscribe(&self, address: impl Into<String>) -> Result<Subscription, CorrelationError> {
        let address = address.into();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(ReactorCommand::Subscribe {
                address: address.clone(),
                reply_tx,
            })
            .await
            .map_err(|_| CorrelationError::Disconnected)?;
        let rx = reply_rx.await.map_err(|_| CorrelationError::Disconnected)?;
        Ok(Subscription {
            address,
            inner: BroadcastStream::new(rx),
        })
    }

    /// Cancel every pending request, end subscriptions and close the
    /// transport. Returns once the reactor has finished. Idempotent.
    pub async fn close(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.cmd_tx.send(ReactorCommand::Shutdown { done_tx }).await.is_ok() {
            let _ = done_rx.await;
        }
        self.state
            .store(ConnectionState::Disconnected as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// In-memory transport: records sends, lets the test inject inbound.
    struct MemoryTransport {
        sent: Arc<Mutex<Vec<Message>>>,
        inbound: Option<mpsc::Receiver<Message>>,
        closed: Arc<AtomicU8>,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, msg: &Message) -> Result<(), ChannelError> {
            if msg.address == "/fail" {
                return Err(ChannelError::Closed);
            }
            self.sent.lock().unwrap().push(msg.clone());
            Ok(())
        }

        fn take_inbound(&mut self) -> Option<mpsc::Receiver<Message>> {
            self.inbound.take()
        }

        async fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        correlator: Correlator,
        peer_tx: mpsc::Sender<Message>,
        sent: Arc<Mutex<Vec<Message>>>,
        closed: Arc<AtomicU8>,
    }

    fn harness(peer_errors: PeerErrorMode) -> Harness {
        let (peer_tx, inbound) = mpsc::channel(64);
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicU8::new(0));
        let transport = MemoryTransport {
            sent: sent.clone(),
            inbound: Some(inbound),
            closed: closed.clone(),
        };
        let correlator = Correlator::spawn(
            transport,
            CorrelatorOptions {
                name: "test".to_string(),
                peer_errors,
            },
        );
        Harness {
            correlator,
            peer_tx,
            sent,
            closed,
        }
    }

    async fn wait_for_pending(correlator: &Correlator, n: usize) {
        for _ in 0..200 {
            if correlator.pending_count() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} pending, have {}", n, correlator.pending_count());
    }

    #[tokio::test]
    async fn reply_resolves_request() {
        let h = harness(PeerErrorMode::Explicit);
        let c = h.correlator.clone();
        let task = tokio::spawn(async move {
            c.request(
                Message::new("/live/song/get/tempo"),
                ResponseKey::new("/live/song/get/tempo"),
                Duration::from_secs(5),
            )
            .await
        });
        wait_for_pending(&h.correlator, 1).await;
        assert_eq!(h.sent.lock().unwrap()[0].address, "/live/song/get/tempo");

        h.peer_tx
            .send(Message::new("/live/song/get/tempo").arg(120.0f32))
            .await
            .unwrap();
        let reply = task.await.unwrap().unwrap();
        assert_eq!(reply.args, vec![Arg::Float(120.0)]);
        assert_eq!(h.correlator.pending_count(), 0);
        assert_eq!(h.correlator.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn tokens_pick_the_right_waiter() {
        let h = harness(PeerErrorMode::Explicit);
        let addr = "/live/track/get/volume";
        let mut tasks = Vec::new();
        for track in [0, 1] {
            let c = h.correlator.clone();
            tasks.push(tokio::spawn(async move {
                c.request(
                    Message::new(addr).arg(track),
                    ResponseKey::with_token(addr, vec![Arg::Int(track)]),
                    Duration::from_secs(5),
                )
                .await
            }));
            wait_for_pending(&h.correlator, track as usize + 1).await;
        }

        // Replies arrive out of order
        h.peer_tx.send(Message::new(addr).arg(1).arg(0.25f32)).await.unwrap();
        h.peer_tx.send(Message::new(addr).arg(0).arg(0.75f32)).await.unwrap();

        let second = tasks.pop().unwrap().await.unwrap().unwrap();
        let first = tasks.pop().unwrap().await.unwrap().unwrap();
        assert_eq!(first.args, vec![Arg::Int(0), Arg::Float(0.75)]);
        assert_eq!(second.args, vec![Arg::Int(1), Arg::Float(0.25)]);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_removes_only_its_waiter() {
        let h = harness(PeerErrorMode::Explicit);
        let short = {
            let c = h.correlator.clone();
            tokio::spawn(async move {
                c.request(Message::new("/a"), ResponseKey::new("/a"), Duration::from_millis(100))
                    .await
            })
        };
        let long = {
            let c = h.correlator.clone();
            tokio::spawn(async move {
                c.request(Message::new("/b"), ResponseKey::new("/b"), Duration::from_secs(60))
                    .await
            })
        };

        let err = short.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            CorrelationError::Timeout {
                address: "/a".to_string(),
                timeout_ms: 100
            }
        );
        assert_eq!(h.correlator.pending_count(), 1);

        h.peer_tx.send(Message::new("/b")).await.unwrap();
        assert!(long.await.unwrap().is_ok());
        assert_eq!(h.correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn dropped_request_is_withdrawn() {
        let h = harness(PeerErrorMode::Explicit);
        let c = h.correlator.clone();
        let task = tokio::spawn(async move {
            c.request(Message::new("/a"), ResponseKey::new("/a"), Duration::from_secs(60))
                .await
        });
        wait_for_pending(&h.correlator, 1).await;
        task.abort();
        wait_for_pending(&h.correlator, 0).await;
    }

    #[tokio::test]
    async fn send_failure_is_reported_and_not_left_pending() {
        let h = harness(PeerErrorMode::Explicit);
        let err = h
            .correlator
            .request(Message::new("/fail"), ResponseKey::new("/fail"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, CorrelationError::Send(_)));
        assert_eq!(h.correlator.pending_count(), 0);
        assert!(h.correlator.send(Message::new("/fail")).await.is_err());
        assert!(h.correlator.send(Message::new("/ok")).await.is_ok());
    }

    #[tokio::test]
    async fn peer_error_goes_to_oldest_waiter() {
        let h = harness(PeerErrorMode::Explicit);
        let c = h.correlator.clone();
        let task = tokio::spawn(async move {
            c.request(
                Message::new("/live/track/get/name").arg(99),
                ResponseKey::with_token("/live/track/get/name", vec![Arg::Int(99)]),
                Duration::from_secs(5),
            )
            .await
        });
        wait_for_pending(&h.correlator, 1).await;
        h.peer_tx
            .send(Message::new(ERROR_ADDRESS).arg("Index out of range"))
            .await
            .unwrap();
        assert_eq!(
            task.await.unwrap(),
            Err(CorrelationError::Peer("Index out of range".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_only_mode_ignores_error_address() {
        let h = harness(PeerErrorMode::TimeoutOnly);
        let c = h.correlator.clone();
        let task = tokio::spawn(async move {
            c.request(Message::new("/x"), ResponseKey::new("/x"), Duration::from_millis(50))
                .await
        });
        wait_for_pending(&h.correlator, 1).await;
        h.peer_tx.send(Message::new(ERROR_ADDRESS).arg("boom")).await.unwrap();
        assert!(task.await.unwrap().unwrap_err().is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_resends_after_timeout() {
        let h = harness(PeerErrorMode::Explicit);
        let c = h.correlator.clone();
        let policy = RetryPolicy {
            timeout: Duration::from_millis(100),
            max_retries: 2,
            backoff_base: Duration::from_millis(10),
            backoff_max: Duration::from_millis(50),
        };
        let task = tokio::spawn(async move {
            c.request_with_retry(Message::new("/q"), ResponseKey::new("/q"), &policy)
                .await
        });

        // Let the first two attempts time out, answer the third
        for _ in 0..500 {
            if h.sent.lock().unwrap().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.sent.lock().unwrap().len(), 3);
        h.peer_tx.send(Message::new("/q").arg(1)).await.unwrap();
        assert_eq!(task.await.unwrap().unwrap().args, vec![Arg::Int(1)]);
    }

    #[tokio::test]
    async fn subscribers_see_updates_without_stealing_replies() {
        let h = harness(PeerErrorMode::Explicit);
        let mut first = h.correlator.subscribe("/live/song/get/beat").await.unwrap();
        let mut second = h.correlator.subscribe("/live/song/get/beat").await.unwrap();
        assert_eq!(first.address(), "/live/song/get/beat");

        let c = h.correlator.clone();
        let task = tokio::spawn(async move {
            c.request(
                Message::new("/live/song/get/beat"),
                ResponseKey::new("/live/song/get/beat"),
                Duration::from_secs(5),
            )
            .await
        });
        wait_for_pending(&h.correlator, 1).await;

        h.peer_tx.send(Message::new("/live/song/get/beat").arg(4)).await.unwrap();
        assert_eq!(task.await.unwrap().unwrap().args, vec![Arg::Int(4)]);
        assert_eq!(first.next().await.unwrap().args, vec![Arg::Int(4)]);
        assert_eq!(second.next().await.unwrap().args, vec![Arg::Int(4)]);
    }

    #[tokio::test]
    async fn close_cancels_everything_at_once() {
        let h = harness(PeerErrorMode::Explicit);
        let mut sub = h.correlator.subscribe("/live/song/get/beat").await.unwrap();
        let mut tasks = Vec::new();
        for addr in ["/a", "/a", "/b"] {
            let c = h.correlator.clone();
            tasks.push(tokio::spawn(async move {
                c.request(Message::new(addr), ResponseKey::new(addr), Duration::from_secs(60))
                    .await
            }));
        }
        wait_for_pending(&h.correlator, 3).await;

        h.correlator.close().await;
        for task in tasks {
            assert!(matches!(
                task.await.unwrap(),
                Err(CorrelationError::Cancelled { .. })
            ));
        }
        assert_eq!(h.correlator.pending_count(), 0);
        assert_eq!(h.correlator.state(), ConnectionState::Disconnected);
        assert!(sub.next().await.is_none());
        assert_eq!(h.closed.load(Ordering::SeqCst), 1);

        h.correlator.close().await;
        assert_eq!(
            h.correlator
                .request(Message::new("/a"), ResponseKey::new("/a"), Duration::from_secs(1))
                .await,
            Err(CorrelationError::Disconnected)
        );
    }

    #[tokio::test]
    async fn command_error_stays_with_the_command() {
        let h = harness(PeerErrorMode::Explicit);
        let outcome = h
            .correlator
            .command(Message::new("/live/track/set/mute").arg(9).arg(true), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(h.correlator.pending_count(), 0);

        let c = h.correlator.clone();
        let tempo = tokio::spawn(async move {
            c.request(
                Message::new("/live/song/get/tempo"),
                ResponseKey::new("/live/song/get/tempo"),
                Duration::from_secs(5),
            )
            .await
        });
        wait_for_pending(&h.correlator, 1).await;

        // The peer answers in the order it was asked
        h.peer_tx
            .send(Message::new(ERROR_ADDRESS).arg("Index out of range"))
            .await
            .unwrap();
        h.peer_tx
            .send(Message::new("/live/song/get/tempo").arg(120.0f32))
            .await
            .unwrap();

        assert_eq!(
            outcome.confirmed().await,
            Err(CorrelationError::Peer("Index out of range".to_string()))
        );
        assert_eq!(tempo.await.unwrap().unwrap().args, vec![Arg::Float(120.0)]);
    }

    #[tokio::test]
    async fn later_reply_clears_command_slot() {
        let h = harness(PeerErrorMode::Explicit);
        let outcome = h
            .correlator
            .command(Message::new("/live/song/start_playing"), Duration::from_secs(60))
            .await
            .unwrap();

        let c = h.correlator.clone();
        let read = tokio::spawn(async move {
            c.request(
                Message::new("/live/song/get/is_playing"),
                ResponseKey::new("/live/song/get/is_playing"),
                Duration::from_secs(5),
            )
            .await
        });
        wait_for_pending(&h.correlator, 1).await;
        h.peer_tx
            .send(Message::new("/live/song/get/is_playing").arg(true))
            .await
            .unwrap();
        assert!(read.await.unwrap().is_ok());

        let confirmed = tokio::time::timeout(Duration::from_secs(1), outcome.confirmed()).await;
        assert_eq!(confirmed, Ok(Ok(())));
        assert_eq!(h.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_command_passes_after_its_window() {
        let h = harness(PeerErrorMode::Explicit);
        let outcome = h
            .correlator
            .command(Message::new("/live/song/stop_playing"), Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(outcome.confirmed().await, Ok(()));

        let failed = h.correlator.command(Message::new("/fail"), Duration::from_millis(200)).await;
        assert!(matches!(failed, Err(CorrelationError::Send(_))));

        let quiet = harness(PeerErrorMode::TimeoutOnly);
        let outcome = quiet
            .correlator
            .command(Message::new("/live/song/stop_playing"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(outcome.confirmed().await, Ok(()));
    }

    #[tokio::test]
    async fn close_cancels_command_slots() {
        let h = harness(PeerErrorMode::Explicit);
        let outcome = h
            .correlator
            .command(Message::new("/live/clip/fire").arg(0).arg(0), Duration::from_secs(60))
            .await
            .unwrap();
        h.correlator.close().await;
        assert!(matches!(
            outcome.confirmed().await,
            Err(CorrelationError::Cancelled { .. })
        ));
    }
}
