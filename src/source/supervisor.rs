//! Connection supervisor.
//!
//! Keeps one logical subscription to the metrics push channel alive. The
//! reconnect policy is an explicit state machine ([`ConnectionState`]); the
//! async task around it only performs I/O and forwards [`StreamEvent`]s.
//!
//! ```text
//! Idle ──connect()──▶ Connecting ──handshake ok──▶ Open
//!  ▲                      ▲                          │
//!  │                      └──── backoff timer ◀──────┤ close / error
//!  └──────────────── Closing ◀── disconnect() ───────┘
//! ```
//!
//! Tearing down drops the event receiver before the stop signal is sent, so
//! nothing a dying connection emits (including its close) reaches the
//! caller or schedules a reconnect.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::payload::{decode_batch, PayloadError};
use super::transport::{Connection, Connector, TransportError};
use crate::data::duration::format_duration;

/// Capped exponential backoff without jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1_000),
            max: Duration::from_millis(30_000),
        }
    }
}

impl Backoff {
    /// `min(max, base * 2^attempts)`.
    pub fn delay(&self, attempts: u32) -> Duration {
        2u32.checked_pow(attempts)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Supervisor lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Open,
    Closing,
}

/// Reconnect bookkeeping. Pure; the async task drives it.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    phase: Phase,
    reconnect_attempts: u32,
    backoff_ms: u64,
    closing_intentionally: bool,
    backoff: Backoff,
}

impl ConnectionState {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            phase: Phase::Idle,
            reconnect_attempts: 0,
            backoff_ms: 0,
            closing_intentionally: false,
            backoff,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn backoff_ms(&self) -> u64 {
        self.backoff_ms
    }

    /// `Idle → Connecting`. Returns false (and changes nothing) when a
    /// connection is already open, in progress or being torn down.
    pub fn begin_connect(&mut self) -> bool {
        if self.phase != Phase::Idle {
            return false;
        }
        self.phase = Phase::Connecting;
        true
    }

    /// `Connecting → Open`; resets the attempt counter.
    pub fn on_open(&mut self) {
        self.phase = Phase::Open;
        self.reconnect_attempts = 0;
        self.backoff_ms = 0;
    }

    /// Start an intentional teardown. A close observed afterwards never
    /// schedules a reconnect.
    pub fn begin_close(&mut self) {
        self.closing_intentionally = true;
        self.phase = Phase::Closing;
    }

    /// The channel closed. Returns the delay before the next attempt, or
    /// `None` if the close was intentional.
    pub fn on_close(&mut self) -> Option<Duration> {
        self.phase = Phase::Idle;
        if self.closing_intentionally {
            self.closing_intentionally = false;
            return None;
        }
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        let delay = self.backoff.delay(self.reconnect_attempts);
        self.backoff_ms = delay.as_millis() as u64;
        Some(delay)
    }
}

/// What the supervisor reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A connection attempt started.
    Connecting { attempt: u32 },
    /// The channel is open.
    Open,
    /// A decoded batch of raw records.
    Batch(Vec<Value>),
    /// A message was discarded; the connection stays open.
    ParseError(PayloadError),
    /// The channel failed and is being closed.
    Error(TransportError),
    /// The channel closed.
    Closed,
    /// A reconnect is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
}

const EVENT_BUFFER: usize = 64;
const STOP_GRACE: Duration = Duration::from_secs(1);

struct Subscription {
    events: mpsc::Receiver<StreamEvent>,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owner-facing handle: `connect`, `disconnect`, `resubscribe`, `recv`.
///
/// Dropping the supervisor disconnects it.
pub struct Supervisor {
    connector: Arc<dyn Connector>,
    backoff: Backoff,
    subscription: Option<Subscription>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("endpoint", &self.connector.description())
            .field("backoff", &self.backoff)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Supervisor {
    pub fn new(connector: Arc<dyn Connector>, backoff: Backoff) -> Self {
        Self {
            connector,
            backoff,
            subscription: None,
        }
    }

    pub fn description(&self) -> &str {
        self.connector.description()
    }

    /// True while a subscription task is running.
    pub fn is_active(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }

    /// Start the subscription. No-op if one is already open or connecting.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&mut self) -> bool {
        if self.is_active() {
            return false;
        }
        self.disconnect();

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (stop_tx, stop_rx) = watch::channel(false);
        let connector = self.connector.clone();
        let backoff = self.backoff;

        info!(endpoint = %connector.description(), "Subscribing to metrics stream");
        let handle = tokio::spawn(run(connector, backoff, tx, stop_rx));

        self.subscription = Some(Subscription {
            events: rx,
            stop_tx,
            handle,
        });
        true
    }

    /// Tear the subscription down and cancel any pending reconnect.
    ///
    /// The event receiver is detached first, so nothing from the old
    /// connection is delivered afterwards. Idempotent.
    pub fn disconnect(&mut self) {
        let Some(subscription) = self.subscription.take() else {
            return;
        };
        let Subscription {
            events,
            stop_tx,
            handle,
        } = subscription;
        drop(events);
        let _ = stop_tx.send(true);
        // The task gets the stop signal to close its socket politely; abort
        // covers a task that is parked somewhere without a select.
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) if !handle.is_finished() => {
                let abort = handle.abort_handle();
                runtime.spawn(async move {
                    if tokio::time::timeout(STOP_GRACE, handle).await.is_err() {
                        debug!("Supervisor task did not stop in time, aborting");
                        abort.abort();
                    }
                });
            }
            _ => handle.abort(),
        }
        debug!("Unsubscribed from metrics stream");
    }

    /// Tear down and subscribe afresh (e.g. after restarting nodes).
    /// Distinct from automatic reconnect, which never goes through here.
    pub fn resubscribe(&mut self) {
        info!("Resubscribing to metrics stream");
        self.disconnect();
        self.connect();
    }

    /// Next event from the current subscription.
    ///
    /// Pending forever while disconnected, so it can sit in a `select!`.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        match self.subscription.as_mut() {
            Some(subscription) => subscription.events.recv().await,
            None => std::future::pending().await,
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            let _ = subscription.stop_tx.send(true);
            subscription.handle.abort();
        }
    }
}

/// Resolves once a stop has been requested or the handle is gone.
async fn stop_requested(stop_rx: &mut watch::Receiver<bool>) {
    loop {
        if *stop_rx.borrow() {
            return;
        }
        if stop_rx.changed().await.is_err() {
            return;
        }
    }
}

/// Send an event; false once the owner has detached.
async fn emit(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    tx.send(event).await.is_ok()
}

async fn run(
    connector: Arc<dyn Connector>,
    backoff: Backoff,
    tx: mpsc::Sender<StreamEvent>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut state = ConnectionState::new(backoff);

    loop {
        state.begin_connect();
        let attempt = state.reconnect_attempts();
        if !emit(&tx, StreamEvent::Connecting { attempt }).await {
            return;
        }

        let connected = tokio::select! {
            biased;
            _ = stop_requested(&mut stop_rx) => return,
            result = connector.connect() => result,
        };

        match connected {
            Ok(mut connection) => {
                state.on_open();
                info!(endpoint = %connector.description(), "Metrics stream open");
                if !emit(&tx, StreamEvent::Open).await {
                    connection.close().await;
                    return;
                }
                if !pump(&mut *connection, &mut state, &tx, &mut stop_rx).await {
                    connection.close().await;
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "Metrics stream connect failed");
                if !emit(&tx, StreamEvent::Error(e)).await {
                    return;
                }
            }
        }

        let Some(delay) = state.on_close() else {
            return;
        };
        if !emit(&tx, StreamEvent::Closed).await {
            return;
        }
        let attempt = state.reconnect_attempts();
        info!(attempt, delay = %format_duration(delay), "Scheduling reconnect");
        if !emit(&tx, StreamEvent::Reconnecting { attempt, delay }).await {
            return;
        }

        tokio::select! {
            biased;
            _ = stop_requested(&mut stop_rx) => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Forward messages until the channel closes. Returns false when the task
/// should exit (stop requested or owner detached).
async fn pump(
    connection: &mut dyn Connection,
    state: &mut ConnectionState,
    tx: &mpsc::Sender<StreamEvent>,
    stop_rx: &mut watch::Receiver<bool>,
) -> bool {
    loop {
        let message = tokio::select! {
            biased;
            _ = stop_requested(stop_rx) => {
                state.begin_close();
                return false;
            }
            message = connection.next_message() => message,
        };

        match message {
            Ok(Some(text)) => {
                let event = match decode_batch(&text) {
                    Ok(batch) => StreamEvent::Batch(batch),
                    Err(e) => {
                        warn!(error = %e, "Dropping stream payload");
                        StreamEvent::ParseError(e)
                    }
                };
                if !emit(tx, event).await {
                    state.begin_close();
                    return false;
                }
            }
            Ok(None) => {
                info!("Metrics stream closed by peer");
                return true;
            }
            Err(e) => {
                warn!(error = %e, "Metrics stream error");
                let delivered = emit(tx, StreamEvent::Error(e)).await;
                connection.close().await;
                return delivered;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Feed = mpsc::UnboundedSender<Result<String, TransportError>>;

    /// Hands out scripted connections; fails once the script runs out.
    struct ScriptedConnector {
        script: Mutex<VecDeque<mpsc::UnboundedReceiver<Result<String, TransportError>>>>,
        attempts: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    impl ScriptedConnector {
        fn new(connections: usize) -> (Arc<Self>, Vec<Feed>) {
            let mut feeds = Vec::new();
            let mut script = VecDeque::new();
            for _ in 0..connections {
                let (tx, rx) = mpsc::unbounded_channel();
                feeds.push(tx);
                script.push_back(rx);
            }
            let connector = Arc::new(Self {
                script: Mutex::new(script),
                attempts: Arc::new(AtomicUsize::new(0)),
                closed: Arc::new(AtomicUsize::new(0)),
            });
            (connector, feeds)
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    struct ScriptedConnection {
        feed: mpsc::UnboundedReceiver<Result<String, TransportError>>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(feed) => Ok(Box::new(ScriptedConnection {
                    feed,
                    closed: self.closed.clone(),
                })),
                None => Err(TransportError::Connect {
                    url: "ws://test".to_string(),
                    reason: "refused".to_string(),
                }),
            }
        }

        fn description(&self) -> &str {
            "ws://test"
        }
    }

    #[async_trait]
    impl Connection for ScriptedConnection {
        async fn next_message(&mut self) -> Result<Option<String>, TransportError> {
            match self.feed.recv().await {
                Some(Ok(text)) => Ok(Some(text)),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            }
        }

        async fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn next(supervisor: &mut Supervisor) -> StreamEvent {
        tokio::time::timeout(Duration::from_secs(120), supervisor.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[test]
    fn test_backoff_bound() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(0), Duration::from_millis(1_000));
        assert_eq!(backoff.delay(1), Duration::from_millis(2_000));
        assert_eq!(backoff.delay(4), Duration::from_millis(16_000));
        assert_eq!(backoff.delay(5), Duration::from_millis(30_000));
        assert_eq!(backoff.delay(64), Duration::from_millis(30_000));
    }

    #[test]
    fn test_consecutive_closes_follow_backoff() {
        let mut state = ConnectionState::new(Backoff::default());
        for n in 1..=7u32 {
            assert!(state.begin_connect());
            let expected = Duration::from_millis((1_000u64 << n).min(30_000));
            assert_eq!(state.on_close(), Some(expected));
            assert_eq!(state.reconnect_attempts(), n);
            assert_eq!(state.backoff_ms(), expected.as_millis() as u64);
        }
    }

    #[test]
    fn test_open_resets_attempts() {
        let mut state = ConnectionState::new(Backoff::default());
        state.begin_connect();
        state.on_close();
        state.begin_connect();
        state.on_close();
        state.begin_connect();
        state.on_open();
        assert_eq!(state.phase(), Phase::Open);
        assert_eq!(state.reconnect_attempts(), 0);
        assert_eq!(state.on_close(), Some(Duration::from_millis(2_000)));
    }

    #[test]
    fn test_begin_connect_is_not_reentrant() {
        let mut state = ConnectionState::new(Backoff::default());
        assert!(state.begin_connect());
        assert!(!state.begin_connect());
        state.on_open();
        assert!(!state.begin_connect());
    }

    #[test]
    fn test_intentional_close_never_reconnects() {
        let mut state = ConnectionState::new(Backoff::default());
        state.begin_connect();
        state.on_open();
        state.begin_close();
        assert_eq!(state.phase(), Phase::Closing);
        assert_eq!(state.on_close(), None);
        assert_eq!(state.phase(), Phase::Idle);
        assert_eq!(state.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_and_parse_errors_are_forwarded() {
        let (connector, feeds) = ScriptedConnector::new(1);
        let mut supervisor = Supervisor::new(connector.clone(), Backoff::default());
        assert!(supervisor.connect());

        assert_eq!(next(&mut supervisor).await, StreamEvent::Connecting { attempt: 0 });
        assert_eq!(next(&mut supervisor).await, StreamEvent::Open);

        feeds[0].send(Ok("not json".to_string())).unwrap();
        feeds[0].send(Ok(r#"{"field": "x"}"#.to_string())).unwrap();
        feeds[0]
            .send(Ok(r#"{"data": [{"field": "msg_sent"}]}"#.to_string()))
            .unwrap();

        assert!(matches!(
            next(&mut supervisor).await,
            StreamEvent::ParseError(PayloadError::InvalidJson(_))
        ));
        assert_eq!(
            next(&mut supervisor).await,
            StreamEvent::ParseError(PayloadError::NotArray)
        );
        match next(&mut supervisor).await {
            StreamEvent::Batch(batch) => assert_eq!(batch[0]["field"], "msg_sent"),
            other => panic!("expected batch, got {other:?}"),
        }
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connects_back_off_exponentially() {
        let (connector, _feeds) = ScriptedConnector::new(0);
        let mut supervisor = Supervisor::new(connector.clone(), Backoff::default());
        supervisor.connect();

        let mut delays = Vec::new();
        while delays.len() < 6 {
            if let StreamEvent::Reconnecting { attempt, delay } = next(&mut supervisor).await {
                assert_eq!(attempt as usize, delays.len() + 1);
                delays.push(delay.as_millis());
            }
        }
        assert_eq!(delays, vec![2_000, 4_000, 8_000, 16_000, 30_000, 30_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_close_reconnects_and_resets_after_open() {
        let (connector, mut feeds) = ScriptedConnector::new(2);
        let mut supervisor = Supervisor::new(connector.clone(), Backoff::default());
        supervisor.connect();

        assert_eq!(next(&mut supervisor).await, StreamEvent::Connecting { attempt: 0 });
        assert_eq!(next(&mut supervisor).await, StreamEvent::Open);

        // peer closes the first connection
        drop(feeds.remove(0));
        assert_eq!(next(&mut supervisor).await, StreamEvent::Closed);
        assert_eq!(
            next(&mut supervisor).await,
            StreamEvent::Reconnecting {
                attempt: 1,
                delay: Duration::from_millis(2_000)
            }
        );
        assert_eq!(next(&mut supervisor).await, StreamEvent::Connecting { attempt: 1 });
        assert_eq!(next(&mut supervisor).await, StreamEvent::Open);
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_closes_and_reconnects() {
        let (connector, feeds) = ScriptedConnector::new(1);
        let mut supervisor = Supervisor::new(connector.clone(), Backoff::default());
        supervisor.connect();
        next(&mut supervisor).await;
        next(&mut supervisor).await;

        feeds[0]
            .send(Err(TransportError::Read("reset".to_string())))
            .unwrap();
        assert_eq!(
            next(&mut supervisor).await,
            StreamEvent::Error(TransportError::Read("reset".to_string()))
        );
        assert_eq!(next(&mut supervisor).await, StreamEvent::Closed);
        assert!(matches!(
            next(&mut supervisor).await,
            StreamEvent::Reconnecting { attempt: 1, .. }
        ));
        assert_eq!(connector.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent() {
        let (connector, _feeds) = ScriptedConnector::new(1);
        let mut supervisor = Supervisor::new(connector.clone(), Backoff::default());
        assert!(supervisor.connect());
        assert!(!supervisor.connect());
        next(&mut supervisor).await;
        assert_eq!(next(&mut supervisor).await, StreamEvent::Open);
        assert!(!supervisor.connect());
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_reconnect() {
        let (connector, _feeds) = ScriptedConnector::new(0);
        let mut supervisor = Supervisor::new(connector.clone(), Backoff::default());
        supervisor.connect();

        loop {
            if let StreamEvent::Reconnecting { .. } = next(&mut supervisor).await {
                break;
            }
        }
        supervisor.disconnect();
        assert!(!supervisor.is_active());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(connector.attempts(), 1);

        // detached: no events are delivered
        let pending = tokio::time::timeout(Duration::from_secs(5), supervisor.recv()).await;
        assert!(pending.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_open_does_not_reconnect() {
        let (connector, feeds) = ScriptedConnector::new(2);
        let mut supervisor = Supervisor::new(connector.clone(), Backoff::default());
        supervisor.connect();
        next(&mut supervisor).await;
        next(&mut supervisor).await;

        supervisor.disconnect();
        drop(feeds);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_opens_a_fresh_connection() {
        let (connector, feeds) = ScriptedConnector::new(2);
        let mut supervisor = Supervisor::new(connector.clone(), Backoff::default());
        supervisor.connect();
        next(&mut supervisor).await;
        next(&mut supervisor).await;

        supervisor.resubscribe();
        assert_eq!(next(&mut supervisor).await, StreamEvent::Connecting { attempt: 0 });
        assert_eq!(next(&mut supervisor).await, StreamEvent::Open);
        assert_eq!(connector.attempts(), 2);

        // old feed is detached; only the new one is heard
        let _ = feeds[0].send(Ok("[1]".to_string()));
        feeds[1].send(Ok("[2]".to_string())).unwrap();
        assert_eq!(next(&mut supervisor).await, StreamEvent::Batch(vec![2.into()]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_the_task() {
        let (connector, _feeds) = ScriptedConnector::new(0);
        {
            let mut supervisor = Supervisor::new(connector.clone(), Backoff::default());
            supervisor.connect();
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(connector.attempts() <= 1);
    }
}
