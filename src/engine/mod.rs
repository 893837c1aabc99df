//! Connection-state and publish-queue engine
//!
//! [`ResilientClient`] is the facade application code talks to. It keeps a
//! registry of subscriptions, an ordered queue of outbound publishes and a
//! small connection state machine, and hides broker availability behind them:
//!
//! - `subscribe`/`unsubscribe` always succeed locally and are replayed against
//!   the broker on every (re)connection.
//! - `publish` copies the payload into the queue and returns immediately.
//!   QoS 1/2 messages survive outages; QoS 0 messages are dropped when they
//!   cannot be delivered promptly.
//! - `poll_once` must be called periodically by the host loop. Each call does
//!   at most one unit of connect work and one publish dispatch, and never
//!   blocks.
//!
//! Transport notifications arrive on the transport's own context and are
//! handled in [`dispatcher`]. The queue and its busy flag share one mutex;
//! the poll driver only ever `try_lock`s it and defers on contention.
//!
//! ```rust,no_run
//! use resilient_mqtt::{ClientConfig, QoS, ResilientClient};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::for_broker("mqtt://127.0.0.1:1883");
//! let client = ResilientClient::from_config(&config, tokio::runtime::Handle::current())?;
//!
//! client.subscribe("/echo", QoS::AtMostOnce, |payload| {
//!     println!("echo: {}", String::from_utf8_lossy(payload));
//! });
//! client.publish("/alive", QoS::ExactlyOnce, false, b"i am alive!");
//!
//! let mut ticker = tokio::time::interval(config.engine.poll_interval());
//! loop {
//!     ticker.tick().await;
//!     client.poll_once();
//! }
//! # }
//! ```

pub mod dispatcher;
pub mod queue;
pub mod registry;
pub mod state;

pub use queue::{DispatchOutcome, EnqueueOutcome, PendingPublish, PublishQueue};
pub use registry::{MessageCallback, Subscription, SubscriptionRegistry};
pub use state::{ConnectionState, ReconnectCountdown, StateCell};

use crate::config::{ClientConfig, EngineConfig};
use crate::error::ClientResult;
use crate::observability::{EngineMetrics, MetricsSnapshot};
use crate::transport::mqtt::MqttTransport;
use crate::transport::{QoS, Transport, TransportListener};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak};
use tracing::{debug, info, warn};

/// What a single `poll_once` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Disconnected and still inside the backoff window
    BackingOff { remaining: u32 },
    /// A connect request was handed to the transport
    ConnectRequested,
    /// The transport refused to start connecting; backoff restarted
    ConnectRejected,
    /// Waiting for the transport to report the connect outcome
    AwaitingConnection,
    /// Connected; result of the publish dispatch attempt
    Dispatch(DispatchOutcome),
    /// Engine has been shut down
    Shutdown,
}

/// State shared between the driver and the transport's notification context
pub struct EngineCore<T: Transport> {
    transport: T,
    state: StateCell,
    countdown: ReconnectCountdown,
    queue: Mutex<PublishQueue>,
    registry: Mutex<SubscriptionRegistry>,
    metrics: EngineMetrics,
}

impl<T: Transport> EngineCore<T> {
    fn new(transport: T, config: &EngineConfig) -> Self {
        Self {
            transport,
            state: StateCell::new(ConnectionState::Disconnected),
            countdown: ReconnectCountdown::new(config.reconnect_delay_ticks),
            queue: Mutex::new(PublishQueue::new(config.queue_depth)),
            registry: Mutex::new(SubscriptionRegistry::new()),
            metrics: EngineMetrics::new(),
        }
    }

    // A panicking user callback must not wedge the engine, so poisoning is ignored.
    fn lock_queue(&self) -> MutexGuard<'_, PublishQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_registry(&self) -> MutexGuard<'_, SubscriptionRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_shut_down(&self) -> bool {
        self.state.get() == ConnectionState::Shutdown
    }

    fn subscribe(&self, topic: &str, qos: QoS, callback: MessageCallback) {
        if self.is_shut_down() {
            return;
        }
        if self.lock_registry().upsert(topic, qos, callback).is_some() {
            debug!(topic, ?qos, "Replaced existing subscription");
        }

        if self.state.get() == ConnectionState::Connected {
            if let Err(e) = self.transport.subscribe(topic, qos) {
                warn!(topic, "Subscribe request not accepted, retrying next tick: {}", e);
                self.lock_registry().mark_pending(topic);
            }
        } else {
            debug!(topic, "Subscription registered, deferred until connected");
        }
    }

    fn unsubscribe(&self, topic: &str) {
        if self.is_shut_down() || self.lock_registry().remove(topic).is_none() {
            return;
        }

        if self.state.get() == ConnectionState::Connected {
            if let Err(e) = self.transport.unsubscribe(topic) {
                warn!(topic, "Unsubscribe request not accepted: {}", e);
            }
        }
        debug!(topic, "Subscription removed");
    }

    fn publish(&self, topic: &str, qos: QoS, retained: bool, payload: &[u8]) {
        if self.is_shut_down() {
            return;
        }
        let connected = self.state.get() == ConnectionState::Connected;
        let outcome = self
            .lock_queue()
            .enqueue(topic, qos, retained, payload, connected);

        match outcome {
            EnqueueOutcome::Queued(sequence) => {
                self.metrics.record_enqueued();
                debug!(topic, ?qos, sequence, "Publish queued");
            }
            EnqueueOutcome::RejectedDisconnected => {
                self.metrics.record_dropped_disconnected();
                debug!(topic, "Dropped QoS 0 publish while disconnected");
            }
            EnqueueOutcome::RejectedCapacity => {
                self.metrics.record_dropped_capacity();
                warn!(topic, "Publish queue over capacity, dropped QoS 0 publish");
            }
        }
    }

    fn poll_once(&self) -> TickOutcome {
        match self.state.get() {
            ConnectionState::Shutdown => TickOutcome::Shutdown,
            ConnectionState::Connecting => TickOutcome::AwaitingConnection,
            ConnectionState::Disconnected => self.try_connect(),
            ConnectionState::Connected => {
                self.retry_pending_subscriptions();
                TickOutcome::Dispatch(self.try_dispatch())
            }
        }
    }

    /// Re-issue subscribes the transport refused earlier in this connection
    fn retry_pending_subscriptions(&self) {
        let pending = match self.registry.try_lock() {
            Ok(mut registry) => registry.take_pending(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().take_pending(),
            Err(TryLockError::WouldBlock) => return,
        };
        if pending.is_empty() {
            return;
        }

        let refused = self.issue_subscribes(&pending);
        debug!(
            retried = pending.len(),
            refused, "Retried deferred subscriptions"
        );
    }

    fn try_connect(&self) -> TickOutcome {
        if !self.countdown.tick() {
            return TickOutcome::BackingOff {
                remaining: self.countdown.remaining(),
            };
        }
        if !self
            .state
            .transition_from(ConnectionState::Disconnected, ConnectionState::Connecting)
        {
            return TickOutcome::AwaitingConnection;
        }

        self.metrics.record_connect_attempt();
        info!("Connecting to MQTT broker");
        match self.transport.connect() {
            Ok(()) => TickOutcome::ConnectRequested,
            Err(e) => {
                self.metrics.record_connect_failed();
                if self
                    .state
                    .transition_from(ConnectionState::Connecting, ConnectionState::Disconnected)
                {
                    self.countdown.reset();
                }
                warn!("Connect request rejected, retrying later: {}", e);
                TickOutcome::ConnectRejected
            }
        }
    }

    fn try_dispatch(&self) -> DispatchOutcome {
        let mut queue = match self.queue.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return DispatchOutcome::Contended,
        };

        let outcome = queue.dispatch_head(|message| self.transport.send(message));
        drop(queue);

        match outcome {
            DispatchOutcome::FireAndForget(sequence) => {
                self.metrics.record_delivered();
                debug!(sequence, "QoS 0 publish sent");
            }
            DispatchOutcome::InFlight(sequence) => {
                debug!(sequence, "Publish in flight");
            }
            DispatchOutcome::Rejected(sequence) => {
                self.metrics.record_send_rejected();
                debug!(sequence, "Transport refused publish, retrying next tick");
            }
            DispatchOutcome::Abandoned(sequence) => {
                self.metrics.record_send_rejected();
                warn!(sequence, "Transport refused QoS 0 publish, dropped");
            }
            DispatchOutcome::Idle
            | DispatchOutcome::Busy
            | DispatchOutcome::Contended => {}
        }
        outcome
    }

    fn shutdown(&self) {
        if self.state.shutdown() == ConnectionState::Shutdown {
            return;
        }
        let _span = crate::engine_span!(op = "shutdown").entered();

        // Notifications must be silenced before queued payloads are released.
        self.transport.clear_listener();
        if let Err(e) = self.transport.disconnect() {
            warn!("Transport disconnect failed during shutdown: {}", e);
        }

        let discarded = self.lock_queue().drain();
        self.lock_registry().clear();
        info!(discarded, "MQTT engine shut down");
    }
}

/// Self-healing publish/subscribe facade over a [`Transport`]
///
/// Owned by a single driver context. Use [`publisher`](Self::publisher) to
/// publish from inside subscription callbacks.
pub struct ResilientClient<T: Transport> {
    core: Arc<EngineCore<T>>,
}

impl<T: Transport> ResilientClient<T> {
    /// Wrap `transport` and register the engine as its listener
    pub fn new(transport: T, config: &EngineConfig) -> Self {
        let core = Arc::new(EngineCore::new(transport, config));
        let weak_core: Weak<EngineCore<T>> = Arc::downgrade(&core);
        let listener: Weak<dyn TransportListener> = weak_core;
        core.transport.set_listener(listener);
        Self { core }
    }

    /// Register `callback` for messages on `topic`, replacing any earlier one
    pub fn subscribe<F>(&self, topic: &str, qos: QoS, callback: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.core.subscribe(topic, qos, Arc::new(callback));
    }

    /// Forget `topic`; a no-op when it was never subscribed
    pub fn unsubscribe(&self, topic: &str) {
        self.core.unsubscribe(topic);
    }

    /// Queue a message for delivery. Returns immediately.
    pub fn publish(&self, topic: &str, qos: QoS, retained: bool, payload: impl AsRef<[u8]>) {
        self.core.publish(topic, qos, retained, payload.as_ref());
    }

    /// Advance the connection state machine and attempt one dispatch
    pub fn poll_once(&self) -> TickOutcome {
        self.core.poll_once()
    }

    /// Publishing handle that does not keep the engine alive
    pub fn publisher(&self) -> Publisher<T> {
        Publisher {
            core: Arc::downgrade(&self.core),
        }
    }

    /// Detach the transport and release everything still queued. Idempotent.
    pub fn shutdown(&self) {
        self.core.shutdown();
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.core.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn queue_len(&self) -> usize {
        self.core.lock_queue().len()
    }

    /// Snapshot of `(topic, sequence)` for every queued publish, head first
    pub fn queued_messages(&self) -> Vec<(String, u64)> {
        self.core
            .lock_queue()
            .iter()
            .map(|entry| (entry.topic.clone(), entry.sequence))
            .collect()
    }

    pub fn is_publisher_busy(&self) -> bool {
        self.core.lock_queue().is_busy()
    }

    pub fn subscription_count(&self) -> usize {
        self.core.lock_registry().len()
    }

    /// Registered topics the broker has not yet accepted a subscribe for
    pub fn pending_subscription_count(&self) -> usize {
        self.core.lock_registry().pending_len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.core.metrics.snapshot()
    }

    /// The wrapped transport
    pub fn transport(&self) -> &T {
        &self.core.transport
    }
}

impl ResilientClient<MqttTransport> {
    /// Build a client over rumqttc, spawning transport work on `runtime`
    pub fn from_config(
        config: &ClientConfig,
        runtime: tokio::runtime::Handle,
    ) -> ClientResult<Self> {
        config.validate()?;
        let transport = MqttTransport::new(config.mqtt.clone(), runtime)?;
        Ok(Self::new(transport, &config.engine))
    }
}

impl<T: Transport> Drop for ResilientClient<T> {
    fn drop(&mut self) {
        self.core.shutdown();
    }
}

/// Weak publishing handle, safe to capture in subscription callbacks
pub struct Publisher<T: Transport> {
    core: Weak<EngineCore<T>>,
}

impl<T: Transport> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            core: Weak::clone(&self.core),
        }
    }
}

impl<T: Transport> Publisher<T> {
    /// Same as [`ResilientClient::publish`]; a no-op once the engine is gone
    pub fn publish(&self, topic: &str, qos: QoS, retained: bool, payload: impl AsRef<[u8]>) {
        if let Some(core) = self.core.upgrade() {
            core.publish(topic, qos, retained, payload.as_ref());
        }
    }
}
