//! Impure I/O for the MQTT transport
//!
//! This module owns the rumqttc client, the spawned session task that polls
//! its event loop, and the hand-off of session events to the registered
//! listener.

use super::connection::{
    configure_mqtt_options, parse_broker_url, DeliveryTracker, LinkNotice, LinkState, RetryPolicy,
};
use super::message_handler::{MessageHandler, SessionEvent};
use crate::config::MqttSection;
use crate::engine::PendingPublish;
use crate::transport::{QoS, Transport, TransportError, TransportListener};
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Capacity of the rumqttc request channel
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// How long a stopping session may spend flushing its DISCONNECT
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Listener shared between the transport and its session task
#[derive(Default)]
struct ListenerSlot(Mutex<Option<Weak<dyn TransportListener>>>);

impl ListenerSlot {
    fn lock(&self) -> MutexGuard<'_, Option<Weak<dyn TransportListener>>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, listener: Weak<dyn TransportListener>) {
        *self.lock() = Some(listener);
    }

    fn clear(&self) {
        *self.lock() = None;
    }

    // Upgraded outside the slot lock so listeners may call back into the transport.
    fn get(&self) -> Option<Arc<dyn TransportListener>> {
        self.lock().as_ref().and_then(Weak::upgrade)
    }

    fn notify(&self, notice: LinkNotice) {
        let Some(listener) = self.get() else {
            return;
        };
        match notice {
            LinkNotice::Connected => listener.on_connected(),
            LinkNotice::ConnectionLost(cause) => listener.on_connection_lost(&cause),
            LinkNotice::ConnectFailed(reason) => listener.on_connect_failed(&reason),
        }
    }
}

fn lock_tracker(tracker: &Mutex<DeliveryTracker>) -> MutexGuard<'_, DeliveryTracker> {
    tracker.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One rumqttc client/event-loop pair and its running task
struct Session {
    client: AsyncClient,
    tracker: Arc<Mutex<DeliveryTracker>>,
    alive: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
}

impl Session {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn stop(self) -> Result<(), TransportError> {
        let result = if self.is_alive() {
            self.client
                .try_disconnect()
                .map_err(|e| TransportError::Client(Box::new(e)))
        } else {
            Ok(())
        };
        // Send error only means the task already exited.
        let _ = self.shutdown_tx.send(true);
        result
    }
}

/// MQTT v5 transport backed by rumqttc
///
/// Every [`Transport`] call returns immediately. Connection attempts and
/// network I/O run in a session task spawned on the supplied runtime.
pub struct MqttTransport {
    config: MqttSection,
    retry: RetryPolicy,
    runtime: Handle,
    listener: Arc<ListenerSlot>,
    session: Mutex<Option<Session>>,
}

impl MqttTransport {
    /// Create a transport for `config`; nothing touches the network until `connect`
    pub fn new(config: MqttSection, runtime: Handle) -> Result<Self, TransportError> {
        parse_broker_url(&config.broker_url)?;

        Ok(Self {
            retry: RetryPolicy::from_config(&config),
            config,
            runtime,
            listener: Arc::new(ListenerSlot::default()),
            session: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &MqttSection {
        &self.config
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// True while a session task is connected or retrying
    pub fn is_session_active(&self) -> bool {
        self.lock_session().as_ref().is_some_and(Session::is_alive)
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_session<F>(&self, request: F) -> Result<(), TransportError>
    where
        F: FnOnce(&Session) -> Result<(), rumqttc::v5::ClientError>,
    {
        let session = self.lock_session();
        let session = session
            .as_ref()
            .filter(|session| session.is_alive())
            .ok_or(TransportError::NotConnected)?;
        request(session).map_err(|e| TransportError::Rejected(e.to_string()))
    }
}

impl Transport for MqttTransport {
    fn set_listener(&self, listener: Weak<dyn TransportListener>) {
        self.listener.set(listener);
    }

    fn clear_listener(&self) {
        self.listener.clear();
    }

    fn connect(&self) -> Result<(), TransportError> {
        let mut session = self.lock_session();
        if session.as_ref().is_some_and(Session::is_alive) {
            debug!("MQTT session already running, connect folded into its retry loop");
            return Ok(());
        }
        if let Some(finished) = session.take() {
            // Already exited; stop only releases the client.
            let _ = finished.stop();
        }

        let options = configure_mqtt_options(&self.config)?;
        info!(
            broker = %self.config.broker_url,
            client_id = %options.client_id(),
            "Starting MQTT session"
        );
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let alive = Arc::new(AtomicBool::new(true));
        let tracker = Arc::new(Mutex::new(DeliveryTracker::default()));

        let task = SessionTask {
            event_loop,
            listener: Arc::clone(&self.listener),
            tracker: Arc::clone(&tracker),
            retry: self.retry,
            alive: Arc::clone(&alive),
            shutdown_rx,
            link: LinkState::default(),
            attempt: 0,
        };
        self.runtime.spawn(task.run());

        *session = Some(Session {
            client,
            tracker,
            alive,
            shutdown_tx,
        });
        Ok(())
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.with_session(|session| session.client.try_subscribe(topic, qos.into()))
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.with_session(|session| session.client.try_unsubscribe(topic))
    }

    fn send(&self, message: &PendingPublish) -> Result<(), TransportError> {
        self.with_session(|session| {
            // Held across the request so the event loop cannot see the
            // publish before its sequence is recorded.
            let mut tracker = lock_tracker(&session.tracker);
            session.client.try_publish(
                message.topic.as_str(),
                message.qos.into(),
                message.retained,
                message.payload.clone(),
            )?;
            if message.qos.is_acknowledged() {
                tracker.record_send(message.sequence);
            }
            Ok(())
        })
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        match self.lock_session().take() {
            Some(session) => session.stop(),
            None => Ok(()),
        }
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        let session = self
            .session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            let _ = session.stop();
        }
    }
}

/// State owned by a spawned session task
struct SessionTask {
    event_loop: EventLoop,
    listener: Arc<ListenerSlot>,
    tracker: Arc<Mutex<DeliveryTracker>>,
    retry: RetryPolicy,
    alive: Arc<AtomicBool>,
    shutdown_rx: watch::Receiver<bool>,
    link: LinkState,
    attempt: u32,
}

impl SessionTask {
    async fn run(mut self) {
        debug!("MQTT session task started");
        loop {
            let polled = tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    self.flush_disconnect().await;
                    break;
                }
                polled = self.event_loop.poll() => polled,
            };

            let keep_running = match polled {
                Ok(event) => self.handle_event(MessageHandler::route_event(&event)),
                Err(e) => self.handle_failure(&e.to_string()).await,
            };
            if !keep_running {
                break;
            }
        }
        self.alive.store(false, Ordering::SeqCst);
        debug!("MQTT session task stopped");
    }

    /// Returns false when the session must end
    fn handle_event(&mut self, event: SessionEvent) -> bool {
        // Packet ids are tracked even while detached so the mapping stays whole.
        let delivery = match &event {
            SessionEvent::PublishSent(pkid) => {
                lock_tracker(&self.tracker).on_publish_sent(*pkid);
                None
            }
            SessionEvent::DeliveryConfirmed(pkid) | SessionEvent::DeliveryFailed { pkid, .. } => {
                let sequence = lock_tracker(&self.tracker).resolve(*pkid);
                if sequence.is_none() {
                    debug!(pkid, "Acknowledgment for an untracked packet id, ignored");
                }
                sequence
            }
            _ => None,
        };

        let Some(listener) = self.listener.get() else {
            // Detached: keep the link serviced until told to stop.
            if event == SessionEvent::ConnectionAcknowledged {
                self.link.on_connack();
            }
            return true;
        };

        match event {
            SessionEvent::ConnectionAcknowledged => {
                self.attempt = 0;
                self.link.on_connack();
                listener.on_connected();
            }
            SessionEvent::MessageReceived { topic, payload } => {
                listener.on_message_arrived(&topic, &payload);
            }
            SessionEvent::DeliveryConfirmed(_) => {
                if let Some(sequence) = delivery {
                    listener.on_delivery_succeeded(sequence);
                }
            }
            SessionEvent::DeliveryFailed { reason, .. } => {
                if let Some(sequence) = delivery {
                    listener.on_delivery_failed(sequence, &reason);
                }
            }
            SessionEvent::BrokerDisconnect(reason) => {
                warn!("Broker closed the MQTT connection: {}", reason);
                let notice = self.link.on_broker_disconnect(&reason);
                if !self.retry.is_enabled() {
                    // Mark finished first so the next connect starts a fresh session.
                    self.alive.store(false, Ordering::SeqCst);
                }
                if let Some(notice) = notice {
                    self.listener.notify(notice);
                }
                return self.retry.is_enabled();
            }
            SessionEvent::PublishSent(_) | SessionEvent::Ignored => {}
        }
        true
    }

    /// Report a poll error and wait out the retry delay; false ends the session
    async fn handle_failure(&mut self, error: &str) -> bool {
        let delay = self.retry.delay_for(self.attempt);
        if delay.is_none() {
            self.alive.store(false, Ordering::SeqCst);
        }
        if let Some(notice) = self.link.on_poll_error(error) {
            debug!(?notice, "MQTT session link down");
            self.listener.notify(notice);
        }

        let Some(delay) = delay else {
            return false;
        };
        self.attempt = self.attempt.saturating_add(1);
        debug!(delay_ms = delay.as_millis() as u64, "Retrying MQTT connection");

        tokio::select! {
            _ = self.shutdown_rx.changed() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn flush_disconnect(&mut self) {
        if self.link != LinkState::Up {
            return;
        }
        // One poll hands the queued DISCONNECT to the network.
        let _ = tokio::time::timeout(DISCONNECT_GRACE, self.event_loop.poll()).await;
    }
}
