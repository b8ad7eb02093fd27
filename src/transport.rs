use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, info, trace, warn};
use rumqttc::{Client, ClientError, Connection, Event, MqttOptions, Outgoing, Packet};
use thiserror::Error;
use url::Url;

pub use rumqttc::QoS;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PORT: u16 = 1883;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const REQUEST_CAPACITY: usize = 64;
const RETRY_DELAY: Duration = Duration::from_millis(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// A message delivered on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Called on the transport's delivery thread; must not block on the registry
pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid broker url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("timeout after {timeout:?} waiting to {operation}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    #[error("connection failed: {0}")]
    Connection(String),
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Publish/subscribe primitives the bridge relies on
///
/// Every call blocks for a bounded time and reports failure instead of
/// retrying.
pub trait Transport: Send + Sync {
    fn publish(&self, topic: &str, qos: QoS, retained: bool, payload: &[u8]) -> Result<(), TransportError>;
    fn subscribe(&self, topic: &str, qos: QoS, handler: MessageHandler) -> Result<(), TransportError>;
    fn unsubscribe(&self, topics: &[String]) -> Result<(), TransportError>;
}

#[derive(Debug, PartialEq)]
enum Ack {
    Subscribed,
    Unsubscribed,
}

type Handlers = Arc<Mutex<HashMap<String, (QoS, MessageHandler)>>>;

/// MQTT transport backed by a rumqttc client and its own connection thread
pub struct MqttTransport {
    client: Client,
    handlers: Handlers,
    // Holding this lock pairs a request with the next acknowledgement.
    acks: Mutex<Receiver<Ack>>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    timeout: Duration,
}

impl MqttTransport {
    /// Connect to the broker at `url` and wait up to `timeout` for it to
    /// accept the session
    ///
    /// # Errors
    ///
    /// Returns `InvalidUrl` for unsupported URLs, `Connection` if the broker
    /// refused or could not be reached, and `Timeout` if it never answered.
    pub fn connect(url: &str, client_id: &str, timeout: Duration) -> Result<Self, TransportError> {
        let (host, port) = broker_address(url)?;
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(KEEP_ALIVE);

        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        let handlers: Handlers = Arc::default();
        let running = Arc::new(AtomicBool::new(true));
        let (ack_tx, ack_rx) = mpsc::channel();
        let (connected_tx, connected_rx) = mpsc::sync_channel(1);

        let event_loop = EventLoop {
            client: client.clone(),
            handlers: Arc::clone(&handlers),
            acks: ack_tx,
            connected: Some(connected_tx),
            running: Arc::clone(&running),
        };
        let worker = thread::Builder::new()
            .name("mqtt".to_string())
            .spawn(move || event_loop.run(connection))
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let transport = MqttTransport {
            client,
            handlers,
            acks: Mutex::new(ack_rx),
            running,
            worker: Mutex::new(Some(worker)),
            timeout,
        };

        match connected_rx.recv_timeout(timeout) {
            Ok(Ok(())) => {
                info!("connected to {}", url);
                Ok(transport)
            }
            Ok(Err(reason)) => {
                transport.disconnect();
                Err(TransportError::Connection(reason))
            }
            Err(_) => {
                transport.disconnect();
                Err(TransportError::Timeout {
                    operation: "connect",
                    timeout,
                })
            }
        }
    }

    /// Flush queued requests, close the session and stop the connection thread
    pub fn disconnect(&self) {
        self.running.store(false, Ordering::SeqCst);
        // Queued behind pending publishes, so those are flushed first.
        if let Err(e) = self.client.disconnect() {
            debug!("disconnect request not queued: {}", e);
        }
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("mqtt connection thread panicked");
            }
        }
    }

    fn await_ack(&self, acks: &Receiver<Ack>, expected: Ack, operation: &'static str) -> Result<(), TransportError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match acks.recv_timeout(remaining) {
                Ok(ack) if ack == expected => return Ok(()),
                Ok(ack) => debug!("ignoring {:?} while waiting to {}", ack, operation),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(TransportError::Timeout {
                        operation,
                        timeout: self.timeout,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TransportError::Connection("connection thread stopped".to_string()));
                }
            }
        }
    }
}

impl Transport for MqttTransport {
    fn publish(&self, topic: &str, qos: QoS, retained: bool, payload: &[u8]) -> Result<(), TransportError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.client.try_publish(topic, qos, retained, payload.to_vec()) {
                Ok(()) => {
                    trace!("published {} bytes to {}", payload.len(), topic);
                    return Ok(());
                }
                Err(ClientError::TryRequest(_)) if Instant::now() < deadline => thread::sleep(RETRY_DELAY),
                Err(ClientError::TryRequest(_)) => {
                    return Err(TransportError::Timeout {
                        operation: "publish",
                        timeout: self.timeout,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn subscribe(&self, topic: &str, qos: QoS, handler: MessageHandler) -> Result<(), TransportError> {
        let acks = lock(&self.acks);
        while acks.try_recv().is_ok() {}

        lock(&self.handlers).insert(topic.to_string(), (qos, handler));
        self.client.try_subscribe(topic, qos)?;
        self.await_ack(&acks, Ack::Subscribed, "subscribe")?;
        debug!("subscribed to {} ({:?})", topic, qos);
        Ok(())
    }

    fn unsubscribe(&self, topics: &[String]) -> Result<(), TransportError> {
        let acks = lock(&self.acks);
        while acks.try_recv().is_ok() {}

        for topic in topics {
            lock(&self.handlers).remove(topic);
            self.client.try_unsubscribe(topic.as_str())?;
            self.await_ack(&acks, Ack::Unsubscribed, "unsubscribe")?;
            debug!("unsubscribed from {}", topic);
        }
        Ok(())
    }
}

struct EventLoop {
    client: Client,
    handlers: Handlers,
    acks: Sender<Ack>,
    connected: Option<SyncSender<Result<(), String>>>,
    running: Arc<AtomicBool>,
}

impl EventLoop {
    fn run(mut self, mut connection: Connection) {
        for notification in connection.iter() {
            match notification {
                Ok(Event::Incoming(Packet::ConnAck(_))) => self.on_connected(),
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.dispatch(Message {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    });
                }
                Ok(Event::Incoming(Packet::SubAck(_))) => {
                    let _ = self.acks.send(Ack::Subscribed);
                }
                Ok(Event::Incoming(Packet::UnsubAck(_))) => {
                    let _ = self.acks.send(Ack::Unsubscribed);
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                Ok(_) => {}
                Err(e) => {
                    if let Some(connected) = self.connected.take() {
                        let _ = connected.send(Err(e.to_string()));
                        break;
                    }
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    warn!("mqtt connection error: {}", e);
                    thread::sleep(RECONNECT_DELAY);
                }
            }
        }
        debug!("mqtt connection thread finished");
    }

    fn on_connected(&mut self) {
        if let Some(connected) = self.connected.take() {
            let _ = connected.send(Ok(()));
            return;
        }

        info!("reconnected to broker, restoring subscriptions");
        let topics: Vec<(String, QoS)> = lock(&self.handlers)
            .iter()
            .map(|(topic, (qos, _))| (topic.clone(), *qos))
            .collect();
        for (topic, qos) in topics {
            if let Err(e) = self.client.try_subscribe(topic.as_str(), qos) {
                warn!("unable to resubscribe to {}: {}", topic, e);
            }
        }
    }

    fn dispatch(&self, message: Message) {
        let handler = lock(&self.handlers)
            .get(&message.topic)
            .map(|(_, handler)| Arc::clone(handler));
        match handler {
            Some(handler) => handler(&message),
            None => warn!("discarded message on unrelated topic {}", message.topic),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Host and port of an `mqtt://` or `tcp://` broker URL
pub fn broker_address(url: &str) -> Result<(String, u16), TransportError> {
    let invalid = |reason: &str| TransportError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };
    let parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "mqtt" | "tcp") {
        return Err(invalid("scheme must be mqtt or tcp"));
    }
    let host = parsed.host_str().ok_or_else(|| invalid("missing host"))?;
    Ok((host.to_string(), parsed.port().unwrap_or(DEFAULT_PORT)))
}
