//! Recording stand-ins for the compositor, the broker and the service manager.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use crate::{
    compositor::{CommandError, Compositor, InventoryError, OutputRecord},
    mode::Mode,
    notify::{Notifier, NotifyError},
    output::Transform,
    transport::{Message, MessageHandler, QoS, Transport, TransportError},
};

pub fn record(name: &str) -> OutputRecord {
    OutputRecord {
        name: name.to_string(),
        make: "Acme".to_string(),
        model: "Panel".to_string(),
        serial: format!("SN-{}", name),
        modes: vec![Mode::new(1920, 1080, 60.0), Mode::new(1280, 720, 60.0)],
        active: true,
        current_mode: Some(Mode::new(1920, 1080, 60.0)),
        power: true,
        scale: Some(1.0),
        transform: Some(Transform::Normal),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SetEnabled(String, bool),
    SetMode(String, Mode),
    SetPower(String, bool),
    SetScale(String, f64),
    SetTransform(String, Transform),
    SelectWorkspace(String),
    PinWorkspace(String, String),
    ClearWorkspace(String),
    Launch(String),
}

/// Records every configuration call; operations named in `fail_on` fail
/// after being recorded.
pub struct RecordingCompositor {
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<&'static str>>,
    inventory: Mutex<Option<Vec<OutputRecord>>>,
    fetches: AtomicUsize,
}

impl Default for RecordingCompositor {
    fn default() -> Self {
        Self {
            calls: Mutex::default(),
            failing: Mutex::default(),
            inventory: Mutex::new(Some(Vec::new())),
            fetches: AtomicUsize::new(0),
        }
    }
}

impl RecordingCompositor {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_on(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    pub fn set_inventory(&self, records: Vec<OutputRecord>) {
        *self.inventory.lock().unwrap() = Some(records);
    }

    pub fn break_inventory(&self) {
        *self.inventory.lock().unwrap() = None;
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn call(&self, operation: &'static str, call: Call) -> Result<(), CommandError> {
        self.calls.lock().unwrap().push(call);
        if self.failing.lock().unwrap().contains(operation) {
            return Err(CommandError::Rejected(format!("{} refused", operation)));
        }
        Ok(())
    }
}

impl Compositor for RecordingCompositor {
    fn outputs(&self) -> Result<Vec<OutputRecord>, InventoryError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inventory
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CommandError::Rejected("compositor unavailable".to_string()).into())
    }

    fn set_enabled(&self, output: &str, enabled: bool) -> Result<(), CommandError> {
        self.call("enabled", Call::SetEnabled(output.into(), enabled))
    }

    fn set_mode(&self, output: &str, mode: &Mode) -> Result<(), CommandError> {
        self.call("mode", Call::SetMode(output.into(), mode.clone()))
    }

    fn set_power(&self, output: &str, power: bool) -> Result<(), CommandError> {
        self.call("power", Call::SetPower(output.into(), power))
    }

    fn set_scale(&self, output: &str, scale: f64) -> Result<(), CommandError> {
        self.call("scale", Call::SetScale(output.into(), scale))
    }

    fn set_transform(&self, output: &str, transform: Transform) -> Result<(), CommandError> {
        self.call("transform", Call::SetTransform(output.into(), transform))
    }

    fn select_workspace(&self, name: &str) -> Result<(), CommandError> {
        self.call("select_workspace", Call::SelectWorkspace(name.into()))
    }

    fn pin_workspace(&self, name: &str, output: &str) -> Result<(), CommandError> {
        self.call("pin_workspace", Call::PinWorkspace(name.into(), output.into()))
    }

    fn clear_workspace(&self, name: &str) -> Result<(), CommandError> {
        self.call("clear_workspace", Call::ClearWorkspace(name.into()))
    }

    fn launch(&self, command_line: &str) -> Result<(), CommandError> {
        self.call("launch", Call::Launch(command_line.into()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Publish { topic: String, payload: String },
    Subscribe(String),
    Unsubscribe(Vec<String>),
}

/// Records what reached the broker; operations named in `fail_on` time out
/// and are not recorded.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    handlers: Mutex<HashMap<String, MessageHandler>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl RecordingTransport {
    pub fn fail_on(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    fn check(&self, operation: &'static str) -> Result<(), TransportError> {
        if self.failing.lock().unwrap().contains(operation) {
            return Err(TransportError::Timeout {
                operation,
                timeout: Duration::from_secs(10),
            });
        }
        Ok(())
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    /// Payloads published to `topic`, oldest first
    pub fn published(&self, topic: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Publish { topic: t, payload } if t == topic => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.handlers.lock().unwrap().contains_key(topic)
    }

    /// Hand a message to the handler subscribed to `topic`
    pub fn deliver(&self, topic: &str, payload: &str) -> bool {
        let handler = self.handlers.lock().unwrap().get(topic).cloned();
        match handler {
            Some(handler) => {
                handler(&Message {
                    topic: topic.to_string(),
                    payload: payload.as_bytes().to_vec(),
                });
                true
            }
            None => false,
        }
    }
}

impl Transport for RecordingTransport {
    fn publish(&self, topic: &str, _: QoS, _: bool, payload: &[u8]) -> Result<(), TransportError> {
        self.check("publish")?;
        self.sent.lock().unwrap().push(Sent::Publish {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
        });
        Ok(())
    }

    fn subscribe(&self, topic: &str, _: QoS, handler: MessageHandler) -> Result<(), TransportError> {
        self.check("subscribe")?;
        self.sent.lock().unwrap().push(Sent::Subscribe(topic.to_string()));
        self.handlers.lock().unwrap().insert(topic.to_string(), handler);
        Ok(())
    }

    fn unsubscribe(&self, topics: &[String]) -> Result<(), TransportError> {
        self.check("unsubscribe")?;
        self.sent.lock().unwrap().push(Sent::Unsubscribe(topics.to_vec()));
        let mut handlers = self.handlers.lock().unwrap();
        for topic in topics {
            handlers.remove(topic);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    ready: Arc<AtomicUsize>,
    watchdog: Arc<AtomicUsize>,
}

impl RecordingNotifier {
    pub fn ready_count(&self) -> usize {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn watchdog_count(&self) -> usize {
        self.watchdog.load(Ordering::SeqCst)
    }
}

impl Notifier for RecordingNotifier {
    fn ready(&self) -> Result<(), NotifyError> {
        self.ready.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn watchdog(&self) -> Result<(), NotifyError> {
        self.watchdog.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
