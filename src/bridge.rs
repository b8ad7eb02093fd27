use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::{
    notify::Notifier,
    output::{Output, OutputSnapshot, State},
    registry::{OutputEvent, RegistryHandle},
    transport::{Message, MessageHandler, QoS, Transport, TransportError},
};

const TOMBSTONE: &[u8] = b"{}";

/// Topic layout: `{prefix}/{output}@{machine_id}/{state|info|set}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
    machine_id: String,
}

impl Topics {
    /// # Example
    ///
    /// ```
    /// use display_agent::Topics;
    ///
    /// let topics = Topics::new("disp", "abc123");
    /// assert_eq!(topics.state("eDP-1"), "disp/eDP-1@abc123/state");
    /// assert_eq!(topics.set("eDP-1"), "disp/eDP-1@abc123/set");
    /// ```
    pub fn new(prefix: impl Into<String>, machine_id: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            machine_id: machine_id.into(),
        }
    }

    /// Common prefix of every topic of `output`
    pub fn base(&self, output: &str) -> String {
        format!("{}/{}@{}", self.prefix, output, self.machine_id)
    }

    /// Current [`State`] as JSON, `{}` once the output is gone
    pub fn state(&self, output: &str) -> String {
        format!("{}/state", self.base(output))
    }

    /// Static [`Info`](crate::Info) as JSON, `{}` once the output is gone
    pub fn info(&self, output: &str) -> String {
        format!("{}/info", self.base(output))
    }

    /// Desired states published by remote clients
    pub fn set(&self, output: &str) -> String {
        format!("{}/set", self.base(output))
    }
}

/// Mirrors registry events onto the broker and routes commands back
///
/// Meant to be registered as a registry observer: it runs on the registry
/// thread and only ever talks to the registry through its handle.
pub struct Bridge<T: Transport + ?Sized> {
    topics: Topics,
    transport: Arc<T>,
    notifier: Box<dyn Notifier>,
    registry: RegistryHandle,
    announced: bool,
}

impl<T: Transport + ?Sized + 'static> Bridge<T> {
    /// Create a bridge that publishes through `transport` and forwards
    /// commands to `registry`
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::{sync::Arc, time::Duration};
    ///
    /// use display_agent::{
    ///     Bridge, MqttTransport, OutputRegistry, RegistryOptions, Sway, SystemdNotifier, Topics,
    /// };
    ///
    /// let transport = Arc::new(
    ///     MqttTransport::connect("mqtt://localhost", "display-agent", Duration::from_secs(10))
    ///         .unwrap(),
    /// );
    /// let (mut registry, handle) =
    ///     OutputRegistry::new(Arc::new(Sway::new("swaymsg")), RegistryOptions::default());
    /// let mut bridge = Bridge::new(
    ///     Topics::new("disp", "abc123"),
    ///     transport,
    ///     Box::new(SystemdNotifier::from_env()),
    ///     handle,
    /// );
    /// registry.subscribe(move |event| bridge.handle(event));
    /// registry.run();
    /// ```
    pub fn new(
        topics: Topics,
        transport: Arc<T>,
        notifier: Box<dyn Notifier>,
        registry: RegistryHandle,
    ) -> Self {
        Self {
            topics,
            transport,
            notifier,
            registry,
            announced: false,
        }
    }

    /// Mirror one registry event
    ///
    /// Broker failures are logged and never stop the event from being
    /// handled as far as possible.
    pub fn handle(&mut self, event: &OutputEvent) {
        match event {
            OutputEvent::Added(snapshot) => self.added(snapshot),
            OutputEvent::Updated(snapshot) => {
                self.publish_json(&self.topics.state(snapshot.name()), &snapshot.state);
            }
            OutputEvent::Removed(snapshot) => self.removed(snapshot.name()),
        }
    }

    fn added(&mut self, snapshot: &OutputSnapshot) {
        let name = snapshot.name();
        self.publish_json(&self.topics.info(name), &snapshot.info);
        self.publish_json(&self.topics.state(name), &snapshot.state);

        let topic = self.topics.set(name);
        let handler = command_handler(topic.clone(), name.to_string(), self.registry.clone());
        match self.transport.subscribe(&topic, QoS::AtMostOnce, handler) {
            Ok(()) => debug!("{}: subscribed to {}", name, topic),
            Err(e) => error!("{}: unable to subscribe to {}: {}", name, topic, e),
        }

        if !self.announced {
            self.announced = true;
            info!("first output published, signalling readiness");
            if let Err(e) = self.notifier.ready() {
                warn!("{}", e);
            }
        }
    }

    fn removed(&mut self, name: &str) {
        let topic = self.topics.set(name);
        if let Err(e) = self.transport.unsubscribe(std::slice::from_ref(&topic)) {
            warn!("{}: unable to unsubscribe from {}: {}", name, topic, e);
        }

        for topic in [self.topics.state(name), self.topics.info(name)] {
            if let Err(e) = self.publish(&topic, TOMBSTONE) {
                warn!("{}: unable to clear {}: {}", name, topic, e);
            }
        }
    }

    fn publish_json(&self, topic: &str, value: &impl Serialize) {
        let payload = match serde_json::to_vec(value) {
            Ok(payload) => payload,
            Err(e) => {
                error!("unable to encode payload for {}: {}", topic, e);
                return;
            }
        };
        match self.publish(topic, &payload) {
            Ok(()) => {
                if let Err(e) = self.notifier.watchdog() {
                    warn!("{}", e);
                }
            }
            Err(e) => warn!("unable to publish {}: {}", topic, e),
        }
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.transport.publish(topic, QoS::AtMostOnce, false, payload)
    }
}

fn command_handler(topic: String, output: String, registry: RegistryHandle) -> MessageHandler {
    Arc::new(move |message: &Message| {
        if message.topic != topic {
            warn!("discarding message for {} delivered to {}", message.topic, topic);
            return;
        }
        debug!("{}: received {}", output, String::from_utf8_lossy(&message.payload));

        let desired: State = match serde_json::from_slice(&message.payload) {
            Ok(desired) => desired,
            Err(e) => {
                error!("{}: ignoring malformed command: {}", output, e);
                return;
            }
        };
        if let Err(e) = registry.apply(output.clone(), move |o| apply_command(o, desired)) {
            warn!("{}: dropping command: {}", output, e);
        }
    })
}

/// Drop every field of `desired` that already matches `current`
///
/// Fields unknown on either side are kept. Modes compare structurally, so a
/// mode given as text (no aspect ratio) never matches one sway reported with
/// `picture_aspect_ratio: "none"` and is applied again.
pub fn dedup(mut desired: State, current: &State) -> State {
    fn drop_equal<V: PartialEq>(wanted: &mut Option<V>, have: &Option<V>) {
        if wanted.is_some() && wanted == have {
            *wanted = None;
        }
    }

    drop_equal(&mut desired.enabled, &current.enabled);
    drop_equal(&mut desired.mode, &current.mode);
    drop_equal(&mut desired.power, &current.power);
    drop_equal(&mut desired.scale, &current.scale);
    drop_equal(&mut desired.transform, &current.transform);
    drop_equal(&mut desired.scenario, &current.scenario);
    desired
}

/// Apply an inbound desired state, skipping what is already in place
pub fn apply_command(output: &mut dyn Output, desired: State) {
    let name = output.name().to_string();
    let pending = dedup(desired, &output.state());
    if pending.is_empty() {
        debug!("{}: already in requested state", name);
        return;
    }
    if let Err(e) = output.set_state(&pending) {
        error!("{}: {}", name, e);
    }
}
