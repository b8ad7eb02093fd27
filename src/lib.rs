//! Exposes the outputs of a sway session on an MQTT broker and applies
//! desired states published back to it.

mod bridge;
mod compositor;
mod config;
mod mode;
mod notify;
mod output;
mod registry;
mod scenario;
mod sway;
mod transport;

#[cfg(test)]
mod testing;

pub use bridge::{Bridge, Topics, apply_command, dedup};
pub use compositor::{CommandError, Compositor, InventoryError, OutputRecord};
pub use config::{Config, ConfigError, read_machine_id};
pub use mode::{Mode, ModeParseError};
pub use notify::{Notifier, NotifyError, SystemdNotifier};
pub use output::{
    ApplyError, ConfigurationError, Info, ManagedOutput, Output, OutputSnapshot, Scenario, State,
    StateField, Transform,
};
pub use registry::{
    Observer, OutputEvent, OutputRegistry, RegistryClosed, RegistryHandle, RegistryOptions,
};
pub use scenario::{Content, Launchers, ScenarioError};
pub use sway::Sway;
pub use transport::{Message, MessageHandler, MqttTransport, QoS, Transport, TransportError};
