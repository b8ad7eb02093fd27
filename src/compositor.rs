use std::{io, process::ExitStatus};

use thiserror::Error;

use crate::{mode::Mode, output::Transform};

/// One output as reported by the compositor's inventory
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    /// Connector name (e.g., "eDP-1", "HDMI-A-1"), unique per inventory
    pub name: String,
    pub make: String,
    pub model: String,
    pub serial: String,
    /// Every mode the output advertises
    pub modes: Vec<Mode>,
    /// Whether the output is currently enabled
    pub active: bool,
    /// Currently active mode, absent while the output is disabled
    pub current_mode: Option<Mode>,
    pub power: bool,
    pub scale: Option<f64>,
    pub transform: Option<Transform>,
}

/// A single compositor invocation that did not succeed
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with {status}: {output}")]
    Failed {
        program: String,
        status: ExitStatus,
        output: String,
    },
    #[error("compositor rejected the command: {0}")]
    Rejected(String),
}

/// Fetching or decoding the output inventory failed
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("failed to fetch outputs: {0}")]
    Fetch(#[from] CommandError),
    #[error("failed to parse outputs: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The window manager as seen by the agent: an inventory source plus a
/// configuration sink.
///
/// Every call blocks until the compositor answered. Implementations must be
/// shareable between the registry thread and the outputs it owns.
pub trait Compositor: Send + Sync {
    /// Snapshot every output currently known to the compositor
    fn outputs(&self) -> Result<Vec<OutputRecord>, InventoryError>;

    fn set_enabled(&self, output: &str, enabled: bool) -> Result<(), CommandError>;
    fn set_mode(&self, output: &str, mode: &Mode) -> Result<(), CommandError>;
    fn set_power(&self, output: &str, power: bool) -> Result<(), CommandError>;
    fn set_scale(&self, output: &str, scale: f64) -> Result<(), CommandError>;
    fn set_transform(&self, output: &str, transform: Transform) -> Result<(), CommandError>;

    /// Focus the workspace `name`, creating it if needed
    fn select_workspace(&self, name: &str) -> Result<(), CommandError>;
    /// Pin the workspace `name` to `output`
    fn pin_workspace(&self, name: &str, output: &str) -> Result<(), CommandError>;
    /// Close every window on the workspace `name`
    fn clear_workspace(&self, name: &str) -> Result<(), CommandError>;

    /// Start `command_line` on the focused workspace without waiting for it
    fn launch(&self, command_line: &str) -> Result<(), CommandError>;
}
