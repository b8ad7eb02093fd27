use std::{fmt, sync::Arc};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    compositor::{CommandError, Compositor, OutputRecord},
    mode::Mode,
    scenario::{self, Launchers, ScenarioError},
};

/// Output transform (rotation/flip), named the way sway names them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transform {
    #[serde(rename = "normal")]
    Normal,
    #[serde(rename = "90")]
    Rotate90,
    #[serde(rename = "180")]
    Rotate180,
    #[serde(rename = "270")]
    Rotate270,
    #[serde(rename = "flipped")]
    Flipped,
    #[serde(rename = "flipped-90")]
    Flipped90,
    #[serde(rename = "flipped-180")]
    Flipped180,
    #[serde(rename = "flipped-270")]
    Flipped270,
}

impl Transform {
    /// Name used by sway, both in `get_outputs` and in `output transform`
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Rotate90 => "90",
            Self::Rotate180 => "180",
            Self::Rotate270 => "270",
            Self::Flipped => "flipped",
            Self::Flipped90 => "flipped-90",
            Self::Flipped180 => "flipped-180",
            Self::Flipped270 => "flipped-270",
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content assigned to an output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Scenario {
    /// Nothing on screen; every output starts here
    pub fn blank() -> Self {
        Self {
            name: "blank".to_string(),
            args: Vec::new(),
        }
    }
}

/// Quasi-static description of an output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Info {
    pub make: String,
    pub model: String,
    pub modes: Vec<Mode>,
    pub name: String,
    pub serial: String,
}

/// Mutable state of an output
///
/// Every field is optional so the same type doubles as a sparse "set only
/// these fields" document. `None` means "leave unchanged", which is distinct
/// from `Some(false)` or `Some(0.0)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<Scenario>,
}

impl State {
    pub fn is_empty(&self) -> bool {
        *self == State::default()
    }
}

/// Fields of [`State`], in the order `set_state` applies them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateField {
    Enabled,
    Mode,
    Power,
    Scale,
    Transform,
    Scenario,
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Enabled => "enabled",
            Self::Mode => "mode",
            Self::Power => "power",
            Self::Scale => "scale",
            Self::Transform => "transform",
            Self::Scenario => "scenario",
        })
    }
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
}

/// A field of a desired state could not be applied
///
/// Fields before `field` stay applied; `state` is the output's state at the
/// time of the failure.
#[derive(Debug, Error)]
#[error("failed to set {field}: {source}")]
pub struct ConfigurationError {
    pub field: StateField,
    pub state: Box<State>,
    #[source]
    pub source: ApplyError,
}

/// Owned copy of an output's info and state at one point in time
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSnapshot {
    pub info: Info,
    pub state: State,
}

impl OutputSnapshot {
    pub fn name(&self) -> &str {
        &self.info.name
    }
}

/// A physical output the agent can observe and control
pub trait Output {
    fn name(&self) -> &str;
    fn info(&self) -> Info;
    fn state(&self) -> State;

    /// Apply a sparse desired state field by field
    ///
    /// Order: enabled, mode, power, scale, transform, scenario. Unset fields
    /// are skipped. The first failing field aborts the call; fields applied
    /// before it are not rolled back.
    fn set_state(&mut self, desired: &State) -> Result<State, ConfigurationError>;

    fn snapshot(&self) -> OutputSnapshot {
        OutputSnapshot {
            info: self.info(),
            state: self.state(),
        }
    }
}

/// An output driven through a [`Compositor`]
pub struct ManagedOutput<C: Compositor> {
    compositor: Arc<C>,
    launchers: Arc<Launchers>,
    record: OutputRecord,
    scenario: Scenario,
}

impl<C: Compositor> ManagedOutput<C> {
    /// Wrap an inventory record; the scenario starts out blank
    pub fn new(compositor: Arc<C>, launchers: Arc<Launchers>, record: OutputRecord) -> Self {
        Self {
            compositor,
            launchers,
            record,
            scenario: Scenario::blank(),
        }
    }

    /// Overwrite everything the compositor reports, keeping the scenario
    pub fn update(&mut self, record: OutputRecord) {
        self.record = record;
    }

    fn fail(&self, field: StateField, source: impl Into<ApplyError>) -> ConfigurationError {
        ConfigurationError {
            field,
            state: Box::new(self.state()),
            source: source.into(),
        }
    }
}

impl<C: Compositor> Output for ManagedOutput<C> {
    fn name(&self) -> &str {
        &self.record.name
    }

    fn info(&self) -> Info {
        Info {
            make: self.record.make.clone(),
            model: self.record.model.clone(),
            modes: self.record.modes.clone(),
            name: self.record.name.clone(),
            serial: self.record.serial.clone(),
        }
    }

    fn state(&self) -> State {
        State {
            enabled: Some(self.record.active),
            mode: self.record.current_mode.clone(),
            power: Some(self.record.power),
            scale: self.record.scale,
            transform: self.record.transform,
            scenario: Some(self.scenario.clone()),
        }
    }

    fn set_state(&mut self, desired: &State) -> Result<State, ConfigurationError> {
        let name = self.record.name.clone();
        let compositor = Arc::clone(&self.compositor);
        debug!("{}: applying {:?}", name, desired);

        if let Some(enabled) = desired.enabled {
            compositor
                .set_enabled(&name, enabled)
                .map_err(|e| self.fail(StateField::Enabled, e))?;
            self.record.active = enabled;
        }
        if let Some(mode) = &desired.mode {
            compositor
                .set_mode(&name, mode)
                .map_err(|e| self.fail(StateField::Mode, e))?;
            self.record.current_mode = Some(mode.clone());
        }
        if let Some(power) = desired.power {
            compositor
                .set_power(&name, power)
                .map_err(|e| self.fail(StateField::Power, e))?;
            self.record.power = power;
        }
        if let Some(scale) = desired.scale {
            compositor
                .set_scale(&name, scale)
                .map_err(|e| self.fail(StateField::Scale, e))?;
            self.record.scale = Some(scale);
        }
        if let Some(transform) = desired.transform {
            compositor
                .set_transform(&name, transform)
                .map_err(|e| self.fail(StateField::Transform, e))?;
            self.record.transform = Some(transform);
        }
        if let Some(scenario) = &desired.scenario {
            scenario::transition(compositor.as_ref(), &name, scenario, &self.launchers)
                .map_err(|e| self.fail(StateField::Scenario, e))?;
            info!("{}: scenario is now {} {:?}", name, scenario.name, scenario.args);
            self.scenario = scenario.clone();
        }

        Ok(self.state())
    }
}
