use std::process::Command;

use log::debug;
use serde::Deserialize;

use crate::{
    compositor::{CommandError, Compositor, InventoryError, OutputRecord},
    mode::Mode,
    output::Transform,
};

pub const DEFAULT_SWAYMSG: &str = "swaymsg";

/// Drives sway through its `swaymsg` IPC client
#[derive(Debug, Clone)]
pub struct Sway {
    program: String,
}

impl Sway {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn swaymsg(&self, args: &[&str]) -> Result<Vec<u8>, CommandError> {
        let out = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|source| CommandError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !out.status.success() {
            debug!("{} {:?} failed: {}", self.program, args, String::from_utf8_lossy(&out.stdout));
            if let Some(reason) = rejection(&out.stdout) {
                return Err(CommandError::Rejected(reason));
            }
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            return Err(CommandError::Failed {
                program: self.program.clone(),
                status: out.status,
                output: stderr,
            });
        }

        debug!("ran {} {:?}", self.program, args);
        Ok(out.stdout)
    }

    fn run(&self, args: &[&str]) -> Result<(), CommandError> {
        self.swaymsg(args).map(|_| ())
    }

    fn configure(&self, output: &str, args: &[&str]) -> Result<(), CommandError> {
        let mut full = vec!["output", output];
        full.extend_from_slice(args);
        self.run(&full)
    }
}

impl Compositor for Sway {
    fn outputs(&self) -> Result<Vec<OutputRecord>, InventoryError> {
        let raw = self.swaymsg(&["-t", "get_outputs", "--raw"])?;
        Ok(parse_outputs(&raw)?)
    }

    fn set_enabled(&self, output: &str, enabled: bool) -> Result<(), CommandError> {
        self.configure(output, &[if enabled { "enable" } else { "disable" }])
    }

    fn set_mode(&self, output: &str, mode: &Mode) -> Result<(), CommandError> {
        let mode = if mode.refresh != 0.0 {
            format!("{}x{}@{}Hz", mode.width, mode.height, mode.refresh)
        } else {
            format!("{}x{}", mode.width, mode.height)
        };
        self.configure(output, &["mode", mode.as_str()])
    }

    fn set_power(&self, output: &str, power: bool) -> Result<(), CommandError> {
        self.configure(output, &["power", if power { "on" } else { "off" }])
    }

    fn set_scale(&self, output: &str, scale: f64) -> Result<(), CommandError> {
        let scale = scale.to_string();
        self.configure(output, &["scale", scale.as_str()])
    }

    fn set_transform(&self, output: &str, transform: Transform) -> Result<(), CommandError> {
        self.configure(output, &["transform", transform.as_str()])
    }

    fn select_workspace(&self, name: &str) -> Result<(), CommandError> {
        self.run(&["workspace", name])
    }

    fn pin_workspace(&self, name: &str, output: &str) -> Result<(), CommandError> {
        self.run(&["workspace", name, "output", output])
    }

    fn clear_workspace(&self, name: &str) -> Result<(), CommandError> {
        // Criteria values are regular expressions; `DP-1` would also match `eDP-1`.
        let criteria = format!("[workspace=\"^{}$\"]", regex_escape(name));
        self.run(&[criteria.as_str(), "kill"])
    }

    fn launch(&self, command_line: &str) -> Result<(), CommandError> {
        self.run(&["exec", command_line])
    }
}

fn regex_escape(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if "\\.+*?()|[]{}^$\"".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// `[{"success": false, "error": "..."}]`, as printed for failed commands
#[derive(Deserialize)]
struct CommandReply {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

fn rejection(stdout: &[u8]) -> Option<String> {
    let replies: Vec<CommandReply> = serde_json::from_slice(stdout).ok()?;
    replies
        .into_iter()
        .find(|r| !r.success)
        .map(|r| r.error.unwrap_or_else(|| "unknown error".to_string()))
}

#[derive(Deserialize)]
struct SwayMode {
    width: i64,
    height: i64,
    /// mHz
    #[serde(default)]
    refresh: i64,
    #[serde(default)]
    picture_aspect_ratio: Option<String>,
}

impl From<SwayMode> for Mode {
    fn from(m: SwayMode) -> Self {
        Mode {
            width: m.width,
            height: m.height,
            refresh: m.refresh as f64 / 1000.0,
            picture_aspect_ratio: m.picture_aspect_ratio.unwrap_or_default(),
        }
    }
}

// Disabled outputs come without current_mode, scale and transform.
#[derive(Deserialize)]
struct SwayOutput {
    name: String,
    #[serde(default)]
    make: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    serial: String,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    power: Option<bool>,
    #[serde(default)]
    dpms: Option<bool>,
    #[serde(default)]
    current_mode: Option<SwayMode>,
    #[serde(default)]
    modes: Vec<SwayMode>,
    #[serde(default)]
    scale: Option<f64>,
    #[serde(default)]
    transform: Option<Transform>,
}

impl From<SwayOutput> for OutputRecord {
    fn from(o: SwayOutput) -> Self {
        OutputRecord {
            name: o.name,
            make: o.make,
            model: o.model,
            serial: o.serial,
            modes: o.modes.into_iter().map(Mode::from).collect(),
            active: o.active,
            current_mode: o.current_mode.map(Mode::from),
            power: o.power.or(o.dpms).unwrap_or(false),
            scale: o.scale,
            transform: o.transform,
        }
    }
}

pub(crate) fn parse_outputs(raw: &[u8]) -> Result<Vec<OutputRecord>, serde_json::Error> {
    let outputs: Vec<SwayOutput> = serde_json::from_slice(raw)?;
    Ok(outputs.into_iter().map(OutputRecord::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const GET_OUTPUTS: &str = r#"[
      {
        "id": 3, "type": "output", "name": "eDP-1", "active": true, "dpms": true, "power": true,
        "primary": false, "make": "BOE", "model": "0x095F", "serial": "Unknown",
        "scale": 1.5, "scale_filter": "linear", "transform": "normal", "adaptive_sync_status": "disabled",
        "current_workspace": "1",
        "modes": [
          {"width": 2256, "height": 1504, "refresh": 59999, "picture_aspect_ratio": "none"},
          {"width": 1920, "height": 1080, "refresh": 60000, "picture_aspect_ratio": "16:9"}
        ],
        "current_mode": {"width": 2256, "height": 1504, "refresh": 59999, "picture_aspect_ratio": "none"},
        "rect": {"x": 0, "y": 0, "width": 1504, "height": 1003}
      },
      {
        "type": "output", "name": "HDMI-A-1", "active": false, "dpms": false, "power": false,
        "primary": false, "make": "Dell Inc.", "model": "U2720Q", "serial": "ABC123",
        "modes": [{"width": 3840, "height": 2160, "refresh": 29981}],
        "current_workspace": null,
        "rect": {"x": 0, "y": 0, "width": 0, "height": 0}
      }
    ]"#;

    #[test]
    fn parses_get_outputs() {
        let records = parse_outputs(GET_OUTPUTS.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);

        let edp = &records[0];
        assert_eq!(edp.name, "eDP-1");
        assert!(edp.active);
        assert!(edp.power);
        assert_eq!(edp.scale, Some(1.5));
        assert_eq!(edp.transform, Some(Transform::Normal));
        assert_eq!(edp.current_mode.as_ref().map(|m| m.refresh), Some(59.999));
        assert_eq!(edp.modes[1].picture_aspect_ratio, "16:9");
        assert_eq!(edp.modes[1].refresh, 60.0);

        let hdmi = &records[1];
        assert!(!hdmi.active);
        assert_eq!(hdmi.current_mode, None);
        assert_eq!(hdmi.scale, None);
        assert_eq!(hdmi.transform, None);
        assert_eq!(hdmi.modes[0].picture_aspect_ratio, "");
    }

    #[test]
    fn power_falls_back_to_dpms() {
        let records =
            parse_outputs(br#"[{"name": "DP-2", "active": true, "dpms": true}]"#).unwrap();
        assert!(records[0].power);
    }

    #[test]
    fn rejects_garbage_inventory() {
        assert!(parse_outputs(b"not json").is_err());
        assert!(parse_outputs(br#"[{"active": true}]"#).is_err());
    }

    #[test]
    fn extracts_rejection_reason() {
        assert_eq!(
            rejection(br#"[{"success": false, "parse_error": true, "error": "Unknown output"}]"#),
            Some("Unknown output".to_string())
        );
        assert_eq!(rejection(br#"[{"success": true}]"#), None);
        assert_eq!(rejection(b"garbage"), None);
    }

    #[test]
    fn regex_escape_quotes_metacharacters() {
        assert_eq!(regex_escape("DP-1"), "DP-1");
        assert_eq!(regex_escape("a.b(c)"), r"a\.b\(c\)");
        assert_eq!(regex_escape(r#"x"y\"#), r#"x\"y\\"#);
    }

    #[test]
    fn clear_workspace_matches_the_exact_name() {
        use std::{fs, os::unix::fs::PermissionsExt};

        let dir = std::env::temp_dir().join(format!("display-agent-sway-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let argv = dir.join("argv");
        let script = dir.join("swaymsg");
        fs::write(
            &script,
            format!("#!/bin/sh\nprintf '%s\\n' \"$@\" > '{}'\n", argv.display()),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let sway = Sway::new(script.to_string_lossy().into_owned());
        // A concurrent fork may briefly hold the freshly written script open.
        let clear = |name: &str| {
            for _ in 0..20 {
                match sway.clear_workspace(name) {
                    Err(CommandError::Spawn { .. }) => {
                        std::thread::sleep(std::time::Duration::from_millis(50))
                    }
                    other => return other,
                }
            }
            sway.clear_workspace(name)
        };

        clear("DP-1").unwrap();
        assert_eq!(fs::read_to_string(&argv).unwrap(), "[workspace=\"^DP-1$\"]\nkill\n");

        clear("HDMI-A-1").unwrap();
        assert_eq!(
            fs::read_to_string(&argv).unwrap(),
            "[workspace=\"^HDMI-A-1$\"]\nkill\n"
        );

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let sway = Sway::new("/nonexistent/swaymsg");
        assert!(matches!(
            sway.set_power("eDP-1", true),
            Err(CommandError::Spawn { .. })
        ));
        assert!(matches!(sway.outputs(), Err(InventoryError::Fetch(_))));
    }
}
