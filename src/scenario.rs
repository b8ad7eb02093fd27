use log::{debug, info};
use thiserror::Error;
use url::Url;

use crate::{
    compositor::{CommandError, Compositor},
    output::Scenario,
};

pub const DEFAULT_BROWSER: &str = "chromium --ozone-platform-hint=auto --kiosk --app={url}";
pub const DEFAULT_PLAYER: &str = "mpv --loop=inf --fullscreen --no-osc {url}";

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("unsupported scenario '{0}'")]
    UnsupportedScenario(String),
    #[error("invalid argument for scenario '{scenario}': {reason}")]
    InvalidArgument { scenario: String, reason: String },
    #[error("unable to prepare workspace: {0}")]
    Workspace(#[source] CommandError),
    #[error("unable to launch content: {0}")]
    Launch(#[source] CommandError),
}

/// Command line templates used to start content; `{url}` is replaced with
/// the shell-quoted target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launchers {
    pub browser: String,
    pub player: String,
}

impl Default for Launchers {
    fn default() -> Self {
        Self {
            browser: DEFAULT_BROWSER.to_string(),
            player: DEFAULT_PLAYER.to_string(),
        }
    }
}

impl Launchers {
    fn command_line(template: &str, url: &Url) -> String {
        template.replace("{url}", &shell_quote(url.as_str()))
    }
}

/// What a scenario puts on screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Blank,
    Url(Url),
    Video(Url),
}

impl Content {
    pub fn from_scenario(scenario: &Scenario) -> Result<Self, ScenarioError> {
        match scenario.name.as_str() {
            "blank" => Ok(Content::Blank),
            "url" => single_url(scenario).map(Content::Url),
            "video" => single_url(scenario).map(Content::Video),
            other => Err(ScenarioError::UnsupportedScenario(other.to_string())),
        }
    }
}

fn single_url(scenario: &Scenario) -> Result<Url, ScenarioError> {
    let invalid = |reason: String| ScenarioError::InvalidArgument {
        scenario: scenario.name.clone(),
        reason,
    };
    match scenario.args.as_slice() {
        // Local files may be given as absolute paths.
        [arg] if arg.starts_with('/') => {
            Url::from_file_path(arg).map_err(|()| invalid(format!("'{}': not a usable path", arg)))
        }
        [arg] => Url::parse(arg).map_err(|e| invalid(format!("'{}': {}", arg, e))),
        args => Err(invalid(format!("expected exactly one argument, got {}", args.len()))),
    }
}

/// Move `output` to `scenario`
///
/// The output's workspace is always focused, pinned and emptied first, even
/// when the scenario turns out to be invalid. Content is launched without
/// waiting for it to appear.
pub fn transition<C: Compositor + ?Sized>(
    compositor: &C,
    output: &str,
    scenario: &Scenario,
    launchers: &Launchers,
) -> Result<(), ScenarioError> {
    debug!("{}: transition to {} {:?}", output, scenario.name, scenario.args);

    compositor
        .select_workspace(output)
        .map_err(ScenarioError::Workspace)?;
    compositor
        .pin_workspace(output, output)
        .map_err(ScenarioError::Workspace)?;

    // Nothing to kill is reported as a failure by sway.
    if let Err(e) = compositor.clear_workspace(output) {
        debug!("{}: clearing workspace: {}", output, e);
    }

    let command_line = match Content::from_scenario(scenario)? {
        Content::Blank => return Ok(()),
        Content::Url(url) => Launchers::command_line(&launchers.browser, &url),
        Content::Video(url) => Launchers::command_line(&launchers.player, &url),
    };

    info!("{}: launching {}", output, command_line);
    compositor
        .launch(&command_line)
        .map_err(ScenarioError::Launch)
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
