use std::{str::FromStr, sync::Arc};

use crate::motion::{MoveDirection, MoveDistance};
use crate::settings::{CalibrationSettings, SettingsStore};

use super::keys::{direction_for_key, ArrowKey};
use super::{CalibrationSession, CalibrationState, JogOutcome, SessionSnapshot};

pub async fn get_session_state(session: &CalibrationSession) -> Result<SessionSnapshot, String> {
    Ok(session.get_snapshot().await)
}

pub async fn connect_device(session: &CalibrationSession, address: &str) -> Result<CalibrationState, String> {
    session.connect(address).await.map_err(|e| e.to_string())
}

pub async fn initialize_step(session: &CalibrationSession) -> Result<bool, String> {
    session.initialize_step().await.map_err(|e| e.to_string())
}

pub async fn jog(
    session: &CalibrationSession,
    direction: MoveDirection,
    distance: MoveDistance,
) -> Result<JogOutcome, String> {
    session.jog(direction, distance).await.map_err(|e| e.to_string())
}

pub async fn next_reference(session: &CalibrationSession) -> Result<CalibrationState, String> {
    session.advance().await.map_err(|e| e.to_string())
}

pub async fn save_and_finish(session: &CalibrationSession) -> Result<CalibrationState, String> {
    session.save_and_finish().await.map_err(|e| e.to_string())
}

pub async fn save_and_continue(session: &CalibrationSession) -> Result<CalibrationState, String> {
    session.save_and_continue().await.map_err(|e| e.to_string())
}

pub async fn confirm_sensor_position(session: &CalibrationSession) -> Result<CalibrationState, String> {
    session.confirm_laser_reference().await.map_err(|e| e.to_string())
}

pub async fn confirm_power(session: &CalibrationSession) -> Result<CalibrationState, String> {
    session.confirm_power().await.map_err(|e| e.to_string())
}

pub async fn reset_session(session: &CalibrationSession) -> Result<(), String> {
    session.reset().await;
    Ok(())
}

/// One line of operator input.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Connect(String),
    Init,
    Jog(MoveDirection, Option<MoveDistance>),
    Key(ArrowKey, bool),
    Distance(MoveDistance),
    Next,
    Finish,
    Continue,
    Confirm,
    Reset,
    Status,
    Settings,
    Set(SettingChange),
    Reload,
    Help,
    Quit,
}

/// A single persisted setting edited from the console.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingChange {
    Port(u16),
    ConnectTimeoutMs(u64),
    DefaultMoveDistance(MoveDistance),
}

impl SettingChange {
    fn parse(key: &str, value: &str) -> Result<Self, String> {
        let invalid = |_: std::num::ParseIntError| format!("invalid value '{value}' for '{key}'");
        match key.to_ascii_lowercase().as_str() {
            "port" => value.parse().map(SettingChange::Port).map_err(invalid),
            "timeout" => value.parse().map(SettingChange::ConnectTimeoutMs).map_err(invalid),
            "distance" => value.parse().map(SettingChange::DefaultMoveDistance),
            other => Err(format!("unknown setting '{other}'")),
        }
    }

    fn apply(self, settings: &mut CalibrationSettings) {
        match self {
            SettingChange::Port(port) => settings.port = port,
            SettingChange::ConnectTimeoutMs(ms) => settings.connect_timeout_ms = ms,
            SettingChange::DefaultMoveDistance(distance) => settings.default_move_distance = distance,
        }
    }
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err("empty command".into());
        };
        let args: Vec<&str> = words.collect();

        let command = match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("connect", [address]) => ConsoleCommand::Connect((*address).to_string()),
            ("init", []) => ConsoleCommand::Init,
            ("jog", [direction]) => ConsoleCommand::Jog(direction.parse()?, None),
            ("jog", [direction, distance]) => ConsoleCommand::Jog(direction.parse()?, Some(distance.parse()?)),
            ("key", [key]) => ConsoleCommand::Key(key.parse()?, false),
            ("key", [key, modifier]) if modifier.eq_ignore_ascii_case("shift") => {
                ConsoleCommand::Key(key.parse()?, true)
            }
            ("distance", [distance]) => ConsoleCommand::Distance(distance.parse()?),
            ("next", []) => ConsoleCommand::Next,
            ("finish", []) => ConsoleCommand::Finish,
            ("continue", []) => ConsoleCommand::Continue,
            ("confirm", []) => ConsoleCommand::Confirm,
            ("reset", []) => ConsoleCommand::Reset,
            ("status", []) => ConsoleCommand::Status,
            ("settings", []) => ConsoleCommand::Settings,
            ("set", [key, value]) => ConsoleCommand::Set(SettingChange::parse(key, value)?),
            ("reload", []) => ConsoleCommand::Reload,
            ("help", []) => ConsoleCommand::Help,
            ("quit" | "exit", []) => ConsoleCommand::Quit,
            (verb, _) => return Err(format!("unrecognized command '{verb}', try 'help'")),
        };
        Ok(command)
    }
}

pub const HELP: &str = "\
connect <ip>            connect and initialize the controller
init                    retry the current reference move
jog <dir> [mm]          move back|front|up|down|left|right
key <arrow> [shift]     jog using keyboard arrow semantics
distance <mm>           select 0.1, 1 or 10 mm steps
next                    confirm the current reference well
finish | continue       save the offset, then stop or calibrate the laser
confirm                 confirm sensor position or target power
reset                   end the session and disconnect
status                  print the session state
settings                print the saved settings
set port|timeout|distance <value>
                        change and save a setting
reload                  re-read the settings file
quit";

/// Text front end over a [`CalibrationSession`].
pub struct OperatorConsole {
    session: CalibrationSession,
    settings: Arc<SettingsStore>,
    distance: MoveDistance,
}

impl OperatorConsole {
    pub fn new(session: CalibrationSession, settings: Arc<SettingsStore>) -> Self {
        let distance = settings.settings().default_move_distance;
        Self {
            session,
            settings,
            distance,
        }
    }

    pub fn session(&self) -> &CalibrationSession {
        &self.session
    }

    pub fn distance(&self) -> MoveDistance {
        self.distance
    }

    /// Run one parsed command and describe the outcome.
    pub async fn execute(&mut self, command: ConsoleCommand) -> Result<String, String> {
        let session = &self.session;
        match command {
            ConsoleCommand::Connect(address) => {
                let state = connect_device(session, &address).await?;
                Ok(format!("connected, {}", state.step))
            }
            ConsoleCommand::Init => {
                let issued = initialize_step(session).await?;
                Ok(if issued {
                    "reference move issued".into()
                } else {
                    "nothing to initialize".into()
                })
            }
            ConsoleCommand::Jog(direction, distance) => {
                let outcome = jog(session, direction, distance.unwrap_or(self.distance)).await?;
                Ok(describe_jog(outcome))
            }
            ConsoleCommand::Key(key, shift) => {
                let step = session.get_state().await.step;
                let Some(direction) = direction_for_key(step, key, shift) else {
                    return Err(format!("{key:?} does nothing during '{step}'"));
                };
                let outcome = jog(session, direction, self.distance).await?;
                Ok(describe_jog(outcome))
            }
            ConsoleCommand::Distance(distance) => {
                self.distance = distance;
                Ok(format!("step size {distance}"))
            }
            ConsoleCommand::Next => {
                let state = next_reference(session).await?;
                Ok(state.step.to_string())
            }
            ConsoleCommand::Finish => {
                let state = save_and_finish(session).await?;
                Ok(state.step.to_string())
            }
            ConsoleCommand::Continue => {
                let state = save_and_continue(session).await?;
                Ok(state.step.to_string())
            }
            ConsoleCommand::Confirm => self.confirm().await,
            ConsoleCommand::Reset => {
                reset_session(session).await?;
                Ok("session reset".into())
            }
            ConsoleCommand::Status => {
                let snapshot = get_session_state(session).await?;
                serde_json::to_string_pretty(&snapshot).map_err(|e| e.to_string())
            }
            ConsoleCommand::Settings => {
                serde_json::to_string_pretty(&self.settings.settings()).map_err(|e| e.to_string())
            }
            ConsoleCommand::Set(change) => {
                let mut updated = self.settings.settings();
                change.apply(&mut updated);
                self.settings.update(updated.clone()).map_err(|e| format!("{e:#}"))?;
                self.adopt_settings(&updated).await;
                Ok(format!("saved to {}", self.settings.path().display()))
            }
            ConsoleCommand::Reload => {
                self.settings.reload().map_err(|e| format!("{e:#}"))?;
                let reloaded = self.settings.settings();
                self.adopt_settings(&reloaded).await;
                Ok("settings reloaded".into())
            }
            ConsoleCommand::Help => Ok(HELP.into()),
            ConsoleCommand::Quit => Ok("bye".into()),
        }
    }

    async fn adopt_settings(&mut self, settings: &CalibrationSettings) {
        self.session.configure(settings).await;
        self.distance = settings.default_move_distance;
    }

    /// `confirm` means sensor position or target power depending on the step.
    async fn confirm(&self) -> Result<String, String> {
        let step = self.session.get_state().await.step;
        let state = if step == super::CalibrationStep::PowerCalibrated {
            let state = confirm_power(&self.session).await?;
            if let Some(height) = state.laser_height_calibration {
                return Ok(format!("laser height calibration {height:.3} saved"));
            }
            state
        } else {
            confirm_sensor_position(&self.session).await?
        };
        Ok(state.step.to_string())
    }
}

fn describe_jog(outcome: JogOutcome) -> String {
    match outcome {
        JogOutcome::Moved(position) => format!("at {position}"),
        JogOutcome::Dropped => "busy, jog dropped".into(),
    }
}
