use avc_nav::{parse_route, Route, RouteFormat};
use avc_proto::{CommandReply, CommandRequest};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::controller::SharedMission;
use crate::error::Rejection;
use crate::lock;
use crate::mission::Command;

/// Turns named operator commands into mission events.
///
/// Parsing and file loading happen before the mission lock is taken; the
/// lock is held only for the state transition itself.
#[derive(Clone)]
pub struct CommandGateway {
    mission: SharedMission,
    waypoint_dir: PathBuf,
    shutdown: watch::Receiver<bool>,
}

impl CommandGateway {
    pub fn new(mission: SharedMission, waypoint_dir: impl Into<PathBuf>, shutdown: watch::Receiver<bool>) -> Self {
        Self { mission, waypoint_dir: waypoint_dir.into(), shutdown }
    }

    pub async fn execute(&self, req: &CommandRequest) -> CommandReply {
        match self.try_execute(req).await {
            Ok(note) => {
                info!("command {}: ok ({})", req.command, note);
                CommandReply::ok_with(note)
            }
            Err(rejection) => {
                warn!("command {} rejected: {}", req.command, rejection);
                CommandReply::rejected(rejection.to_string())
            }
        }
    }

    async fn try_execute(&self, req: &CommandRequest) -> Result<String, Rejection> {
        if *self.shutdown.borrow() {
            return Err(Rejection::ShuttingDown);
        }
        let cmd = match req.command.as_str() {
            "run" => Command::Run,
            "stop" => Command::Stop,
            "reset" => Command::Reset,
            "calibrate-compass" => Command::CalibrateCompass,
            "line-up" => Command::LineUp,
            "count-down" => Command::CountDown,
            "set-max-throttle" => Command::SetMaxThrottle(throttle_param(&req.params)?),
            "set-waypoints" => {
                let name = string_param(&req.params, "set-waypoints", "file_name")?;
                Command::SetWaypoints(self.load_waypoints(&name).await?)
            }
            other => return Err(Rejection::UnknownCommand(other.to_string())),
        };

        let count = match &cmd {
            Command::SetWaypoints(route) => Some(route.len()),
            _ => None,
        };
        let transition = lock(&self.mission).apply(cmd, Instant::now())?;
        Ok(match count {
            Some(n) => format!("{} waypoints loaded, {}", n, transition),
            None => transition.to_string(),
        })
    }

    async fn load_waypoints(&self, file_name: &str) -> Result<Route, Rejection> {
        let path = resolve_in_dir(&self.waypoint_dir, file_name)?;
        let format = RouteFormat::from_path(&path).map_err(|e| Rejection::WaypointFile(format!("{:#}", e)))?;
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Rejection::WaypointFile(format!("{}: {}", path.display(), e)))?;
        parse_route(&text, format).map_err(|e| Rejection::WaypointFile(format!("{}: {:#}", file_name, e)))
    }
}

fn resolve_in_dir(dir: &Path, file_name: &str) -> Result<PathBuf, Rejection> {
    let bad = file_name.is_empty()
        || file_name.contains('/')
        || file_name.contains('\\')
        || file_name.contains("..")
        || file_name.starts_with('.');
    if bad {
        return Err(Rejection::BadParams {
            command: "set-waypoints",
            reason: format!("file_name '{}' must be a plain file name", file_name),
        });
    }
    Ok(dir.join(file_name))
}

fn throttle_param(params: &Value) -> Result<f64, Rejection> {
    let bad = |reason: String| Rejection::BadParams { command: "set-max-throttle", reason };
    match params.get("throttle") {
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| bad(format!("throttle {} is not a float", n))),
        Some(Value::String(s)) => {
            s.trim().parse::<f64>().map_err(|_| bad(format!("throttle '{}' is not a number", s)))
        }
        Some(other) => Err(bad(format!("throttle must be a number, got {}", other))),
        None => Err(bad("missing 'throttle'".into())),
    }
}

fn string_param(params: &Value, command: &'static str, key: &str) -> Result<String, Rejection> {
    match params.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(Rejection::BadParams { command, reason: format!("missing string '{}'", key) }),
    }
}
