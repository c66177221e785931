use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::telemetry::{LogEvent, TelemetrySnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Telemetry,
    Log,
    Response,
}

/// One server frame. `message` is JSON text for `telemetry` and `response`,
/// plain text for `log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub message: String,
}

impl Envelope {
    pub fn telemetry(snapshot: &TelemetrySnapshot) -> serde_json::Result<Self> {
        Ok(Self { kind: EnvelopeKind::Telemetry, message: serde_json::to_string(snapshot)? })
    }

    pub fn log(event: &LogEvent) -> Self {
        Self { kind: EnvelopeKind::Log, message: event.message.clone() }
    }

    pub fn response(reply: &CommandReply) -> serde_json::Result<Self> {
        Ok(Self { kind: EnvelopeKind::Response, message: serde_json::to_string(reply)? })
    }

    /// Serialized frame including the trailing newline.
    pub fn to_line(&self) -> serde_json::Result<Vec<u8>> {
        let mut buf = serde_json::to_vec(self)?;
        buf.push(b'\n');
        Ok(buf)
    }
}

/// Result of every command, success or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandReply {
    pub fn ok_with(message: impl Into<String>) -> Self {
        Self { success: true, message: Some(message.into()) }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self { success: false, message: Some(message.into()) }
    }
}

/// A command as received from a client. Parameters stay untyped here; the
/// gateway validates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub params: Value,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into(), params: Value::Null }
    }

    pub fn with_params(command: impl Into<String>, params: Value) -> Self {
        Self { command: command.into(), params }
    }
}

/// Frames a client may send. Anything else is answered with a rejection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Command(CommandRequest),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn log_envelope_uses_type_field() {
        let env = Envelope::log(&LogEvent::new("hello"));
        let v: Value = serde_json::to_value(&env).unwrap();
        assert_eq!(v, json!({"type": "log", "message": "hello"}));
    }

    #[test]
    fn response_message_is_json_string() {
        let env = Envelope::response(&CommandReply::rejected("nope")).unwrap();
        assert_eq!(env.kind, EnvelopeKind::Response);
        let reply: CommandReply = serde_json::from_str(&env.message).unwrap();
        assert!(!reply.success);
        assert_eq!(reply.message.as_deref(), Some("nope"));
    }

    #[test]
    fn reply_without_message_omits_it() {
        let reply = CommandReply { success: true, message: None };
        assert_eq!(serde_json::to_string(&reply).unwrap(), r#"{"success":true}"#);
        let back: CommandReply = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert_eq!(back, reply);
    }

    #[test]
    fn client_command_parses_with_and_without_params() {
        let m: ClientMessage = serde_json::from_str(r#"{"type":"command","command":"run"}"#).unwrap();
        assert_eq!(m, ClientMessage::Command(CommandRequest::new("run")));

        let m: ClientMessage = serde_json::from_str(
            r#"{"type":"command","command":"set-max-throttle","params":{"throttle":0.5}}"#,
        )
        .unwrap();
        let ClientMessage::Command(req) = m;
        assert_eq!(req.params["throttle"], json!(0.5));
    }

    #[test]
    fn unknown_client_type_fails_to_parse() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"subscribe"}"#).is_err());
    }

    #[test]
    fn frame_is_newline_terminated() {
        let line = Envelope::log(&LogEvent::new("x")).to_line().unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);
    }
}
