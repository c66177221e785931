pub mod envelope;
pub mod telemetry;

pub use envelope::{ClientMessage, CommandReply, CommandRequest, Envelope, EnvelopeKind};
pub use telemetry::{LogEvent, MissionState, Pose, Position, TelemetrySnapshot};
