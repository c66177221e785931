use avc_proto::LogEvent;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::broadcast::{Broadcaster, TARGET};

/// Forwards `INFO` and more severe events to observers as `log` frames.
pub struct BroadcastLayer {
    broadcaster: Arc<Broadcaster>,
}

impl BroadcastLayer {
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self { broadcaster }
    }
}

impl<S: Subscriber> Layer<S> for BroadcastLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        // More verbose levels compare greater.
        if *meta.level() > Level::INFO || meta.target().starts_with(TARGET) {
            return;
        }
        let mut line = LineVisitor::default();
        event.record(&mut line);
        self.broadcaster.publish_log(&LogEvent::new(line.finish(meta.level())));
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn finish(self, level: &Level) -> String {
        if self.fields.is_empty() {
            format!("{} {}", level, self.message)
        } else {
            format!("{} {}{}", level, self.message, self.fields)
        }
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avc_proto::{Envelope, EnvelopeKind};
    use tracing_subscriber::layer::SubscriberExt;

    fn drain(rx: &mut tokio::sync::mpsc::Receiver<bytes::Bytes>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let env: Envelope = serde_json::from_slice(&frame).unwrap();
            assert_eq!(env.kind, EnvelopeKind::Log);
            out.push(env.message);
        }
        out
    }

    #[test]
    fn forwards_info_and_above_with_fields() {
        let b = Arc::new(Broadcaster::new(16));
        let mut obs = b.attach().unwrap();
        let subscriber = tracing_subscriber::registry().with(BroadcastLayer::new(b.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("too chatty");
            tracing::info!(waypoint = 2, "waypoint reached");
            tracing::warn!("sensor fault 1/3");
            tracing::warn!(target: TARGET, "dropping observer");
        });

        let lines = drain(&mut obs.rx);
        assert_eq!(lines, vec!["INFO waypoint reached waypoint=2".to_string(), "WARN sensor fault 1/3".to_string()]);
    }
}
