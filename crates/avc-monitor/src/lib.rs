pub mod broadcast;
pub mod doctor;
pub mod log_layer;
pub mod server;

use serde::Deserialize;

pub use broadcast::{Broadcaster, Observer};
pub use log_layer::BroadcastLayer;
pub use server::ObserverServer;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Address observers connect to, e.g. "0.0.0.0:8740".
    pub listen: String,

    /// Frames buffered per observer before it is dropped as a slow consumer.
    pub observer_queue: usize,

    /// Forward INFO and above log lines to observers.
    pub forward_logs: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { listen: "127.0.0.1:8740".into(), observer_queue: 32, forward_logs: true }
    }
}
