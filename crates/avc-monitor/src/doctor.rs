use anyhow::{Context, Result};
use std::net::SocketAddr;

use crate::MonitorConfig;

pub fn check_monitor(cfg: &MonitorConfig) -> Result<()> {
    let addr: SocketAddr = cfg
        .listen
        .parse()
        .with_context(|| format!("monitor.listen is not host:port: {}", cfg.listen))?;
    if addr.ip().is_unspecified() {
        tracing::warn!("monitor.listen {} accepts commands from any interface", addr);
    }
    anyhow::ensure!(cfg.observer_queue >= 4, "monitor.observer_queue too small; set >= 4");
    anyhow::ensure!(cfg.observer_queue <= 4096, "monitor.observer_queue unreasonably large");
    Ok(())
}
