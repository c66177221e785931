use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use avc_control::driver::LogDriver;
use avc_control::nmea::{NmeaConfig, NmeaSource};
use avc_control::sim::{SimConfig, Simulator};
use avc_control::{doctor as control_doctor, Command as MissionCommand, CommandGateway, ControlConfig, Controller};
use avc_control::{Driver, Mission, TelemetrySource};
use avc_monitor::{doctor as monitor_doctor, BroadcastLayer, Broadcaster, MonitorConfig, ObserverServer};
use avc_nav::gnss::GnssReader;
use avc_nav::{distance_m, doctor as nav_doctor, load_route, relative_bearing_deg, NavigatorConfig};

#[derive(Debug, Parser)]
#[command(name = "avc", version, about = "AVC rover mission control")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration and referenced files.
    Doctor,
    /// Start the control loop and the observer server.
    Run,
    Waypoints {
        #[command(subcommand)]
        cmd: WaypointsCmd,
    },
}

#[derive(Debug, Subcommand)]
enum WaypointsCmd {
    /// Print a waypoint file resolved to planar meters, with leg lengths.
    Inspect { file: PathBuf },
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    #[serde(default)]
    control: ControlConfig,
    nav: NavCfg,
    #[serde(default)]
    monitor: MonitorConfig,
    telemetry: TelemetryCfg,
    #[serde(default)]
    sim: SimConfig,
    driver: DriverCfg,
}

#[derive(Debug, serde::Deserialize)]
struct NavCfg {
    #[serde(flatten)]
    navigator: NavigatorConfig,
    /// Directory `set-waypoints` resolves file names in.
    waypoint_dir: String,
    /// Optional route loaded at startup, relative to `waypoint_dir`.
    waypoints: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct TelemetryCfg {
    /// "sim", "nmea-serial" or "nmea-file"
    source: String,
    nmea_device: Option<String>,
    baud: Option<u32>,
    nmea_file: Option<String>,
    replay_interval_ms: Option<u64>,
    #[serde(flatten)]
    nmea: NmeaConfig,
}

#[derive(Debug, serde::Deserialize)]
struct DriverCfg {
    /// "sim" or "log"
    kind: String,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    let broadcaster = Arc::new(Broadcaster::new(cfg.monitor.observer_queue));
    let forward = cfg.monitor.forward_logs.then(|| BroadcastLayer::new(broadcaster.clone()));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(filter))
        .with(forward)
        .init();

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Run => run(&cfg, broadcaster).await?,
        Command::Waypoints { cmd } => waypoints_cmd(cmd)?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    nav_doctor::check_navigator(&cfg.nav.navigator)?;
    nav_doctor::check_waypoint_dir(Path::new(&cfg.nav.waypoint_dir))?;
    if let Some(name) = &cfg.nav.waypoints {
        let route = nav_doctor::check_route(&Path::new(&cfg.nav.waypoint_dir).join(name), &cfg.nav.navigator)?;
        info!("doctor: startup route {} has {} waypoints", name, route.len());
    }
    control_doctor::check_control(&cfg.control)?;
    monitor_doctor::check_monitor(&cfg.monitor)?;

    match cfg.telemetry.source.as_str() {
        "sim" => {}
        "nmea-serial" => {
            anyhow::ensure!(
                cfg.telemetry.nmea_device.as_ref().map(|s| !s.is_empty()).unwrap_or(false),
                "telemetry.nmea_device missing"
            );
            nav_doctor::check_gnss_thresholds(cfg.telemetry.nmea.stale_after_ms, cfg.telemetry.nmea.uere_m)?;
        }
        "nmea-file" => {
            let file = cfg.telemetry.nmea_file.as_ref().context("telemetry.nmea_file missing")?;
            anyhow::ensure!(Path::new(file).is_file(), "telemetry.nmea_file not found: {}", file);
            nav_doctor::check_gnss_thresholds(cfg.telemetry.nmea.stale_after_ms, cfg.telemetry.nmea.uere_m)?;
        }
        other => anyhow::bail!("unknown telemetry.source: {}", other),
    }
    match cfg.driver.kind.as_str() {
        "sim" if cfg.telemetry.source != "sim" => {
            warn!("doctor: sim driver with a real telemetry source; the rover will not move")
        }
        "log" if cfg.telemetry.source == "sim" => {
            warn!("doctor: log driver with sim telemetry; the simulated rover will not move")
        }
        "sim" | "log" => {}
        other => anyhow::bail!("unknown driver.kind: {}", other),
    }

    info!("doctor: OK");
    Ok(())
}

fn waypoints_cmd(cmd: WaypointsCmd) -> Result<()> {
    match cmd {
        WaypointsCmd::Inspect { file } => {
            let route = load_route(&file)?;
            let origin = route.frame.origin();
            println!("origin lat={:.7} lon={:.7} waypoints={}", origin.lat, origin.lon, route.len());
            let mut total = 0.0;
            for (i, (geo, wp)) in route.points.iter().zip(&route.waypoints).enumerate() {
                let p = wp.position;
                print!("{:>3} lat={:.7} lon={:.7} x={:>9.2} y={:>9.2}", i, geo.lat, geo.lon, p.x_m, p.y_m);
                if i > 0 {
                    let prev = route.waypoints[i - 1].position;
                    let leg = distance_m(prev, p);
                    total += leg;
                    print!(" leg={:.1}m bearing={:.1}", leg, relative_bearing_deg(prev, p));
                }
                println!();
            }
            println!("total={:.1}m", total);
            Ok(())
        }
    }
}

async fn run(cfg: &Config, broadcaster: Arc<Broadcaster>) -> Result<()> {
    info!("run: starting");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut mission = Mission::new(cfg.control.mission, cfg.nav.navigator, Instant::now());
    if let Some(name) = &cfg.nav.waypoints {
        let route = load_route(&Path::new(&cfg.nav.waypoint_dir).join(name))?;
        info!("run: loaded {} waypoints from {}", route.len(), name);
        mission
            .apply(MissionCommand::SetWaypoints(route), Instant::now())
            .map_err(|e| anyhow::anyhow!("startup route rejected: {}", e))?;
    }
    let mission = Arc::new(Mutex::new(mission));

    let sim = Arc::new(Simulator::new(cfg.sim.clone()));
    let source: Arc<dyn TelemetrySource> = match cfg.telemetry.source.as_str() {
        "sim" => sim.clone(),
        "nmea-serial" => {
            let dev = cfg.telemetry.nmea_device.as_ref().context("telemetry.nmea_device missing")?;
            let reader = GnssReader::serial(dev, cfg.telemetry.baud.unwrap_or(9600))?;
            let (src, _reader_task) = NmeaSource::spawn(cfg.telemetry.nmea.clone(), reader);
            Arc::new(src)
        }
        "nmea-file" => {
            let file = cfg.telemetry.nmea_file.as_ref().context("telemetry.nmea_file missing")?;
            let pace = Duration::from_millis(cfg.telemetry.replay_interval_ms.unwrap_or(200));
            let reader = GnssReader::file(file, pace).await?;
            let (src, _reader_task) = NmeaSource::spawn(cfg.telemetry.nmea.clone(), reader);
            Arc::new(src)
        }
        other => anyhow::bail!("unknown telemetry.source: {}", other),
    };
    let driver: Arc<dyn Driver> = match cfg.driver.kind.as_str() {
        "sim" => sim.clone(),
        "log" => Arc::new(LogDriver::new()),
        other => anyhow::bail!("unknown driver.kind: {}", other),
    };

    let gateway = CommandGateway::new(mission.clone(), &cfg.nav.waypoint_dir, shutdown_rx.clone());
    let server = ObserverServer::bind(&cfg.monitor.listen, broadcaster.clone(), gateway).await?;
    let server_task = tokio::spawn(server.run(shutdown_rx.clone()));

    let controller = Controller::new(cfg.control.clone(), mission, source, driver, broadcaster.clone());
    let mut control_task = tokio::spawn(controller.run(shutdown_rx));

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r.context("listen for ctrl-c")?;
            info!("run: shutdown requested");
        }
        r = &mut control_task => {
            warn!("run: control loop exited early");
            r.context("control task")??;
        }
    }

    shutdown_tx.send_replace(true);
    if !control_task.is_finished() {
        control_task.await.context("control task")??;
    }
    server_task.await.context("observer server task")??;
    broadcaster.close();
    info!("run: stopped");
    Ok(())
}
