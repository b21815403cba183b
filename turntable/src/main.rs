//! Turntable control core entry point: loads configuration, wires up the
//! device links and PID supervisor, and serves the remote command
//! protocol until a `HALT` command or Ctrl-C is received.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use turntable_common::config::SettingsStore;
use turntable_common::events::EventBus;
use turntable_common::zero_point::ZeroPointStore;
use turntable_devices::encoder::ShaftEncoder;
use turntable_devices::link::DeviceLink;
use turntable_devices::motor::MotorController;
use turntable_devices::watchdog::Watchdog;
use turntable_server::RemoteCommandServer;
use turntable_supervisor::TurntableSupervisor;

/// Turntable control core: motor, encoder, and watchdog device links
/// driven by a PID go-to-position supervisor, exposed over a line-oriented
/// remote command server.
#[derive(Parser, Debug)]
#[command(name = "turntable")]
#[command(version)]
#[command(about = "Azimuth turntable control core")]
struct Args {
    /// Path to the settings file (created with defaults if absent).
    #[arg(short, long, default_value = "turntable.toml")]
    config: PathBuf,

    /// Path to the zero-point store (created with a single default entry
    /// if absent).
    #[arg(short, long, default_value = "zero_points.xml")]
    zero_points: PathBuf,

    /// Override the remote command server bind address (`host:port`),
    /// ignoring `tcp.ip`/`tcp.port` from the settings file.
    #[arg(short, long)]
    bind: Option<String>,

    /// Enable debug-level logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON instead of human-readable text.
    #[arg(long)]
    json: bool,
}

fn setup_tracing(args: &Args) {
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    setup_tracing(&args);

    info!("turntable control core v{} starting", env!("CARGO_PKG_VERSION"));

    let settings = SettingsStore::load_or_create(&args.config)?;
    let zero_points = ZeroPointStore::load_or_create(&args.zero_points)?;
    let events = EventBus::default();

    let snapshot = settings.snapshot();

    let watchdog_link = Arc::new(DeviceLink::new(
        "watchdog",
        snapshot.turntable.ip.clone(),
        snapshot.watchdog.port,
        Duration::from_secs_f64(snapshot.turntable.timeout_s),
    ));
    let watchdog = Arc::new(Watchdog::new(
        watchdog_link,
        Duration::from_secs_f64(snapshot.watchdog.trigger_period),
    ));

    let motor_link = Arc::new(DeviceLink::new(
        "motor",
        snapshot.turntable.ip.clone(),
        snapshot.motor.port,
        Duration::from_secs_f64(snapshot.turntable.timeout_s),
    ));
    let motor = Arc::new(MotorController::new(
        motor_link,
        watchdog,
        snapshot.motor.min_voltage,
        snapshot.motor.max_voltage,
        Duration::from_secs_f64(snapshot.motor.update_period),
    ));

    let encoder_link = Arc::new(DeviceLink::new(
        "encoder",
        snapshot.turntable.ip.clone(),
        snapshot.encoder.port,
        Duration::from_secs_f64(snapshot.turntable.timeout_s),
    ));
    let encoder = Arc::new(ShaftEncoder::new(
        encoder_link,
        Duration::from_secs_f64(snapshot.encoder.sample_period),
    ));

    let supervisor = TurntableSupervisor::new(motor, encoder, settings.clone(), zero_points, events);
    supervisor.connect().await;
    supervisor.start();

    let server = RemoteCommandServer::new(Arc::clone(&supervisor), settings.clone(), supervisor.tcp_connected_flag());
    let bind_addr = args
        .bind
        .clone()
        .unwrap_or_else(|| format!("{}:{}", snapshot.tcp.ip, snapshot.tcp.port));

    let server_for_run = Arc::clone(&server);
    let serve = async move {
        if let Err(err) = server_for_run.run(bind_addr).await {
            error!(%err, "remote command server exited with an error");
        }
    };

    tokio::select! {
        () = serve => {
            info!("remote command server stopped, shutting down");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                error!(%err, "unable to listen for the shutdown signal");
            } else {
                info!("received shutdown signal");
            }
            server.shutdown();
        }
    }

    supervisor.stop().await;
    info!("turntable control core shutdown complete");
    Ok(())
}
