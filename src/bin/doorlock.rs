//! `doorlock` binary: the bridge daemon plus one-shot maintenance commands.

use anyhow::Context;
use clap::{Parser, Subcommand};
use doorlock::bus::{MqttBus, MqttListener};
use doorlock::controller::{DoorController, run_command_worker};
use doorlock::device::{AdbChannel, RemoteChannel};
use doorlock::scheduler::Scheduler;
use doorlock::{DoorlockConfig, LockAction};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long to wait for the MQTT event loop to flush after a disconnect.
const BUS_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Bridge between an MQTT broker and a smart door lock's Android app.
#[derive(Parser)]
#[command(name = "doorlock", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Initialize the device, then serve bus commands and scheduled tasks.
    Run,

    /// Classify the lock once and publish the result.
    Check,

    /// Lock the door once.
    Lock,

    /// Unlock the door once.
    Unlock,

    /// Run the initialization sequence only.
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = DoorlockConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let _log_guard = doorlock::logging::init(&config.logging).context("initializing logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        device = %config.device.serial,
        broker = %config.bus.broker,
        "doorlock bridge starting"
    );

    let channel: Arc<dyn RemoteChannel> = Arc::new(AdbChannel::new(&config.device));
    let (bus, listener) = MqttBus::new(&config.bus);
    let bus = Arc::new(bus);
    let controller = Arc::new(DoorController::new(&config, channel, bus.clone()));

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_daemon(&config, controller, &bus, listener).await,
        command => run_once(command, &controller, &bus, listener).await,
    }
}

async fn run_daemon(
    config: &DoorlockConfig,
    controller: Arc<DoorController>,
    bus: &MqttBus,
    listener: MqttListener,
) -> anyhow::Result<()> {
    if let Err(e) = controller.initialize().await {
        error!(error = %e, "initialization failed, exiting");
        return Err(e).context("initialization failed");
    }

    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(16);
    let listener = listener.run(tx);
    let worker = run_command_worker(Arc::clone(&controller), rx, cancel.clone());
    let scheduler = Scheduler::from_config(
        Arc::clone(&controller),
        &config.schedule,
        chrono::Local::now().naive_local(),
    )
    .run(cancel.clone());

    shutdown_signal().await;
    info!("shutdown requested");
    cancel.cancel();

    for (name, handle) in [("scheduler", scheduler), ("command worker", worker)] {
        if let Err(e) = handle.await {
            warn!(task = name, error = %e, "task ended abnormally");
        }
    }
    controller.shutdown().await;
    drain_bus(bus, listener).await;

    info!("doorlock bridge stopped");
    Ok(())
}

async fn run_once(
    command: Command,
    controller: &DoorController,
    bus: &MqttBus,
    listener: MqttListener,
) -> anyhow::Result<()> {
    // Nothing consumes bus commands in one-shot mode; a closed receiver lets
    // the listener drop them and keep polling.
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let listener = listener.run(tx);

    let outcome = match command {
        Command::Check => {
            let state = controller.check_status().await;
            println!("{state}");
            Ok(())
        }
        Command::Lock | Command::Unlock => {
            let action = if matches!(command, Command::Lock) {
                LockAction::Lock
            } else {
                LockAction::Unlock
            };
            let report = controller.apply(action).await;
            println!("{}", report.published);
            if report.succeeded() {
                Ok(())
            } else {
                Err(anyhow::anyhow!(
                    "{action} did not complete: {:?} after {} attempts",
                    report.resolution,
                    report.attempts
                ))
            }
        }
        Command::Init => controller
            .initialize()
            .await
            .context("initialization failed"),
        Command::Run => Ok(()),
    };

    drain_bus(bus, listener).await;
    outcome
}

async fn drain_bus(bus: &MqttBus, listener: tokio::task::JoinHandle<()>) {
    if let Err(e) = bus.disconnect().await {
        warn!(error = %e, "MQTT disconnect failed");
    }
    let abort = listener.abort_handle();
    if tokio::time::timeout(BUS_DRAIN_TIMEOUT, listener).await.is_err() {
        warn!("MQTT listener did not stop in time, aborting");
        abort.abort();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
