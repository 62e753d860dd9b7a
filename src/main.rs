//! synthctl - MIDI control surface for hardware synths
//!
//! Writes named parameters to a synth as CC or NRPN and keeps a live log of
//! the MIDI traffic in both directions.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use synthctl::cli::{self, Command, Flow};
use synthctl::config::{AppConfig, ConfigWatcher};
use synthctl::controller::{Controller, ControllerOptions};
use synthctl::monitor;
use synthctl::params::ParameterTable;
use synthctl::paths::AppPaths;
use synthctl::ports::{
    InboundMessage, MemoryBackend, MidiBackend, MidirBackend, PortDirection, PortManager,
};

/// Capacity of the backend -> event loop channel
const INBOUND_QUEUE: usize = 1024;

/// synthctl - drive a hardware synth's parameters over MIDI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Print decoded traffic instead of running the REPL
    #[arg(long)]
    monitor: bool,

    /// Input port (id, index, or name substring)
    #[arg(short, long)]
    input: Option<String>,

    /// Output port (id, index, or name substring)
    #[arg(short, long)]
    output: Option<String>,

    /// Send parameter writes as NRPN
    #[arg(long)]
    nrpn: bool,

    /// Use an in-memory loopback port instead of real MIDI hardware
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let paths = match &args.config {
        Some(path) => AppPaths::for_config(path),
        None => AppPaths::detect(),
    };
    let config = if paths.config.exists() {
        AppConfig::load(&paths.config).await?
    } else {
        AppConfig::default()
    };

    if config.log.file {
        paths.ensure_directories()?;
    }
    let _log_guard = init_logging(
        &args.log_level,
        config.log.file.then_some(paths.logs_dir.as_path()),
    )?;

    info!("Starting synthctl v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", paths.config.display());

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
    let ports = PortManager::new(make_backend(&args, &config), inbound_tx);

    if args.list_ports {
        let mut ports = ports;
        ports.refresh().context("Failed to enumerate MIDI ports")?;
        monitor::print_ports(&ports);
        return Ok(());
    }

    let params = load_parameters(&config, &paths.config).await?;
    let mut options = ControllerOptions::from(&config);
    options.nrpn_mode |= args.nrpn;

    let mut controller = Controller::new(params, ports, options);
    if let Err(e) = controller.refresh_ports() {
        warn!("Initial port scan failed: {}", e);
    }

    let input = args.input.as_deref().or(config.midi.input_port.as_deref());
    let output = args.output.as_deref().or(config.midi.output_port.as_deref());
    select_ports(&mut controller, input, output, args.dry_run);

    run_app(controller, config, paths, inbound_rx, &args).await?;

    info!("synthctl shutdown complete");
    Ok(())
}

async fn run_app(
    mut controller: Controller,
    mut config: AppConfig,
    paths: AppPaths,
    mut inbound_rx: mpsc::Receiver<InboundMessage>,
    args: &Args,
) -> Result<()> {
    let mut config_watcher = if paths.config.exists() {
        match ConfigWatcher::new(&paths.config, config.clone()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("Config hot-reload disabled: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    let mut repl = if args.monitor {
        println!("Monitoring MIDI traffic, press Ctrl+C to exit");
        None
    } else {
        println!("synthctl ready, type 'help' for commands");
        Some(cli::spawn_repl()?)
    };

    let mut snapshot_path = config
        .snapshot_path(&paths.config)
        .unwrap_or_else(|| paths.snapshot.clone());
    let mut hotplug = hotplug_interval(config.midi.hotplug_poll_ms);
    let mut printed: u64 = 0;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!("Starting main application loop...");
    if args.monitor {
        printed = print_new_entries(&controller, printed);
    }
    loop {
        tokio::select! {
            Some(message) = inbound_rx.recv() => {
                controller.handle_inbound(message);
            }
            Some(line) = next_line(&mut repl) => {
                let command = match Command::parse(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(e) => {
                        println!("  {}", e);
                        continue;
                    }
                };
                match cli::execute(&mut controller, command, &snapshot_path).await {
                    Ok(Flow::Quit) => break,
                    Ok(Flow::Continue) => {}
                    Err(e) => println!("  {:#}", e),
                }
            }
            _ = hotplug.tick() => {
                if let Err(e) = controller.refresh_ports() {
                    debug!("Port refresh failed: {}", e);
                }
            }
            Some(new_config) = next_config(&mut config_watcher) => {
                info!("Applying reloaded configuration");
                apply_config(&mut controller, &config, &new_config, &paths.config, args).await;
                if new_config.midi.hotplug_poll_ms != config.midi.hotplug_poll_ms {
                    hotplug = hotplug_interval(new_config.midi.hotplug_poll_ms);
                }
                snapshot_path = new_config
                    .snapshot_path(&paths.config)
                    .unwrap_or_else(|| paths.snapshot.clone());
                config = new_config;
            }
            _ = &mut shutdown => break,
        }

        if args.monitor {
            printed = print_new_entries(&controller, printed);
        }
    }

    Ok(())
}

fn make_backend(args: &Args, config: &AppConfig) -> Box<dyn MidiBackend> {
    if !args.dry_run {
        return Box::new(MidirBackend::new(config.midi.client_name.clone()));
    }

    info!("Dry run: using in-memory loopback ports");
    let backend = MemoryBackend::new();
    let handle = backend.handle();
    handle.add_port(PortDirection::Input, "loopback-in", "Loopback");
    handle.add_port(PortDirection::Output, "loopback-out", "Loopback");
    handle.set_loopback("loopback-out", "loopback-in");
    Box::new(backend)
}

/// Select the startup ports; failures are logged, not fatal
fn select_ports(
    controller: &mut Controller,
    input: Option<&str>,
    output: Option<&str>,
    dry_run: bool,
) {
    // A dry run always talks to its loopback pair
    let (input, output) = if dry_run {
        (Some("loopback-in"), Some("loopback-out"))
    } else {
        (input, output)
    };

    if let Some(pattern) = input {
        if let Err(e) = controller.select_input(Some(pattern)) {
            warn!("Could not select input '{}': {}", pattern, e);
        }
    }
    if let Some(pattern) = output {
        if let Err(e) = controller.select_output(Some(pattern)) {
            warn!("Could not select output '{}': {}", pattern, e);
        }
    }
}

async fn load_parameters(config: &AppConfig, config_path: &Path) -> Result<ParameterTable> {
    match config.parameters_path(config_path) {
        Some(path) => ParameterTable::load_from_csv(&path).await,
        None => ParameterTable::default_table(),
    }
}

async fn apply_config(
    controller: &mut Controller,
    old: &AppConfig,
    new: &AppConfig,
    config_path: &Path,
    args: &Args,
) {
    let mut options = ControllerOptions::from(new);
    options.nrpn_mode |= args.nrpn;
    controller.apply_options(options);

    match load_parameters(new, config_path).await {
        Ok(table) => controller.replace_parameters(table),
        Err(e) => warn!("Keeping current parameter table: {:#}", e),
    }

    // Command-line port choices win over the file
    if args.dry_run {
        return;
    }
    if args.input.is_none() && new.midi.input_port != old.midi.input_port {
        if let Err(e) = controller.select_input(new.midi.input_port.as_deref()) {
            warn!("Could not select input: {}", e);
        }
    }
    if args.output.is_none() && new.midi.output_port != old.midi.output_port {
        if let Err(e) = controller.select_output(new.midi.output_port.as_deref()) {
            warn!("Could not select output: {}", e);
        }
    }
}

fn hotplug_interval(poll_ms: u64) -> Interval {
    let mut interval = tokio::time::interval(Duration::from_millis(poll_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Print log entries added since the last call; returns the new total
fn print_new_entries(controller: &Controller, printed: u64) -> u64 {
    let total = controller.log().stats().total_messages;
    let fresh = total.saturating_sub(printed) as usize;
    if fresh > 0 {
        let mut entries: Vec<_> = controller.log().entries().take(fresh).collect();
        entries.reverse();
        for entry in entries {
            monitor::print_entry(entry);
        }
    }
    total
}

async fn next_line(repl: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match repl {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_config(watcher: &mut Option<ConfigWatcher>) -> Option<AppConfig> {
    match watcher {
        Some(watcher) => watcher.next_config().await,
        None => std::future::pending().await,
    }
}

fn init_logging(level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "synthctl.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
