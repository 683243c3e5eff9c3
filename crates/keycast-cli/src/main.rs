//! keycast CLI
//!
//! Shows the keys and mouse buttons currently held down anywhere on the
//! desktop, centered in the terminal.

mod app;
mod overlay;
mod render;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use keycast_config::{BackendChoice, Config, LogLevel};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::EnvFilter;

use crate::app::RunOptions;

#[derive(Parser, Debug)]
#[command(name = "keycast")]
#[command(about = "Show the keys and mouse buttons currently held down")]
#[command(version)]
struct Cli {
    /// Path to configuration file [default: ~/.config/keycast/config.kdl]
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Capture backend: auto, x11, evdev or windows
    #[arg(short, long, global = true)]
    backend: Option<BackendChoice>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Write logs to this file instead of stderr (stderr is muted while the overlay is shown)
    #[arg(long, global = true)]
    log_file: Option<String>,

    /// Ask the window manager to keep the terminal above other windows
    #[arg(long, global = true)]
    always_on_top: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Commands {
    /// Show the overlay (default)
    Run,

    /// List input devices and whether evdev capture observes them
    Devices {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Validate the configuration file
    Validate,
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref().map(expand);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Validate => {
            init_tracing(cli.log_level.unwrap_or_default(), cli.log_file.as_deref())?;
            cmd_validate(config_path.as_deref())
        }
        Commands::Devices { json } => {
            init_tracing(cli.log_level.unwrap_or_default(), cli.log_file.as_deref())?;
            cmd_devices(json)
        }
        Commands::Run => cmd_run(&cli, config_path.as_deref()),
    }
}

fn expand(path: &str) -> PathBuf {
    shellexpand::tilde(path).into_owned().into()
}

/// Stderr, except while the overlay owns the terminal.
fn console_writer() -> BoxMakeWriter {
    BoxMakeWriter::new(std::io::stderr.with_filter(|_| !app::overlay_active()))
}

/// Initialize tracing. `RUST_LOG` wins over the configured level.
fn init_tracing(level: LogLevel, log_file: Option<&str>) -> miette::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    let (writer, ansi) = match log_file {
        Some(path) => {
            let path = expand(path);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| {
                    miette::miette!("Failed to open log file {}: {}", path.display(), e)
                })?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (console_writer(), true),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .init();

    Ok(())
}

fn cmd_run(cli: &Cli, config_path: Option<&Path>) -> miette::Result<()> {
    // Config comes first since it may set the log level and file.
    let (config, loaded_from) = keycast_config::load_config(config_path)?;

    let log_level = cli.log_level.unwrap_or(config.global.log_level);
    let log_file = cli
        .log_file
        .clone()
        .or_else(|| config.global.log_file.as_ref().map(|p| p.display().to_string()));
    init_tracing(log_level, log_file.as_deref())?;

    match &loaded_from {
        Some(path) => tracing::info!("Loaded configuration from {}", path.display()),
        None => tracing::info!("No configuration file, using defaults"),
    }

    let options = RunOptions::merge(&config, cli.backend, cli.always_on_top);
    app::run(options).map_err(|e| miette::miette!("{:#}", e))
}

fn cmd_validate(config_path: Option<&Path>) -> miette::Result<()> {
    let (config, loaded_from) = keycast_config::load_config(config_path)?;

    match loaded_from {
        Some(path) => println!("Configuration is valid: {}", path.display()),
        None => println!(
            "No configuration file at {}, defaults apply",
            keycast_config::DEFAULT_CONFIG_PATH
        ),
    }
    print_summary(&config);
    Ok(())
}

fn print_summary(config: &Config) {
    println!("  Log level: {}", config.global.log_level.as_filter());
    if let Some(file) = &config.global.log_file {
        println!("  Log file: {}", file.display());
    }
    println!("  Backend: {}", config.capture.backend);
    println!("  Wait timeout: {} ms", config.capture.wait_timeout_ms);
    if config.capture.devices.is_empty() {
        println!("  Devices: all devices with keys or buttons");
    } else {
        println!("  Devices:");
        for device in &config.capture.devices {
            println!("    - {}", device);
        }
    }
    println!("  Always on top: {}", config.overlay.always_on_top);
    println!("  Poll interval: {} ms", config.overlay.poll_interval_ms);
}

#[cfg(target_os = "linux")]
fn cmd_devices(json: bool) -> miette::Result<()> {
    use keycast_core::device::{enumerate_devices, DeviceInfo};
    use miette::IntoDiagnostic;
    use serde::Serialize;

    #[derive(Serialize)]
    struct DeviceReport {
        #[serde(flatten)]
        info: DeviceInfo,
        captured: bool,
    }

    let devices = enumerate_devices().into_diagnostic()?;

    if json {
        let report: Vec<DeviceReport> = devices
            .into_iter()
            .map(|info| DeviceReport {
                captured: info.kind.is_captured(),
                info,
            })
            .collect();
        let out = serde_json::to_string_pretty(&report).into_diagnostic()?;
        println!("{}", out);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No readable input devices. Is the user in the `input` group?");
        return Ok(());
    }

    println!("Available input devices:\n");
    for device in &devices {
        let marker = if device.kind.is_captured() {
            "captured"
        } else {
            "ignored"
        };
        println!("  {} [{}, {}]", device.name, device.kind, marker);
        println!("    Path: {}", device.path.display());
        println!("    ID: {}", device.vendor_product());
        println!();
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn cmd_devices(_json: bool) -> miette::Result<()> {
    Err(miette::miette!(
        "Device listing reads /dev/input and is only available on Linux"
    ))
}
