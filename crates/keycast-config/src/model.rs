//! Configuration data model

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub global: GlobalConfig,
    pub capture: CaptureConfig,
    pub overlay: OverlayConfig,
}

/// Global settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalConfig {
    pub log_level: LogLevel,
    /// Write diagnostics here instead of stderr (the overlay owns the terminal).
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// Which global input facility to subscribe to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendChoice {
    /// Windows hooks on Windows; X11 when `DISPLAY` is set, evdev otherwise.
    #[default]
    Auto,
    X11,
    Evdev,
    Windows,
}

impl std::str::FromStr for BackendChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "x11" | "xinput" | "xinput2" => Ok(Self::X11),
            "evdev" => Ok(Self::Evdev),
            "windows" | "win32" => Ok(Self::Windows),
            _ => Err(format!(
                "Unknown capture backend: {} (expected auto, x11, evdev or windows)",
                s
            )),
        }
    }
}

impl BackendChoice {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendChoice::Auto => "auto",
            BackendChoice::X11 => "x11",
            BackendChoice::Evdev => "evdev",
            BackendChoice::Windows => "windows",
        }
    }
}

impl fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input capture settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    pub backend: BackendChoice,
    /// Upper bound on how long the capture thread waits before re-checking
    /// the shutdown flag.
    pub wait_timeout_ms: u64,
    /// Device names the evdev backend observes. Empty means every keyboard
    /// and pointer.
    pub devices: Vec<String>,
}

impl CaptureConfig {
    pub const WAIT_TIMEOUT_RANGE: (u64, u64) = (1, 1000);

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: BackendChoice::Auto,
            wait_timeout_ms: 100,
            devices: Vec::new(),
        }
    }
}

/// Terminal overlay settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    pub always_on_top: bool,
    /// Cadence of the quit-key poll on the main thread.
    pub poll_interval_ms: u64,
}

impl OverlayConfig {
    pub const POLL_INTERVAL_RANGE: (u64, u64) = (10, 1000);
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            always_on_top: false,
            poll_interval_ms: 100,
        }
    }
}
