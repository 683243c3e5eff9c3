//! The overlay session
//!
//! The main thread owns the terminal and watches for quit and resize; a named
//! capture thread feeds the active key set. Shutdown is triggered by the main
//! thread and the capture thread is joined before the terminal is restored.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossterm::cursor::{Hide, Show};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use keycast_config::{BackendChoice, CaptureConfig, Config};
use keycast_core::{
    ActiveKeySet, CaptureError, EventSource, NormalizedEvent, Renderer, Shutdown, SourceStateCell,
};

use crate::overlay;
use crate::render::TerminalRenderer;

const CAPTURE_THREAD: &str = "keycast-capture";

/// Configuration file values with command-line overrides applied.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub capture: CaptureConfig,
    pub always_on_top: bool,
    pub poll_interval: Duration,
}

impl RunOptions {
    pub fn merge(config: &Config, backend: Option<BackendChoice>, always_on_top: bool) -> Self {
        let mut capture = config.capture.clone();
        if let Some(backend) = backend {
            capture.backend = backend;
        }

        Self {
            capture,
            always_on_top: always_on_top || config.overlay.always_on_top,
            poll_interval: Duration::from_millis(config.overlay.poll_interval_ms),
        }
    }
}

static OVERLAY_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Whether the overlay owns the terminal. Console logging is muted meanwhile.
pub fn overlay_active() -> bool {
    OVERLAY_ACTIVE.load(Ordering::SeqCst)
}

/// Marks the overlay active until dropped.
struct OverlayScope;

impl OverlayScope {
    fn enter() -> Self {
        OVERLAY_ACTIVE.store(true, Ordering::SeqCst);
        OverlayScope
    }
}

impl Drop for OverlayScope {
    fn drop(&mut self) {
        OVERLAY_ACTIVE.store(false, Ordering::SeqCst);
    }
}

/// Raw mode, alternate screen and hidden cursor for the lifetime of the guard.
struct TerminalGuard {
    _overlay: OverlayScope,
}

impl TerminalGuard {
    fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        // From here on Drop undoes whatever was applied.
        let guard = TerminalGuard {
            _overlay: OverlayScope::enter(),
        };
        execute!(io::stdout(), EnterAlternateScreen, Hide)?;
        Ok(guard)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let mut out = io::stdout();
        let _ = execute!(out, Show, LeaveAlternateScreen);
        let _ = disable_raw_mode();
        let _ = out.flush();
    }
}

/// Pick the concrete backend for `auto`.
pub fn resolve_backend(choice: BackendChoice, display_set: bool) -> BackendChoice {
    match choice {
        BackendChoice::Auto if cfg!(windows) => BackendChoice::Windows,
        BackendChoice::Auto if display_set => BackendChoice::X11,
        BackendChoice::Auto => BackendChoice::Evdev,
        other => other,
    }
}

fn display_set() -> bool {
    std::env::var_os("DISPLAY").is_some_and(|display| !display.is_empty())
}

/// `q` or Ctrl+C. Raw mode turns Ctrl+C into a key event instead of SIGINT.
pub fn is_quit(key: &KeyEvent) -> bool {
    if key.kind != KeyEventKind::Press {
        return false;
    }
    match key.code {
        KeyCode::Char('q') => !key
            .modifiers
            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT),
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

/// Run the selected backend on the current thread until shutdown or failure.
fn capture(
    config: &CaptureConfig,
    sink: &mut dyn FnMut(NormalizedEvent),
    shutdown: &Shutdown,
    state: &SourceStateCell,
) -> Result<(), CaptureError> {
    let backend = resolve_backend(config.backend, display_set());
    tracing::info!("Using {} capture backend", backend);

    match backend {
        #[cfg(target_os = "linux")]
        BackendChoice::X11 => {
            use keycast_core::source::x11::X11Source;
            X11Source::new(config.wait_timeout()).run(sink, shutdown, state)
        }
        #[cfg(target_os = "linux")]
        BackendChoice::Evdev => {
            use keycast_core::source::evdev::EvdevSource;
            EvdevSource::new(config.wait_timeout(), config.devices.clone())
                .run(sink, shutdown, state)
        }
        #[cfg(windows)]
        BackendChoice::Windows => {
            use keycast_core::source::windows::WindowsSource;
            WindowsSource::new(config.wait_timeout()).run(sink, shutdown, state)
        }
        other => Err(CaptureError::Unsupported {
            backend: other.as_str(),
        }),
    }
}

fn spawn_capture<R: Renderer + 'static>(
    config: CaptureConfig,
    active: Arc<ActiveKeySet<R>>,
    shutdown: Shutdown,
    state: SourceStateCell,
) -> io::Result<JoinHandle<Result<(), CaptureError>>> {
    thread::Builder::new()
        .name(CAPTURE_THREAD.to_string())
        .spawn(move || {
            let mut sink = |event: NormalizedEvent| active.apply(&event);
            capture(&config, &mut sink, &shutdown, &state)
        })
}

/// Main-thread loop: quit keys, resize, and capture-thread liveness.
fn watch<R: Renderer>(
    poll_interval: Duration,
    active: &ActiveKeySet<R>,
    capture: &JoinHandle<Result<(), CaptureError>>,
) -> Result<()> {
    while !capture.is_finished() {
        if !event::poll(poll_interval).context("Failed to poll terminal events")? {
            continue;
        }

        match event::read().context("Failed to read terminal event")? {
            Event::Key(key) if is_quit(&key) => {
                tracing::info!("Quit requested from the overlay");
                break;
            }
            Event::Resize(..) => active.refresh(),
            _ => {}
        }
    }
    Ok(())
}

/// Show the overlay until the user quits or capture fails.
pub fn run(options: RunOptions) -> Result<()> {
    let terminal = TerminalGuard::enter().context("Failed to initialize the terminal")?;

    if options.always_on_top {
        overlay::raise_above_others();
    }

    let active = Arc::new(ActiveKeySet::new(TerminalRenderer::stdout()));
    active.refresh();

    let shutdown = Shutdown::new();
    let state = SourceStateCell::new();
    let handle = spawn_capture(
        options.capture.clone(),
        Arc::clone(&active),
        shutdown.clone(),
        state.clone(),
    )
    .context("Failed to start the capture thread")?;

    let watched = watch(options.poll_interval, &active, &handle);

    shutdown.trigger();
    let captured = handle.join();
    tracing::debug!("Capture thread joined in state {}", state.get());
    drop(terminal);

    let captured = match captured {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("The {} thread panicked", CAPTURE_THREAD)),
    };

    watched?;
    captured.context("Input capture failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn test_overlay_scope_mutes_console_logging() {
        assert!(!overlay_active());
        {
            let _overlay = OverlayScope::enter();
            assert!(overlay_active());
        }
        assert!(!overlay_active());
    }

    #[test]
    fn test_quit_keys() {
        assert!(is_quit(&press(KeyCode::Char('q'), KeyModifiers::NONE)));
        assert!(is_quit(&press(KeyCode::Char('c'), KeyModifiers::CONTROL)));
        assert!(!is_quit(&press(KeyCode::Char('c'), KeyModifiers::NONE)));
        assert!(!is_quit(&press(KeyCode::Char('q'), KeyModifiers::ALT)));
        assert!(!is_quit(&press(KeyCode::Esc, KeyModifiers::NONE)));
    }

    #[test]
    fn test_quit_ignores_release() {
        let mut key = press(KeyCode::Char('q'), KeyModifiers::NONE);
        key.kind = KeyEventKind::Release;
        assert!(!is_quit(&key));
    }

    #[test]
    fn test_explicit_backend_kept() {
        assert_eq!(
            resolve_backend(BackendChoice::Evdev, true),
            BackendChoice::Evdev
        );
        assert_eq!(
            resolve_backend(BackendChoice::X11, false),
            BackendChoice::X11
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_auto_backend_follows_display() {
        assert_eq!(resolve_backend(BackendChoice::Auto, true), BackendChoice::X11);
        assert_eq!(
            resolve_backend(BackendChoice::Auto, false),
            BackendChoice::Evdev
        );
    }

    #[test]
    fn test_cli_overrides_config() {
        let mut config = Config::default();
        config.capture.backend = BackendChoice::X11;
        config.overlay.poll_interval_ms = 250;

        let options = RunOptions::merge(&config, Some(BackendChoice::Evdev), true);

        assert_eq!(options.capture.backend, BackendChoice::Evdev);
        assert!(options.always_on_top);
        assert_eq!(options.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_config_used_without_overrides() {
        let mut config = Config::default();
        config.overlay.always_on_top = true;
        config.capture.devices = vec!["Keychron K3 Pro".to_string()];

        let options = RunOptions::merge(&config, None, false);

        assert_eq!(options.capture.backend, BackendChoice::Auto);
        assert!(options.always_on_top);
        assert_eq!(options.capture.devices, ["Keychron K3 Pro"]);
    }

    #[cfg(not(windows))]
    #[test]
    fn test_windows_backend_unsupported_here() {
        let shutdown = Shutdown::new();
        let state = SourceStateCell::new();
        let config = CaptureConfig {
            backend: BackendChoice::Windows,
            ..CaptureConfig::default()
        };

        let result = capture(&config, &mut |_| {}, &shutdown, &state);

        assert!(matches!(
            result,
            Err(CaptureError::Unsupported {
                backend: "windows"
            })
        ));
    }
}
