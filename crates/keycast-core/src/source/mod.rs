//! Global input event sources
//!
//! Every backend follows the same shape: [`EventSource::open`] subscribes to
//! the platform facility and returns a [`Connection`]; the provided
//! [`EventSource::run`] drives it until shutdown and drops it exactly once.
//!
//! ```text
//!  ┌──────┐  open ok   ┌───────────┐  shutdown seen   ┌──────────────┐  released  ┌────────┐
//!  │ IDLE │ ─────────► │ CONNECTED │ ───────────────► │ SHUTTINGDOWN │ ─────────► │ CLOSED │
//!  └──┬───┘            └─────┬─────┘                  └──────────────┘            └────────┘
//!     │ open failed          │ irrecoverable error                                    ▲
//!     └──────────────────────┴────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Bounded waits
//!
//! [`Connection::pump`] waits for input at most the backend's wait timeout, so
//! the shutdown flag is re-checked even when the user is idle. Backends whose
//! wait cannot be bounded hand out an [`Interrupter`] that forces the wait to
//! return; an error surfaced after shutdown is read as a stop request.

#[cfg(target_os = "linux")]
pub mod evdev;
#[cfg(target_os = "linux")]
mod poll;
pub mod scripted;
#[cfg(windows)]
pub mod windows;
#[cfg(target_os = "linux")]
pub mod x11;

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

use crate::name::{button, DisplayName, KeyCode, KeyNameResolver, SymbolLookup};
use crate::shutdown::{Interrupter, Shutdown};

/// A resolved press or release, ready for the active key set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEvent {
    pub name: DisplayName,
    pub is_press: bool,
}

impl NormalizedEvent {
    pub fn press(name: DisplayName) -> Self {
        Self {
            name,
            is_press: true,
        }
    }

    pub fn release(name: DisplayName) -> Self {
        Self {
            name,
            is_press: false,
        }
    }
}

/// A classified native event before name resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawInput {
    Key { code: KeyCode, pressed: bool },
    /// Pointer button, X11 numbering (see [`crate::name::button`])
    Button { number: u32, pressed: bool },
}

impl RawInput {
    /// A wheel notch has no release, so it becomes a press and release of the
    /// matching scroll button.
    pub fn wheel(delta: i32) -> Option<[RawInput; 2]> {
        let number = match delta.signum() {
            1 => button::SCROLL_UP,
            -1 => button::SCROLL_DOWN,
            _ => return None,
        };
        Some([
            RawInput::Button {
                number,
                pressed: true,
            },
            RawInput::Button {
                number,
                pressed: false,
            },
        ])
    }

    /// Resolve to a display name. Keys without a name are dropped.
    pub fn normalize<L: SymbolLookup>(
        self,
        resolver: &KeyNameResolver<L>,
    ) -> Option<NormalizedEvent> {
        let (name, pressed) = match self {
            RawInput::Key { code, pressed } => (resolver.resolve_key(code)?, pressed),
            RawInput::Button { number, pressed } => (resolver.resolve_button(number), pressed),
        };
        Some(NormalizedEvent {
            name,
            is_press: pressed,
        })
    }
}

/// Errors raised while subscribing to or reading global input
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Failed to load {library}: {reason}")]
    LibraryUnavailable {
        library: &'static str,
        reason: String,
    },

    #[error("Cannot open X display {display} - is an X server running?")]
    DisplayUnavailable { display: String },

    #[error("{extension} extension not available")]
    ExtensionMissing { extension: &'static str },

    #[error("No readable keyboard or pointer devices found - is the user in the `input` group?")]
    NoDevices,

    #[error("Failed to install {hook} hook: {reason}")]
    HookInstall { hook: &'static str, reason: String },

    #[error("Connection to the input facility was lost")]
    ConnectionLost,

    #[error("The {backend} capture backend is not available on this platform")]
    Unsupported { backend: &'static str },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle of a running source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceState {
    #[default]
    Idle,
    Connected,
    ShuttingDown,
    Closed,
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceState::Idle => write!(f, "idle"),
            SourceState::Connected => write!(f, "connected"),
            SourceState::ShuttingDown => write!(f, "shutting down"),
            SourceState::Closed => write!(f, "closed"),
        }
    }
}

/// Shared view of a source's [`SourceState`], readable from other threads.
#[derive(Debug, Clone, Default)]
pub struct SourceStateCell {
    state: Arc<Mutex<SourceState>>,
}

impl SourceStateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> SourceState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, next: SourceState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            tracing::debug!("Capture state: {} -> {}", *state, next);
            *state = next;
        }
    }
}

/// Outcome of one [`Connection::pump`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pump {
    /// Events (or none, after the timeout) were delivered; keep going.
    Continue,
    /// The wait was torn down by an interrupter.
    Interrupted,
    /// The source has nothing more to deliver.
    EndOfStream,
}

/// An open subscription to global input. Dropping it releases the OS
/// resources.
pub trait Connection {
    /// Wait (bounded) for input and deliver resolved events to `sink`.
    fn pump(&mut self, sink: &mut dyn FnMut(NormalizedEvent)) -> Result<Pump, CaptureError>;

    /// Action that unblocks `pump` from another thread, if the wait needs one.
    fn interrupter(&self) -> Option<Interrupter> {
        None
    }
}

/// A platform facility for system-wide keyboard and mouse input.
pub trait EventSource {
    type Connection: Connection;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Subscribe to the platform facility.
    fn open(&mut self) -> Result<Self::Connection, CaptureError>;

    /// Deliver events to `sink` until `shutdown` triggers or the connection
    /// fails.
    ///
    /// An open failure is logged and returned without entering the loop. The
    /// connection is released before this returns, on every path.
    fn run(
        &mut self,
        sink: &mut dyn FnMut(NormalizedEvent),
        shutdown: &Shutdown,
        state: &SourceStateCell,
    ) -> Result<(), CaptureError>
    where
        Self: Sized,
    {
        let name = self.name();
        state.set(SourceState::Idle);

        let mut connection = match self.open() {
            Ok(connection) => connection,
            Err(e) => {
                tracing::error!("Failed to open {} input capture: {}", name, e);
                state.set(SourceState::Closed);
                return Err(e);
            }
        };

        state.set(SourceState::Connected);
        tracing::info!("{} input capture connected", name);

        if let Some(interrupter) = connection.interrupter() {
            shutdown.register(interrupter);
        }

        let mut delivered: u64 = 0;
        let result = loop {
            if shutdown.is_triggered() {
                break Ok(());
            }

            let pumped = connection.pump(&mut |event| {
                delivered += 1;
                sink(event);
            });

            match pumped {
                Ok(Pump::Continue) => {}
                Ok(Pump::Interrupted) => break Ok(()),
                Ok(Pump::EndOfStream) => {
                    tracing::info!("{} input capture reached end of stream", name);
                    break Ok(());
                }
                Err(e) if shutdown.is_triggered() => {
                    tracing::debug!("{} wait ended during shutdown: {}", name, e);
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
        };

        match &result {
            Ok(()) => state.set(SourceState::ShuttingDown),
            Err(e) => tracing::error!("{} input capture failed: {}", name, e),
        }

        drop(connection);
        state.set(SourceState::Closed);
        tracing::info!(events = delivered, "{} input capture closed", name);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::SpecialKeyMap;
    use std::collections::HashMap;

    #[test]
    fn test_wheel_expands_to_press_and_release() {
        let up = RawInput::wheel(120).unwrap();
        assert_eq!(
            up,
            [
                RawInput::Button {
                    number: button::SCROLL_UP,
                    pressed: true
                },
                RawInput::Button {
                    number: button::SCROLL_UP,
                    pressed: false
                },
            ]
        );

        let down = RawInput::wheel(-1).unwrap();
        assert!(matches!(
            down[0],
            RawInput::Button {
                number: button::SCROLL_DOWN,
                pressed: true
            }
        ));

        assert!(RawInput::wheel(0).is_none());
    }

    #[test]
    fn test_normalize_drops_unnamed_keys() {
        let resolver = KeyNameResolver::new(SpecialKeyMap::evdev(), HashMap::new());
        let raw = RawInput::Key {
            code: KeyCode(999),
            pressed: true,
        };
        assert!(raw.normalize(&resolver).is_none());
    }

    #[test]
    fn test_normalize_keeps_unknown_buttons() {
        let resolver = KeyNameResolver::new(SpecialKeyMap::evdev(), HashMap::new());
        let raw = RawInput::Button {
            number: 42,
            pressed: false,
        };
        let event = raw.normalize(&resolver).unwrap();
        assert_eq!(event.name.as_str(), "Unknown Mouse Button");
        assert!(!event.is_press);
    }

    #[test]
    fn test_state_cell_starts_idle() {
        assert_eq!(SourceStateCell::new().get(), SourceState::Idle);
    }
}
