//! Scripted event source
//!
//! Replays a fixed sequence of [`RawInput`]s through the normal resolution
//! path. What happens once the script is exhausted is chosen with
//! [`AfterScript`]; [`AfterScript::Block`] parks the capture thread in a wait
//! with no timeout, which only the shutdown interrupter can end.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};

use super::{CaptureError, Connection, EventSource, NormalizedEvent, Pump, RawInput};
use crate::name::{KeyCode, KeyNameResolver, SpecialKeyMap};
use crate::shutdown::Interrupter;

/// Behaviour once every scripted event has been delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterScript {
    /// Report end of stream.
    End,
    /// Block until shutdown tears the channel down.
    Block,
    /// Fail as if the OS connection broke.
    Fail,
}

pub struct ScriptedSource {
    script: Vec<RawInput>,
    names: HashMap<KeyCode, String>,
    after: AfterScript,
    unavailable: bool,
    releases: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(script: Vec<RawInput>, after: AfterScript) -> Self {
        Self {
            script,
            names: HashMap::new(),
            after,
            unavailable: false,
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A source whose `open` always fails.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new(Vec::new(), AfterScript::End)
        }
    }

    /// Platform name for a key code; codes without one resolve to nothing.
    pub fn with_name(mut self, code: u32, name: &str) -> Self {
        self.names.insert(KeyCode(code), name.to_string());
        self
    }

    /// How many connections have been released so far.
    pub fn releases(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.releases)
    }
}

impl EventSource for ScriptedSource {
    type Connection = ScriptedConnection;

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn open(&mut self) -> Result<ScriptedConnection, CaptureError> {
        if self.unavailable {
            return Err(CaptureError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "scripted source unavailable",
            )));
        }

        let (tx, rx) = mpsc::channel();
        for raw in &self.script {
            // the receiver is alive, so sending cannot fail
            let _ = tx.send(*raw);
        }

        Ok(ScriptedConnection {
            rx,
            tx: Arc::new(Mutex::new(Some(tx))),
            resolver: KeyNameResolver::new(SpecialKeyMap::x11(), self.names.clone()),
            after: self.after,
            releases: Arc::clone(&self.releases),
        })
    }
}

pub struct ScriptedConnection {
    rx: Receiver<RawInput>,
    tx: Arc<Mutex<Option<Sender<RawInput>>>>,
    resolver: KeyNameResolver<HashMap<KeyCode, String>>,
    after: AfterScript,
    releases: Arc<AtomicUsize>,
}

impl Connection for ScriptedConnection {
    fn pump(&mut self, sink: &mut dyn FnMut(NormalizedEvent)) -> Result<Pump, CaptureError> {
        let raw = match self.after {
            AfterScript::Block => match self.rx.recv() {
                Ok(raw) => raw,
                Err(_) => return Ok(Pump::Interrupted),
            },
            AfterScript::End | AfterScript::Fail => match self.rx.try_recv() {
                Ok(raw) => raw,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                    return match self.after {
                        AfterScript::Fail => Err(CaptureError::ConnectionLost),
                        _ => Ok(Pump::EndOfStream),
                    };
                }
            },
        };

        if let Some(event) = raw.normalize(&self.resolver) {
            sink(event);
        }
        Ok(Pump::Continue)
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let tx = Arc::clone(&self.tx);
        Some(Interrupter::new("scripted channel", move || {
            tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        }))
    }
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::active::tests::RecordingRenderer;
    use crate::active::ActiveKeySet;
    use crate::name::button;
    use crate::shutdown::Shutdown;
    use crate::source::{SourceState, SourceStateCell};

    const CTRL: u32 = 0xffe3;
    const SHIFT: u32 = 0xffe1;
    const A: u32 = 0x61;

    fn key(code: u32, pressed: bool) -> RawInput {
        RawInput::Key {
            code: KeyCode(code),
            pressed,
        }
    }

    fn btn(number: u32, pressed: bool) -> RawInput {
        RawInput::Button { number, pressed }
    }

    fn replay(
        source: &mut ScriptedSource,
    ) -> (
        Result<(), CaptureError>,
        ActiveKeySet<RecordingRenderer>,
        RecordingRenderer,
        SourceStateCell,
    ) {
        let renderer = RecordingRenderer::default();
        let active = ActiveKeySet::new(renderer.clone());
        let state = SourceStateCell::new();
        let result = source.run(&mut |ev| active.apply(&ev), &Shutdown::new(), &state);
        (result, active, renderer, state)
    }

    #[test]
    fn test_simple_chord() {
        let mut source = ScriptedSource::new(
            vec![key(CTRL, true), key(SHIFT, true), key(A, true)],
            AfterScript::End,
        )
        .with_name(CTRL, "CTRL")
        .with_name(SHIFT, "SHIFT")
        .with_name(A, "A");

        let (result, active, renderer, state) = replay(&mut source);

        assert!(result.is_ok());
        assert_eq!(
            renderer.frames(),
            ["CTRL", "CTRL + SHIFT", "A + CTRL + SHIFT"]
        );
        assert_eq!(active.combination(), "A + CTRL + SHIFT");
        assert_eq!(state.get(), SourceState::Closed);
    }

    #[test]
    fn test_mouse_placeholder_pressed_and_released() {
        let mut source = ScriptedSource::new(
            vec![btn(button::BACK, true), btn(button::BACK, false)],
            AfterScript::End,
        );

        let (result, active, renderer, _) = replay(&mut source);

        assert!(result.is_ok());
        assert_eq!(renderer.frames(), ["UNKNOWN MOUSE BUTTON"]);
        assert!(active.is_empty());
    }

    #[test]
    fn test_mapped_buttons_and_navigation_keys() {
        let mut source = ScriptedSource::new(
            vec![
                btn(button::LEFT, true),
                key(crate::name::x11_keysym::PAGE_DOWN, true),
            ],
            AfterScript::End,
        );

        let (_, active, _, _) = replay(&mut source);

        assert_eq!(active.combination(), "MOUSE LEFT CLICK + PAGE DOWN");
    }

    #[test]
    fn test_unknown_code_inserts_nothing() {
        let mut source = ScriptedSource::new(
            vec![key(0xdead, true), key(A, true), key(0xdead, false)],
            AfterScript::End,
        )
        .with_name(A, "a");

        let (result, active, renderer, _) = replay(&mut source);

        assert!(result.is_ok());
        assert_eq!(active.snapshot().len(), 1);
        assert_eq!(renderer.frames(), ["A"]);
    }

    #[test]
    fn test_open_failure_never_enters_loop() {
        let mut source = ScriptedSource::unavailable();
        let releases = source.releases();

        let (result, active, renderer, state) = replay(&mut source);

        assert!(matches!(result, Err(CaptureError::Io(_))));
        assert!(active.is_empty());
        assert!(renderer.frames().is_empty());
        assert_eq!(state.get(), SourceState::Closed);
        assert_eq!(releases.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_connection_failure_releases_once() {
        let mut source = ScriptedSource::new(vec![key(A, true)], AfterScript::Fail).with_name(A, "a");
        let releases = source.releases();

        let (result, active, _, state) = replay(&mut source);

        assert!(matches!(result, Err(CaptureError::ConnectionLost)));
        assert_eq!(active.combination(), "A");
        assert_eq!(state.get(), SourceState::Closed);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_unblocks_untimed_wait() {
        let mut source =
            ScriptedSource::new(vec![key(A, true)], AfterScript::Block).with_name(A, "a");
        let releases = source.releases();
        let renderer = RecordingRenderer::default();
        let active = Arc::new(ActiveKeySet::new(renderer.clone()));
        let shutdown = Shutdown::new();
        let state = SourceStateCell::new();
        let (done_tx, done_rx) = mpsc::channel();

        let handle = {
            let active = Arc::clone(&active);
            let shutdown = shutdown.clone();
            let state = state.clone();
            thread::spawn(move || {
                let result = source.run(&mut |ev| active.apply(&ev), &shutdown, &state);
                let _ = done_tx.send(());
                result
            })
        };

        // wait until the scripted press has gone through, leaving the
        // thread parked in recv()
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while renderer.frames().is_empty() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(state.get(), SourceState::Connected);

        shutdown.trigger();

        done_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("capture thread did not stop within 1s");
        assert!(handle.join().unwrap().is_ok());
        assert_eq!(state.get(), SourceState::Closed);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(renderer.frames(), ["A"]);
    }

    #[test]
    fn test_shutdown_before_run_skips_loop() {
        let mut source =
            ScriptedSource::new(vec![key(A, true)], AfterScript::Block).with_name(A, "a");
        let releases = source.releases();
        let active = ActiveKeySet::new(RecordingRenderer::default());
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let result = source.run(&mut |ev| active.apply(&ev), &shutdown, &SourceStateCell::new());

        assert!(result.is_ok());
        assert!(active.is_empty());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
