//! X11 capture through XInput2 raw events
//!
//! Raw events are delivered to the root window for every master device,
//! whichever client has focus. libX11 and libXi are loaded at runtime, so a
//! machine without X still starts and reports the missing library instead of
//! failing to link.
//!
//! Xlib has no timed wait, so the connection fd is polled with the configured
//! timeout before Xlib reads from it. A hung-up or closed socket is detected
//! by the poll and a non-consuming peek, never by Xlib itself: its default
//! error handlers end the process.

use std::ffi::{c_int, c_void, CStr};
use std::os::raw::c_ulong;
use std::ptr;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use x11_dl::xinput2::{
    XIEventMask, XIRawEvent, XInput2, XIAllMasterDevices, XI_RawButtonPress,
    XI_RawButtonRelease, XI_RawKeyPress, XI_RawKeyRelease,
};
use x11_dl::xlib::{self, Display, XErrorEvent, XEvent, Xlib};

use super::poll::{peer_closed, wait_readable, Readiness};
use super::{CaptureError, Connection, EventSource, NormalizedEvent, Pump, RawInput};
use crate::name::{KeyCode, KeyNameResolver, SpecialKeyMap, SymbolLookup};

const RAW_EVENTS: [c_int; 4] = [
    XI_RawKeyPress,
    XI_RawKeyRelease,
    XI_RawButtonPress,
    XI_RawButtonRelease,
];

const MASK_LEN: usize = (XI_RawButtonRelease as usize >> 3) + 1;

/// XInput version announced to the server.
///
/// A client announcing 2.0 stops receiving raw events while another client
/// holds a grab, which loses the release of every click and window manager
/// shortcut. 2.1 lifted that, and raw events then reach the root window
/// regardless of grabs.
const XI_MAJOR: c_int = 2;
const XI_MINOR: c_int = 2;

/// Whether the server's XInput version delivers raw events during grabs.
fn raw_events_survive_grabs(major: c_int, minor: c_int) -> bool {
    (major, minor) >= (2, 1)
}

/// `XEventsQueued` mode that only looks at the local queue.
const QUEUED_ALREADY: c_int = 0;

/// Set when Xlib reports a fatal I/O error on the display.
static IO_ERROR: AtomicBool = AtomicBool::new(false);

unsafe extern "C" fn on_protocol_error(_display: *mut Display, event: *mut XErrorEvent) -> c_int {
    if !event.is_null() {
        // SAFETY: Xlib passes a valid event for the duration of the call.
        let event = unsafe { &*event };
        tracing::warn!(
            "X protocol error {} (request {}.{})",
            event.error_code,
            event.request_code,
            event.minor_code
        );
    }
    0
}

unsafe extern "C" fn on_io_error(_display: *mut Display) -> c_int {
    IO_ERROR.store(true, Ordering::SeqCst);
    tracing::error!("Lost the connection to the X server");
    0
}

unsafe extern "C" fn on_io_error_exit(_display: *mut Display, _data: *mut c_void) {
    IO_ERROR.store(true, Ordering::SeqCst);
}

type IoErrorExitHandler = unsafe extern "C" fn(*mut Display, *mut c_void);
type SetIoErrorExitHandler =
    unsafe extern "C" fn(*mut Display, Option<IoErrorExitHandler>, *mut c_void);

/// Replace Xlib's exit-on-I/O-error with a flag.
///
/// `XSetIOErrorExitHandler` exists from libX11 1.7 on and has no x11-dl
/// binding, so it is looked up in the already loaded library.
fn install_io_error_exit_handler(display: *mut Display) -> bool {
    for library in [c"libX11.so.6", c"libX11.so"] {
        // SAFETY: RTLD_NOLOAD only returns a handle to a library x11-dl loaded.
        let handle = unsafe { libc::dlopen(library.as_ptr(), libc::RTLD_LAZY | libc::RTLD_NOLOAD) };
        if handle.is_null() {
            continue;
        }

        // SAFETY: handle is valid until the dlclose below.
        let symbol = unsafe { libc::dlsym(handle, c"XSetIOErrorExitHandler".as_ptr()) };
        let found = !symbol.is_null();
        if found {
            // SAFETY: the symbol has this signature in every libX11 that exports it.
            let set: SetIoErrorExitHandler = unsafe { std::mem::transmute(symbol) };
            unsafe { set(display, Some(on_io_error_exit), ptr::null_mut()) };
        }
        // x11-dl still holds its own reference.
        unsafe { libc::dlclose(handle) };
        return found;
    }
    false
}

/// What `pump` does once the wait is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Hand queued and incoming events to Xlib.
    Drain,
    /// Nothing arrived within the wait.
    Idle,
    /// The server went away; Xlib must not read the socket.
    Lost,
}

/// `queued` is the local Xlib queue, `closed` the result of peeking a
/// readable socket.
fn next_step(queued: bool, ready: Readiness, closed: bool) -> Step {
    if ready.hangup || closed {
        Step::Lost
    } else if queued || ready.readable {
        Step::Drain
    } else {
        Step::Idle
    }
}

/// Key or button, press or release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawKind {
    Key { pressed: bool },
    Button { pressed: bool },
}

fn raw_kind(evtype: c_int) -> Option<RawKind> {
    match evtype {
        XI_RawKeyPress => Some(RawKind::Key { pressed: true }),
        XI_RawKeyRelease => Some(RawKind::Key { pressed: false }),
        XI_RawButtonPress => Some(RawKind::Button { pressed: true }),
        XI_RawButtonRelease => Some(RawKind::Button { pressed: false }),
        _ => None,
    }
}

/// Build an XI2 event mask with the raw key and button events set.
fn raw_event_mask() -> [u8; MASK_LEN] {
    let mut mask = [0u8; MASK_LEN];
    for event in RAW_EVENTS {
        mask[(event >> 3) as usize] |= 1 << (event & 7);
    }
    mask
}

/// Keysym names via `XKeysymToString`
pub struct KeysymNames {
    xlib: Rc<Xlib>,
}

impl SymbolLookup for KeysymNames {
    fn symbol_name(&self, code: KeyCode) -> Option<String> {
        // SAFETY: XKeysymToString returns a pointer into a static table or null.
        let name = unsafe { (self.xlib.XKeysymToString)(code.0 as c_ulong) };
        if name.is_null() {
            return None;
        }
        // SAFETY: non-null results are NUL-terminated and never freed.
        unsafe { CStr::from_ptr(name) }
            .to_str()
            .ok()
            .map(str::to_string)
    }
}

/// Subscribes to XInput2 raw events on the default display.
pub struct X11Source {
    wait: Duration,
}

impl X11Source {
    pub fn new(wait: Duration) -> Self {
        Self { wait }
    }
}

impl EventSource for X11Source {
    type Connection = X11Connection;

    fn name(&self) -> &'static str {
        "x11"
    }

    fn open(&mut self) -> Result<X11Connection, CaptureError> {
        let xlib = Xlib::open().map_err(|e| CaptureError::LibraryUnavailable {
            library: "libX11",
            reason: e.to_string(),
        })?;
        let xinput = XInput2::open().map_err(|e| CaptureError::LibraryUnavailable {
            library: "libXi",
            reason: e.to_string(),
        })?;

        IO_ERROR.store(false, Ordering::SeqCst);
        // SAFETY: both handlers are plain functions that never unwind into Xlib.
        let handlers = unsafe {
            (
                (xlib.XSetErrorHandler)(Some(on_protocol_error)),
                (xlib.XSetIOErrorHandler)(Some(on_io_error)),
            )
        };

        // SAFETY: a null name selects $DISPLAY.
        let display = unsafe { (xlib.XOpenDisplay)(ptr::null()) };
        if display.is_null() {
            // SAFETY: restores what was installed above.
            unsafe {
                (xlib.XSetErrorHandler)(handlers.0);
                (xlib.XSetIOErrorHandler)(handlers.1);
            }
            return Err(CaptureError::DisplayUnavailable {
                display: std::env::var("DISPLAY").unwrap_or_else(|_| "(unset)".to_string()),
            });
        }

        if !install_io_error_exit_handler(display) {
            tracing::warn!("libX11 is older than 1.7; losing the X server will end the process");
        }

        let xlib = Rc::new(xlib);
        // From here on the display is closed by Drop, error paths included.
        let mut connection = X11Connection {
            resolver: KeyNameResolver::new(
                SpecialKeyMap::x11(),
                KeysymNames {
                    xlib: Rc::clone(&xlib),
                },
            ),
            xlib,
            xinput,
            display,
            opcode: 0,
            wait: self.wait,
            previous_handlers: handlers,
        };
        connection.select_raw_events()?;

        tracing::debug!("Selected XInput2 raw events (opcode {})", connection.opcode);
        Ok(connection)
    }
}

pub struct X11Connection {
    resolver: KeyNameResolver<KeysymNames>,
    xlib: Rc<Xlib>,
    xinput: XInput2,
    display: *mut Display,
    opcode: c_int,
    wait: Duration,
    previous_handlers: (ErrorHandler, IoErrorHandler),
}

type ErrorHandler = Option<unsafe extern "C" fn(*mut Display, *mut XErrorEvent) -> c_int>;
type IoErrorHandler = Option<unsafe extern "C" fn(*mut Display) -> c_int>;

impl X11Connection {
    fn select_raw_events(&mut self) -> Result<(), CaptureError> {
        let (mut event, mut error) = (0, 0);
        // SAFETY: display is open; out-pointers are valid locals.
        let present = unsafe {
            (self.xlib.XQueryExtension)(
                self.display,
                c"XInputExtension".as_ptr(),
                &mut self.opcode,
                &mut event,
                &mut error,
            )
        };
        if present == 0 {
            return Err(CaptureError::ExtensionMissing {
                extension: "XInputExtension",
            });
        }

        let (mut major, mut minor) = (XI_MAJOR, XI_MINOR);
        // SAFETY: as above.
        let status = unsafe { (self.xinput.XIQueryVersion)(self.display, &mut major, &mut minor) };
        if status != xlib::Success as c_int || !raw_events_survive_grabs(major, minor) {
            return Err(CaptureError::ExtensionMissing {
                extension: "XInputExtension 2.1",
            });
        }
        tracing::debug!("XInput {}.{}", major, minor);

        let mut mask = raw_event_mask();
        let mut event_mask = XIEventMask {
            deviceid: XIAllMasterDevices,
            mask_len: MASK_LEN as c_int,
            mask: mask.as_mut_ptr(),
        };

        // SAFETY: mask outlives the call; the root window belongs to display.
        unsafe {
            let root = (self.xlib.XDefaultRootWindow)(self.display);
            (self.xinput.XISelectEvents)(self.display, root, &mut event_mask, 1);
            (self.xlib.XSync)(self.display, xlib::False);
        }

        Ok(())
    }

    /// Events Xlib already holds, without touching the socket.
    fn queued(&self) -> bool {
        // SAFETY: display is open until drop.
        unsafe { (self.xlib.XEventsQueued)(self.display, QUEUED_ALREADY) > 0 }
    }

    fn pending(&self) -> bool {
        // SAFETY: display is open until drop.
        unsafe { (self.xlib.XPending)(self.display) > 0 }
    }

    fn next_raw_input(&self) -> Option<RawInput> {
        // SAFETY: XEvent is plain data; XNextEvent fills it in.
        let mut event: XEvent = unsafe { std::mem::zeroed() };
        unsafe { (self.xlib.XNextEvent)(self.display, &mut event) };

        if event.get_type() != xlib::GenericEvent {
            return None;
        }

        // SAFETY: GenericEvent means the cookie variant is active.
        let mut cookie = unsafe { event.generic_event_cookie };
        if cookie.extension != self.opcode {
            return None;
        }
        if unsafe { (self.xlib.XGetEventData)(self.display, &mut cookie) } == 0 {
            return None;
        }

        // SAFETY: every event type selected above carries an XIRawEvent.
        let detail = unsafe { (*(cookie.data as *const XIRawEvent)).detail };
        let raw = match raw_kind(cookie.evtype) {
            Some(RawKind::Key { pressed }) => self.key(detail, pressed),
            Some(RawKind::Button { pressed }) => button(detail, pressed),
            None => None,
        };

        unsafe { (self.xlib.XFreeEventData)(self.display, &mut cookie) };
        raw
    }

    fn key(&self, detail: c_int, pressed: bool) -> Option<RawInput> {
        let keycode = u8::try_from(detail).ok()?;
        // SAFETY: display is open; group and level 0 are always valid.
        let keysym = unsafe { (self.xlib.XkbKeycodeToKeysym)(self.display, keycode, 0, 0) };
        if keysym == 0 {
            // NoSymbol
            return None;
        }
        Some(RawInput::Key {
            code: KeyCode(keysym as u32),
            pressed,
        })
    }
}

fn button(detail: c_int, pressed: bool) -> Option<RawInput> {
    let number = u32::try_from(detail).ok()?;
    Some(RawInput::Button { number, pressed })
}

impl Connection for X11Connection {
    fn pump(&mut self, sink: &mut dyn FnMut(NormalizedEvent)) -> Result<Pump, CaptureError> {
        if IO_ERROR.load(Ordering::SeqCst) {
            return Err(CaptureError::ConnectionLost);
        }

        let queued = self.queued();
        // SAFETY: display is open until drop.
        let fd = unsafe { (self.xlib.XConnectionNumber)(self.display) };
        let wait = if queued { Duration::ZERO } else { self.wait };
        let ready = wait_readable(&[fd], wait)?[0];
        let closed = ready.readable && !ready.hangup && peer_closed(fd)?;

        match next_step(queued, ready, closed) {
            Step::Lost => return Err(CaptureError::ConnectionLost),
            Step::Idle => return Ok(Pump::Continue),
            Step::Drain => {}
        }

        while self.pending() {
            if let Some(event) = self
                .next_raw_input()
                .and_then(|raw| raw.normalize(&self.resolver))
            {
                sink(event);
            }
        }

        if IO_ERROR.load(Ordering::SeqCst) {
            return Err(CaptureError::ConnectionLost);
        }
        Ok(Pump::Continue)
    }
}

impl Drop for X11Connection {
    fn drop(&mut self) {
        // SAFETY: display was opened in `open` and is closed only here.
        unsafe {
            (self.xlib.XCloseDisplay)(self.display);
            (self.xlib.XSetErrorHandler)(self.previous_handlers.0);
            (self.xlib.XSetIOErrorHandler)(self.previous_handlers.1);
        }
        tracing::debug!("Closed X display");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_event_mask_bits() {
        let mask = raw_event_mask();
        // XI_RawKeyPress..XI_RawButtonRelease are 13..=16
        assert_eq!(mask.len(), 3);
        assert_eq!(mask[1], 0b1110_0000);
        assert_eq!(mask[2], 0b0000_0001);
        assert_eq!(mask[0], 0);
    }

    #[test]
    fn test_button_detail() {
        assert_eq!(
            button(3, true),
            Some(RawInput::Button {
                number: 3,
                pressed: true
            })
        );
        assert_eq!(button(-1, false), None);
    }

    #[test]
    fn test_requests_version_with_grab_delivery() {
        assert_eq!((XI_MAJOR, XI_MINOR), (2, 2));
        assert!(raw_events_survive_grabs(XI_MAJOR, XI_MINOR));
    }

    #[test]
    fn test_server_version_acceptance() {
        assert!(!raw_events_survive_grabs(2, 0));
        assert!(!raw_events_survive_grabs(1, 5));
        assert!(raw_events_survive_grabs(2, 1));
        assert!(raw_events_survive_grabs(2, 2));
        assert!(raw_events_survive_grabs(3, 0));
    }

    #[test]
    fn test_raw_kinds() {
        assert_eq!(
            raw_kind(XI_RawKeyPress),
            Some(RawKind::Key { pressed: true })
        );
        assert_eq!(
            raw_kind(XI_RawKeyRelease),
            Some(RawKind::Key { pressed: false })
        );
        assert_eq!(
            raw_kind(XI_RawButtonPress),
            Some(RawKind::Button { pressed: true })
        );
        assert_eq!(
            raw_kind(XI_RawButtonRelease),
            Some(RawKind::Button { pressed: false })
        );
        // XI_RawMotion
        assert_eq!(raw_kind(17), None);
    }

    #[test]
    fn test_hangup_is_lost_before_reading() {
        let hangup = Readiness {
            readable: true,
            hangup: true,
        };
        assert_eq!(next_step(false, hangup, false), Step::Lost);
        assert_eq!(next_step(true, hangup, false), Step::Lost);
    }

    #[test]
    fn test_end_of_stream_is_lost() {
        let readable = Readiness {
            readable: true,
            hangup: false,
        };
        assert_eq!(next_step(false, readable, true), Step::Lost);
        assert_eq!(next_step(false, readable, false), Step::Drain);
    }

    #[test]
    fn test_queued_events_drain_without_socket_data() {
        assert_eq!(next_step(true, Readiness::default(), false), Step::Drain);
        assert_eq!(next_step(false, Readiness::default(), false), Step::Idle);
    }

    #[test]
    fn test_closed_socket_detected_before_xlib() {
        use std::os::fd::AsRawFd;
        use std::os::unix::net::UnixStream;

        let (client, server) = UnixStream::pair().unwrap();
        drop(server);

        let fd = client.as_raw_fd();
        let ready = wait_readable(&[fd], Duration::from_millis(100)).unwrap()[0];
        let closed = ready.readable && !ready.hangup && peer_closed(fd).unwrap();

        assert_eq!(next_step(false, ready, closed), Step::Lost);
    }
}
