//! Windows capture through low-level keyboard and mouse hooks
//!
//! Low-level hooks are called on the installing thread while it retrieves
//! messages, so `pump` waits on the message queue with a timeout and then
//! drains whatever the hook procedures queued.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

use windows::Win32::Foundation::{HMODULE, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::Input::KeyboardAndMouse::GetKeyNameTextW;
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, MsgWaitForMultipleObjects, PeekMessageW, PostThreadMessageW,
    SetWindowsHookExW, UnhookWindowsHookEx, HC_ACTION, HHOOK, KBDLLHOOKSTRUCT, LLKHF_EXTENDED,
    MSG, MSLLHOOKSTRUCT, PM_REMOVE, QS_ALLINPUT, WH_KEYBOARD_LL, WH_MOUSE_LL, WM_KEYDOWN,
    WM_KEYUP, WM_LBUTTONDOWN, WM_LBUTTONUP, WM_MBUTTONDOWN, WM_MBUTTONUP, WM_MOUSEWHEEL,
    WM_QUIT, WM_RBUTTONDOWN, WM_RBUTTONUP, WM_SYSKEYDOWN, WM_SYSKEYUP, WM_XBUTTONDOWN,
    WM_XBUTTONUP,
};

use super::{CaptureError, Connection, EventSource, NormalizedEvent, Pump, RawInput};
use crate::name::{button, windows_key, KeyCode, KeyNameResolver, SpecialKeyMap, SymbolLookup};
use crate::shutdown::Interrupter;

/// `XBUTTON1` / `XBUTTON2` in the high word of `mouseData`
const XBUTTON1: u16 = 1;
const XBUTTON2: u16 = 2;

thread_local! {
    static PENDING: RefCell<VecDeque<RawInput>> = const { RefCell::new(VecDeque::new()) };
}

fn queue(raw: RawInput) {
    PENDING.with(|pending| pending.borrow_mut().push_back(raw));
}

fn high_word(data: u32) -> u16 {
    (data >> 16) as u16
}

fn key_input(message: u32, scan: u32, extended: bool) -> Option<RawInput> {
    let pressed = match message {
        WM_KEYDOWN | WM_SYSKEYDOWN => true,
        WM_KEYUP | WM_SYSKEYUP => false,
        _ => return None,
    };
    Some(RawInput::Key {
        code: KeyCode(windows_key::from_scan(scan, extended)),
        pressed,
    })
}

fn mouse_input(message: u32, mouse_data: u32, out: &mut Vec<RawInput>) {
    let (number, pressed) = match message {
        WM_LBUTTONDOWN => (button::LEFT, true),
        WM_LBUTTONUP => (button::LEFT, false),
        WM_MBUTTONDOWN => (button::MIDDLE, true),
        WM_MBUTTONUP => (button::MIDDLE, false),
        WM_RBUTTONDOWN => (button::RIGHT, true),
        WM_RBUTTONUP => (button::RIGHT, false),
        WM_XBUTTONDOWN | WM_XBUTTONUP => {
            let number = match high_word(mouse_data) {
                XBUTTON1 => button::BACK,
                XBUTTON2 => button::FORWARD,
                _ => return,
            };
            (number, message == WM_XBUTTONDOWN)
        }
        WM_MOUSEWHEEL => {
            let delta = high_word(mouse_data) as i16;
            if let Some(pair) = RawInput::wheel(i32::from(delta)) {
                out.extend(pair);
            }
            return;
        }
        _ => return,
    };
    out.push(RawInput::Button { number, pressed });
}

unsafe extern "system" fn keyboard_hook_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if code == HC_ACTION as i32 {
        let data = *(lparam.0 as *const KBDLLHOOKSTRUCT);
        let extended = (data.flags.0 & LLKHF_EXTENDED.0) != 0;
        if let Some(raw) = key_input(wparam.0 as u32, data.scanCode, extended) {
            queue(raw);
        }
    }
    CallNextHookEx(HHOOK(0), code, wparam, lparam)
}

unsafe extern "system" fn mouse_hook_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if code == HC_ACTION as i32 {
        let data = *(lparam.0 as *const MSLLHOOKSTRUCT);
        let mut inputs = Vec::new();
        mouse_input(wparam.0 as u32, data.mouseData, &mut inputs);
        inputs.into_iter().for_each(queue);
    }
    CallNextHookEx(HHOOK(0), code, wparam, lparam)
}

/// Key names from the active keyboard layout
pub struct ScanCodeNames;

impl SymbolLookup for ScanCodeNames {
    fn symbol_name(&self, code: KeyCode) -> Option<String> {
        let mut buffer = [0u16; 64];
        // SAFETY: the buffer is valid for its whole length.
        let len = unsafe { GetKeyNameTextW(code.0 as i32, &mut buffer) };
        let len = usize::try_from(len).ok().filter(|len| *len > 0)?;
        String::from_utf16(&buffer[..len]).ok()
    }
}

/// Installs `WH_KEYBOARD_LL` and `WH_MOUSE_LL` on the capture thread.
pub struct WindowsSource {
    wait: Duration,
}

impl WindowsSource {
    pub fn new(wait: Duration) -> Self {
        Self { wait }
    }
}

impl EventSource for WindowsSource {
    type Connection = WindowsConnection;

    fn name(&self) -> &'static str {
        "windows"
    }

    fn open(&mut self) -> Result<WindowsConnection, CaptureError> {
        unsafe {
            let module = GetModuleHandleW(None).unwrap_or(HMODULE::default());

            let mouse_hook = SetWindowsHookExW(WH_MOUSE_LL, Some(mouse_hook_proc), module, 0)
                .map_err(|e| CaptureError::HookInstall {
                    hook: "mouse",
                    reason: e.to_string(),
                })?;

            let keyboard_hook =
                match SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_hook_proc), module, 0) {
                    Ok(hook) => hook,
                    Err(e) => {
                        let _ = UnhookWindowsHookEx(mouse_hook);
                        return Err(CaptureError::HookInstall {
                            hook: "keyboard",
                            reason: e.to_string(),
                        });
                    }
                };

            PENDING.with(|pending| pending.borrow_mut().clear());

            Ok(WindowsConnection {
                keyboard_hook,
                mouse_hook,
                thread_id: GetCurrentThreadId(),
                resolver: KeyNameResolver::new(SpecialKeyMap::windows(), ScanCodeNames),
                wait: self.wait,
            })
        }
    }
}

pub struct WindowsConnection {
    keyboard_hook: HHOOK,
    mouse_hook: HHOOK,
    thread_id: u32,
    resolver: KeyNameResolver<ScanCodeNames>,
    wait: Duration,
}

impl WindowsConnection {
    /// Retrieve queued messages so the hooks run. `false` once `WM_QUIT` is seen.
    fn dispatch_messages(&self) -> bool {
        let millis = u32::try_from(self.wait.as_millis()).unwrap_or(u32::MAX);
        let mut msg = MSG::default();
        unsafe {
            let _ = MsgWaitForMultipleObjects(None, false, millis, QS_ALLINPUT);
            while PeekMessageW(&mut msg, HWND(0), 0, 0, PM_REMOVE).as_bool() {
                if msg.message == WM_QUIT {
                    return false;
                }
            }
        }
        true
    }
}

impl Connection for WindowsConnection {
    fn pump(&mut self, sink: &mut dyn FnMut(NormalizedEvent)) -> Result<Pump, CaptureError> {
        let running = self.dispatch_messages();

        let pending: Vec<RawInput> =
            PENDING.with(|pending| pending.borrow_mut().drain(..).collect());
        for raw in pending {
            if let Some(event) = raw.normalize(&self.resolver) {
                sink(event);
            }
        }

        Ok(if running { Pump::Continue } else { Pump::Interrupted })
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let thread_id = self.thread_id;
        Some(Interrupter::new("capture thread message queue", move || {
            // SAFETY: posting to a thread that already exited is a harmless failure.
            let _ = unsafe { PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) };
        }))
    }
}

impl Drop for WindowsConnection {
    fn drop(&mut self) {
        unsafe {
            let _ = UnhookWindowsHookEx(self.keyboard_hook);
            let _ = UnhookWindowsHookEx(self.mouse_hook);
        }
        tracing::debug!("Removed low-level input hooks");
    }
}
