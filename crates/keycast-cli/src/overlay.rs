//! Keeping the terminal window above other windows
//!
//! Best effort: a failure is logged and the overlay keeps running.

#[cfg(target_os = "linux")]
pub fn raise_above_others() {
    use std::process::Command;

    // Run right after start-up, while the terminal is still the active window.
    match Command::new("wmctrl")
        .args(["-r", ":ACTIVE:", "-b", "add,above"])
        .status()
    {
        Ok(status) if status.success() => tracing::debug!("Terminal raised above other windows"),
        Ok(status) => tracing::warn!("wmctrl exited with {}; window not kept on top", status),
        Err(e) => tracing::warn!("Could not run wmctrl to keep the window on top: {}", e),
    }
}

#[cfg(windows)]
pub fn raise_above_others() {
    use windows::Win32::System::Console::GetConsoleWindow;
    use windows::Win32::UI::WindowsAndMessaging::{
        SetWindowPos, HWND_TOPMOST, SWP_NOMOVE, SWP_NOSIZE,
    };

    // SAFETY: plain calls on the console window handle, which may be null.
    let result = unsafe {
        let window = GetConsoleWindow();
        if window.0 == 0 {
            tracing::warn!("No console window to keep on top");
            return;
        }
        SetWindowPos(window, HWND_TOPMOST, 0, 0, 0, 0, SWP_NOMOVE | SWP_NOSIZE)
    };

    match result {
        Ok(()) => tracing::debug!("Console window set topmost"),
        Err(e) => tracing::warn!("Could not keep the console window on top: {}", e),
    }
}

#[cfg(not(any(target_os = "linux", windows)))]
pub fn raise_above_others() {
    tracing::warn!("Keeping the window on top is not supported on this platform");
}
