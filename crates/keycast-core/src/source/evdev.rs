//! Linux evdev capture
//!
//! Reads keyboards and pointers straight from `/dev/input`, which works under
//! Wayland and on the console where there is no X server. Devices are only
//! read, never grabbed, so every other consumer keeps receiving input.

use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use evdev::{Device, InputEvent, InputEventKind, Key, RelativeAxisType};
use nix::errno::Errno;

use super::poll::wait_readable;
use super::{CaptureError, Connection, EventSource, NormalizedEvent, Pump, RawInput};
use crate::device::{open_devices, DeviceInfo};
use crate::name::{button, KeyCode, KeyNameResolver, SpecialKeyMap, SymbolLookup};

/// Mouse button codes (`linux/input-event-codes.h`)
const BTN_MOUSE: u32 = 0x110;
const BTN_LEFT: u32 = 0x110;
const BTN_RIGHT: u32 = 0x111;
const BTN_MIDDLE: u32 = 0x112;
const BTN_SIDE: u32 = 0x113;
const BTN_EXTRA: u32 = 0x114;
const BTN_TASK: u32 = 0x117;

/// Key event values
const RELEASED: i32 = 0;
const PRESSED: i32 = 1;

/// Kernel key names without the `KEY_` prefix
pub struct EvdevKeyNames;

impl SymbolLookup for EvdevKeyNames {
    fn symbol_name(&self, code: KeyCode) -> Option<String> {
        let code = u16::try_from(code.0).ok()?;
        let name = format!("{:?}", Key::new(code));
        // BTN_* codes from touchpads and tablets, and unnamed codes, stay silent
        name.strip_prefix("KEY_").map(str::to_string)
    }
}

/// Map a mouse button code to the shared pointer numbering.
fn pointer_button(code: u32) -> Option<u32> {
    match code {
        BTN_LEFT => Some(button::LEFT),
        BTN_MIDDLE => Some(button::MIDDLE),
        BTN_RIGHT => Some(button::RIGHT),
        BTN_SIDE => Some(button::BACK),
        BTN_EXTRA => Some(button::FORWARD),
        // BTN_FORWARD, BTN_BACK, BTN_TASK: numbered past the wheel buttons
        c if (BTN_EXTRA + 1..=BTN_TASK).contains(&c) => Some(c - BTN_MOUSE + 5),
        _ => None,
    }
}

/// Classify one kernel event. Autorepeat (`value == 2`) is ignored.
fn classify(event: &InputEvent, out: &mut Vec<RawInput>) {
    match event.kind() {
        InputEventKind::Key(key) => {
            let pressed = match event.value() {
                PRESSED => true,
                RELEASED => false,
                _ => return,
            };
            let code = u32::from(key.code());
            match pointer_button(code) {
                Some(number) => out.push(RawInput::Button { number, pressed }),
                None => out.push(RawInput::Key {
                    code: KeyCode(code),
                    pressed,
                }),
            }
        }
        InputEventKind::RelAxis(RelativeAxisType::REL_WHEEL) => {
            if let Some(pair) = RawInput::wheel(event.value()) {
                out.extend(pair);
            }
        }
        _ => {}
    }
}

fn with_pressed(raw: RawInput, pressed: bool) -> RawInput {
    match raw {
        RawInput::Key { code, .. } => RawInput::Key { code, pressed },
        RawInput::Button { number, .. } => RawInput::Button { number, pressed },
    }
}

/// Keys and buttons one device currently holds down
#[derive(Debug, Default)]
struct Held(Vec<RawInput>);

impl Held {
    fn track(&mut self, raw: RawInput) {
        let down = with_pressed(raw, true);
        if raw == down {
            if !self.0.contains(&down) {
                self.0.push(down);
            }
        } else {
            self.0.retain(|held| *held != down);
        }
    }

    /// Releases for everything still held, as if the keys went up.
    fn releases(self) -> impl Iterator<Item = RawInput> {
        self.0.into_iter().map(|raw| with_pressed(raw, false))
    }
}

struct ObservedDevice {
    info: DeviceInfo,
    device: Device,
    held: Held,
}

/// Observes every device with keys or buttons under `/dev/input`.
pub struct EvdevSource {
    wait: Duration,
    filter: Vec<String>,
}

impl EvdevSource {
    /// `filter` restricts capture to devices with these names; empty means all.
    pub fn new(wait: Duration, filter: Vec<String>) -> Self {
        Self { wait, filter }
    }
}

impl EventSource for EvdevSource {
    type Connection = EvdevConnection;

    fn name(&self) -> &'static str {
        "evdev"
    }

    fn open(&mut self) -> Result<EvdevConnection, CaptureError> {
        let devices: Vec<(DeviceInfo, Device)> = open_devices()?
            .into_iter()
            .filter(|(info, _)| info.kind.is_captured() && info.matches(&self.filter))
            .collect();

        if devices.is_empty() {
            return Err(CaptureError::NoDevices);
        }

        for (info, _) in &devices {
            tracing::info!(
                "Observing '{}' [{}] at {}",
                info.name,
                info.kind,
                info.path.display()
            );
        }

        Ok(EvdevConnection {
            devices: devices
                .into_iter()
                .map(|(info, device)| ObservedDevice {
                    info,
                    device,
                    held: Held::default(),
                })
                .collect(),
            resolver: KeyNameResolver::new(SpecialKeyMap::evdev(), EvdevKeyNames),
            wait: self.wait,
        })
    }
}

pub struct EvdevConnection {
    devices: Vec<ObservedDevice>,
    resolver: KeyNameResolver<EvdevKeyNames>,
    wait: Duration,
}

impl EvdevConnection {
    /// Stop reading a device and release whatever it still held.
    fn release_device(&mut self, index: usize, reason: &str, out: &mut Vec<RawInput>) {
        let ObservedDevice { info, held, .. } = self.devices.remove(index);
        tracing::warn!(
            "Stopped observing '{}' at {}: {}",
            info.name,
            info.path.display(),
            reason
        );
        out.extend(held.releases());
    }
}

impl Connection for EvdevConnection {
    fn pump(&mut self, sink: &mut dyn FnMut(NormalizedEvent)) -> Result<Pump, CaptureError> {
        let fds: Vec<RawFd> = self
            .devices
            .iter()
            .map(|observed| observed.device.as_raw_fd())
            .collect();
        let ready = wait_readable(&fds, self.wait)?;

        let mut inputs = Vec::new();
        let mut lost = Vec::new();

        for (index, readiness) in ready.iter().enumerate() {
            if readiness.readable {
                let ObservedDevice { device, held, .. } = &mut self.devices[index];
                let start = inputs.len();
                match device.fetch_events() {
                    Ok(events) => {
                        for event in events {
                            classify(&event, &mut inputs);
                        }
                        for raw in &inputs[start..] {
                            held.track(*raw);
                        }
                    }
                    Err(e) if e.raw_os_error() == Some(Errno::ENODEV as i32) => {
                        lost.push((index, "device removed".to_string()));
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e.into()),
                }
            } else if readiness.hangup {
                lost.push((index, "device hung up".to_string()));
            }
        }

        for (index, reason) in lost.into_iter().rev() {
            self.release_device(index, &reason, &mut inputs);
        }

        for raw in inputs {
            if let Some(event) = raw.normalize(&self.resolver) {
                sink(event);
            }
        }

        if self.devices.is_empty() {
            return Err(CaptureError::ConnectionLost);
        }
        Ok(Pump::Continue)
    }
}

impl Drop for EvdevConnection {
    fn drop(&mut self) {
        tracing::debug!("Closing {} input device(s)", self.devices.len());
    }
}
