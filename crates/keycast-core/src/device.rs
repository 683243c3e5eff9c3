//! Input device enumeration

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use evdev::{Device, EventType, Key};
use serde::Serialize;

/// What an input device can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Keyboard,
    Pointer,
    /// Combo receivers that expose both on one node
    KeyboardAndPointer,
    /// Any other node with keys, such as the media key half of a keyboard
    Keys,
    /// Reports no keys at all
    Other,
}

impl DeviceKind {
    /// Whether the evdev backend listens to this kind of device.
    pub fn is_captured(self) -> bool {
        !matches!(self, DeviceKind::Other)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Keyboard => write!(f, "keyboard"),
            DeviceKind::Pointer => write!(f, "pointer"),
            DeviceKind::KeyboardAndPointer => write!(f, "keyboard+pointer"),
            DeviceKind::Keys => write!(f, "keys"),
            DeviceKind::Other => write!(f, "other"),
        }
    }
}

/// Information about an input device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub name: String,
    pub vendor: u16,
    pub product: u16,
    pub kind: DeviceKind,
}

impl DeviceInfo {
    fn from_device(path: &Path, device: &Device) -> Self {
        let id = device.input_id();
        Self {
            path: path.to_path_buf(),
            name: device.name().unwrap_or("Unknown").to_string(),
            vendor: id.vendor(),
            product: id.product(),
            kind: classify(device),
        }
    }

    /// Get vendor:product string (e.g., "3434:0361")
    pub fn vendor_product(&self) -> String {
        format!("{:04x}:{:04x}", self.vendor, self.product)
    }

    /// An empty filter accepts every device.
    pub fn matches(&self, filter: &[String]) -> bool {
        filter.is_empty() || filter.iter().any(|name| name == &self.name)
    }
}

/// Classify a device by the keys it supports
pub fn classify(device: &Device) -> DeviceKind {
    if !device.supported_events().contains(EventType::KEY) {
        return DeviceKind::Other;
    }

    let (keyboard, pointer) = device
        .supported_keys()
        .map(|keys| (keys.contains(Key::KEY_A), keys.contains(Key::BTN_LEFT)))
        .unwrap_or((false, false));

    key_device_kind(keyboard, pointer)
}

/// Kind of a device that reports key events
fn key_device_kind(keyboard: bool, pointer: bool) -> DeviceKind {
    match (keyboard, pointer) {
        (true, true) => DeviceKind::KeyboardAndPointer,
        (true, false) => DeviceKind::Keyboard,
        (false, true) => DeviceKind::Pointer,
        (false, false) => DeviceKind::Keys,
    }
}

/// Open every readable `/dev/input/event*` node.
///
/// Nodes that cannot be opened (usually permissions) are skipped.
pub fn open_devices() -> io::Result<Vec<(DeviceInfo, Device)>> {
    let mut devices = Vec::new();

    for entry in std::fs::read_dir("/dev/input")? {
        let entry = entry?;
        let path = entry.path();

        // Only look at event* devices
        if !path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("event"))
            .unwrap_or(false)
        {
            continue;
        }

        match Device::open(&path) {
            Ok(device) => {
                devices.push((DeviceInfo::from_device(&path, &device), device));
            }
            Err(e) => {
                tracing::debug!("Could not open {}: {}", path.display(), e);
            }
        }
    }

    devices.sort_by(|(a, _), (b, _)| a.path.cmp(&b.path));
    Ok(devices)
}

/// Enumerate all readable input devices
pub fn enumerate_devices() -> io::Result<Vec<DeviceInfo>> {
    Ok(open_devices()?.into_iter().map(|(info, _)| info).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, kind: DeviceKind) -> DeviceInfo {
        DeviceInfo {
            path: PathBuf::from("/dev/input/event3"),
            name: name.to_string(),
            vendor: 0x3434,
            product: 0x0361,
            kind,
        }
    }

    #[test]
    fn test_vendor_product_format() {
        assert_eq!(
            info("Keychron K3 Pro", DeviceKind::Keyboard).vendor_product(),
            "3434:0361"
        );
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(info("Any Mouse", DeviceKind::Pointer).matches(&[]));
    }

    #[test]
    fn test_filter_matches_exact_name() {
        let filter = vec!["Keychron K3 Pro".to_string()];
        assert!(info("Keychron K3 Pro", DeviceKind::Keyboard).matches(&filter));
        assert!(!info("Keychron K3", DeviceKind::Keyboard).matches(&filter));
    }

    #[test]
    fn test_only_other_devices_are_skipped() {
        assert!(DeviceKind::Keyboard.is_captured());
        assert!(DeviceKind::Pointer.is_captured());
        assert!(DeviceKind::KeyboardAndPointer.is_captured());
        assert!(DeviceKind::Keys.is_captured());
        assert!(!DeviceKind::Other.is_captured());
    }

    #[test]
    fn test_media_key_nodes_are_captured() {
        // Consumer Control and System Control nodes have neither KEY_A nor BTN_LEFT
        let kind = key_device_kind(false, false);
        assert_eq!(kind, DeviceKind::Keys);
        assert!(kind.is_captured());
        assert_eq!(kind.to_string(), "keys");
    }

    #[test]
    fn test_key_device_kinds() {
        assert_eq!(key_device_kind(true, false), DeviceKind::Keyboard);
        assert_eq!(key_device_kind(false, true), DeviceKind::Pointer);
        assert_eq!(key_device_kind(true, true), DeviceKind::KeyboardAndPointer);
    }
}
