//! Key and button name resolution
//!
//! Every backend reports an opaque [`KeyCode`] for keys and a pointer button
//! number for mouse buttons. Buttons use the X11 numbering on every platform
//! (1 left, 2 middle, 3 right, 4/5 wheel, 8/9 side buttons), so the button
//! half of the [`SpecialKeyMap`] is shared. The key half differs per platform
//! because the native codes differ.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;

/// Opaque platform-native identifier for a physical key.
///
/// - X11: the level-0 keysym of the pressed keycode
/// - Windows: the `GetKeyNameText` lParam (`scan << 16 | extended << 24`)
/// - evdev: the kernel key code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyCode(pub u32);

/// Pointer button numbers shared by all backends.
pub mod button {
    pub const LEFT: u32 = 1;
    pub const MIDDLE: u32 = 2;
    pub const RIGHT: u32 = 3;
    pub const SCROLL_UP: u32 = 4;
    pub const SCROLL_DOWN: u32 = 5;
    pub const BACK: u32 = 8;
    pub const FORWARD: u32 = 9;
}

/// Name shown for buttons with no entry in the [`SpecialKeyMap`].
pub const UNKNOWN_MOUSE_BUTTON: &str = "Unknown Mouse Button";

/// Human-readable name of a key or mouse action.
///
/// Never empty. The text is kept as the platform reported it; the
/// combination string is upper-cased as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisplayName(String);

impl DisplayName {
    /// Returns `None` for empty or whitespace-only text.
    pub fn new(text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            None
        } else {
            Some(Self(text))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for DisplayName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for DisplayName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The platform's own code-to-symbol facility.
pub trait SymbolLookup {
    /// Raw symbol text for `code`, or `None` if the platform has no name.
    fn symbol_name(&self, code: KeyCode) -> Option<String>;
}

impl SymbolLookup for HashMap<KeyCode, String> {
    fn symbol_name(&self, code: KeyCode) -> Option<String> {
        self.get(&code).cloned()
    }
}

/// X11 keysyms (`X11/keysymdef.h`)
pub mod x11_keysym {
    pub const HOME: u32 = 0xff50;
    pub const PAGE_UP: u32 = 0xff55;
    pub const PAGE_DOWN: u32 = 0xff56;
    pub const END: u32 = 0xff57;
}

/// Linux input event codes (`linux/input-event-codes.h`)
pub mod evdev_code {
    pub const KEY_HOME: u32 = 102;
    pub const KEY_PAGEUP: u32 = 104;
    pub const KEY_END: u32 = 107;
    pub const KEY_PAGEDOWN: u32 = 109;
}

/// `GetKeyNameText` parameters for the extended navigation keys.
///
/// The non-extended scan codes are the keypad keys, which keep their native
/// names (`Num 9`, ...).
pub mod windows_key {
    const EXTENDED: u32 = 1 << 24;

    pub const fn from_scan(scan: u32, extended: bool) -> u32 {
        (scan << 16) | if extended { EXTENDED } else { 0 }
    }

    pub const HOME: u32 = from_scan(0x47, true);
    pub const PAGE_UP: u32 = from_scan(0x49, true);
    pub const END: u32 = from_scan(0x4f, true);
    pub const PAGE_DOWN: u32 = from_scan(0x51, true);
}

/// Fixed names for keys whose platform name is absent or unhelpful.
#[derive(Debug, Clone)]
pub struct SpecialKeyMap {
    keys: HashMap<KeyCode, DisplayName>,
    buttons: HashMap<u32, DisplayName>,
}

impl SpecialKeyMap {
    /// Build the table from the platform's navigation key codes.
    pub fn with_navigation(page_up: u32, page_down: u32, home: u32, end: u32) -> Self {
        let mut map = Self {
            keys: HashMap::new(),
            buttons: HashMap::new(),
        };

        map.insert_key(page_up, "PAGE UP");
        map.insert_key(page_down, "PAGE DOWN");
        map.insert_key(home, "HOME");
        map.insert_key(end, "END");

        map.insert_button(button::LEFT, "MOUSE LEFT CLICK");
        map.insert_button(button::MIDDLE, "MOUSE MIDDLE CLICK");
        map.insert_button(button::RIGHT, "MOUSE RIGHT CLICK");
        map.insert_button(button::SCROLL_UP, "MOUSE SCROLL UP");
        map.insert_button(button::SCROLL_DOWN, "MOUSE SCROLL DOWN");

        map
    }

    pub fn x11() -> Self {
        Self::with_navigation(
            x11_keysym::PAGE_UP,
            x11_keysym::PAGE_DOWN,
            x11_keysym::HOME,
            x11_keysym::END,
        )
    }

    pub fn evdev() -> Self {
        Self::with_navigation(
            evdev_code::KEY_PAGEUP,
            evdev_code::KEY_PAGEDOWN,
            evdev_code::KEY_HOME,
            evdev_code::KEY_END,
        )
    }

    pub fn windows() -> Self {
        Self::with_navigation(
            windows_key::PAGE_UP,
            windows_key::PAGE_DOWN,
            windows_key::HOME,
            windows_key::END,
        )
    }

    // Table entries are literals, so an empty name is a programming error.
    fn insert_key(&mut self, code: u32, name: &'static str) {
        if let Some(name) = DisplayName::new(name) {
            self.keys.insert(KeyCode(code), name);
        }
    }

    fn insert_button(&mut self, number: u32, name: &'static str) {
        if let Some(name) = DisplayName::new(name) {
            self.buttons.insert(number, name);
        }
    }

    pub fn key(&self, code: KeyCode) -> Option<&DisplayName> {
        self.keys.get(&code)
    }

    pub fn button(&self, number: u32) -> Option<&DisplayName> {
        self.buttons.get(&number)
    }
}

/// Maps native codes to display names.
///
/// The special table wins; everything else goes through the platform lookup.
#[derive(Debug, Clone)]
pub struct KeyNameResolver<L> {
    special: SpecialKeyMap,
    lookup: L,
    unknown_button: DisplayName,
}

impl<L: SymbolLookup> KeyNameResolver<L> {
    pub fn new(special: SpecialKeyMap, lookup: L) -> Self {
        Self {
            special,
            lookup,
            unknown_button: DisplayName(UNKNOWN_MOUSE_BUTTON.to_string()),
        }
    }

    /// Resolve a key. `None` means the event must be ignored.
    pub fn resolve_key(&self, code: KeyCode) -> Option<DisplayName> {
        if let Some(name) = self.special.key(code) {
            return Some(name.clone());
        }

        self.lookup.symbol_name(code).and_then(DisplayName::new)
    }

    /// Resolve a pointer button. Unmapped buttons get a visible placeholder.
    pub fn resolve_button(&self, number: u32) -> DisplayName {
        self.special
            .button(number)
            .unwrap_or(&self.unknown_button)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(names: &[(u32, &str)]) -> KeyNameResolver<HashMap<KeyCode, String>> {
        let lookup = names
            .iter()
            .map(|(code, name)| (KeyCode(*code), name.to_string()))
            .collect();
        KeyNameResolver::new(SpecialKeyMap::x11(), lookup)
    }

    #[test]
    fn test_display_name_rejects_empty() {
        assert!(DisplayName::new("").is_none());
        assert!(DisplayName::new("   ").is_none());
        assert_eq!(DisplayName::new("a").unwrap().as_str(), "a");
    }

    #[test]
    fn test_special_key_overrides_platform_name() {
        let resolver = resolver(&[(x11_keysym::PAGE_UP, "Prior")]);
        let name = resolver.resolve_key(KeyCode(x11_keysym::PAGE_UP)).unwrap();
        assert_eq!(name.as_str(), "PAGE UP");
    }

    #[test]
    fn test_navigation_keys_on_every_platform() {
        let tables = [
            (
                SpecialKeyMap::x11(),
                [
                    x11_keysym::PAGE_UP,
                    x11_keysym::PAGE_DOWN,
                    x11_keysym::HOME,
                    x11_keysym::END,
                ],
            ),
            (
                SpecialKeyMap::evdev(),
                [
                    evdev_code::KEY_PAGEUP,
                    evdev_code::KEY_PAGEDOWN,
                    evdev_code::KEY_HOME,
                    evdev_code::KEY_END,
                ],
            ),
            (
                SpecialKeyMap::windows(),
                [
                    windows_key::PAGE_UP,
                    windows_key::PAGE_DOWN,
                    windows_key::HOME,
                    windows_key::END,
                ],
            ),
        ];

        for (map, codes) in tables {
            let names: Vec<&str> = codes
                .iter()
                .map(|c| map.key(KeyCode(*c)).unwrap().as_str())
                .collect();
            assert_eq!(names, ["PAGE UP", "PAGE DOWN", "HOME", "END"]);
        }
    }

    #[test]
    fn test_windows_keypad_keeps_native_name() {
        let map = SpecialKeyMap::windows();
        let keypad_nine = KeyCode(windows_key::from_scan(0x49, false));
        assert!(map.key(keypad_nine).is_none());
    }

    #[test]
    fn test_platform_name_returned_verbatim() {
        let resolver = resolver(&[(0x61, "a"), (0xffe3, "Control_L")]);
        assert_eq!(resolver.resolve_key(KeyCode(0x61)).unwrap().as_str(), "a");
        assert_eq!(
            resolver.resolve_key(KeyCode(0xffe3)).unwrap().as_str(),
            "Control_L"
        );
    }

    #[test]
    fn test_unknown_code_resolves_to_none() {
        let resolver = resolver(&[(0x61, "a")]);
        assert!(resolver.resolve_key(KeyCode(0x1234)).is_none());
    }

    #[test]
    fn test_empty_platform_name_resolves_to_none() {
        let resolver = resolver(&[(0x62, "")]);
        assert!(resolver.resolve_key(KeyCode(0x62)).is_none());
    }

    #[test]
    fn test_mouse_buttons() {
        let resolver = resolver(&[]);
        let names: Vec<String> = (1..=5)
            .map(|b| resolver.resolve_button(b).to_string())
            .collect();
        assert_eq!(
            names,
            [
                "MOUSE LEFT CLICK",
                "MOUSE MIDDLE CLICK",
                "MOUSE RIGHT CLICK",
                "MOUSE SCROLL UP",
                "MOUSE SCROLL DOWN"
            ]
        );
    }

    #[test]
    fn test_unmapped_button_placeholder() {
        let resolver = resolver(&[]);
        assert_eq!(
            resolver.resolve_button(button::BACK).as_str(),
            UNKNOWN_MOUSE_BUTTON
        );
        assert_eq!(resolver.resolve_button(0).as_str(), "Unknown Mouse Button");
    }
}
