//! The set of currently held keys
//!
//! [`ActiveKeySet`] owns both the held names and the [`Renderer`] behind one
//! mutex. Applying an event and drawing the resulting combination happen in
//! the same critical section, so a render never shows a half-applied set and
//! two renders never interleave on the terminal.

use std::collections::BTreeSet;
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::name::DisplayName;
use crate::source::NormalizedEvent;

/// Separator between names in the combination string
pub const SEPARATOR: &str = " + ";

/// A surface that can show one line of text.
pub trait Renderer: Send {
    /// Replace whatever is shown with `text`. Must accept `""`.
    fn display(&mut self, text: &str) -> io::Result<()>;
}

/// Join names in the order given and upper-case the result.
///
/// Callers pass names in ascending order; [`ActiveKeySet`] iterates a
/// `BTreeSet`, which yields plain lexicographic order (`"A + CTRL + SHIFT"`).
pub fn format_combination<'a, I>(names: I) -> String
where
    I: IntoIterator<Item = &'a DisplayName>,
{
    names
        .into_iter()
        .map(DisplayName::as_str)
        .collect::<Vec<_>>()
        .join(SEPARATOR)
        .to_uppercase()
}

struct Inner<R> {
    keys: BTreeSet<DisplayName>,
    renderer: R,
    /// Text most recently handed to the renderer, redrawn by `refresh`.
    shown: String,
}

impl<R: Renderer> Inner<R> {
    fn render(&mut self, text: String) {
        if let Err(e) = self.renderer.display(&text) {
            tracing::warn!("Failed to render combination: {}", e);
        }
        self.shown = text;
    }
}

/// Currently held keys plus the renderer they are drawn with.
pub struct ActiveKeySet<R> {
    inner: Mutex<Inner<R>>,
}

impl<R: Renderer> ActiveKeySet<R> {
    pub fn new(renderer: R) -> Self {
        Self {
            inner: Mutex::new(Inner {
                keys: BTreeSet::new(),
                renderer,
                shown: String::new(),
            }),
        }
    }

    // Poisoning is ignored; the set stays usable after a renderer panic.
    fn lock(&self) -> MutexGuard<'_, Inner<R>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert on press, remove on release, then redraw.
    ///
    /// Releasing a key that is not held is a no-op. Nothing is drawn when the
    /// set did not change or became empty; the last combination stays on
    /// screen after the keys are let go.
    pub fn apply(&self, event: &NormalizedEvent) {
        let mut inner = self.lock();

        let changed = if event.is_press {
            inner.keys.insert(event.name.clone())
        } else {
            inner.keys.remove(event.name.as_str())
        };

        if !changed || inner.keys.is_empty() {
            return;
        }

        let text = format_combination(&inner.keys);
        inner.render(text);
    }

    /// Held names in ascending order.
    pub fn snapshot(&self) -> Vec<DisplayName> {
        self.lock().keys.iter().cloned().collect()
    }

    /// The combination string for the held keys (`""` when none are held).
    pub fn combination(&self) -> String {
        format_combination(&self.lock().keys)
    }

    /// Forget every held key without drawing.
    pub fn clear(&self) {
        self.lock().keys.clear();
    }

    /// Draw the last shown text again, e.g. after the surface was resized.
    pub fn refresh(&self) {
        let mut inner = self.lock();
        let text = inner.shown.clone();
        inner.render(text);
    }

    pub fn is_empty(&self) -> bool {
        self.lock().keys.is_empty()
    }
}
