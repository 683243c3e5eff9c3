//! Global input capture and active-key aggregation
//!
//! Event sources subscribe to system-wide keyboard and mouse input, resolve
//! each native code to a [`DisplayName`] and feed the resulting
//! [`NormalizedEvent`]s into an [`ActiveKeySet`], which renders the
//! currently held combination through a [`Renderer`].
//!
//! ```text
//! OS -> EventSource -> KeyNameResolver -> ActiveKeySet::apply -> Renderer
//! ```

pub mod active;
#[cfg(target_os = "linux")]
pub mod device;
pub mod name;
pub mod shutdown;
pub mod source;

pub use active::{format_combination, ActiveKeySet, Renderer};
pub use name::{DisplayName, KeyCode, KeyNameResolver, SpecialKeyMap, SymbolLookup};
pub use shutdown::{Interrupter, Shutdown};
pub use source::{
    CaptureError, Connection, EventSource, NormalizedEvent, Pump, RawInput, SourceState,
    SourceStateCell,
};
