//! Viewer backends.
//!
//! Every backend implements the same [`Viewer`] contract so the display
//! state manager and scene code never branch on the backend. The set of
//! backends is closed: see [`ViewerKind`].

mod hardware;
mod native;
mod web;

pub use hardware::{HardwareOptions, HardwareViewer};
pub use native::{to_native, NativeCache};
pub use web::{ClientMessage, ServerMessage, WebOptions, WebViewer};

use crate::grid::{TilePos, TileState};
use crate::led::{Animation, LedManager};
use crate::Result;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::error;

/// Button transition callback: `(row, col, pressed)`.
pub type KeyCallback = Arc<dyn Fn(u8, u8, bool) + Send + Sync>;

/// The backends a runtime can attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewerKind {
    /// USB button dock.
    Hardware,
    /// Browser emulator over a WebSocket.
    Web,
}

impl fmt::Display for ViewerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewerKind::Hardware => write!(f, "hardware"),
            ViewerKind::Web => write!(f, "web"),
        }
    }
}

/// Capability contract shared by every backend.
///
/// `initialize` must disable any transport-driven input reader and start
/// the backend's own input loop. `set_tile` only queues; nothing reaches the
/// transport before `submit_tiles`.
pub trait Viewer: Send + Sync {
    fn kind(&self) -> ViewerKind;

    /// Opens the transport. Fails with `DeviceUnavailable` when it cannot.
    fn initialize(&self) -> Result<()>;

    /// Releases the transport. Errors are logged, never returned.
    fn close(&self);

    /// Queues a tile for the next submit.
    fn set_tile(&self, row: usize, col: usize, source: &Path, cache_key: &str) -> Result<()>;

    /// Transmits queued tiles whose content differs from what this viewer
    /// last sent. Returns the number of tiles transmitted.
    fn submit_tiles(&self) -> Result<usize>;

    /// Installs the button transition callback, replacing any previous one.
    fn register_key_callback(&self, callback: KeyCallback);

    /// Shared LED manager.
    fn leds(&self) -> &Arc<LedManager>;

    fn set_background_led_animation(&self, animation: Box<dyn Animation>) {
        self.leds().set_background_animation(animation);
    }

    fn run_led_animation(&self, animation: Box<dyn Animation>, duration: Option<Duration>) {
        self.leds().run_animation(animation, duration);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tiles queued since the last submit. A later write to a slot replaces the
/// earlier one.
#[derive(Default)]
pub(crate) struct PendingTiles {
    tiles: Mutex<BTreeMap<TilePos, TileState>>,
}

impl PendingTiles {
    pub(crate) fn queue(&self, row: usize, col: usize, source: &Path, cache_key: &str) -> Result<()> {
        let pos = TilePos::new(row, col)?;
        lock(&self.tiles).insert(pos, TileState::new(source, cache_key));
        Ok(())
    }

    pub(crate) fn take(&self) -> BTreeMap<TilePos, TileState> {
        std::mem::take(&mut *lock(&self.tiles))
    }
}

/// What a viewer last transmitted per slot.
#[derive(Default)]
pub(crate) struct DisplayedState {
    keys: Mutex<HashMap<TilePos, String>>,
}

impl DisplayedState {
    pub(crate) fn is_current(&self, pos: TilePos, key: &str) -> bool {
        lock(&self.keys).get(&pos).is_some_and(|shown| shown == key)
    }

    pub(crate) fn record(&self, pos: TilePos, key: String) {
        lock(&self.keys).insert(pos, key);
    }

    pub(crate) fn get(&self, pos: TilePos) -> Option<String> {
        lock(&self.keys).get(&pos).cloned()
    }

    pub(crate) fn clear(&self) {
        lock(&self.keys).clear();
    }
}

/// Holds the registered key callback and shields callers from its panics.
#[derive(Default)]
pub(crate) struct KeyDispatch {
    callback: Mutex<Option<KeyCallback>>,
}

impl KeyDispatch {
    pub(crate) fn set(&self, callback: KeyCallback) {
        *lock(&self.callback) = Some(callback);
    }

    pub(crate) fn dispatch(&self, row: u8, col: u8, pressed: bool) {
        let callback = lock(&self.callback).clone();
        let Some(callback) = callback else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| callback(row, col, pressed))).is_err() {
            error!("Key callback panicked for ({}, {})", row, col);
        }
    }
}
