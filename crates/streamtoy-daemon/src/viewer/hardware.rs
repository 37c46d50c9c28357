//! USB dock viewer.

use super::native::{to_native, write_jpeg, NativeCache};
use super::{DisplayedState, KeyCallback, KeyDispatch, PendingTiles, Viewer, ViewerKind};
use crate::config::HardwareConfig;
use crate::grid::{TilePos, TileState};
use crate::led::LedManager;
use crate::util::{join_with_timeout, ErrorThrottle};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use streamtoy_hw::{DockDevice, DockTransport, HidTransport};
use tracing::{debug, error, info, warn};

/// Full-screen background resolution.
const BACKGROUND_SIZE: (u32, u32) = (800, 480);

/// Back-off after a failed read.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Hardware viewer settings.
#[derive(Debug, Clone)]
pub struct HardwareOptions {
    pub vendor_id: u16,
    pub product_id: u16,
    pub brightness: u8,
    pub tile_size: u32,
    pub native_cache_dir: PathBuf,
    pub read_backoff: Duration,
    pub ack_timeout: Duration,
    pub join_timeout: Duration,
    pub heartbeat: Duration,
}

impl HardwareOptions {
    pub fn from_config(config: &HardwareConfig, tile_size: u32) -> Self {
        Self {
            vendor_id: config.vendor_id,
            product_id: config.product_id,
            brightness: config.brightness,
            tile_size,
            native_cache_dir: config.native_cache_dir.clone(),
            read_backoff: config.read_backoff(),
            ack_timeout: config.ack_timeout(),
            join_timeout: config.join_timeout(),
            heartbeat: config.heartbeat(),
        }
    }
}

type Opener<T> = Box<dyn Fn(&HardwareOptions) -> streamtoy_hw::Result<T> + Send + Sync>;

/// Drives the dock: native conversion, per-slot dedup, and an owned read
/// loop in place of any transport-driven reader.
pub struct HardwareViewer<T: DockTransport + 'static = HidTransport> {
    options: HardwareOptions,
    opener: Opener<T>,
    device: Mutex<Option<Arc<DockDevice<T>>>>,
    native: NativeCache,
    pending: PendingTiles,
    displayed: DisplayedState,
    keys: Arc<KeyDispatch>,
    reading: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
    leds: Arc<LedManager>,
    transmits: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl HardwareViewer<HidTransport> {
    /// Viewer over USB HID.
    pub fn new(options: HardwareOptions, leds: Arc<LedManager>) -> Self {
        Self::with_opener(options, leds, |opts| {
            HidTransport::open(opts.vendor_id, opts.product_id)
        })
    }
}

impl<T: DockTransport + 'static> HardwareViewer<T> {
    /// Viewer over any transport. `opener` runs at `initialize`.
    pub fn with_opener<F>(options: HardwareOptions, leds: Arc<LedManager>, opener: F) -> Self
    where
        F: Fn(&HardwareOptions) -> streamtoy_hw::Result<T> + Send + Sync + 'static,
    {
        let native = NativeCache::new(options.native_cache_dir.clone(), options.tile_size);
        Self {
            options,
            opener: Box::new(opener),
            device: Mutex::new(None),
            native,
            pending: PendingTiles::default(),
            displayed: DisplayedState::default(),
            keys: Arc::new(KeyDispatch::default()),
            reading: Arc::new(AtomicBool::new(false)),
            reader: Mutex::new(None),
            leds,
            transmits: AtomicUsize::new(0),
        }
    }

    fn device(&self) -> Result<Arc<DockDevice<T>>> {
        lock(&self.device)
            .clone()
            .ok_or_else(|| Error::DeviceUnavailable("dock not initialized".to_string()))
    }

    /// Key image writes issued since creation.
    pub fn transmit_count(&self) -> usize {
        self.transmits.load(Ordering::SeqCst)
    }

    /// Content key last transmitted to a slot.
    pub fn displayed_key(&self, row: usize, col: usize) -> Result<Option<String>> {
        Ok(self.displayed.get(TilePos::new(row, col)?))
    }

    /// Whether a native derivative exists for `content_key`.
    pub fn has_native(&self, content_key: &str) -> bool {
        self.native.has(content_key)
    }

    /// Whether a background write still awaits its ready-ACK.
    pub fn is_busy(&self) -> bool {
        self.device().map(|d| d.is_busy()).unwrap_or(false)
    }

    /// Writes a full-screen background and waits for the dock's ready-ACK.
    ///
    /// Returns false if the ACK did not arrive within the configured
    /// timeout.
    pub fn set_background_image(&self, source: &Path) -> Result<bool> {
        let device = self.device()?;
        let image = image::open(source).map_err(|e| Error::decode(source, e))?;
        let native = to_native(&image, BACKGROUND_SIZE.0, BACKGROUND_SIZE.1);

        std::fs::create_dir_all(&self.options.native_cache_dir)?;
        let path = self.options.native_cache_dir.join("background_native.jpg");
        write_jpeg(&native, &path)?;
        let jpeg = std::fs::read(&path)?;

        device.set_background(&jpeg)?;
        let acked = device.wait_ready(self.options.ack_timeout);
        if !acked {
            warn!(
                "Dock did not acknowledge background write within {:?}",
                self.options.ack_timeout
            );
        }
        // Tiles drawn over the old background are gone
        self.displayed.clear();
        Ok(acked)
    }

    fn transmit(&self, device: &DockDevice<T>, pos: TilePos, tile: &TileState, key: &str) -> Result<()> {
        let native = self.native.ensure(&tile.source, key)?;
        let jpeg = std::fs::read(&native)?;
        device
            .set_key_image(pos.row, pos.col, &jpeg)
            .map_err(|e| Error::TransmitFailure {
                row: pos.row,
                col: pos.col,
                reason: e.to_string(),
            })
    }

    fn start_reader(&self, device: Arc<DockDevice<T>>) -> Result<()> {
        self.reading.store(true, Ordering::SeqCst);
        let keys = Arc::clone(&self.keys);
        let reading = Arc::clone(&self.reading);
        let backoff = self.options.read_backoff;
        let heartbeat = self.options.heartbeat;

        let handle = std::thread::Builder::new()
            .name("dock-read".to_string())
            .spawn(move || read_loop(&device, &keys, &reading, backoff, heartbeat))?;
        *lock(&self.reader) = Some(handle);
        info!("Dock read thread started");
        Ok(())
    }
}

/// Polls the dock for frames until `reading` clears, sending a keep-alive
/// every `heartbeat`.
///
/// Sleeps only when no frame is pending, so a decoded key event is followed
/// immediately by the next poll.
fn read_loop<T: DockTransport>(
    device: &DockDevice<T>,
    keys: &KeyDispatch,
    reading: &AtomicBool,
    backoff: Duration,
    heartbeat: Duration,
) {
    let mut errors = ErrorThrottle::new("Dock read");
    let mut heartbeat_errors = ErrorThrottle::new("Dock heartbeat");
    let mut last_heartbeat = Instant::now();
    while reading.load(Ordering::SeqCst) {
        if last_heartbeat.elapsed() >= heartbeat {
            match device.heartbeat() {
                Ok(()) => heartbeat_errors.ok(),
                Err(e) => heartbeat_errors.error(&e),
            }
            last_heartbeat = Instant::now();
        }

        match device.read_frame() {
            Ok(Some(frame)) => {
                errors.ok();
                if let Some(button) = frame.button {
                    debug!(
                        "Dock key {} -> ({}, {}) pressed={}",
                        button.raw, button.row, button.col, button.pressed
                    );
                    keys.dispatch(button.row, button.col, button.pressed);
                }
            }
            Ok(None) => std::thread::sleep(backoff),
            Err(e) => {
                errors.error(&e);
                std::thread::sleep(READ_ERROR_BACKOFF);
            }
        }
    }
    debug!("Dock read loop stopped");
}

impl<T: DockTransport + 'static> Viewer for HardwareViewer<T> {
    fn kind(&self) -> ViewerKind {
        ViewerKind::Hardware
    }

    fn initialize(&self) -> Result<()> {
        let transport =
            (self.opener)(&self.options).map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
        let device = Arc::new(DockDevice::new(transport));

        // The read thread below is the only reader
        device.disable_auto_read()?;
        device.wake()?;
        device.set_brightness(self.options.brightness)?;
        device.clear_all()?;
        device.refresh()?;

        *lock(&self.device) = Some(Arc::clone(&device));
        self.start_reader(device)?;
        info!("Dock initialized");
        Ok(())
    }

    fn close(&self) {
        info!("Closing dock");
        let device = lock(&self.device).take();

        if let Some(device) = &device {
            if let Err(e) = device.clear_all().and_then(|_| device.refresh()) {
                error!("Error clearing dock on close: {}", e);
            }
        }

        self.reading.store(false, Ordering::SeqCst);
        if let Some(handle) = lock(&self.reader).take() {
            join_with_timeout(handle, self.options.join_timeout, "Dock read");
        }
        self.displayed.clear();
    }

    fn set_tile(&self, row: usize, col: usize, source: &Path, cache_key: &str) -> Result<()> {
        self.pending.queue(row, col, source, cache_key)
    }

    fn submit_tiles(&self) -> Result<usize> {
        let device = self.device()?;
        let queued = self.pending.take();
        let total = queued.len();

        let mut sent = Vec::new();
        for (pos, tile) in queued {
            let key = tile.content_key();
            if self.displayed.is_current(pos, &key) {
                continue;
            }
            match self.transmit(&device, pos, &tile, &key) {
                Ok(()) => {
                    self.transmits.fetch_add(1, Ordering::SeqCst);
                    sent.push((pos, key));
                }
                Err(e) => error!("Tile {} not sent: {}", pos, e),
            }
        }
        if sent.is_empty() {
            return Ok(0);
        }

        // Tile updates are not gated on the ready-ACK. Slots count as
        // displayed only once the refresh is committed.
        device.refresh()?;
        let count = sent.len();
        for (pos, key) in sent {
            self.displayed.record(pos, key);
        }
        debug!("Submitted {} tile(s) (skipped {} unchanged)", count, total - count);
        Ok(count)
    }

    fn register_key_callback(&self, callback: KeyCallback) {
        self.keys.set(callback);
    }

    fn leds(&self) -> &Arc<LedManager> {
        &self.leds
    }
}
