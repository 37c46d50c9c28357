//! Two-layer LED animation scheduler.

use super::animation::Animation;
use crate::util::{join_with_timeout, ErrorThrottle};
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use streamtoy_hw::{PixelStrip, RGB8};
use tracing::{debug, error, info, warn};

/// Which layer a tick advanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Foreground,
    Background,
}

struct Installed {
    animation: Box<dyn Animation>,
    started: Instant,
}

struct Foreground {
    installed: Installed,
    /// `None` runs until replaced or cleared.
    duration: Option<Duration>,
}

#[derive(Default)]
struct Layers {
    background: Option<Installed>,
    foreground: Option<Foreground>,
}

/// Owns the LED pixel buffer and the animation tick thread.
pub struct LedManager {
    layers: Mutex<Layers>,
    strip: Mutex<Box<dyn PixelStrip>>,
    tick_interval: Duration,
    running: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LedManager {
    /// Creates a manager over `strip`. The tick thread is not started.
    pub fn new(strip: Box<dyn PixelStrip>, tick_interval: Duration) -> Self {
        info!(
            "LED manager created ({} pixels, tick {:?})",
            strip.len(),
            tick_interval
        );
        Self {
            layers: Mutex::new(Layers::default()),
            strip: Mutex::new(strip),
            tick_interval,
            running: AtomicBool::new(false),
            thread: Mutex::new(None),
        }
    }

    /// Number of pixels.
    pub fn len(&self) -> usize {
        lock(&self.strip).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces the persistent background animation.
    pub fn set_background_animation(&self, animation: Box<dyn Animation>) {
        debug!("Background animation set: {}", animation.name());
        lock(&self.layers).background = Some(Installed {
            animation,
            started: Instant::now(),
        });
    }

    /// Runs `animation` over the background, for `duration` or until
    /// replaced when `None`.
    pub fn run_animation(&self, animation: Box<dyn Animation>, duration: Option<Duration>) {
        debug!(
            "Foreground animation started: {}, duration={:?}",
            animation.name(),
            duration
        );
        lock(&self.layers).foreground = Some(Foreground {
            installed: Installed {
                animation,
                started: Instant::now(),
            },
            duration,
        });
    }

    /// Drops the foreground animation so the background resumes.
    pub fn clear_foreground(&self) {
        lock(&self.layers).foreground = None;
    }

    /// Name of the active foreground animation.
    pub fn foreground_name(&self) -> Option<&'static str> {
        lock(&self.layers)
            .foreground
            .as_ref()
            .map(|fg| fg.installed.animation.name())
    }

    /// Name of the background animation.
    pub fn background_name(&self) -> Option<&'static str> {
        lock(&self.layers)
            .background
            .as_ref()
            .map(|bg| bg.animation.name())
    }

    /// Advances one frame as of `now` and flushes it to the strip.
    ///
    /// An expired foreground is dropped first; then exactly one layer is
    /// advanced, foreground if present, else background.
    pub fn tick(&self, now: Instant) -> Result<Option<Layer>> {
        let mut guard = lock(&self.layers);
        let layers = &mut *guard;

        let expired = layers.foreground.as_ref().is_some_and(|fg| {
            fg.duration
                .is_some_and(|d| now.saturating_duration_since(fg.installed.started) >= d)
        });
        if expired {
            debug!("Foreground animation duration expired");
            layers.foreground = None;
        }

        let (installed, layer) = if let Some(fg) = layers.foreground.as_mut() {
            (Some(&mut fg.installed), Some(Layer::Foreground))
        } else if let Some(bg) = layers.background.as_mut() {
            (Some(bg), Some(Layer::Background))
        } else {
            (None, None)
        };

        let mut strip = lock(&self.strip);
        if let Some(installed) = installed {
            let elapsed = now.saturating_duration_since(installed.started);
            installed.animation.animate(strip.pixels_mut(), elapsed);
        }
        drop(guard);

        strip.show()?;
        Ok(layer)
    }

    /// Fills the strip immediately, outside the tick cadence.
    pub fn set_all(&self, color: RGB8) -> Result<()> {
        let mut strip = lock(&self.strip);
        strip.fill(color);
        strip.show()?;
        Ok(())
    }

    /// Copy of the current frame.
    pub fn snapshot(&self) -> Vec<RGB8> {
        lock(&self.strip).pixels().to_vec()
    }

    /// Whether the tick thread is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts the tick thread.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("LED manager already running");
            return;
        }

        let manager = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("led-tick".to_string())
            .spawn(move || manager.run_loop());

        match handle {
            Ok(handle) => {
                *lock(&self.thread) = Some(handle);
                info!("LED animation thread started");
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                error!("Failed to spawn LED animation thread: {}", e);
            }
        }
    }

    fn run_loop(&self) {
        let mut errors = ErrorThrottle::new("LED tick");
        while self.is_running() {
            match self.tick(Instant::now()) {
                Ok(_) => {
                    errors.ok();
                    std::thread::sleep(self.tick_interval);
                }
                Err(e) => {
                    errors.error(&e);
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }
        debug!("LED animation loop stopped");
    }

    /// Stops the tick thread, waiting at most `timeout`, then blanks the
    /// strip.
    pub fn stop(&self, timeout: Duration) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping LED manager");

        if let Some(handle) = lock(&self.thread).take() {
            join_with_timeout(handle, timeout, "LED tick");
        }

        if let Err(e) = self.set_all(RGB8::default()) {
            error!("Error turning off LEDs: {}", e);
        }
    }
}
