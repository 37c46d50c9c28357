//! Display state manager.
//!
//! The single authority over what each tile shows and which LED animation
//! runs. Every tile write is fanned out to all registered viewers in
//! registration order; `submit` asks each viewer to flush.

use crate::grid::{TilePos, TileState, TILE_COUNT};
use crate::led::{Animation, LedManager, RGB8};
use crate::viewer::Viewer;
use crate::{Error, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Called with every tile write while the state lock is held. Must be fast.
pub type NotifyCallback = Box<dyn Fn(TilePos, &TileState) -> Result<()> + Send + Sync>;

/// Handle returned by registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewerId(u64);

struct Registration {
    id: ViewerId,
    notify: NotifyCallback,
    viewer: Arc<dyn Viewer>,
}

struct State {
    tiles: [Option<TileState>; TILE_COUNT],
    viewers: Vec<Registration>,
    next_id: u64,
}

/// Authoritative tile and LED state, fanned out to viewers.
pub struct DisplayStateManager {
    state: Mutex<State>,
    leds: Arc<LedManager>,
}

impl DisplayStateManager {
    pub fn new(leds: Arc<LedManager>) -> Self {
        Self {
            state: Mutex::new(State {
                tiles: Default::default(),
                viewers: Vec::new(),
                next_id: 0,
            }),
            leds,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a viewer whose notifications queue tiles on the viewer
    /// itself.
    pub fn register_viewer(&self, viewer: Arc<dyn Viewer>) -> ViewerId {
        let target = Arc::clone(&viewer);
        let notify: NotifyCallback = Box::new(move |pos: TilePos, tile: &TileState| {
            target.set_tile(
                pos.row as usize,
                pos.col as usize,
                &tile.source,
                &tile.cache_key,
            )
        });
        self.register(notify, viewer)
    }

    /// Registers a custom notify callback alongside the viewer to flush on
    /// submit.
    pub fn register(&self, notify: NotifyCallback, viewer: Arc<dyn Viewer>) -> ViewerId {
        let mut state = self.state();
        let id = ViewerId(state.next_id);
        state.next_id += 1;
        info!("Registered {} viewer ({:?})", viewer.kind(), id);
        state.viewers.push(Registration { id, notify, viewer });
        id
    }

    /// Removes a registration. The viewer itself is left open.
    pub fn unregister_viewer(&self, id: ViewerId) -> bool {
        let mut state = self.state();
        let before = state.viewers.len();
        state.viewers.retain(|r| r.id != id);
        let removed = state.viewers.len() != before;
        if removed {
            info!("Unregistered viewer {:?}", id);
        }
        removed
    }

    /// Number of registered viewers.
    pub fn viewer_count(&self) -> usize {
        self.state().viewers.len()
    }

    /// Registered viewers in registration order.
    pub fn viewers(&self) -> Vec<Arc<dyn Viewer>> {
        self.state()
            .viewers
            .iter()
            .map(|r| Arc::clone(&r.viewer))
            .collect()
    }

    /// Sets a tile and notifies every viewer in registration order.
    ///
    /// A failing or panicking viewer is logged and skipped; the remaining
    /// viewers are still notified.
    pub fn set_tile(
        &self,
        row: usize,
        col: usize,
        source: impl AsRef<Path>,
        cache_key: &str,
    ) -> Result<()> {
        let pos = TilePos::new(row, col)?;
        let tile = TileState::new(source.as_ref(), cache_key);

        let mut state = self.state();
        state.tiles[pos.index()] = Some(tile.clone());

        for registration in &state.viewers {
            let outcome = catch_unwind(AssertUnwindSafe(|| (registration.notify)(pos, &tile)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => Error::CallbackFailure(e.to_string()),
                Err(_) => Error::CallbackFailure("notify callback panicked".to_string()),
            };
            error!(
                "Viewer {:?} ({}) rejected tile {}: {}",
                registration.id,
                registration.viewer.kind(),
                pos,
                failure
            );
        }

        debug!("Tile {} set to {}", pos, tile.content_key());
        Ok(())
    }

    /// Flushes every viewer in registration order. Returns the total number
    /// of tiles transmitted.
    pub fn submit(&self) -> usize {
        // Flush outside the lock: transmits may be slow
        let viewers = self.viewers();

        let mut sent = 0;
        for viewer in viewers {
            match catch_unwind(AssertUnwindSafe(|| viewer.submit_tiles())) {
                Ok(Ok(n)) => sent += n,
                Ok(Err(e)) => warn!("{} viewer submit failed: {}", viewer.kind(), e),
                Err(_) => error!("{} viewer submit panicked", viewer.kind()),
            }
        }
        sent
    }

    /// Current content of one tile.
    pub fn get_tile_state(&self, row: usize, col: usize) -> Result<Option<TileState>> {
        let pos = TilePos::new(row, col)?;
        Ok(self.state().tiles[pos.index()].clone())
    }

    /// Every tile that has been set, in row-major order.
    pub fn get_all_tile_state(&self) -> Vec<(TilePos, TileState)> {
        let state = self.state();
        TilePos::all()
            .filter_map(|pos| state.tiles[pos.index()].clone().map(|t| (pos, t)))
            .collect()
    }

    /// Shared LED manager.
    pub fn leds(&self) -> &Arc<LedManager> {
        &self.leds
    }

    pub fn set_background_led_animation(&self, animation: Box<dyn Animation>) {
        self.leds.set_background_animation(animation);
    }

    pub fn run_led_animation(&self, animation: Box<dyn Animation>, duration: Option<Duration>) {
        self.leds.run_animation(animation, duration);
    }

    pub fn clear_foreground_led(&self) {
        self.leds.clear_foreground();
    }

    /// Immediately fills the LED strip, bypassing animations.
    pub fn set_all_leds(&self, color: RGB8) -> Result<()> {
        self.leds.set_all(color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::led::Solid;
    use crate::viewer::{KeyCallback, ViewerKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use streamtoy_hw::FakeStrip;

    type Log = Arc<Mutex<Vec<(String, TilePos, String)>>>;

    struct Recording {
        name: &'static str,
        log: Log,
        submits: AtomicUsize,
        leds: Arc<LedManager>,
        fail: bool,
    }

    impl Viewer for Recording {
        fn kind(&self) -> ViewerKind {
            ViewerKind::Web
        }

        fn initialize(&self) -> Result<()> {
            Ok(())
        }

        fn close(&self) {}

        fn set_tile(&self, row: usize, col: usize, _: &Path, cache_key: &str) -> Result<()> {
            if self.fail {
                return Err(Error::TransmitFailure {
                    row: row as u8,
                    col: col as u8,
                    reason: "broken".to_string(),
                });
            }
            self.log.lock().unwrap().push((
                self.name.to_string(),
                TilePos::new(row, col)?,
                cache_key.to_string(),
            ));
            Ok(())
        }

        fn submit_tiles(&self) -> Result<usize> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push((
                format!("{}:submit", self.name),
                TilePos { row: 0, col: 0 },
                String::new(),
            ));
            Ok(0)
        }

        fn register_key_callback(&self, _: KeyCallback) {}

        fn leds(&self) -> &Arc<LedManager> {
            &self.leds
        }
    }

    fn leds() -> Arc<LedManager> {
        Arc::new(LedManager::new(
            Box::new(FakeStrip::new(90)),
            Duration::from_millis(50),
        ))
    }

    fn recording(name: &'static str, log: &Log, leds: &Arc<LedManager>) -> Arc<Recording> {
        Arc::new(Recording {
            name,
            log: log.clone(),
            submits: AtomicUsize::new(0),
            leds: leds.clone(),
            fail: false,
        })
    }

    #[test]
    fn test_fan_out_order() {
        let leds = leds();
        let dsm = DisplayStateManager::new(leds.clone());
        let log: Log = Default::default();
        dsm.register_viewer(recording("a", &log, &leds));
        dsm.register_viewer(recording("b", &log, &leds));

        dsm.set_tile(0, 0, "x.png", "k1").unwrap();
        dsm.set_tile(2, 4, "y.png", "k2").unwrap();
        dsm.set_tile(0, 0, "z.png", "k3").unwrap();

        let log = log.lock().unwrap();
        let seen = |name: &str| -> Vec<(TilePos, String)> {
            log.iter()
                .filter(|(n, _, _)| n == name)
                .map(|(_, p, k)| (*p, k.clone()))
                .collect()
        };
        assert_eq!(seen("a"), seen("b"));
        assert_eq!(
            seen("a").iter().map(|(_, k)| k.as_str()).collect::<Vec<_>>(),
            vec!["k1", "k2", "k3"]
        );
        // Each write reaches a before b
        let names: Vec<_> = log.iter().map(|(n, _, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "a", "b", "a", "b"]);
    }

    #[test]
    fn test_failing_viewer_does_not_block_others() {
        let leds = leds();
        let dsm = DisplayStateManager::new(leds.clone());
        let log: Log = Default::default();

        dsm.register_viewer(Arc::new(Recording {
            name: "broken",
            log: log.clone(),
            submits: AtomicUsize::new(0),
            leds: leds.clone(),
            fail: true,
        }));
        dsm.register(
            Box::new(|_: TilePos, _: &TileState| -> Result<()> { panic!("notify panicked") }),
            recording("panicky", &log, &leds),
        );
        dsm.register_viewer(recording("ok", &log, &leds));

        dsm.set_tile(1, 1, "x.png", "k1").unwrap();
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, "ok");
    }

    #[test]
    fn test_invalid_coordinate_rejected() {
        let dsm = DisplayStateManager::new(leds());
        assert!(matches!(
            dsm.set_tile(3, 0, "x.png", "k"),
            Err(Error::InvalidCoordinate { row: 3, col: 0 })
        ));
        assert!(dsm.set_tile(0, 5, "x.png", "k").is_err());
        assert!(dsm.get_all_tile_state().is_empty());
    }

    #[test]
    fn test_submit_flushes_in_order() {
        let leds = leds();
        let dsm = DisplayStateManager::new(leds.clone());
        let log: Log = Default::default();
        let a = recording("a", &log, &leds);
        let b = recording("b", &log, &leds);
        dsm.register_viewer(a.clone());
        let b_id = dsm.register_viewer(b.clone());

        dsm.submit();
        assert!(dsm.unregister_viewer(b_id));
        assert!(!dsm.unregister_viewer(b_id));
        dsm.submit();

        assert_eq!(a.submits.load(Ordering::SeqCst), 2);
        assert_eq!(b.submits.load(Ordering::SeqCst), 1);
        let names: Vec<_> = log.lock().unwrap().iter().map(|(n, _, _)| n.clone()).collect();
        assert_eq!(names, vec!["a:submit", "b:submit", "a:submit"]);
        assert_eq!(dsm.viewer_count(), 1);
    }

    #[test]
    fn test_tile_state_snapshot() {
        let dsm = DisplayStateManager::new(leds());
        dsm.set_tile(1, 2, "x.png", "k1").unwrap();
        dsm.set_tile(0, 4, "y.png", "").unwrap();

        assert_eq!(
            dsm.get_tile_state(1, 2).unwrap(),
            Some(TileState::new("x.png", "k1"))
        );
        assert_eq!(dsm.get_tile_state(2, 2).unwrap(), None);

        let all = dsm.get_all_tile_state();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, TilePos { row: 0, col: 4 });
        assert_eq!(all[0].1.content_key(), "y.png");
    }

    #[test]
    fn test_led_delegation() {
        let leds = leds();
        let dsm = DisplayStateManager::new(leds.clone());
        let red = RGB8 { r: 255, g: 0, b: 0 };

        dsm.set_background_led_animation(Box::new(Solid::new(red)));
        dsm.run_led_animation(Box::new(Solid::new(red)), Some(Duration::from_secs(1)));
        assert_eq!(leds.background_name(), Some("solid"));
        assert_eq!(leds.foreground_name(), Some("solid"));
        dsm.clear_foreground_led();
        assert_eq!(leds.foreground_name(), None);

        dsm.set_all_leds(red).unwrap();
        assert_eq!(leds.snapshot()[0], red);
        leds.tick(Instant::now()).unwrap();
    }

    #[test]
    fn test_scenario_hardware_and_web_dedup() {
        use crate::viewer::{HardwareOptions, HardwareViewer, WebOptions, WebViewer};
        use image::{Rgb, RgbImage};
        use streamtoy_hw::MemoryTransport;

        let dir = tempfile::TempDir::new().unwrap();
        let cover = dir.path().join("cover.png");
        RgbImage::from_pixel(112, 112, Rgb([30, 60, 90]))
            .save(&cover)
            .unwrap();

        let leds = leds();
        let transport = MemoryTransport::new();
        let opened = transport.clone();
        let hardware = Arc::new(HardwareViewer::with_opener(
            HardwareOptions {
                vendor_id: 0,
                product_id: 0,
                brightness: 50,
                tile_size: 112,
                native_cache_dir: dir.path().join("native"),
                read_backoff: Duration::from_millis(1),
                ack_timeout: Duration::from_millis(100),
                join_timeout: Duration::from_secs(1),
                heartbeat: Duration::from_secs(60),
            },
            leds.clone(),
            move |_| Ok(opened.clone()),
        ));
        let web = Arc::new(WebViewer::new(
            WebOptions {
                listen: "127.0.0.1:0".to_string(),
                led_push: Duration::from_millis(100),
                tile_size: 112,
                join_timeout: Duration::from_secs(1),
            },
            leds.clone(),
        ));
        hardware.initialize().unwrap();

        let dsm = DisplayStateManager::new(leds);
        dsm.register_viewer(hardware.clone());
        dsm.register_viewer(web.clone());

        dsm.set_tile(0, 0, &cover, "k1").unwrap();
        assert_eq!(dsm.submit(), 2);
        assert_eq!(hardware.displayed_key(0, 0).unwrap().as_deref(), Some("k1"));
        assert_eq!(web.displayed_key(0, 0).unwrap().as_deref(), Some("k1"));

        dsm.set_tile(0, 0, &cover, "k1").unwrap();
        assert_eq!(dsm.submit(), 0);
        assert_eq!(hardware.transmit_count(), 1);
        assert_eq!(web.transmit_count(), 1);

        hardware.close();
    }
}
