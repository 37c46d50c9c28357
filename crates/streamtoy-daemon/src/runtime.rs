//! Viewer bring-up, scene lifecycle and shutdown.
//!
//! Scenes never touch a viewer. They see the display state manager, the
//! input manager and the render cache through a [`SceneContext`], and run as
//! one task whose only suspension point is the input poll.

use crate::config::{Config, LedConfig, LedDriver};
use crate::display::{DisplayStateManager, ViewerId};
use crate::input::{InputEvent, InputManager};
use crate::led::{create_animation, LedManager, RGB8};
use crate::render::{parse_color, to_led, FontCache, RenderCache};
use crate::viewer::{HardwareOptions, HardwareViewer, KeyCallback, Viewer, WebOptions, WebViewer};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use streamtoy_hw::{FakeStrip, PixelStrip, SerialStrip};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Upper bound on a scene noticing its running flag was cleared.
const SCENE_POLL: Duration = Duration::from_millis(100);

const BLACK: RGB8 = RGB8 { r: 0, g: 0, b: 0 };

/// Scene logic driven by the runtime.
///
/// Handlers run on the scene task and must not block; they are called
/// between input polls and never concurrently.
pub trait Scene: Send {
    fn on_enter(&mut self, ctx: &SceneContext) -> Result<()>;

    /// Handles one input event.
    fn on_input(&mut self, ctx: &SceneContext, event: InputEvent) -> Result<()>;

    /// Called when a poll times out with no event.
    fn on_idle(&mut self, _ctx: &SceneContext) -> Result<()> {
        Ok(())
    }

    fn on_exit(&mut self, _ctx: &SceneContext) {}
}

/// Builds a fresh scene instance.
pub type SceneFactory = Box<dyn Fn() -> Box<dyn Scene> + Send + Sync>;

/// Scene names mapped to factories.
#[derive(Default)]
pub struct SceneRegistry {
    factories: BTreeMap<String, SceneFactory>,
}

impl SceneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a scene, replacing any factory of the same name.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Scene> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Scene>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| Error::UnknownScene(name.to_string()))
    }
}

#[derive(Default)]
struct SwitchRequest {
    pending: Mutex<Option<String>>,
    notify: Notify,
}

impl SwitchRequest {
    fn request(&self, name: &str) {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(name.to_string());
        self.notify.notify_one();
    }

    async fn wait(&self) -> String {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(name) = self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
            {
                return name;
            }
            notified.await;
        }
    }
}

/// Handles a scene uses to reach the core.
#[derive(Clone)]
pub struct SceneContext {
    pub display: Arc<DisplayStateManager>,
    pub input: Arc<InputManager>,
    pub render: Arc<RenderCache>,
    switch: Arc<SwitchRequest>,
}

impl SceneContext {
    pub fn new(
        display: Arc<DisplayStateManager>,
        input: Arc<InputManager>,
        render: Arc<RenderCache>,
    ) -> Self {
        Self {
            display,
            input,
            render,
            switch: Arc::new(SwitchRequest::default()),
        }
    }

    /// Asks the runtime to switch scenes once the current handler returns.
    pub fn request_scene(&self, name: &str) {
        debug!("Scene switch to '{}' requested", name);
        self.switch.request(name);
    }

    #[cfg(test)]
    pub(crate) fn take_scene_request(&self) -> Option<String> {
        self.switch
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

struct ActiveScene {
    name: String,
    running: Arc<AtomicBool>,
    task: JoinHandle<Box<dyn Scene>>,
}

async fn run_scene(
    mut scene: Box<dyn Scene>,
    ctx: SceneContext,
    running: Arc<AtomicBool>,
) -> Box<dyn Scene> {
    while running.load(Ordering::SeqCst) {
        let event = ctx.input.poll_event_async(SCENE_POLL).await;
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let result = match event {
            Some(event) => scene.on_input(&ctx, event),
            None => scene.on_idle(&ctx),
        };
        if let Err(e) = result {
            error!("Scene error: {}", e);
        }
    }
    scene
}

fn open_strip(config: &LedConfig) -> Box<dyn PixelStrip> {
    let mut strip: Box<dyn PixelStrip> = match config.driver {
        LedDriver::Fake => Box::new(FakeStrip::new(config.count)),
        LedDriver::Serial => {
            match SerialStrip::open(&config.device, config.baud_rate, config.count) {
                Ok(strip) => Box::new(strip),
                Err(e) => {
                    warn!("LED strip unavailable ({}), using in-memory strip", e);
                    Box::new(FakeStrip::new(config.count))
                }
            }
        }
    };
    strip.set_brightness(config.brightness);
    strip
}

/// Owns the viewers and the active scene.
pub struct Runtime {
    ctx: SceneContext,
    registry: SceneRegistry,
    viewers: Vec<Arc<dyn Viewer>>,
    attached: Vec<(ViewerId, Arc<dyn Viewer>)>,
    active: Option<ActiveScene>,
    join_timeout: Duration,
}

impl Runtime {
    pub fn new(
        ctx: SceneContext,
        registry: SceneRegistry,
        viewers: Vec<Arc<dyn Viewer>>,
        join_timeout: Duration,
    ) -> Self {
        Self {
            ctx,
            registry,
            viewers,
            attached: Vec::new(),
            active: None,
            join_timeout,
        }
    }

    /// Builds the LED manager, caches and enabled viewers from `config`.
    pub fn from_config(config: &Config, registry: SceneRegistry) -> Result<Self> {
        let tile_size = config.display.tile_size;
        let join_timeout = config.hardware.join_timeout();

        let leds = Arc::new(LedManager::new(
            open_strip(&config.led),
            Duration::from_millis(config.led.tick_ms),
        ));
        match parse_color(&config.led.background_color)
            .and_then(|color| create_animation(&config.led.background, to_led(color)))
        {
            Ok(animation) => leds.set_background_animation(animation),
            Err(e) => warn!("Background LED animation not set: {}", e),
        }

        let fonts = Arc::new(FontCache::load(&config.fonts.paths));
        let render = Arc::new(RenderCache::new(&config.cache.dir, tile_size, fonts)?);
        let display = Arc::new(DisplayStateManager::new(Arc::clone(&leds)));
        let input = Arc::new(InputManager::new(Duration::from_millis(
            config.input.long_press_ms,
        )));

        let mut viewers: Vec<Arc<dyn Viewer>> = Vec::new();
        if config.hardware.enable {
            viewers.push(Arc::new(HardwareViewer::new(
                HardwareOptions::from_config(&config.hardware, tile_size),
                Arc::clone(&leds),
            )));
        }
        if config.web.enable {
            viewers.push(Arc::new(WebViewer::new(
                WebOptions::from_config(&config.web, tile_size, join_timeout),
                Arc::clone(&leds),
            )));
        }

        Ok(Self::new(
            SceneContext::new(display, input, render),
            registry,
            viewers,
            join_timeout,
        ))
    }

    pub fn context(&self) -> &SceneContext {
        &self.ctx
    }

    /// Name of the running scene.
    pub fn current_scene(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.name.as_str())
    }

    /// Viewers that initialized successfully.
    pub fn attached_viewers(&self) -> impl Iterator<Item = &Arc<dyn Viewer>> {
        self.attached.iter().map(|(_, viewer)| viewer)
    }

    /// Initializes every viewer, routes their key events into the input
    /// manager and starts the LED tick.
    ///
    /// A viewer that fails to initialize is skipped. Fails with
    /// `DeviceUnavailable` when none initialized.
    pub fn start(&mut self) -> Result<usize> {
        let input = Arc::clone(&self.ctx.input);
        let callback: KeyCallback = Arc::new(move |row: u8, col: u8, pressed: bool| {
            input.on_key_event(row, col, pressed);
        });

        let mut failures = Vec::new();
        for viewer in &self.viewers {
            viewer.register_key_callback(Arc::clone(&callback));
            match viewer.initialize() {
                Ok(()) => {
                    let id = self.ctx.display.register_viewer(Arc::clone(viewer));
                    self.attached.push((id, Arc::clone(viewer)));
                    info!("{} viewer ready", viewer.kind());
                }
                Err(e) => {
                    warn!("{} viewer unavailable: {}", viewer.kind(), e);
                    failures.push(format!("{}: {}", viewer.kind(), e));
                }
            }
        }

        if self.attached.is_empty() {
            let reason = if failures.is_empty() {
                "no viewers enabled".to_string()
            } else {
                failures.join("; ")
            };
            return Err(Error::DeviceUnavailable(reason));
        }

        self.ctx.display.leds().start();
        Ok(self.attached.len())
    }

    fn reset_leds(&self) {
        self.ctx.display.clear_foreground_led();
        if let Err(e) = self.ctx.display.set_all_leds(BLACK) {
            warn!("LED reset failed: {}", e);
        }
    }

    async fn stop_scene(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        debug!("Stopping scene '{}'", active.name);
        active.running.store(false, Ordering::SeqCst);

        let mut task = active.task;
        match tokio::time::timeout(self.join_timeout, &mut task).await {
            Ok(Ok(mut scene)) => scene.on_exit(&self.ctx),
            Ok(Err(e)) => error!("Scene '{}' task failed: {}", active.name, e),
            Err(_) => {
                warn!("Scene '{}' did not stop in time, aborting", active.name);
                task.abort();
            }
        }
    }

    /// Stops the running scene and enters `name`.
    ///
    /// An unknown name leaves the running scene untouched.
    pub async fn switch_scene(&mut self, name: &str) -> Result<()> {
        if !self.registry.contains(name) {
            return Err(Error::UnknownScene(name.to_string()));
        }

        self.stop_scene().await;
        self.reset_leds();
        self.ctx.input.clear_queue();

        let mut scene = self.registry.create(name)?;
        scene.on_enter(&self.ctx)?;

        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(run_scene(scene, self.ctx.clone(), Arc::clone(&running)));
        self.active = Some(ActiveScene {
            name: name.to_string(),
            running,
            task,
        });
        info!("Entered scene '{}'", name);
        Ok(())
    }

    /// Serves scene switch requests until `shutdown` resolves.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let switch = Arc::clone(&self.ctx.switch);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                name = switch.wait() => {
                    if let Err(e) = self.switch_scene(&name).await {
                        error!("Scene switch to '{}' failed: {}", name, e);
                    }
                }
            }
        }
    }

    /// Stops the scene, unregisters and closes every viewer, then blanks
    /// the strip.
    pub async fn shutdown(mut self) {
        info!("Shutting down");
        self.stop_scene().await;
        for (id, viewer) in self.attached.drain(..).rev() {
            self.ctx.display.unregister_viewer(id);
            viewer.close();
        }
        self.ctx.display.leds().stop(self.join_timeout);
    }
}
