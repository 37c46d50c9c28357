//! Browser emulator viewer.
//!
//! Serves an emulator page and a WebSocket push channel from a dedicated
//! thread. Every transmitted tile is kept as a base64 PNG in a reconnect
//! cache so a new client receives the full grid on connect.

use super::{KeyCallback, KeyDispatch, PendingTiles, Viewer, ViewerKind};
use crate::config::WebConfig;
use crate::grid::{TilePos, COLS, ROWS};
use crate::led::LedManager;
use crate::util::join_with_timeout;
use crate::{Error, Result};
use askama::Template;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::{Sink, SinkExt, StreamExt};
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

/// Outbound queue depth per client before it starts lagging.
const UPDATE_CAPACITY: usize = 256;

/// Messages pushed to browsers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A tile bitmap, base64-encoded PNG.
    TileUpdate { row: u8, col: u8, image: String },
    /// Current strip colours.
    LedUpdate { leds: Vec<[u8; 3]> },
}

/// Messages received from browsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    ButtonPress { row: usize, col: usize },
    ButtonRelease { row: usize, col: usize },
}

/// Web viewer settings.
#[derive(Debug, Clone)]
pub struct WebOptions {
    pub listen: String,
    pub led_push: Duration,
    pub tile_size: u32,
    pub join_timeout: Duration,
}

impl WebOptions {
    pub fn from_config(config: &WebConfig, tile_size: u32, join_timeout: Duration) -> Self {
        Self {
            listen: config.listen.clone(),
            led_push: Duration::from_millis(config.led_push_ms),
            tile_size,
            join_timeout,
        }
    }
}

struct SentTile {
    key: String,
    image: String,
}

/// State shared with the server thread.
struct Shared {
    tiles: Mutex<BTreeMap<TilePos, SentTile>>,
    updates: broadcast::Sender<ServerMessage>,
    keys: KeyDispatch,
    leds: Arc<LedManager>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn replay(&self) -> Vec<ServerMessage> {
        lock(&self.tiles)
            .iter()
            .map(|(pos, tile)| ServerMessage::TileUpdate {
                row: pos.row,
                col: pos.col,
                image: tile.image.clone(),
            })
            .collect()
    }

    fn handle_text(&self, text: &str) {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed client message: {}", e);
                return;
            }
        };
        let (row, col, pressed) = match message {
            ClientMessage::ButtonPress { row, col } => (row, col, true),
            ClientMessage::ButtonRelease { row, col } => (row, col, false),
        };
        match TilePos::new(row, col) {
            Ok(pos) => {
                debug!("Web key ({}, {}) pressed={}", pos.row, pos.col, pressed);
                self.keys.dispatch(pos.row, pos.col, pressed);
            }
            Err(e) => warn!("Dropping client message: {}", e),
        }
    }
}

/// Encodes an RGB image as PNG.
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, image.width(), image.height());
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(image.as_raw())?;
        writer.finish()?;
    }
    Ok(out)
}

fn encode_tile(source: &Path, tile_size: u32) -> Result<String> {
    let image = image::open(source)
        .map_err(|e| Error::decode(source, e))?
        .to_rgb8();
    let image = if image.dimensions() == (tile_size, tile_size) {
        image
    } else {
        imageops::resize(&image, tile_size, tile_size, FilterType::Lanczos3)
    };
    Ok(BASE64.encode(encode_png(&image)?))
}

/// Pushes tiles and LED frames to browser clients.
pub struct WebViewer {
    options: WebOptions,
    shared: Arc<Shared>,
    pending: PendingTiles,
    running: Arc<AtomicBool>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    server: Mutex<Option<JoinHandle<()>>>,
    led_push: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    transmits: AtomicUsize,
}

impl WebViewer {
    pub fn new(options: WebOptions, leds: Arc<LedManager>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            options,
            shared: Arc::new(Shared {
                tiles: Mutex::new(BTreeMap::new()),
                updates,
                keys: KeyDispatch::default(),
                leds,
            }),
            pending: PendingTiles::default(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Mutex::new(None),
            server: Mutex::new(None),
            led_push: Mutex::new(None),
            local_addr: Mutex::new(None),
            transmits: AtomicUsize::new(0),
        }
    }

    /// Address the server is bound to, once initialized.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.local_addr)
    }

    /// Receives everything pushed to clients from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.shared.updates.subscribe()
    }

    /// Messages a newly connected client is sent first.
    pub fn replay(&self) -> Vec<ServerMessage> {
        self.shared.replay()
    }

    /// Handles one inbound text message as if a client had sent it.
    pub fn handle_client_message(&self, text: &str) {
        self.shared.handle_text(text);
    }

    /// Content key last pushed for a slot.
    pub fn displayed_key(&self, row: usize, col: usize) -> Result<Option<String>> {
        let pos = TilePos::new(row, col)?;
        Ok(lock(&self.shared.tiles).get(&pos).map(|t| t.key.clone()))
    }

    /// Tile updates pushed since creation.
    pub fn transmit_count(&self) -> usize {
        self.transmits.load(Ordering::SeqCst)
    }

    fn spawn_led_push(&self) -> Result<JoinHandle<()>> {
        let shared = Arc::clone(&self.shared);
        let running = Arc::clone(&self.running);
        let period = self.options.led_push;
        let handle = std::thread::Builder::new()
            .name("web-led-push".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    if shared.updates.receiver_count() > 0 {
                        let leds = shared
                            .leds
                            .snapshot()
                            .iter()
                            .map(|c| [c.r, c.g, c.b])
                            .collect();
                        let _ = shared.updates.send(ServerMessage::LedUpdate { leds });
                    }
                    std::thread::sleep(period);
                }
                debug!("Web LED push stopped");
            })?;
        Ok(handle)
    }
}

impl Viewer for WebViewer {
    fn kind(&self) -> ViewerKind {
        ViewerKind::Web
    }

    fn initialize(&self) -> Result<()> {
        let listener = std::net::TcpListener::bind(&self.options.listen).map_err(|e| {
            Error::DeviceUnavailable(format!("cannot listen on {}: {}", self.options.listen, e))
        })?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = AppState {
            shared: Arc::clone(&self.shared),
            shutdown: shutdown_rx,
        };
        let server = std::thread::Builder::new()
            .name("web-server".to_string())
            .spawn(move || serve(listener, state))?;

        self.running.store(true, Ordering::SeqCst);
        *lock(&self.shutdown) = Some(shutdown_tx);
        *lock(&self.server) = Some(server);
        *lock(&self.local_addr) = Some(addr);
        *lock(&self.led_push) = Some(self.spawn_led_push()?);

        info!("Web emulator listening on http://{}", addr);
        Ok(())
    }

    fn close(&self) {
        info!("Closing web emulator");
        self.running.store(false, Ordering::SeqCst);
        if let Some(shutdown) = lock(&self.shutdown).take() {
            let _ = shutdown.send(true);
        }
        if let Some(handle) = lock(&self.server).take() {
            join_with_timeout(handle, self.options.join_timeout, "Web server");
        }
        if let Some(handle) = lock(&self.led_push).take() {
            join_with_timeout(handle, self.options.join_timeout, "Web LED push");
        }
        *lock(&self.local_addr) = None;
    }

    fn set_tile(&self, row: usize, col: usize, source: &Path, cache_key: &str) -> Result<()> {
        self.pending.queue(row, col, source, cache_key)
    }

    fn submit_tiles(&self) -> Result<usize> {
        let mut sent = 0;
        for (pos, tile) in self.pending.take() {
            let key = tile.content_key();
            if lock(&self.shared.tiles)
                .get(&pos)
                .is_some_and(|shown| shown.key == key)
            {
                continue;
            }

            let image = match encode_tile(&tile.source, self.options.tile_size) {
                Ok(image) => image,
                Err(e) => {
                    error!("Tile {} not sent: {}", pos, e);
                    continue;
                }
            };
            lock(&self.shared.tiles).insert(
                pos,
                SentTile {
                    key,
                    image: image.clone(),
                },
            );
            // No receivers just means no browser is open
            let _ = self.shared.updates.send(ServerMessage::TileUpdate {
                row: pos.row,
                col: pos.col,
                image,
            });
            self.transmits.fetch_add(1, Ordering::SeqCst);
            sent += 1;
        }
        if sent > 0 {
            debug!("Pushed {} tile(s) to web clients", sent);
        }
        Ok(sent)
    }

    fn register_key_callback(&self, callback: KeyCallback) {
        self.shared.keys.set(callback);
    }

    fn leds(&self) -> &Arc<LedManager> {
        &self.shared.leds
    }
}

#[derive(Clone)]
struct AppState {
    shared: Arc<Shared>,
    shutdown: watch::Receiver<bool>,
}

/// Emulator page template.
#[derive(Template)]
#[template(path = "emulator.html")]
struct EmulatorTemplate {
    rows: Vec<usize>,
    cols: Vec<usize>,
    led_count: usize,
}

#[derive(Serialize)]
struct TileKey {
    row: u8,
    col: u8,
    key: String,
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/state", get(tile_state))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn serve(listener: std::net::TcpListener, state: AppState) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start web runtime: {}", e);
            return;
        }
    };

    runtime.block_on(async move {
        let listener = match tokio::net::TcpListener::from_std(listener) {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to adopt web listener: {}", e);
                return;
            }
        };
        let mut shutdown = state.shutdown.clone();
        let app = create_router(state);
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await;
        if let Err(e) = result {
            error!("Web server error: {}", e);
        }
    });
    debug!("Web server stopped");
}

/// GET / - Emulator page
async fn index(State(state): State<AppState>) -> Response {
    let page = EmulatorTemplate {
        rows: (0..ROWS).collect(),
        cols: (0..COLS).collect(),
        led_count: state.shared.leds.len(),
    };
    match page.render() {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!("Failed to render emulator page: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /state - Reconnect cache keys
async fn tile_state(State(state): State<AppState>) -> Json<Vec<TileKey>> {
    let tiles = lock(&state.shared.tiles)
        .iter()
        .map(|(pos, tile)| TileKey {
            row: pos.row,
            col: pos.col,
            key: tile.key.clone(),
        })
        .collect();
    Json(tiles)
}

/// GET /ws - Push channel
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_message<S>(tx: &mut S, message: &ServerMessage) -> bool
where
    S: Sink<Message> + Unpin,
{
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode web message: {}", e);
            return true;
        }
    };
    tx.send(Message::Text(text.into())).await.is_ok()
}

/// Sends the reconnect cache to one client's sink.
async fn replay_to<S>(shared: &Shared, tx: &mut S) -> bool
where
    S: Sink<Message> + Unpin,
{
    let replay = shared.replay();
    info!("Web client connected, replaying {} tile(s)", replay.len());
    for message in &replay {
        if !send_message(tx, message).await {
            return false;
        }
    }
    true
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut tx, mut rx) = socket.split();

    // Subscribe before the snapshot so nothing falls in between
    let mut updates = BroadcastStream::new(state.shared.updates.subscribe());
    if !replay_to(&state.shared, &mut tx).await {
        return;
    }

    let mut shutdown = state.shutdown.clone();
    loop {
        tokio::select! {
            update = updates.next() => match update {
                Some(Ok(message)) => {
                    if !send_message(&mut tx, &message).await {
                        break;
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(n))) => {
                    warn!("Web client lagging, dropped {} update(s)", n);
                }
                None => break,
            },
            inbound = rx.next() => match inbound {
                Some(Ok(Message::Text(text))) => state.shared.handle_text(&text),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Web socket error: {}", e);
                    break;
                }
            },
            _ = shutdown.changed() => break,
        }
    }
    info!("Web client disconnected");
}
