//! Configuration management.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Scene entered at startup
    #[serde(default = "default_start_scene")]
    pub start_scene: String,

    /// Tile geometry
    #[serde(default)]
    pub display: DisplayConfig,

    /// USB dock configuration
    #[serde(default)]
    pub hardware: HardwareConfig,

    /// Browser emulator configuration
    #[serde(default)]
    pub web: WebConfig,

    /// LED strip configuration
    #[serde(default)]
    pub led: LedConfig,

    /// Input classification
    #[serde(default)]
    pub input: InputConfig,

    /// Render cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Font lookup
    #[serde(default)]
    pub fonts: FontsConfig,
}

/// Tile geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Tile edge length in pixels
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            tile_size: default_tile_size(),
        }
    }
}

/// USB dock configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Whether to attach the USB dock
    #[serde(default = "default_true")]
    pub enable: bool,

    /// USB vendor id
    #[serde(default = "default_vendor_id")]
    pub vendor_id: u16,

    /// USB product id
    #[serde(default = "default_product_id")]
    pub product_id: u16,

    /// Screen brightness (0-100)
    #[serde(default = "default_screen_brightness")]
    pub brightness: u8,

    /// Directory holding native-format tile derivatives
    #[serde(default = "default_native_cache_dir")]
    pub native_cache_dir: PathBuf,

    /// Read loop back-off when no frame is pending, in milliseconds
    #[serde(default = "default_read_backoff")]
    pub read_backoff_ms: u64,

    /// How long a background write waits for the ready-ACK, in milliseconds
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,

    /// Bound on joining the read thread at close, in milliseconds
    #[serde(default = "default_join_timeout")]
    pub join_timeout_ms: u64,

    /// Keep-alive interval in milliseconds
    #[serde(default = "default_heartbeat")]
    pub heartbeat_ms: u64,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            enable: true,
            vendor_id: default_vendor_id(),
            product_id: default_product_id(),
            brightness: default_screen_brightness(),
            native_cache_dir: default_native_cache_dir(),
            read_backoff_ms: default_read_backoff(),
            ack_timeout_ms: default_ack_timeout(),
            join_timeout_ms: default_join_timeout(),
            heartbeat_ms: default_heartbeat(),
        }
    }
}

impl HardwareConfig {
    pub fn read_backoff(&self) -> Duration {
        Duration::from_millis(self.read_backoff_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }
}

/// Browser emulator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Whether to start the emulator server
    #[serde(default = "default_true")]
    pub enable: bool,

    /// Server listen address (e.g., "0.0.0.0:5000")
    #[serde(default = "default_listen")]
    pub listen: String,

    /// LED push period in milliseconds
    #[serde(default = "default_led_push")]
    pub led_push_ms: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enable: true,
            listen: default_listen(),
            led_push_ms: default_led_push(),
        }
    }
}

/// Which LED driver to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LedDriver {
    /// In-memory strip
    #[default]
    Fake,
    /// Serial-attached controller
    Serial,
}

/// LED strip configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedConfig {
    /// Driver selection
    #[serde(default)]
    pub driver: LedDriver,

    /// Serial port path
    #[serde(default = "default_led_device")]
    pub device: String,

    /// Serial baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Number of pixels
    #[serde(default = "default_led_count")]
    pub count: usize,

    /// Output brightness (0-255)
    #[serde(default = "default_led_brightness")]
    pub brightness: u8,

    /// Animation tick period in milliseconds
    #[serde(default = "default_tick")]
    pub tick_ms: u64,

    /// Background animation name at startup
    #[serde(default = "default_background")]
    pub background: String,

    /// Background animation colour
    #[serde(default = "default_background_color")]
    pub background_color: String,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            driver: LedDriver::default(),
            device: default_led_device(),
            baud_rate: default_baud_rate(),
            count: default_led_count(),
            brightness: default_led_brightness(),
            tick_ms: default_tick(),
            background: default_background(),
            background_color: default_background_color(),
        }
    }
}

/// Input classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Minimum hold for a long press, in milliseconds
    #[serde(default = "default_long_press")]
    pub long_press_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            long_press_ms: default_long_press(),
        }
    }
}

/// Render cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory for rendered tile bitmaps
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
        }
    }
}

/// Font lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FontsConfig {
    /// Font files tried in order
    #[serde(default = "default_font_paths")]
    pub paths: Vec<PathBuf>,
}

impl Default for FontsConfig {
    fn default() -> Self {
        Self {
            paths: default_font_paths(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_start_scene() -> String {
    "button_test".to_string()
}

fn default_tile_size() -> u32 {
    112
}

fn default_vendor_id() -> u16 {
    streamtoy_hw::DOCK_VID
}

fn default_product_id() -> u16 {
    streamtoy_hw::DOCK_PID
}

fn default_screen_brightness() -> u8 {
    80
}

fn default_native_cache_dir() -> PathBuf {
    PathBuf::from(".cache/native")
}

fn default_read_backoff() -> u64 {
    5
}

fn default_ack_timeout() -> u64 {
    2000
}

fn default_join_timeout() -> u64 {
    2000
}

fn default_heartbeat() -> u64 {
    10_000
}

fn default_listen() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_led_push() -> u64 {
    100
}

fn default_led_device() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_led_count() -> usize {
    streamtoy_hw::LED_COUNT
}

fn default_led_brightness() -> u8 {
    128
}

fn default_tick() -> u64 {
    50
}

fn default_background() -> String {
    "rainbow".to_string()
}

fn default_background_color() -> String {
    "white".to_string()
}

fn default_long_press() -> u64 {
    3000
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".cache/tiles")
}

fn default_font_paths() -> Vec<PathBuf> {
    [
        "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/TTF/DejaVuSans.ttf",
        "/System/Library/Fonts/Helvetica.ttc",
    ]
    .into_iter()
    .map(PathBuf::from)
    .collect()
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read configuration file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse configuration")?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(path.as_ref(), content).context("Failed to write configuration file")?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            start_scene: default_start_scene(),
            display: DisplayConfig::default(),
            hardware: HardwareConfig::default(),
            web: WebConfig::default(),
            led: LedConfig::default(),
            input: InputConfig::default(),
            cache: CacheConfig::default(),
            fonts: FontsConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [web]
            listen = "127.0.0.1:8080"

            [led]
            driver = "serial"
            "#,
        )
        .unwrap();

        assert_eq!(config.web.listen, "127.0.0.1:8080");
        assert!(config.web.enable);
        assert_eq!(config.led.driver, LedDriver::Serial);
        assert_eq!(config.led.count, 90);
        assert_eq!(config.display.tile_size, 112);
        assert_eq!(config.input.long_press_ms, 3000);
        assert_eq!(config.hardware.read_backoff(), Duration::from_millis(5));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.start_scene = "other".to_string();
        config.hardware.enable = false;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.start_scene, "other");
        assert!(!loaded.hardware.enable);
        assert_eq!(loaded.led.tick_ms, 50);
    }

    #[test]
    fn test_shipped_default_config() {
        let config: Config = toml::from_str(include_str!("../../../config/default.toml")).unwrap();
        assert_eq!(config.hardware.vendor_id, streamtoy_hw::DOCK_VID);
        assert_eq!(config.hardware.heartbeat(), Duration::from_secs(10));
        assert_eq!(config.led.driver, LedDriver::Fake);
        assert_eq!(config.web.listen, "0.0.0.0:5000");
    }
}
