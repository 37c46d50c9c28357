//! Serial LED driver using Adalight framing.

use super::strip::PixelStrip;
use crate::{Error, Result};
use smart_leds::{brightness, RGB8};
use std::io::Write;
use tokio_serial::SerialPort;
use tracing::{debug, info};

/// Builds one Adalight frame: `"Ada"`, count-1 as hi/lo, checksum, RGB bytes.
pub fn adalight_frame(pixels: impl ExactSizeIterator<Item = RGB8>) -> Vec<u8> {
    let count = pixels.len().saturating_sub(1) as u16;
    let [hi, lo] = count.to_be_bytes();

    let mut frame = Vec::with_capacity(6 + pixels.len() * 3);
    frame.extend_from_slice(b"Ada");
    frame.extend_from_slice(&[hi, lo, hi ^ lo ^ 0x55]);
    for p in pixels {
        frame.extend_from_slice(&[p.r, p.g, p.b]);
    }
    frame
}

/// LED strip driven by a serial-attached Adalight controller.
pub struct SerialStrip {
    port: Box<dyn SerialPort>,
    pixels: Vec<RGB8>,
    brightness: u8,
}

impl SerialStrip {
    /// Opens the serial port for a strip of `len` pixels.
    pub fn open(path: &str, baud_rate: u32, len: usize) -> Result<Self> {
        let port = tokio_serial::new(path, baud_rate).open().map_err(|e| {
            if !std::path::Path::new(path).exists() {
                return Error::LedNotFound(path.to_string());
            }
            Error::Serial(e)
        })?;

        info!("LED strip opened at {} ({} baud, {} pixels)", path, baud_rate, len);

        Ok(Self {
            port,
            pixels: vec![RGB8::default(); len],
            brightness: 255,
        })
    }
}

impl PixelStrip for SerialStrip {
    fn pixels(&self) -> &[RGB8] {
        &self.pixels
    }

    fn pixels_mut(&mut self) -> &mut [RGB8] {
        &mut self.pixels
    }

    fn show(&mut self) -> Result<()> {
        let scaled: Vec<RGB8> = brightness(self.pixels.iter().copied(), self.brightness).collect();
        let frame = adalight_frame(scaled.into_iter());
        self.port.write_all(&frame)?;
        self.port.flush()?;
        Ok(())
    }

    fn set_brightness(&mut self, brightness: u8) {
        debug!("LED brightness set to {}", brightness);
        self.brightness = brightness;
    }
}
