//! Pixel buffer seam shared by every LED driver.

use crate::Result;
use smart_leds::RGB8;

/// An indexable, fillable RGB pixel buffer with an explicit flush.
pub trait PixelStrip: Send {
    /// Current frame.
    fn pixels(&self) -> &[RGB8];

    /// Mutable access to the frame. Changes are not visible until [`show`].
    ///
    /// [`show`]: PixelStrip::show
    fn pixels_mut(&mut self) -> &mut [RGB8];

    /// Pushes the frame to the output.
    fn show(&mut self) -> Result<()>;

    /// Sets output brightness (0-255), applied at [`show`] time.
    ///
    /// [`show`]: PixelStrip::show
    fn set_brightness(&mut self, brightness: u8);

    /// Number of pixels.
    fn len(&self) -> usize {
        self.pixels().len()
    }

    /// Whether the strip has no pixels.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sets every pixel to `color`.
    fn fill(&mut self, color: RGB8) {
        self.pixels_mut().fill(color);
    }
}

/// In-memory strip for headless runs and tests.
#[derive(Debug, Clone)]
pub struct FakeStrip {
    pixels: Vec<RGB8>,
    brightness: u8,
    shows: usize,
}

impl FakeStrip {
    /// Creates a strip of `len` black pixels.
    pub fn new(len: usize) -> Self {
        Self {
            pixels: vec![RGB8::default(); len],
            brightness: 255,
            shows: 0,
        }
    }

    /// Number of times [`PixelStrip::show`] was called.
    pub fn show_count(&self) -> usize {
        self.shows
    }

    /// Configured brightness.
    pub fn brightness(&self) -> u8 {
        self.brightness
    }
}

impl PixelStrip for FakeStrip {
    fn pixels(&self) -> &[RGB8] {
        &self.pixels
    }

    fn pixels_mut(&mut self) -> &mut [RGB8] {
        &mut self.pixels
    }

    fn show(&mut self) -> Result<()> {
        self.shows += 1;
        Ok(())
    }

    fn set_brightness(&mut self, brightness: u8) {
        self.brightness = brightness;
    }
}
