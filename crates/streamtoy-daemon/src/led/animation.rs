//! Built-in LED animations.

use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smart_leds::hsv::{hsv2rgb, Hsv};
use std::time::Duration;
use streamtoy_hw::{Segment, RGB8};

/// An LED effect advanced once per tick.
///
/// `elapsed` is measured from the moment the animation was installed, so an
/// animation can be a pure function of time or keep its own state.
pub trait Animation: Send {
    /// Short name for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Writes the frame for `elapsed` into `pixels`.
    fn animate(&mut self, pixels: &mut [RGB8], elapsed: Duration);
}

const BLACK: RGB8 = RGB8 { r: 0, g: 0, b: 0 };

/// Scales a colour by `level` in `0.0..=1.0`.
fn scale(color: RGB8, level: f32) -> RGB8 {
    let level = level.clamp(0.0, 1.0);
    RGB8 {
        r: (color.r as f32 * level) as u8,
        g: (color.g as f32 * level) as u8,
        b: (color.b as f32 * level) as u8,
    }
}

/// Position within a repeating period, in `0.0..1.0`.
fn phase(elapsed: Duration, period: Duration) -> f32 {
    if period.is_zero() {
        return 0.0;
    }
    (elapsed.as_secs_f32() / period.as_secs_f32()).fract()
}

/// Every pixel one colour.
pub struct Solid {
    pub color: RGB8,
}

impl Solid {
    pub fn new(color: RGB8) -> Self {
        Self { color }
    }
}

impl Animation for Solid {
    fn name(&self) -> &'static str {
        "solid"
    }

    fn animate(&mut self, pixels: &mut [RGB8], _elapsed: Duration) {
        pixels.fill(self.color);
    }
}

/// On for the first half of each period, off for the second.
pub struct Blink {
    pub color: RGB8,
    pub period: Duration,
}

impl Blink {
    pub fn new(color: RGB8, period: Duration) -> Self {
        Self { color, period }
    }
}

impl Animation for Blink {
    fn name(&self) -> &'static str {
        "blink"
    }

    fn animate(&mut self, pixels: &mut [RGB8], elapsed: Duration) {
        let on = phase(elapsed, self.period) < 0.5;
        pixels.fill(if on { self.color } else { BLACK });
    }
}

/// Smooth fade in and out.
pub struct Pulse {
    pub color: RGB8,
    pub period: Duration,
}

impl Pulse {
    pub fn new(color: RGB8, period: Duration) -> Self {
        Self { color, period }
    }
}

impl Animation for Pulse {
    fn name(&self) -> &'static str {
        "pulse"
    }

    fn animate(&mut self, pixels: &mut [RGB8], elapsed: Duration) {
        let angle = phase(elapsed, self.period) * std::f32::consts::TAU;
        let level = (1.0 - angle.cos()) / 2.0;
        pixels.fill(scale(self.color, level));
    }
}

/// Random pixels flash on a dark strip.
pub struct Sparkle {
    pub color: RGB8,
    /// Fraction of pixels lit per frame.
    pub density: f32,
    rng: StdRng,
}

impl Sparkle {
    pub fn new(color: RGB8, density: f32) -> Self {
        Self {
            color,
            density,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic variant for tests.
    pub fn with_seed(color: RGB8, density: f32, seed: u64) -> Self {
        Self {
            color,
            density,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Animation for Sparkle {
    fn name(&self) -> &'static str {
        "sparkle"
    }

    fn animate(&mut self, pixels: &mut [RGB8], _elapsed: Duration) {
        pixels.fill(BLACK);
        if pixels.is_empty() {
            return;
        }
        let lit = ((pixels.len() as f32 * self.density).round() as usize).max(1);
        for _ in 0..lit {
            let i = self.rng.gen_range(0..pixels.len());
            pixels[i] = self.color;
        }
    }
}

/// Runs of lit pixels marching along the strip.
pub struct Chase {
    pub color: RGB8,
    pub size: usize,
    pub spacing: usize,
    /// Pixels advanced per second.
    pub speed: f32,
}

impl Chase {
    pub fn new(color: RGB8) -> Self {
        Self {
            color,
            size: 3,
            spacing: 6,
            speed: 20.0,
        }
    }
}

impl Animation for Chase {
    fn name(&self) -> &'static str {
        "chase"
    }

    fn animate(&mut self, pixels: &mut [RGB8], elapsed: Duration) {
        let cycle = (self.size + self.spacing).max(1);
        let offset = (elapsed.as_secs_f32() * self.speed) as usize % cycle;
        for (i, pixel) in pixels.iter_mut().enumerate() {
            // Shift backwards so the pattern moves towards higher indices
            let pos = (i + cycle - offset) % cycle;
            *pixel = if pos < self.size { self.color } else { BLACK };
        }
    }
}

/// A bright head with a fading tail looping around the strip.
pub struct Comet {
    pub color: RGB8,
    pub tail: usize,
    /// Pixels advanced per second.
    pub speed: f32,
}

impl Comet {
    pub fn new(color: RGB8) -> Self {
        Self {
            color,
            tail: 10,
            speed: 30.0,
        }
    }
}

impl Animation for Comet {
    fn name(&self) -> &'static str {
        "comet"
    }

    fn animate(&mut self, pixels: &mut [RGB8], elapsed: Duration) {
        pixels.fill(BLACK);
        let len = pixels.len();
        if len == 0 {
            return;
        }
        let head = (elapsed.as_secs_f32() * self.speed) as usize % len;
        let tail = self.tail.min(len - 1);
        for step in 0..=tail {
            let i = (head + len - step) % len;
            let level = 1.0 - step as f32 / (tail + 1) as f32;
            pixels[i] = scale(self.color, level);
        }
    }
}

/// Hue gradient spread along the strip, rotating over time.
pub struct Rainbow {
    pub period: Duration,
}

impl Rainbow {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl Animation for Rainbow {
    fn name(&self) -> &'static str {
        "rainbow"
    }

    fn animate(&mut self, pixels: &mut [RGB8], elapsed: Duration) {
        let len = pixels.len().max(1);
        let shift = (phase(elapsed, self.period) * 256.0) as usize;
        for (i, pixel) in pixels.iter_mut().enumerate() {
            let hue = ((i * 256 / len + shift) % 256) as u8;
            *pixel = hsv2rgb(Hsv {
                hue,
                sat: 255,
                val: 255,
            });
        }
    }
}

/// One colour per named segment; unlisted segments stay dark.
pub struct SegmentColors {
    pub colors: Vec<(Segment, RGB8)>,
}

impl SegmentColors {
    pub fn new(colors: Vec<(Segment, RGB8)>) -> Self {
        Self { colors }
    }
}

impl Animation for SegmentColors {
    fn name(&self) -> &'static str {
        "segments"
    }

    fn animate(&mut self, pixels: &mut [RGB8], _elapsed: Duration) {
        pixels.fill(BLACK);
        for (segment, color) in &self.colors {
            let range = segment.range();
            let end = range.end.min(pixels.len());
            if range.start < end {
                pixels[range.start..end].fill(*color);
            }
        }
    }
}

/// Names accepted by [`create_animation`].
pub const ANIMATION_NAMES: &[&str] = &[
    "off", "solid", "blink", "pulse", "sparkle", "chase", "comet", "rainbow",
];

/// Builds a built-in animation by name.
pub fn create_animation(name: &str, color: RGB8) -> Result<Box<dyn Animation>> {
    let animation: Box<dyn Animation> = match name.to_ascii_lowercase().as_str() {
        "off" => Box::new(Solid::new(BLACK)),
        "solid" => Box::new(Solid::new(color)),
        "blink" => Box::new(Blink::new(color, Duration::from_millis(500))),
        "pulse" => Box::new(Pulse::new(color, Duration::from_secs(2))),
        "sparkle" => Box::new(Sparkle::new(color, 0.1)),
        "chase" => Box::new(Chase::new(color)),
        "comet" => Box::new(Comet::new(color)),
        "rainbow" => Box::new(Rainbow::new(Duration::from_secs(5))),
        _ => return Err(Error::UnknownAnimation(name.to_string())),
    };
    Ok(animation)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: RGB8 = RGB8 { r: 255, g: 0, b: 0 };

    fn frame(animation: &mut dyn Animation, elapsed_ms: u64) -> Vec<RGB8> {
        let mut pixels = vec![BLACK; 90];
        animation.animate(&mut pixels, Duration::from_millis(elapsed_ms));
        pixels
    }

    fn lit(pixels: &[RGB8]) -> usize {
        pixels.iter().filter(|p| **p != BLACK).count()
    }

    #[test]
    fn test_blink_halves() {
        let mut blink = Blink::new(RED, Duration::from_millis(1000));
        assert_eq!(lit(&frame(&mut blink, 100)), 90);
        assert_eq!(lit(&frame(&mut blink, 600)), 0);
        assert_eq!(lit(&frame(&mut blink, 1100)), 90);
    }

    #[test]
    fn test_pulse_range() {
        let mut pulse = Pulse::new(RED, Duration::from_millis(1000));
        assert_eq!(frame(&mut pulse, 0)[0], BLACK);
        assert!(frame(&mut pulse, 500)[0].r >= 254);
    }

    #[test]
    fn test_sparkle_density() {
        let mut sparkle = Sparkle::with_seed(RED, 0.1, 7);
        let pixels = frame(&mut sparkle, 0);
        let count = lit(&pixels);
        assert!(count >= 1 && count <= 9);
    }

    #[test]
    fn test_chase_moves() {
        let mut chase = Chase::new(RED);
        let a = frame(&mut chase, 0);
        let b = frame(&mut chase, 100);
        assert_eq!(lit(&a), lit(&b));
        assert_ne!(a, b);
        assert_eq!(a[0], RED);
    }

    #[test]
    fn test_comet_tail_fades() {
        let mut comet = Comet::new(RED);
        let pixels = frame(&mut comet, 0);
        assert_eq!(pixels[0], RED);
        assert!(pixels[89].r < 255 && pixels[89].r > 0);
        assert_eq!(lit(&pixels), 11);
    }

    #[test]
    fn test_rainbow_fills() {
        let mut rainbow = Rainbow::new(Duration::from_secs(5));
        let pixels = frame(&mut rainbow, 0);
        assert_eq!(lit(&pixels), 90);
        assert_ne!(pixels[0], pixels[45]);
    }

    #[test]
    fn test_segment_colors() {
        let mut segments = SegmentColors::new(vec![(Segment::Front, RED)]);
        let pixels = frame(&mut segments, 0);
        assert_eq!(lit(&pixels), 28);
        assert_eq!(pixels[31], RED);
        assert_eq!(pixels[30], BLACK);
    }

    #[test]
    fn test_factory() {
        for name in ANIMATION_NAMES {
            assert_eq!(
                create_animation(name, RED).unwrap().name(),
                if *name == "off" { "solid" } else { *name }
            );
        }
        assert!(matches!(
            create_animation("strobe", RED),
            Err(Error::UnknownAnimation(_))
        ));
    }
}
