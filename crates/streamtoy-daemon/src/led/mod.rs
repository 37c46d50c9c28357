//! LED strip animation engine.
//!
//! A single tick thread owns every write to the pixel buffer. Two layers
//! are scheduled: a persistent background animation and a transient
//! foreground animation that wins while it is active.

mod animation;
mod manager;

pub use animation::{
    create_animation, Animation, Blink, Chase, Comet, Pulse, Rainbow, SegmentColors, Solid,
    Sparkle, ANIMATION_NAMES,
};
pub use manager::{Layer, LedManager};
pub use streamtoy_hw::RGB8;
