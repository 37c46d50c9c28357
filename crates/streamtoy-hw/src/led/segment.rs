//! Named LED segments.

use crate::{Error, LED_COUNT};
use std::ops::Range;
use std::str::FromStr;

/// A contiguous named run of the LED strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Segment {
    BackLeft,
    Left,
    Front,
    Right,
    BackRight,
}

impl Segment {
    /// Every segment in strip order.
    pub const ALL: [Segment; 5] = [
        Segment::BackLeft,
        Segment::Left,
        Segment::Front,
        Segment::Right,
        Segment::BackRight,
    ];

    /// Number of pixels in the segment.
    pub const fn len(&self) -> usize {
        match self {
            Segment::BackLeft | Segment::BackRight => 14,
            Segment::Left | Segment::Right => 17,
            Segment::Front => 28,
        }
    }

    /// Pixels across every segment.
    pub const fn total_len() -> usize {
        let mut total = 0;
        let mut i = 0;
        while i < Self::ALL.len() {
            total += Self::ALL[i].len();
            i += 1;
        }
        total
    }

    /// Pixel index range covered by the segment.
    pub fn range(&self) -> Range<usize> {
        let start: usize = Self::ALL
            .iter()
            .take_while(|s| *s != self)
            .map(Segment::len)
            .sum();
        start..start + self.len()
    }

    /// Configuration name.
    pub fn name(&self) -> &'static str {
        match self {
            Segment::BackLeft => "back_left",
            Segment::Left => "left",
            Segment::Front => "front",
            Segment::Right => "right",
            Segment::BackRight => "back_right",
        }
    }
}

impl FromStr for Segment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Self::ALL
            .into_iter()
            .find(|seg| seg.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidSegment(s.to_string()))
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

const _: () = assert!(Segment::total_len() == LED_COUNT);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_cover_strip() {
        let mut next = 0;
        for seg in Segment::ALL {
            let range = seg.range();
            assert_eq!(range.start, next);
            next = range.end;
        }
        assert_eq!(next, LED_COUNT);
        assert_eq!(Segment::total_len(), LED_COUNT);
        assert_eq!(Segment::Front.range(), 31..59);
    }

    #[test]
    fn test_segment_from_str() {
        assert_eq!("back_right".parse::<Segment>().unwrap(), Segment::BackRight);
        assert_eq!("FRONT".parse::<Segment>().unwrap(), Segment::Front);
        assert!("top".parse::<Segment>().is_err());
    }
}
