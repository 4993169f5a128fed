//! Bubble fill classification
//!
//! Decides whether a single answer circle is shaded and reduces a group of
//! mutually exclusive circles to one reading.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

use crate::capture::frame::CapturedFrame;

/// Pixels darker than this (mean of R, G, B) count as ink
pub const DARK_BRIGHTNESS_CUTOFF: f64 = 128.0;

/// A bubble is filled when strictly more than this share of its box is ink
pub const FILL_RATIO_THRESHOLD: f64 = 0.35;

/// Symbol reported for a group with no filled bubble
pub const BLANK_SYMBOL: char = '-';

/// Symbol reported for a group with more than one filled bubble
pub const INVALID_SYMBOL: char = 'X';

/// Outcome of reading one bubble group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BubbleReading {
    /// Exactly one bubble was filled
    Selected(char),
    /// No bubble was dark enough
    Blank,
    /// Two or more bubbles were dark enough
    Invalid,
}

impl BubbleReading {
    pub fn symbol(self) -> char {
        match self {
            Self::Selected(c) => c,
            Self::Blank => BLANK_SYMBOL,
            Self::Invalid => INVALID_SYMBOL,
        }
    }

    pub fn is_blank(self) -> bool {
        self == Self::Blank
    }
}

impl fmt::Display for BubbleReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl From<BubbleReading> for String {
    fn from(reading: BubbleReading) -> Self {
        reading.symbol().to_string()
    }
}

impl TryFrom<String> for BubbleReading {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        let mut chars = trimmed.chars();
        match (chars.next(), chars.next()) {
            (Some(BLANK_SYMBOL), None) => Ok(Self::Blank),
            (Some(INVALID_SYMBOL), None) => Ok(Self::Invalid),
            (Some(c), None) if c.is_ascii_alphanumeric() => Ok(Self::Selected(c.to_ascii_uppercase())),
            // the layout tool leaves unanswered key entries empty
            (None, _) => Ok(Self::Blank),
            _ => Err(format!("expected a single letter, digit, '-' or 'X', got {:?}", value)),
        }
    }
}

/// One circle of a group together with the symbol it stands for
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupMember {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub symbol: char,
}

/// Bubble classifier using a fixed dark-pixel ratio over the bounding square
#[derive(Debug, Default, Clone, Copy)]
pub struct BubbleClassifier;

impl BubbleClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Share of dark pixels in the square around `(cx, cy)`
    ///
    /// The square spans `2 * radius` pixels starting at `(cx - r, cy - r)`.
    /// Pixels outside the frame are skipped and count toward neither the dark
    /// total nor the pixel total. Returns `None` when no pixel of the square
    /// lies inside the frame.
    pub fn fill_ratio(&self, frame: &CapturedFrame, cx: f64, cy: f64, radius: f64) -> Option<f64> {
        let (x0, x1) = clip_span(cx - radius, radius, frame.width)?;
        let (y0, y1) = clip_span(cy - radius, radius, frame.height)?;

        let mut dark = 0u64;
        let mut total = 0u64;
        for y in y0..y1 {
            for x in x0..x1 {
                let Some([r, g, b, _]) = frame.pixel(x as i64, y as i64) else {
                    continue;
                };
                let brightness = (r as f64 + g as f64 + b as f64) / 3.0;
                if brightness < DARK_BRIGHTNESS_CUTOFF {
                    dark += 1;
                }
                total += 1;
            }
        }

        (total > 0).then(|| dark as f64 / total as f64)
    }

    /// Whether the bubble centred at `(cx, cy)` is shaded
    pub fn is_filled(&self, frame: &CapturedFrame, cx: f64, cy: f64, radius: f64) -> bool {
        self.fill_ratio(frame, cx, cy, radius)
            .is_some_and(|ratio| ratio > FILL_RATIO_THRESHOLD)
    }

    /// Read a group of mutually exclusive bubbles in listed order
    ///
    /// The first filled bubble is the tentative answer; a second filled bubble
    /// turns the result into [`BubbleReading::Invalid`] and ends the scan.
    pub fn read_group(&self, frame: &CapturedFrame, members: &[GroupMember]) -> BubbleReading {
        let mut reading = BubbleReading::Blank;

        for member in members {
            if !self.is_filled(frame, member.x, member.y, member.radius) {
                continue;
            }
            match reading {
                BubbleReading::Blank => reading = BubbleReading::Selected(member.symbol),
                _ => {
                    trace!("second filled bubble '{}' invalidates group", member.symbol);
                    return BubbleReading::Invalid;
                }
            }
        }

        reading
    }
}

/// In-frame part of the span `[floor(start), floor(start) + max(trunc(2r), 1))`
///
/// Clipping happens in floating point so far-off coordinates and huge radii
/// never reach integer arithmetic.
fn clip_span(start: f64, radius: f64, limit: u32) -> Option<(u32, u32)> {
    if !start.is_finite() || !radius.is_finite() {
        return None;
    }
    let begin = start.floor();
    let end = begin + (radius * 2.0).trunc().max(1.0);
    let lo = begin.max(0.0);
    let hi = end.min(limit as f64);
    (lo < hi).then(|| (lo as u32, hi as u32))
}
