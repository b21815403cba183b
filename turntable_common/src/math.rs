//! Signed-angle mapping and the "sort-of-three" clamp.
//!
//! Both must be reproduced bit-identically with the source device — see
//! spec §3 and §8 for the exact mapping and its testable properties.

use crate::consts::{DEGREES_PER_STEP, GEARBOX_RATIO};

/// A raw absolute-position reading from the shaft encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncoderReading {
    /// `0..=4095` reported revolution count.
    pub revolution: u16,
    /// `0..=8191` reported step count within the current revolution.
    pub step: u16,
}

impl EncoderReading {
    /// Map this reading to a continuous signed angle in degrees.
    ///
    /// `revolution > 2047` is treated as the negative-direction half of the
    /// range: rebase by `-2048`, offset by `+1` (so the negative range
    /// starts at 0, not -360), then negate — giving `r' = 2047 - revolution`
    /// — and rebase the step count by `-8192` so it counts down as the
    /// shaft turns further negative. This halves the trackable range to
    /// ±28 turns in exchange for continuous signed degrees within each
    /// half.
    #[must_use]
    pub fn angle(self) -> f64 {
        let revolution = i64::from(self.revolution);
        let step = i64::from(self.step);

        let (revolution, step) = if revolution > 2047 {
            (2047 - revolution, step - 8192)
        } else {
            (revolution, step)
        };

        -(step as f64 * DEGREES_PER_STEP + revolution as f64 * 360.0) / GEARBOX_RATIO
    }
}

/// Clamp `value` into `[min, max]` using the "sort of three" idiom: put
/// `min`, `value`, `max` in a three-element array, sort it, and take the
/// middle element. Equivalent to `value.clamp(min, max)` but kept as the
/// explicit sort because that is what the source device firmware's
/// documentation describes and what spec §4.4/§4.5 name directly.
#[must_use]
pub fn clamp_sort_of_three(min: f64, value: f64, max: f64) -> f64 {
    let mut triple = [min, value, max];
    triple.sort_by(|a, b| a.partial_cmp(b).expect("non-NaN clamp inputs"));
    triple[1]
}
