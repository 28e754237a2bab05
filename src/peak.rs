use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
/// A [`FittedPeak`] is the immutable record of one peak read back from a fit: its
/// position, its width and its integrated volume, plus the tail parameters the engine
/// reports for it.
pub struct FittedPeak {
    pub position: f64,
    /// A symmetric peak shape parameter
    pub full_width_at_half_max: f64,
    pub volume: f64,

    pub left_tail: Option<f64>,
    pub right_tail: Option<f64>,
}

impl FittedPeak {
    pub fn new(position: f64, full_width_at_half_max: f64, volume: f64) -> Self {
        Self {
            position,
            full_width_at_half_max,
            volume,
            left_tail: None,
            right_tail: None,
        }
    }

    pub fn with_tails(mut self, left_tail: Option<f64>, right_tail: Option<f64>) -> Self {
        self.left_tail = left_tail;
        self.right_tail = right_tail;
        self
    }

    /// Express a peak given in raw channels in calibrated units. The width is the
    /// calibrated distance between the raw half maximum points, volume and tails are
    /// unit-free and pass through unchanged.
    pub fn calibrated(&self, calibration: Option<&Calibration>) -> Self {
        match calibration {
            Some(cal) => Self {
                position: cal.ch2e(self.position),
                full_width_at_half_max: cal
                    .width_to_calibrated(self.position, self.full_width_at_half_max),
                ..*self
            },
            None => *self,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.full_width_at_half_max.is_finite()
            && self.volume.is_finite()
            && self.left_tail.map_or(true, f64::is_finite)
            && self.right_tail.map_or(true, f64::is_finite)
    }
}

impl fmt::Display for FittedPeak {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Pos: {:.4}  Volume: {:.4}  FWHM: {:.4}",
            self.position, self.volume, self.full_width_at_half_max
        )?;
        if let Some(tail) = self.left_tail {
            write!(f, "  Left Tail: {:.4}", tail)?;
        }
        if let Some(tail) = self.right_tail {
            write!(f, "  Right Tail: {:.4}", tail)?;
        }
        Ok(())
    }
}
