//! Energy calibrations mapping detector channels to physical energies.
//!
//! A [`Calibration`] is a polynomial `E(ch) = c0 + c1 * ch + c2 * ch^2 + ...`.
//! The forward direction is always defined, the inverse ([`Calibration::e2ch`])
//! is solved in closed form for linear calibrations and by Newton iteration
//! otherwise.
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path;
use std::str::FromStr;

use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::peak_statistics::aboutzero;

const MAX_NEWTON_ITERATIONS: usize = 100;
const NEWTON_TOLERANCE: f64 = 1e-10;

/// All the ways converting between calibrated and raw units can fail
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    #[error("No spectrum is available to convert calibrated values")]
    NoSpectrum,
    #[error("A calibration needs at least one coefficient")]
    Empty,
    #[error("The calibration cannot be inverted at E = {0}")]
    NotInvertible(f64),
    #[error("Inverting the calibration at E = {0} did not converge")]
    NoConvergence(f64),
    #[error("Calibration coefficient {0} is not finite")]
    NonFinite(f64),
    #[error("Failed to parse calibration: {0}")]
    Parse(String),
}

/// A polynomial energy calibration, coefficients in increasing order of power
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Calibration {
    coefficients: Vec<f64>,
}

impl Default for Calibration {
    fn default() -> Self {
        Self::identity()
    }
}

impl Calibration {
    pub fn new(coefficients: Vec<f64>) -> Result<Self, CalibrationError> {
        if coefficients.is_empty() {
            return Err(CalibrationError::Empty);
        }
        if let Some(c) = coefficients.iter().find(|c| !c.is_finite()) {
            return Err(CalibrationError::NonFinite(*c));
        }
        Ok(Self { coefficients })
    }

    pub fn linear(offset: f64, slope: f64) -> Self {
        Self {
            coefficients: vec![offset, slope],
        }
    }

    pub fn identity() -> Self {
        Self::linear(0.0, 1.0)
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn degree(&self) -> usize {
        self.coefficients.len() - 1
    }

    pub fn is_identity(&self) -> bool {
        self.coefficients.iter().enumerate().all(|(i, c)| match i {
            1 => *c == 1.0,
            _ => *c == 0.0,
        })
    }

    /// Convert a channel to an energy
    pub fn ch2e(&self, ch: f64) -> f64 {
        self.coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, c| acc * ch + c)
    }

    /// The derivative `dE/dch` at `ch`
    pub fn de_dch(&self, ch: f64) -> f64 {
        self.coefficients
            .iter()
            .enumerate()
            .skip(1)
            .rev()
            .fold(0.0, |acc, (power, c)| acc * ch + c * power as f64)
    }

    /// Convert an energy to a channel
    pub fn e2ch(&self, e: f64) -> Result<f64, CalibrationError> {
        let offset = self.coefficients[0];
        let slope = self.coefficients.get(1).copied().unwrap_or(0.0);
        if self.degree() == 0 || (self.degree() == 1 && aboutzero(slope)) {
            return Err(CalibrationError::NotInvertible(e));
        }
        if self.degree() == 1 {
            return Ok((e - offset) / slope);
        }

        let mut ch = if aboutzero(slope) { e } else { (e - offset) / slope };
        for _ in 0..MAX_NEWTON_ITERATIONS {
            let derivative = self.de_dch(ch);
            if aboutzero(derivative) {
                return Err(CalibrationError::NotInvertible(e));
            }
            let step = (self.ch2e(ch) - e) / derivative;
            ch -= step;
            if !ch.is_finite() {
                return Err(CalibrationError::NoConvergence(e));
            }
            if step.abs() <= NEWTON_TOLERANCE * ch.abs().max(1.0) {
                return Ok(ch);
            }
        }
        Err(CalibrationError::NoConvergence(e))
    }

    /// Convert a width centred on `pos_ch` to calibrated units. Always non-negative.
    pub fn width_to_calibrated(&self, pos_ch: f64, width_ch: f64) -> f64 {
        let half = width_ch / 2.0;
        (self.ch2e(pos_ch + half) - self.ch2e(pos_ch - half)).abs()
    }
}

impl FromStr for Calibration {
    type Err = CalibrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let coefficients = s
            .split_whitespace()
            .map(|tok| {
                tok.parse::<f64>()
                    .map_err(|_| CalibrationError::Parse(format!("invalid coefficient `{tok}`")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(coefficients)
    }
}

impl fmt::Display for Calibration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut sep = "";
        for c in self.coefficients.iter() {
            write!(f, "{sep}{c}")?;
            sep = " ";
        }
        Ok(())
    }
}

/// Calibrations keyed by histogram name.
///
/// The text form holds one `name: c0 c1 c2 ...` entry per line. Blank lines and
/// lines starting with `#` are ignored.
#[derive(Debug, Clone, Default)]
pub struct CalibrationTable {
    entries: HashMap<String, Calibration>,
}

impl CalibrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, calibration: Calibration) -> Option<Calibration> {
        self.entries.insert(name.into(), calibration)
    }

    pub fn get(&self, name: &str) -> Option<&Calibration> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn from_reader<R: BufRead>(reader: R) -> io::Result<Self> {
        let mut table = Self::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((name, coefs)) = line.split_once(':') else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("line {}: expected `name: coefficients`", lineno + 1),
                ));
            };
            let calibration: Calibration = coefs.parse().map_err(|e: CalibrationError| {
                io::Error::new(io::ErrorKind::InvalidData, format!("line {}: {e}", lineno + 1))
            })?;
            if table.insert(name.trim(), calibration).is_some() {
                log::warn!("Calibration for {} given more than once, keeping the last", name.trim());
            }
        }
        Ok(table)
    }

    pub fn load<P: AsRef<path::Path>>(path: P) -> io::Result<Self> {
        let reader = io::BufReader::new(fs::File::open(path)?);
        Self::from_reader(reader)
    }
}
