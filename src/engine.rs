//! The boundary between a fit description and the numerical engine performing it.
//!
//! A [`FitEngine`] is built by an [`EngineFactory`] for a fit region (raw units), is
//! told about peak hints, background intervals and tail settings, and then fits a
//! [`Histogram`]. Background fits yield a polynomial [`BackgroundFunction`]; peak fits
//! yield a composite [`PeakSum`] whose per-peak statistics can be read back by index.
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::linspace;
use crate::histogram::Histogram;

/// A function of the raw axis that can be displayed
pub trait Curve: fmt::Debug {
    fn eval(&self, x: f64) -> f64;

    /// The raw interval the function is defined on
    fn domain(&self) -> (f64, f64);

    /// Evaluate the function at `n` evenly spaced points spanning its domain
    fn sample(&self, n: usize) -> Vec<(f64, f64)> {
        let (lo, hi) = self.domain();
        linspace(lo, hi, n)
            .into_iter()
            .map(|x| (x, self.eval(x)))
            .collect()
    }
}

/// The composite function of a peak fit.
///
/// The per-peak accessors take an index below [`PeakSum::peak_count`].
pub trait PeakSum: Curve {
    fn peak_count(&self) -> usize;
    fn peak_position(&self, index: usize) -> f64;
    fn peak_fwhm(&self, index: usize) -> f64;
    fn peak_volume(&self, index: usize) -> f64;
    fn peak_left_tail(&self, index: usize) -> Option<f64>;
    fn peak_right_tail(&self, index: usize) -> Option<f64>;

    fn as_curve(self: Rc<Self>) -> Rc<dyn Curve>;
}

/// A polynomial background in `x - center`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BackgroundFunction {
    coefficients: Vec<f64>,
    center: f64,
    domain: (f64, f64),
}

impl BackgroundFunction {
    pub fn new(coefficients: Vec<f64>, center: f64, domain: (f64, f64)) -> Self {
        Self {
            coefficients,
            center,
            domain,
        }
    }

    pub fn constant(value: f64, domain: (f64, f64)) -> Self {
        Self::new(vec![value], 0.0, domain)
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn center(&self) -> f64 {
        self.center
    }

    pub fn degree(&self) -> usize {
        self.coefficients.len().saturating_sub(1)
    }
}

impl Curve for BackgroundFunction {
    fn eval(&self, x: f64) -> f64 {
        let dx = x - self.center;
        self.coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, c| acc * dx + c)
    }

    fn domain(&self) -> (f64, f64) {
        self.domain
    }
}

/// All the ways an engine can fail to produce a fit
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("At least one background region is required")]
    NoBackgroundRegions,
    #[error("No peaks were given to fit")]
    NoPeaks,
    #[error("Need at least {needed} points for the fit, found {available}")]
    TooFewPoints { needed: usize, available: usize },
    #[error("The background system is singular")]
    Singular,
    #[error("No signal found near {position}")]
    NoSignal { position: f64 },
    #[error("The fit region [{0}, {1}] lies outside the histogram")]
    RegionOutOfRange(f64, f64),
    #[error("{0}")]
    Failed(String),
}

/// A numerical fit engine for one fit region
pub trait FitEngine {
    fn add_peak(&mut self, position: f64);
    fn add_background_region(&mut self, lo: f64, hi: f64);
    fn set_left_tails(&mut self, value: f64);
    fn set_right_tails(&mut self, value: f64);

    fn fit_background(&mut self, histogram: &Histogram) -> Result<BackgroundFunction, EngineError>;

    /// Fit the peaks, on top of `background` when one is given. Without one the
    /// engine chooses its own background treatment.
    fn fit_peaks(
        &mut self,
        histogram: &Histogram,
        background: Option<&BackgroundFunction>,
    ) -> Result<Rc<dyn PeakSum>, EngineError>;
}

/// Builds engines for a raw fit region `(lo, hi)`, `lo <= hi`
pub trait EngineFactory {
    fn create(&self, region: (f64, f64)) -> Box<dyn FitEngine>;
}

impl<F> EngineFactory for F
where
    F: Fn((f64, f64)) -> Box<dyn FitEngine>,
{
    fn create(&self, region: (f64, f64)) -> Box<dyn FitEngine> {
        self(region)
    }
}
