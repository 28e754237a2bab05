//! `specfit` is an interactive front end for fitting peaks and backgrounds in
//! calibrated nuclear spectra.
//!
//! A [`Fit`] holds the region, peak and background settings of one fit on one
//! [`Spectrum`] in raw channel units, drives a fitting engine built by an
//! [`EngineFactory`] and places the fitted curves on a [`Viewer`]. The crate ships with
//! a deterministic reference engine, [`EstimatorFactory`], and an in-memory viewer,
//! [`Canvas`].
//!
//! The [`cmdline`] module provides the command shell the `specfit` binary runs, and the
//! [`plugins`] module the commands registered on it.
//!
//! # Usage
//! ```
//! use std::rc::Rc;
//!
//! use specfit::{EstimatorFactory, Fit, Histogram, Spectrum};
//!
//! let counts: Vec<f64> = (0..100)
//!     .map(|x| {
//!         let x = x as f64;
//!         5.0 + 200.0 * (-(x - 40.0).powi(2) / 8.0).exp()
//!     })
//!     .collect();
//! let spectrum = Spectrum::new(Histogram::new("demo", counts)).into_shared();
//! let mut fit = Fit::new(Rc::new(EstimatorFactory::default()), Some(spectrum));
//! fit.set_region(25.0, 55.0).unwrap();
//! fit.set_peaks(&[40.0]).unwrap();
//! let peaks = fit.fit_peaks(None, false).unwrap();
//! assert_eq!(peaks.len(), 1);
//! assert!((peaks[0].position - 40.0).abs() < 0.1);
//! for peak in peaks.iter() {
//!     println!("{}", peak);
//! }
//! ```
//! ## Building
//! Polynomial background regression solves its normal equations with `nalgebra`, enabled
//! by the default `nalgebra` feature. Without it a plain elimination is used. The `serde`
//! feature derives serialization for the data types.
pub mod arrayops;
pub mod calibration;
pub mod cmdline;
pub mod config;
pub mod engine;
pub mod estimator;
pub mod fit;
pub mod histogram;
pub mod peak;
pub mod peak_statistics;
pub mod plugins;
pub mod prelude;
pub mod session;
pub mod spectrum;
pub mod text;
pub mod viewer;

#[cfg(test)]
mod test_data;

pub use crate::calibration::{Calibration, CalibrationError, CalibrationTable};
pub use crate::engine::{BackgroundFunction, Curve, EngineError, EngineFactory, FitEngine, PeakSum};
pub use crate::estimator::{EstimatorEngine, EstimatorFactory};
pub use crate::fit::{Fit, FitError, FitErrorKind, FitSetting};
pub use crate::histogram::{Histogram, Matrix};
pub use crate::peak::FittedPeak;
pub use crate::spectrum::{Spectrum, SpectrumCollection, SpectrumRef};
pub use crate::viewer::{Canvas, CurveHandle, Viewer, ViewerRef};
