//! Shared fixtures for unit tests: a synthetic two peak spectrum, a deterministic stub
//! engine that records how it is driven and a viewer that counts display operations.
use std::cell::RefCell;
use std::rc::Rc;

use crate::engine::{BackgroundFunction, Curve, EngineError, EngineFactory, FitEngine, PeakSum};
use crate::histogram::Histogram;
use crate::spectrum::SpectrumRef;
use crate::viewer::{Canvas, CurveHandle, DisplayCurve, Viewer};

pub struct SyntheticPeak {
    pub position: f64,
    pub amplitude: f64,
    pub sigma: f64,
}

/// The peaks of [`synthetic_histogram`], on a background of `10 + 0.02 x`
pub const SYNTHETIC_PEAKS: [SyntheticPeak; 2] = [
    SyntheticPeak {
        position: 60.0,
        amplitude: 400.0,
        sigma: 2.5,
    },
    SyntheticPeak {
        position: 120.4,
        amplitude: 250.0,
        sigma: 3.0,
    },
];

pub fn synthetic_histogram() -> Histogram {
    let counts = (0..200)
        .map(|x| {
            let x = x as f64;
            10.0 + 0.02 * x
                + SYNTHETIC_PEAKS
                    .iter()
                    .map(|p| p.amplitude * (-(x - p.position).powi(2) / (2.0 * p.sigma * p.sigma)).exp())
                    .sum::<f64>()
        })
        .collect();
    Histogram::new("synthetic", counts)
}

/// Everything a [`StubFactory`] and its engines were asked to do
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EngineCalls {
    pub created: Vec<(f64, f64)>,
    pub peaks: Vec<f64>,
    pub backgrounds: Vec<(f64, f64)>,
    pub left_tails: Vec<f64>,
    pub right_tails: Vec<f64>,
    pub background_fits: usize,
    pub peak_fits: usize,
    pub peak_fit_backgrounds: Vec<Option<BackgroundFunction>>,
}

impl EngineCalls {
    pub fn fits(&self) -> usize {
        self.background_fits + self.peak_fits
    }
}

/// An engine factory whose engines report fixed `(position, fwhm, volume)` peaks
#[derive(Debug, Clone, Default)]
pub struct StubFactory {
    pub calls: Rc<RefCell<EngineCalls>>,
    pub results: Vec<(f64, f64, f64)>,
    pub failure: Option<EngineError>,
}

impl StubFactory {
    pub fn new(results: Vec<(f64, f64, f64)>) -> Self {
        Self {
            results,
            ..Default::default()
        }
    }

    pub fn failing(failure: EngineError) -> Self {
        Self {
            failure: Some(failure),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> EngineCalls {
        self.calls.borrow().clone()
    }
}

impl EngineFactory for StubFactory {
    fn create(&self, region: (f64, f64)) -> Box<dyn FitEngine> {
        self.calls.borrow_mut().created.push(region);
        Box::new(StubEngine {
            calls: self.calls.clone(),
            results: self.results.clone(),
            failure: self.failure.clone(),
            region,
        })
    }
}

struct StubEngine {
    calls: Rc<RefCell<EngineCalls>>,
    results: Vec<(f64, f64, f64)>,
    failure: Option<EngineError>,
    region: (f64, f64),
}

impl FitEngine for StubEngine {
    fn add_peak(&mut self, position: f64) {
        self.calls.borrow_mut().peaks.push(position);
    }

    fn add_background_region(&mut self, lo: f64, hi: f64) {
        self.calls.borrow_mut().backgrounds.push((lo, hi));
    }

    fn set_left_tails(&mut self, value: f64) {
        self.calls.borrow_mut().left_tails.push(value);
    }

    fn set_right_tails(&mut self, value: f64) {
        self.calls.borrow_mut().right_tails.push(value);
    }

    fn fit_background(&mut self, _histogram: &Histogram) -> Result<BackgroundFunction, EngineError> {
        self.calls.borrow_mut().background_fits += 1;
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(BackgroundFunction::new(vec![2.0, 0.1], self.region.0, self.region)),
        }
    }

    fn fit_peaks(
        &mut self,
        _histogram: &Histogram,
        background: Option<&BackgroundFunction>,
    ) -> Result<Rc<dyn PeakSum>, EngineError> {
        {
            let mut calls = self.calls.borrow_mut();
            calls.peak_fits += 1;
            calls.peak_fit_backgrounds.push(background.cloned());
        }
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(Rc::new(StubSum {
                results: self.results.clone(),
                domain: self.region,
            })),
        }
    }
}

#[derive(Debug)]
struct StubSum {
    results: Vec<(f64, f64, f64)>,
    domain: (f64, f64),
}

impl Curve for StubSum {
    fn eval(&self, _x: f64) -> f64 {
        1.0
    }

    fn domain(&self) -> (f64, f64) {
        self.domain
    }
}

impl PeakSum for StubSum {
    fn peak_count(&self) -> usize {
        self.results.len()
    }

    fn peak_position(&self, index: usize) -> f64 {
        self.results[index].0
    }

    fn peak_fwhm(&self, index: usize) -> f64 {
        self.results[index].1
    }

    fn peak_volume(&self, index: usize) -> f64 {
        self.results[index].2
    }

    fn peak_left_tail(&self, _index: usize) -> Option<f64> {
        None
    }

    fn peak_right_tail(&self, _index: usize) -> Option<f64> {
        None
    }

    fn as_curve(self: Rc<Self>) -> Rc<dyn Curve> {
        self
    }
}

/// A [`Canvas`] that counts the display operations performed on it
#[derive(Debug, Default)]
pub struct RecordingViewer {
    pub canvas: Canvas,
    pub adds: usize,
    pub removes: usize,
    pub redraws: usize,
    pub lookups: usize,
}

impl RecordingViewer {
    pub fn shared() -> Rc<RefCell<RecordingViewer>> {
        Rc::new(RefCell::new(Self::default()))
    }
}

impl Viewer for RecordingViewer {
    fn add_curve(&mut self, curve: Rc<dyn Curve>, color: u32, auto_visible: bool) -> CurveHandle {
        self.adds += 1;
        self.canvas.add_curve(curve, color, auto_visible)
    }

    fn add_spectrum(&mut self, spectrum: SpectrumRef, color: u32) -> CurveHandle {
        self.adds += 1;
        self.canvas.add_spectrum(spectrum, color)
    }

    fn display_curve(&mut self, handle: CurveHandle) -> Option<&mut dyn DisplayCurve> {
        self.lookups += 1;
        self.canvas.display_curve(handle)
    }

    fn remove_curve(&mut self, handle: CurveHandle) -> bool {
        self.removes += 1;
        self.canvas.remove_curve(handle)
    }

    fn redraw(&mut self, force: bool) {
        self.redraws += 1;
        self.canvas.redraw(force)
    }

    fn lock_update(&mut self) {
        self.canvas.lock_update()
    }

    fn unlock_update(&mut self) {
        self.canvas.unlock_update()
    }
}
