//! The state of one peak and background fit over a region of a spectrum.
//!
//! A [`Fit`] holds the declarative description of a fit: its region, peak hints,
//! background intervals and tail parameters, all stored in raw channels. Values are
//! given to it in calibrated units and converted with the spectrum's calibration on the
//! way in. Any change to the description discards the engine built for it and the
//! peaks fitted with it.
//!
//! The engine is built on demand through an [`EngineFactory`]. After a fit the raw
//! [`FittedPeak`]s are cached and, when a [`Viewer`](crate::viewer::Viewer) is attached,
//! the fitted functions are placed on it. A `Fit` owns at most one background curve and
//! one peak curve on its viewer, and removes them when it is detached or dropped.
use std::fmt;
use std::io;
use std::rc::Rc;

use thiserror::Error;

use crate::calibration::{Calibration, CalibrationError};
use crate::engine::{BackgroundFunction, Curve, EngineError, EngineFactory, FitEngine, PeakSum};
use crate::peak::FittedPeak;
use crate::spectrum::SpectrumRef;
use crate::viewer::{CurveHandle, ViewerRef, BACKGROUND_FUNC_COLOR, PEAK_FUNC_COLOR};

/// The configurable parts of a fit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitField {
    Region,
    Peaks,
    Backgrounds,
    LeftTail,
    RightTail,
}

impl fmt::Display for FitField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            FitField::Region => "region",
            FitField::Peaks => "peaks",
            FitField::Backgrounds => "backgrounds",
            FitField::LeftTail => "left tail",
            FitField::RightTail => "right tail",
        };
        f.write_str(name)
    }
}

/// A value for one [`FitField`], in calibrated units
#[derive(Debug, Clone, PartialEq)]
pub enum FitSetting {
    Region(f64, f64),
    Peaks(Vec<f64>),
    Backgrounds(Vec<(f64, f64)>),
    LeftTail(Option<f64>),
    RightTail(Option<f64>),
}

impl FitSetting {
    pub fn field(&self) -> FitField {
        match self {
            FitSetting::Region(_, _) => FitField::Region,
            FitSetting::Peaks(_) => FitField::Peaks,
            FitSetting::Backgrounds(_) => FitField::Backgrounds,
            FitSetting::LeftTail(_) => FitField::LeftTail,
            FitSetting::RightTail(_) => FitField::RightTail,
        }
    }
}

/// The broad class of a [`FitError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitErrorKind {
    Configuration,
    Calibration,
    Fit,
    Viewer,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("No fit region has been set")]
    MissingRegion,
    #[error("No peaks have been set")]
    MissingPeaks,
    #[error("The fit has no spectrum")]
    MissingSpectrum,
    #[error("Invalid value {value} for {field}")]
    InvalidValue { field: FitField, value: f64 },
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error("The fit failed: {0}")]
    Engine(#[from] EngineError),
    #[error("Expected {expected} fitted peaks, the engine reported {reported}")]
    InconsistentResult { expected: usize, reported: usize },
    #[error("The engine reported a non-finite value for peak {index}")]
    NonFiniteResult { index: usize },
    #[error("The fit is not attached to a viewer")]
    NoViewer,
}

impl FitError {
    pub fn kind(&self) -> FitErrorKind {
        match self {
            FitError::MissingRegion
            | FitError::MissingPeaks
            | FitError::MissingSpectrum
            | FitError::InvalidValue { .. } => FitErrorKind::Configuration,
            FitError::Calibration(_) => FitErrorKind::Calibration,
            FitError::Engine(_)
            | FitError::InconsistentResult { .. }
            | FitError::NonFiniteResult { .. } => FitErrorKind::Fit,
            FitError::NoViewer => FitErrorKind::Viewer,
        }
    }
}

fn check_finite(field: FitField, value: f64) -> Result<f64, FitError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(FitError::InvalidValue { field, value })
    }
}

fn same_viewer(a: &ViewerRef, b: &ViewerRef) -> bool {
    Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
}

pub struct Fit {
    spectrum: Option<SpectrumRef>,
    factory: Rc<dyn EngineFactory>,

    region: Option<(f64, f64)>,
    peaks: Vec<f64>,
    backgrounds: Vec<(f64, f64)>,
    left_tail: Option<f64>,
    right_tail: Option<f64>,

    engine: Option<Box<dyn FitEngine>>,
    fitted_peaks: Vec<FittedPeak>,
    background_function: Option<BackgroundFunction>,
    peak_function: Option<Rc<dyn PeakSum>>,

    viewer: Option<ViewerRef>,
    background_handle: Option<CurveHandle>,
    peak_handle: Option<CurveHandle>,
}

impl fmt::Debug for Fit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fit")
            .field("region", &self.region)
            .field("peaks", &self.peaks)
            .field("backgrounds", &self.backgrounds)
            .field("left_tail", &self.left_tail)
            .field("right_tail", &self.right_tail)
            .field("fitted_peaks", &self.fitted_peaks)
            .field("background_handle", &self.background_handle)
            .field("peak_handle", &self.peak_handle)
            .finish()
    }
}

impl Fit {
    pub fn new(factory: Rc<dyn EngineFactory>, spectrum: Option<SpectrumRef>) -> Self {
        Self {
            spectrum,
            factory,
            region: None,
            peaks: Vec::new(),
            backgrounds: Vec::new(),
            left_tail: None,
            right_tail: None,
            engine: None,
            fitted_peaks: Vec::new(),
            background_function: None,
            peak_function: None,
            viewer: None,
            background_handle: None,
            peak_handle: None,
        }
    }

    /// Create a fit and apply each setting in order
    pub fn with_config<I: IntoIterator<Item = FitSetting>>(
        factory: Rc<dyn EngineFactory>,
        spectrum: SpectrumRef,
        settings: I,
    ) -> Result<Self, FitError> {
        let mut this = Self::new(factory, Some(spectrum));
        for setting in settings {
            this.configure(setting)?;
        }
        Ok(this)
    }

    pub fn configure(&mut self, setting: FitSetting) -> Result<(), FitError> {
        match setting {
            FitSetting::Region(a, b) => self.set_region(a, b),
            FitSetting::Peaks(peaks) => self.set_peaks(&peaks),
            FitSetting::Backgrounds(backgrounds) => self.set_backgrounds(&backgrounds),
            FitSetting::LeftTail(tail) => self.set_left_tail(tail),
            FitSetting::RightTail(tail) => self.set_right_tail(tail),
        }
    }

    fn to_raw(&self, field: FitField, value: f64) -> Result<f64, FitError> {
        let value = check_finite(field, value)?;
        let spectrum = self.spectrum.as_ref().ok_or(CalibrationError::NoSpectrum)?;
        let raw = spectrum.borrow().to_raw(value)?;
        check_finite(field, raw).map_err(|_| FitError::InvalidValue { field, value })
    }

    /// Set the fit region from two calibrated boundaries, kept in the order given
    pub fn set_region(&mut self, e1: f64, e2: f64) -> Result<(), FitError> {
        let region = (
            self.to_raw(FitField::Region, e1)?,
            self.to_raw(FitField::Region, e2)?,
        );
        self.region = Some(region);
        self.invalidate(FitField::Region);
        Ok(())
    }

    pub fn set_peaks(&mut self, peaks: &[f64]) -> Result<(), FitError> {
        let peaks = peaks
            .iter()
            .map(|e| self.to_raw(FitField::Peaks, *e))
            .collect::<Result<Vec<_>, _>>()?;
        self.peaks = peaks;
        self.invalidate(FitField::Peaks);
        Ok(())
    }

    pub fn set_backgrounds(&mut self, backgrounds: &[(f64, f64)]) -> Result<(), FitError> {
        let backgrounds = backgrounds
            .iter()
            .map(|(lo, hi)| {
                Ok((
                    self.to_raw(FitField::Backgrounds, *lo)?,
                    self.to_raw(FitField::Backgrounds, *hi)?,
                ))
            })
            .collect::<Result<Vec<_>, FitError>>()?;
        self.backgrounds = backgrounds;
        self.invalidate(FitField::Backgrounds);
        Ok(())
    }

    pub fn set_left_tail(&mut self, tail: Option<f64>) -> Result<(), FitError> {
        self.left_tail = tail
            .map(|t| check_finite(FitField::LeftTail, t))
            .transpose()?;
        self.invalidate(FitField::LeftTail);
        Ok(())
    }

    pub fn set_right_tail(&mut self, tail: Option<f64>) -> Result<(), FitError> {
        self.right_tail = tail
            .map(|t| check_finite(FitField::RightTail, t))
            .transpose()?;
        self.invalidate(FitField::RightTail);
        Ok(())
    }

    /// Move the fit to another spectrum. The stored raw values are kept.
    pub fn set_spectrum(&mut self, spectrum: Option<SpectrumRef>) {
        self.spectrum = spectrum;
        self.engine = None;
        self.fitted_peaks.clear();
        self.background_function = None;
        self.peak_function = None;
        log::debug!("Fit moved to a new spectrum, cached results discarded");
    }

    fn invalidate(&mut self, field: FitField) {
        if self.engine.is_some() || !self.fitted_peaks.is_empty() {
            log::debug!("Setting {field} discards the fit engine and fitted peaks");
        }
        self.engine = None;
        self.fitted_peaks.clear();
        self.background_function = None;
        self.peak_function = None;
    }

    /// Build a fresh engine for the current configuration
    pub fn init_engine(&mut self) -> Result<(), FitError> {
        let (a, b) = self.region.ok_or(FitError::MissingRegion)?;
        let region = (a.min(b), a.max(b));
        log::debug!(
            "Building fit engine for [{}, {}] with {} peaks and {} background regions",
            region.0,
            region.1,
            self.peaks.len(),
            self.backgrounds.len()
        );
        let mut engine = self.factory.create(region);
        for peak in self.peaks.iter().copied() {
            engine.add_peak(peak);
        }
        for (lo, hi) in self.backgrounds.iter().copied() {
            engine.add_background_region(lo, hi);
        }
        if let Some(tail) = self.left_tail.filter(|t| *t != 0.0) {
            engine.set_left_tails(tail);
        }
        if let Some(tail) = self.right_tail.filter(|t| *t != 0.0) {
            engine.set_right_tails(tail);
        }
        self.engine = Some(engine);
        Ok(())
    }

    fn ensure_engine(&mut self) -> Result<&mut Box<dyn FitEngine>, FitError> {
        let engine = match self.engine.take() {
            Some(engine) => engine,
            None => {
                self.init_engine()?;
                self.engine.take().ok_or(FitError::MissingRegion)?
            }
        };
        Ok(self.engine.insert(engine))
    }

    fn fit_spectrum(&self) -> Result<SpectrumRef, FitError> {
        self.spectrum.clone().ok_or(FitError::MissingSpectrum)
    }

    fn calibration(&self) -> Option<Calibration> {
        self.spectrum
            .as_ref()
            .and_then(|s| s.borrow().calibration().cloned())
    }

    /// Fit the peaks, on top of `background` when given. The fitted peaks are cached
    /// in raw units and returned in calibrated units. With `update` the viewer, if
    /// any, is redrawn.
    pub fn fit_peaks(
        &mut self,
        background: Option<&BackgroundFunction>,
        update: bool,
    ) -> Result<Vec<FittedPeak>, FitError> {
        if self.region.is_none() {
            return Err(FitError::MissingRegion);
        }
        if self.peaks.is_empty() {
            return Err(FitError::MissingPeaks);
        }
        let spectrum = self.fit_spectrum()?;
        let sum = {
            let engine = self.ensure_engine()?;
            let spectrum = spectrum.borrow();
            engine.fit_peaks(spectrum.histogram(), background)?
        };
        let peaks = self.read_back(sum.as_ref())?;
        log::debug!("Fitted {} peaks", peaks.len());
        self.fitted_peaks = peaks;
        self.peak_function = Some(sum.clone());
        if let Some(viewer) = self.viewer.clone() {
            let old = self.peak_handle.take();
            self.peak_handle = Some(self.place_curve(&viewer, old, sum.as_curve(), PEAK_FUNC_COLOR, update));
        }
        Ok(self.calibrated_peaks())
    }

    /// Fit the background alone and return the fitted function
    pub fn fit_background(&mut self, update: bool) -> Result<BackgroundFunction, FitError> {
        if self.region.is_none() {
            return Err(FitError::MissingRegion);
        }
        let spectrum = self.fit_spectrum()?;
        let background = {
            let engine = self.ensure_engine()?;
            let spectrum = spectrum.borrow();
            engine.fit_background(spectrum.histogram())?
        };
        self.background_function = Some(background.clone());
        if let Some(viewer) = self.viewer.clone() {
            let old = self.background_handle.take();
            let curve: Rc<dyn Curve> = Rc::new(background.clone());
            self.background_handle = Some(self.place_curve(&viewer, old, curve, BACKGROUND_FUNC_COLOR, update));
        }
        Ok(background)
    }

    /// Fit the background, then the peaks on top of it
    pub fn fit_all(&mut self) -> Result<Vec<FittedPeak>, FitError> {
        if self.region.is_none() {
            return Err(FitError::MissingRegion);
        }
        if self.peaks.is_empty() {
            return Err(FitError::MissingPeaks);
        }
        let background = self.fit_background(false)?;
        self.fit_peaks(Some(&background), true)
    }

    fn read_back(&self, sum: &dyn PeakSum) -> Result<Vec<FittedPeak>, FitError> {
        let reported = sum.peak_count();
        if reported != self.peaks.len() {
            return Err(FitError::InconsistentResult {
                expected: self.peaks.len(),
                reported,
            });
        }
        (0..reported)
            .map(|index| {
                let peak = FittedPeak::new(
                    sum.peak_position(index),
                    sum.peak_fwhm(index),
                    sum.peak_volume(index),
                )
                .with_tails(sum.peak_left_tail(index), sum.peak_right_tail(index));
                log::trace!("Peak {index}: {peak}");
                if peak.is_finite() {
                    Ok(peak)
                } else {
                    Err(FitError::NonFiniteResult { index })
                }
            })
            .collect()
    }

    fn place_curve(
        &self,
        viewer: &ViewerRef,
        old: Option<CurveHandle>,
        curve: Rc<dyn Curve>,
        color: u32,
        update: bool,
    ) -> CurveHandle {
        let calibration = self.calibration();
        let mut viewer = viewer.borrow_mut();
        if let Some(old) = old {
            viewer.remove_curve(old);
        }
        let handle = viewer.add_curve(curve, color, false);
        if let Some(cal) = calibration {
            if let Some(display) = viewer.display_curve(handle) {
                display.set_calibration(Some(cal));
            }
        }
        log::debug!("Fit curve placed on viewer as {handle}");
        if update {
            viewer.redraw(true);
        }
        handle
    }

    /// Attach to a viewer, detaching from any other viewer first. Curves of the last
    /// fit are placed on the new viewer.
    pub fn attach(&mut self, viewer: ViewerRef, update: bool) {
        if let Some(current) = &self.viewer {
            if same_viewer(current, &viewer) {
                if update {
                    viewer.borrow_mut().redraw(true);
                }
                return;
            }
            self.detach(false);
        }
        if let Some(background) = self.background_function.clone() {
            self.background_handle = Some(self.place_curve(
                &viewer,
                None,
                Rc::new(background),
                BACKGROUND_FUNC_COLOR,
                false,
            ));
        }
        if let Some(sum) = self.peak_function.clone() {
            self.peak_handle = Some(self.place_curve(&viewer, None, sum.as_curve(), PEAK_FUNC_COLOR, false));
        }
        if update {
            viewer.borrow_mut().redraw(true);
        }
        self.viewer = Some(viewer);
    }

    /// Remove this fit's curves from the viewer and forget it
    pub fn detach(&mut self, update: bool) {
        if let Some(viewer) = self.viewer.take() {
            let mut viewer = viewer.borrow_mut();
            for handle in [self.background_handle.take(), self.peak_handle.take()]
                .into_iter()
                .flatten()
            {
                viewer.remove_curve(handle);
            }
            if update {
                viewer.redraw(true);
            }
        }
        self.background_handle = None;
        self.peak_handle = None;
    }

    /// Apply the spectrum's current calibration to the displayed curves
    pub fn resync(&mut self) -> Result<(), FitError> {
        let viewer = self.viewer.clone().ok_or(FitError::NoViewer)?;
        let calibration = self.calibration();
        let mut viewer = viewer.borrow_mut();
        for handle in [self.background_handle, self.peak_handle].into_iter().flatten() {
            if let Some(display) = viewer.display_curve(handle) {
                display.set_calibration(calibration.clone());
            }
        }
        viewer.redraw(true);
        Ok(())
    }

    /// Write a summary of the fit in calibrated units
    pub fn report<W: io::Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        let spectrum = self.spectrum.as_ref().map(|s| s.borrow());
        let to_cal = |x: f64| spectrum.as_ref().map_or(x, |s| s.to_calibrated(x));
        match &spectrum {
            Some(s) => writeln!(out, "Spectrum: {}", s.name())?,
            None => writeln!(out, "Spectrum: none")?,
        }
        match self.region {
            Some((a, b)) => writeln!(out, "Region: {:.4} - {:.4}", to_cal(a), to_cal(b))?,
            None => writeln!(out, "Region: none")?,
        }
        if !self.backgrounds.is_empty() {
            let bgs: Vec<String> = self
                .backgrounds
                .iter()
                .map(|(lo, hi)| format!("[{:.4}, {:.4}]", to_cal(*lo), to_cal(*hi)))
                .collect();
            writeln!(out, "Backgrounds: {}", bgs.join(" "))?;
        }
        if self.fitted_peaks.is_empty() {
            writeln!(out, "Not fitted ({} peaks set)", self.peaks.len())?;
            return Ok(());
        }
        writeln!(out, "Peaks: {}", self.fitted_peaks.len())?;
        let calibration = spectrum.as_ref().and_then(|s| s.calibration());
        for (i, peak) in self.fitted_peaks.iter().enumerate() {
            writeln!(out, "  {:>2}: {}", i + 1, peak.calibrated(calibration))?;
        }
        Ok(())
    }

    pub fn spectrum(&self) -> Option<&SpectrumRef> {
        self.spectrum.as_ref()
    }

    /// The fit region in raw channels, in the order it was given
    pub fn region(&self) -> Option<(f64, f64)> {
        self.region
    }

    pub fn peaks(&self) -> &[f64] {
        &self.peaks
    }

    pub fn backgrounds(&self) -> &[(f64, f64)] {
        &self.backgrounds
    }

    pub fn left_tail(&self) -> Option<f64> {
        self.left_tail
    }

    pub fn right_tail(&self) -> Option<f64> {
        self.right_tail
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    pub fn is_fitted(&self) -> bool {
        !self.fitted_peaks.is_empty()
    }

    /// The peaks of the last fit in raw channels
    pub fn fitted_peaks(&self) -> &[FittedPeak] {
        &self.fitted_peaks
    }

    pub fn calibrated_peaks(&self) -> Vec<FittedPeak> {
        let calibration = self.calibration();
        self.fitted_peaks
            .iter()
            .map(|p| p.calibrated(calibration.as_ref()))
            .collect()
    }

    pub fn background_function(&self) -> Option<&BackgroundFunction> {
        self.background_function.as_ref()
    }

    pub fn peak_function(&self) -> Option<&Rc<dyn PeakSum>> {
        self.peak_function.as_ref()
    }

    pub fn viewer(&self) -> Option<&ViewerRef> {
        self.viewer.as_ref()
    }

    pub fn background_handle(&self) -> Option<CurveHandle> {
        self.background_handle
    }

    pub fn peak_handle(&self) -> Option<CurveHandle> {
        self.peak_handle
    }
}

impl Drop for Fit {
    fn drop(&mut self) {
        if let Some(viewer) = self.viewer.take() {
            match viewer.try_borrow_mut() {
                Ok(mut viewer) => {
                    for handle in [self.background_handle, self.peak_handle].into_iter().flatten() {
                        viewer.remove_curve(handle);
                    }
                }
                Err(_) => log::warn!("Viewer busy while dropping a fit, its curves are left in place"),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::estimator::EstimatorFactory;
    use crate::histogram::Histogram;
    use crate::spectrum::Spectrum;
    use crate::test_data::{synthetic_histogram, RecordingViewer, StubFactory, SYNTHETIC_PEAKS};
    use crate::viewer::{Canvas, Viewer};

    use rstest::rstest;

    fn spectrum(calibration: Option<Calibration>) -> SpectrumRef {
        let mut spec = Spectrum::new(synthetic_histogram());
        spec.set_calibration(calibration);
        spec.into_shared()
    }

    fn two_peaks() -> StubFactory {
        StubFactory::new(vec![(50.0, 2.0, 1000.0), (70.0, 3.0, 500.0)])
    }

    fn configured(factory: &StubFactory, calibration: Option<Calibration>) -> Fit {
        Fit::with_config(
            Rc::new(factory.clone()),
            spectrum(calibration),
            [
                FitSetting::Region(40.0, 80.0),
                FitSetting::Peaks(vec![50.0, 70.0]),
                FitSetting::Backgrounds(vec![(20.0, 30.0), (90.0, 100.0)]),
            ],
        )
        .unwrap()
    }

    #[rstest]
    #[case::identity(None, (10.0, 30.0))]
    #[case::linear(Some(Calibration::linear(5.0, 0.5)), (10.0, 50.0))]
    #[case::reversed_linear(Some(Calibration::linear(100.0, -1.0)), (90.0, 70.0))]
    fn test_region_stored_raw(#[case] calibration: Option<Calibration>, #[case] expected: (f64, f64)) {
        let spec = spectrum(calibration);
        let mut fit = Fit::new(Rc::new(two_peaks()), Some(spec.clone()));
        fit.set_region(10.0, 30.0).unwrap();
        assert_eq!(fit.region(), Some(expected));
        let spec = spec.borrow();
        assert_eq!(fit.region(), Some((spec.to_raw(10.0).unwrap(), spec.to_raw(30.0).unwrap())));
    }

    #[test]
    fn test_lists_stored_raw() {
        let factory = two_peaks();
        let fit = configured(&factory, Some(Calibration::linear(0.0, 2.0)));
        assert_eq!(fit.peaks(), &[25.0, 35.0]);
        assert_eq!(fit.backgrounds(), &[(10.0, 15.0), (45.0, 50.0)]);
    }

    #[test]
    fn test_conversion_needs_spectrum() {
        let factory = two_peaks();
        let mut fit = Fit::new(Rc::new(factory), None);
        let err = fit.set_region(1.0, 2.0).unwrap_err();
        assert_eq!(err, FitError::Calibration(CalibrationError::NoSpectrum));
        assert_eq!(err.kind(), FitErrorKind::Calibration);
        assert_eq!(fit.region(), None);
        // Tails are unit-free
        fit.set_left_tail(Some(1.0)).unwrap();
    }

    #[test]
    fn test_invalid_values() {
        let factory = two_peaks();
        let mut fit = configured(&factory, None);
        let err = fit.set_peaks(&[50.0, f64::NAN]).unwrap_err();
        assert!(matches!(err, FitError::InvalidValue { field: FitField::Peaks, .. }));
        assert_eq!(err.kind(), FitErrorKind::Configuration);
        assert_eq!(fit.peaks(), &[50.0, 70.0]);
        assert!(fit.set_right_tail(Some(f64::INFINITY)).is_err());
    }

    #[test]
    fn test_non_finite_conversion_rejected() {
        let factory = two_peaks();
        let mut fit = configured(&factory, Some(Calibration::linear(-1e308, 1.0)));
        let before = fit.region();
        let err = fit.set_region(1e308, 0.0).unwrap_err();
        assert_eq!(err, FitError::InvalidValue { field: FitField::Region, value: 1e308 });
        assert_eq!(err.kind(), FitErrorKind::Configuration);
        assert_eq!(fit.region(), before);
    }

    #[test]
    fn test_configure_invalidates() {
        let factory = two_peaks();
        let mut fit = configured(&factory, None);
        fit.fit_all().unwrap();
        assert!(fit.is_fitted());
        assert!(fit.has_engine());

        fit.configure(FitSetting::LeftTail(Some(1.5))).unwrap();
        assert!(!fit.is_fitted());
        assert!(fit.fitted_peaks().is_empty());
        assert!(!fit.has_engine());
        assert!(fit.background_function().is_none());

        fit.fit_all().unwrap();
        let calls = factory.calls();
        assert_eq!(calls.created.len(), 2);
        assert_eq!(calls.left_tails, vec![1.5]);
    }

    #[rstest]
    #[case(FitSetting::Region(40.0, 90.0))]
    #[case(FitSetting::Peaks(vec![55.0, 70.0]))]
    #[case(FitSetting::Backgrounds(vec![]))]
    #[case(FitSetting::RightTail(None))]
    fn test_any_setting_invalidates(#[case] setting: FitSetting) {
        let factory = two_peaks();
        let mut fit = configured(&factory, None);
        fit.fit_peaks(None, true).unwrap();
        fit.configure(setting).unwrap();
        assert!(!fit.is_fitted());
        assert!(!fit.has_engine());
    }

    #[test]
    fn test_engine_reused_until_invalidated() {
        let factory = two_peaks();
        let mut fit = configured(&factory, None);
        fit.fit_background(false).unwrap();
        fit.fit_peaks(None, false).unwrap();
        fit.fit_peaks(None, false).unwrap();
        let calls = factory.calls();
        assert_eq!(calls.created, vec![(40.0, 80.0)]);
        assert_eq!(calls.peaks, vec![50.0, 70.0]);
        assert_eq!(calls.backgrounds, vec![(20.0, 30.0), (90.0, 100.0)]);
        assert_eq!(calls.background_fits, 1);
        assert_eq!(calls.peak_fits, 2);
    }

    #[test]
    fn test_engine_region_is_ordered() {
        let factory = two_peaks();
        let mut fit = configured(&factory, None);
        fit.set_region(80.0, 40.0).unwrap();
        fit.fit_peaks(None, false).unwrap();
        assert_eq!(fit.region(), Some((80.0, 40.0)));
        assert_eq!(factory.calls().created, vec![(40.0, 80.0)]);
    }

    #[test]
    fn test_zero_tails_not_applied() {
        let factory = two_peaks();
        let mut fit = configured(&factory, None);
        fit.set_left_tail(Some(0.0)).unwrap();
        fit.set_right_tail(Some(2.0)).unwrap();
        fit.init_engine().unwrap();
        let calls = factory.calls();
        assert!(calls.left_tails.is_empty());
        assert_eq!(calls.right_tails, vec![2.0]);
    }

    #[test]
    fn test_fit_all_matches_composition() {
        let factory_a = two_peaks();
        let viewer_a = RecordingViewer::shared();
        let mut fit_a = configured(&factory_a, Some(Calibration::linear(1.0, 1.0)));
        fit_a.attach(viewer_a.clone(), false);
        let all = fit_a.fit_all().unwrap();

        let factory_b = two_peaks();
        let viewer_b = RecordingViewer::shared();
        let mut fit_b = configured(&factory_b, Some(Calibration::linear(1.0, 1.0)));
        fit_b.attach(viewer_b.clone(), false);
        let background = fit_b.fit_background(false).unwrap();
        let composed = fit_b.fit_peaks(Some(&background), true).unwrap();

        assert_eq!(all, composed);
        assert_eq!(factory_a.calls(), factory_b.calls());
        assert_eq!(
            factory_a.calls().peak_fit_backgrounds,
            vec![Some(background)]
        );
        assert_eq!(viewer_a.borrow().redraws, 1);
        assert_eq!(viewer_b.borrow().redraws, 1);
        assert_eq!(viewer_a.borrow().adds, viewer_b.borrow().adds);
    }

    #[test]
    fn test_peaks_read_back_in_order() {
        let factory = two_peaks();
        let mut fit = configured(&factory, None);
        let peaks = fit.fit_peaks(None, true).unwrap();
        assert_eq!(
            peaks,
            vec![FittedPeak::new(50.0, 2.0, 1000.0), FittedPeak::new(70.0, 3.0, 500.0)]
        );
        assert_eq!(fit.fitted_peaks(), peaks.as_slice());
    }

    #[test]
    fn test_peaks_returned_calibrated() {
        let factory = two_peaks();
        let mut fit = configured(&factory, Some(Calibration::linear(0.0, 2.0)));
        let peaks = fit.fit_peaks(None, false).unwrap();
        assert_eq!(peaks[0], FittedPeak::new(100.0, 4.0, 1000.0));
        assert_eq!(fit.fitted_peaks()[0], FittedPeak::new(50.0, 2.0, 1000.0));
    }

    #[test]
    fn test_decreasing_calibration_keeps_widths_positive() {
        let factory = two_peaks();
        let mut fit = configured(&factory, Some(Calibration::linear(100.0, -1.0)));
        let peaks = fit.fit_peaks(None, false).unwrap();
        assert!(peaks.iter().all(|p| p.full_width_at_half_max > 0.0), "{peaks:?}");
        let first = peaks.iter().find(|p| p.position == 50.0).unwrap();
        assert_eq!(first.full_width_at_half_max, 2.0);
        let mut report = Vec::new();
        fit.report(&mut report).unwrap();
        let report = String::from_utf8(report).unwrap();
        assert!(!report.contains("FWHM: -"), "{report}");
    }

    #[test]
    fn test_missing_configuration_never_reaches_engine() {
        let factory = two_peaks();
        let mut fit = Fit::new(Rc::new(factory.clone()), Some(spectrum(None)));
        assert_eq!(fit.fit_peaks(None, true).unwrap_err(), FitError::MissingRegion);
        assert_eq!(fit.fit_background(true).unwrap_err(), FitError::MissingRegion);
        assert_eq!(fit.fit_all().unwrap_err(), FitError::MissingRegion);
        assert_eq!(fit.init_engine().unwrap_err(), FitError::MissingRegion);

        fit.set_region(40.0, 80.0).unwrap();
        let err = fit.fit_peaks(None, true).unwrap_err();
        assert_eq!(err, FitError::MissingPeaks);
        assert_eq!(err.kind(), FitErrorKind::Configuration);

        let calls = factory.calls();
        assert!(calls.created.is_empty());
        assert_eq!(calls.fits(), 0);
    }

    #[test]
    fn test_missing_spectrum() {
        let factory = two_peaks();
        let mut fit = configured(&factory, None);
        fit.set_spectrum(None);
        assert_eq!(fit.fit_all().unwrap_err(), FitError::MissingSpectrum);
        assert!(factory.calls().created.is_empty());
    }

    #[test]
    fn test_engine_failure_is_fit_error() {
        let factory = StubFactory::failing(EngineError::Singular);
        let mut fit = configured(&factory, None);
        let err = fit.fit_all().unwrap_err();
        assert_eq!(err, FitError::Engine(EngineError::Singular));
        assert_eq!(err.kind(), FitErrorKind::Fit);
        assert!(!fit.is_fitted());
    }

    #[test]
    fn test_inconsistent_result() {
        let factory = StubFactory::new(vec![(50.0, 2.0, 1000.0)]);
        let mut fit = configured(&factory, None);
        assert_eq!(
            fit.fit_peaks(None, true).unwrap_err(),
            FitError::InconsistentResult {
                expected: 2,
                reported: 1
            }
        );

        let factory = StubFactory::new(vec![(50.0, 2.0, 1000.0), (70.0, f64::NAN, 1.0)]);
        let mut fit = configured(&factory, None);
        assert_eq!(
            fit.fit_peaks(None, true).unwrap_err(),
            FitError::NonFiniteResult { index: 1 }
        );
        assert!(fit.fitted_peaks().is_empty());
    }

    #[test]
    fn test_attach_detach_leaves_viewer_unchanged() {
        let viewer = RecordingViewer::shared();
        let other = Spectrum::new(Histogram::new("other", vec![1.0; 10])).into_shared();
        viewer.borrow_mut().add_spectrum(other, 1);
        let before = viewer.borrow().canvas.handles();

        let factory = two_peaks();
        let mut fit = configured(&factory, None);
        fit.attach(viewer.clone(), true);
        fit.fit_all().unwrap();
        fit.fit_all().unwrap();
        assert_eq!(viewer.borrow().canvas.len(), 3);
        assert!(fit.background_handle().is_some());
        assert!(fit.peak_handle().is_some());

        fit.detach(true);
        let after = viewer.borrow();
        assert_eq!(after.canvas.handles(), before);
        assert_eq!(after.adds - 1, after.removes);
        assert!(fit.viewer().is_none());
        assert_eq!(fit.peak_handle(), None);
    }

    #[test]
    fn test_detach_without_viewer_is_noop() {
        let factory = two_peaks();
        let mut fit = configured(&factory, None);
        fit.fit_all().unwrap();
        fit.detach(true);
        assert!(fit.is_fitted());
    }

    #[test]
    fn test_reattach_moves_curves() {
        let first = RecordingViewer::shared();
        let second = RecordingViewer::shared();
        let factory = two_peaks();
        let mut fit = configured(&factory, None);
        fit.attach(first.clone(), false);
        fit.fit_all().unwrap();
        assert_eq!(first.borrow().canvas.len(), 2);

        fit.attach(first.clone(), false);
        assert_eq!(first.borrow().canvas.len(), 2);

        fit.attach(second.clone(), false);
        assert!(first.borrow().canvas.is_empty());
        assert_eq!(second.borrow().canvas.len(), 2);
    }

    #[test]
    fn test_curves_carry_calibration() {
        let viewer = Canvas::new().into_shared();
        let factory = two_peaks();
        let cal = Calibration::linear(0.0, 2.0);
        let mut fit = configured(&factory, Some(cal.clone()));
        fit.attach(viewer.clone(), false);
        fit.fit_all().unwrap();
        let handle = fit.peak_handle().unwrap();
        assert_eq!(viewer.borrow().calibration_of(handle), Some(&cal));
        assert_eq!(viewer.borrow().color_of(handle), Some(PEAK_FUNC_COLOR));
        assert_eq!(
            viewer.borrow().color_of(fit.background_handle().unwrap()),
            Some(BACKGROUND_FUNC_COLOR)
        );
    }

    #[test]
    fn test_resync() {
        let factory = two_peaks();
        let mut fit = configured(&factory, None);
        assert_eq!(fit.resync().unwrap_err(), FitError::NoViewer);
        assert_eq!(FitError::NoViewer.kind(), FitErrorKind::Viewer);

        let viewer = Canvas::new().into_shared();
        fit.attach(viewer.clone(), false);
        fit.fit_all().unwrap();
        let cal = Calibration::linear(3.0, 1.5);
        fit.spectrum().unwrap().borrow_mut().set_calibration(Some(cal.clone()));
        let frames = viewer.borrow().frames();
        fit.resync().unwrap();
        let canvas = viewer.borrow();
        assert_eq!(canvas.calibration_of(fit.peak_handle().unwrap()), Some(&cal));
        assert_eq!(canvas.calibration_of(fit.background_handle().unwrap()), Some(&cal));
        assert_eq!(canvas.frames(), frames + 1);
    }

    #[test]
    fn test_drop_removes_curves() {
        let viewer = Canvas::new().into_shared();
        {
            let factory = two_peaks();
            let mut fit = configured(&factory, None);
            fit.attach(viewer.clone(), false);
            fit.fit_all().unwrap();
            assert_eq!(viewer.borrow().len(), 2);
        }
        assert!(viewer.borrow().is_empty());
    }

    #[test]
    fn test_report() {
        let factory = two_peaks();
        let mut fit = configured(&factory, Some(Calibration::linear(0.0, 2.0)));
        let mut buf = Vec::new();
        fit.report(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Region: 40.0000 - 80.0000"));
        assert!(text.contains("Not fitted (2 peaks set)"));

        fit.fit_all().unwrap();
        let mut buf = Vec::new();
        fit.report(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Spectrum: synthetic"));
        assert!(text.contains("Peaks: 2"));
        assert!(text.contains("Pos: 100.0000  Volume: 1000.0000  FWHM: 4.0000"));
        assert!(text.contains("Pos: 140.0000  Volume: 500.0000  FWHM: 6.0000"));
    }

    #[test_log::test]
    fn test_reference_engine_end_to_end() {
        let cal = Calibration::linear(2.0, 0.5);
        let spec = spectrum(Some(cal.clone()));
        let factory = Rc::new(EstimatorFactory::default());
        let mut fit = Fit::with_config(
            factory,
            spec,
            [
                FitSetting::Region(cal.ch2e(40.0), cal.ch2e(150.0)),
                FitSetting::Peaks(vec![cal.ch2e(60.0), cal.ch2e(120.0)]),
                FitSetting::Backgrounds(vec![(cal.ch2e(20.0), cal.ch2e(38.0)), (cal.ch2e(155.0), cal.ch2e(180.0))]),
            ],
        )
        .unwrap();
        let viewer = Canvas::new().into_shared();
        fit.attach(viewer.clone(), true);
        let peaks = fit.fit_all().unwrap();
        assert_eq!(peaks.len(), 2);
        for (peak, expected) in peaks.iter().zip(SYNTHETIC_PEAKS.iter()) {
            assert!((peak.position - cal.ch2e(expected.position)).abs() < 0.05);
        }
        let raw = fit.fitted_peaks();
        assert!((raw[1].position - SYNTHETIC_PEAKS[1].position).abs() < 0.05);
        assert_eq!(viewer.borrow().len(), 2);
        let plot = viewer.borrow().render(60, 12);
        assert!(plot.contains('*'));
    }
}
