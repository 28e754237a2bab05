//! A deterministic reference implementation of [`FitEngine`].
//!
//! The background is a least squares polynomial over the background intervals. Each
//! peak hint owns the part of the fit region closer to it than to any other hint, and
//! its apex is searched for on the background subtracted signal within a radius of the
//! hint. Position, width and volume are then estimated the way a centroiding peak picker
//! would: a three point parabola through the apex, interpolated half maximum crossings
//! and the area of a Gaussian with that height and width.
use std::rc::Rc;

use crate::arrayops::argmax;
use crate::engine::{BackgroundFunction, Curve, EngineError, EngineFactory, FitEngine, PeakSum};
use crate::histogram::Histogram;
use crate::peak_statistics::{aboutzero, full_width_at_half_max, polynomial_regression, quadratic_fit, residual_sum_of_squares};

/// `sqrt(pi / (4 ln 2))`, the area of a unit height Gaussian per unit FWHM
const GAUSSIAN_AREA_PER_FWHM: f64 = 1.064_467_019_431_226_2;
/// `2 sqrt(2 ln 2)`
const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949_4;

pub const DEFAULT_BACKGROUND_DEGREE: usize = 1;
pub const DEFAULT_SEARCH_RADIUS: f64 = 5.0;

/// The number of channels averaged at either edge of the region when no background
/// is given
const EDGE_CHANNELS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorFactory {
    pub background_degree: usize,
    /// How far from a hint, in channels, the apex may lie
    pub search_radius: f64,
}

impl Default for EstimatorFactory {
    fn default() -> Self {
        Self {
            background_degree: DEFAULT_BACKGROUND_DEGREE,
            search_radius: DEFAULT_SEARCH_RADIUS,
        }
    }
}

impl EstimatorFactory {
    pub fn new(background_degree: usize, search_radius: f64) -> Self {
        Self {
            background_degree,
            search_radius,
        }
    }
}

impl EngineFactory for EstimatorFactory {
    fn create(&self, region: (f64, f64)) -> Box<dyn FitEngine> {
        Box::new(EstimatorEngine::new(
            region,
            self.background_degree,
            self.search_radius,
        ))
    }
}

#[derive(Debug, Clone)]
pub struct EstimatorEngine {
    region: (f64, f64),
    peaks: Vec<f64>,
    background_regions: Vec<(f64, f64)>,
    left_tail: Option<f64>,
    right_tail: Option<f64>,
    background_degree: usize,
    search_radius: f64,
}

impl EstimatorEngine {
    pub fn new(region: (f64, f64), background_degree: usize, search_radius: f64) -> Self {
        let region = if region.0 <= region.1 {
            region
        } else {
            (region.1, region.0)
        };
        log::debug!("Creating estimator engine over [{}, {}]", region.0, region.1);
        Self {
            region,
            peaks: Vec::new(),
            background_regions: Vec::new(),
            left_tail: None,
            right_tail: None,
            background_degree,
            search_radius,
        }
    }

    pub fn region(&self) -> (f64, f64) {
        self.region
    }

    pub fn peaks(&self) -> &[f64] {
        &self.peaks
    }

    pub fn background_regions(&self) -> &[(f64, f64)] {
        &self.background_regions
    }

    /// A straight line through the mean of the first and last few channels of the region
    fn edge_background(&self, histogram: &Histogram) -> Result<BackgroundFunction, EngineError> {
        let range = histogram.channel_range(self.region.0, self.region.1);
        if range.len() < 2 {
            return Err(EngineError::TooFewPoints {
                needed: 2,
                available: range.len(),
            });
        }
        let k = EDGE_CHANNELS.min(range.len() / 2).max(1);
        let mean = |chans: std::ops::Range<usize>| -> (f64, f64) {
            let n = chans.len() as f64;
            let x = chans.clone().map(|c| c as f64).sum::<f64>() / n;
            let y = histogram.sum(chans) / n;
            (x, y)
        };
        let (xl, yl) = mean(range.start..range.start + k);
        let (xr, yr) = mean(range.end - k..range.end);
        let slope = if xr > xl { (yr - yl) / (xr - xl) } else { 0.0 };
        log::debug!("Edge background: {yl} at {xl}, slope {slope}");
        Ok(BackgroundFunction::new(vec![yl, slope], xl, self.region))
    }
}

impl FitEngine for EstimatorEngine {
    fn add_peak(&mut self, position: f64) {
        self.peaks.push(position);
    }

    fn add_background_region(&mut self, lo: f64, hi: f64) {
        let pair = if lo <= hi { (lo, hi) } else { (hi, lo) };
        self.background_regions.push(pair);
    }

    fn set_left_tails(&mut self, value: f64) {
        self.left_tail = Some(value);
    }

    fn set_right_tails(&mut self, value: f64) {
        self.right_tail = Some(value);
    }

    fn fit_background(&mut self, histogram: &Histogram) -> Result<BackgroundFunction, EngineError> {
        if self.background_regions.is_empty() {
            return Err(EngineError::NoBackgroundRegions);
        }
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        let (mut lo, mut hi) = self.region;
        for (a, b) in self.background_regions.iter().copied() {
            lo = lo.min(a);
            hi = hi.max(b);
            for ch in histogram.channel_range(a, b) {
                xs.push(ch as f64);
                ys.push(histogram.counts[ch]);
            }
        }
        let needed = self.background_degree + 1;
        if xs.len() < needed {
            return Err(EngineError::TooFewPoints {
                needed,
                available: xs.len(),
            });
        }
        let center = xs.iter().sum::<f64>() / xs.len() as f64;
        let coefficients = polynomial_regression(&xs, &ys, self.background_degree, center)
            .ok_or(EngineError::Singular)?;
        log::debug!(
            "Background fit over {} points, residual sum of squares {:.4}",
            xs.len(),
            residual_sum_of_squares(&xs, &ys, &coefficients, center)
        );
        Ok(BackgroundFunction::new(coefficients, center, (lo, hi)))
    }

    fn fit_peaks(
        &mut self,
        histogram: &Histogram,
        background: Option<&BackgroundFunction>,
    ) -> Result<Rc<dyn PeakSum>, EngineError> {
        if self.peaks.is_empty() {
            return Err(EngineError::NoPeaks);
        }
        let range = histogram.channel_range(self.region.0, self.region.1);
        if range.len() < 3 {
            return Err(EngineError::RegionOutOfRange(self.region.0, self.region.1));
        }
        let background = match background {
            Some(bg) => bg.clone(),
            None if !self.background_regions.is_empty() => self.fit_background(histogram)?,
            None => self.edge_background(histogram)?,
        };

        let xs: Vec<f64> = range.clone().map(|c| c as f64).collect();
        let net: Vec<f64> = range
            .map(|c| histogram.counts[c] - background.eval(c as f64))
            .collect();
        let x0 = xs[0];
        let last = xs.len() - 1;
        let to_index = |x: f64, up: bool| -> usize {
            let i = if up { (x - x0).ceil() } else { (x - x0).floor() };
            i.clamp(0.0, last as f64) as usize
        };

        let mut order: Vec<usize> = (0..self.peaks.len()).collect();
        order.sort_by(|a, b| self.peaks[*a].total_cmp(&self.peaks[*b]));
        let mut partitions = vec![(xs[0], xs[last]); self.peaks.len()];
        for (k, i) in order.iter().copied().enumerate() {
            if k > 0 {
                partitions[i].0 = (self.peaks[order[k - 1]] + self.peaks[i]) / 2.0;
            }
            if k + 1 < order.len() {
                partitions[i].1 = (self.peaks[i] + self.peaks[order[k + 1]]) / 2.0;
            }
        }

        let mut components = Vec::with_capacity(self.peaks.len());
        for (hint, (part_lo, part_hi)) in self.peaks.iter().copied().zip(partitions) {
            let no_signal = EngineError::NoSignal { position: hint };
            let search_lo = part_lo.max(hint - self.search_radius);
            let search_hi = part_hi.min(hint + self.search_radius);
            if search_lo > search_hi || search_hi < x0 || search_lo > xs[last] {
                return Err(no_signal);
            }
            let (first, stop) = (to_index(search_lo, true), to_index(search_hi, false));
            if first > stop {
                return Err(no_signal);
            }
            let (offset, amplitude) = match argmax(&net[first..=stop]) {
                Some((i, v)) if v > 0.0 && !aboutzero(v) => (i, v),
                _ => return Err(no_signal),
            };
            let apex = first + offset;

            let (p_first, p_stop) = (to_index(part_lo, true), to_index(part_hi, false));
            let p_xs = &xs[p_first..=p_stop];
            let p_ys = &net[p_first..=p_stop];
            let position = quadratic_fit(p_xs, p_ys, apex - p_first);
            let width = full_width_at_half_max(p_xs, p_ys, apex - p_first);
            let fwhm = width.full_width_at_half_max;
            if fwhm <= 0.0 {
                return Err(no_signal);
            }
            log::trace!("Peak near {hint}: apex {position}, height {amplitude}, fwhm {fwhm}");
            components.push(GaussianComponent {
                position,
                amplitude,
                fwhm,
                volume: amplitude * fwhm * GAUSSIAN_AREA_PER_FWHM,
            });
        }

        Ok(Rc::new(GaussianSum {
            components,
            background,
            domain: self.region,
            left_tail: self.left_tail,
            right_tail: self.right_tail,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct GaussianComponent {
    position: f64,
    amplitude: f64,
    fwhm: f64,
    volume: f64,
}

impl GaussianComponent {
    fn eval(&self, x: f64) -> f64 {
        let sigma = self.fwhm / FWHM_PER_SIGMA;
        let z = (x - self.position) / sigma;
        self.amplitude * (-0.5 * z * z).exp()
    }
}

/// The fitted background plus one Gaussian per peak
#[derive(Debug, Clone)]
pub struct GaussianSum {
    components: Vec<GaussianComponent>,
    background: BackgroundFunction,
    domain: (f64, f64),
    left_tail: Option<f64>,
    right_tail: Option<f64>,
}

impl GaussianSum {
    pub fn background(&self) -> &BackgroundFunction {
        &self.background
    }
}

impl Curve for GaussianSum {
    fn eval(&self, x: f64) -> f64 {
        self.background.eval(x) + self.components.iter().map(|c| c.eval(x)).sum::<f64>()
    }

    fn domain(&self) -> (f64, f64) {
        self.domain
    }
}

impl PeakSum for GaussianSum {
    fn peak_count(&self) -> usize {
        self.components.len()
    }

    fn peak_position(&self, index: usize) -> f64 {
        self.components[index].position
    }

    fn peak_fwhm(&self, index: usize) -> f64 {
        self.components[index].fwhm
    }

    fn peak_volume(&self, index: usize) -> f64 {
        self.components[index].volume
    }

    fn peak_left_tail(&self, _index: usize) -> Option<f64> {
        self.left_tail
    }

    fn peak_right_tail(&self, _index: usize) -> Option<f64> {
        self.right_tail
    }

    fn as_curve(self: Rc<Self>) -> Rc<dyn Curve> {
        self
    }
}
