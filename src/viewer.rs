//! Display surfaces for spectra and fit curves.
//!
//! A [`Viewer`] keeps a display list addressed by [`CurveHandle`]s. Items are placed on
//! it in raw units together with the calibration used to show them, so that a change
//! of calibration only has to update the display item. [`Canvas`] is the in-process
//! viewer, which renders its display list as a character plot.
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::calibration::Calibration;
use crate::engine::Curve;
use crate::spectrum::SpectrumRef;

/// Style id of a fitted peak function
pub const PEAK_FUNC_COLOR: u32 = 10;
/// Style id of a fitted background function
pub const BACKGROUND_FUNC_COLOR: u32 = 25;

/// An opaque reference to an item placed on a [`Viewer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CurveHandle(u64);

impl CurveHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CurveHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The viewer side of a displayed item
pub trait DisplayCurve {
    fn set_calibration(&mut self, calibration: Option<Calibration>);
    fn calibration(&self) -> Option<&Calibration>;
}

pub trait Viewer {
    /// Place a curve on the viewer. When `auto_visible` is set the visible range is
    /// widened to include the curve's domain.
    fn add_curve(&mut self, curve: Rc<dyn Curve>, color: u32, auto_visible: bool) -> CurveHandle;

    fn add_spectrum(&mut self, spectrum: SpectrumRef, color: u32) -> CurveHandle;

    fn display_curve(&mut self, handle: CurveHandle) -> Option<&mut dyn DisplayCurve>;

    /// Remove an item, returning whether it was present
    fn remove_curve(&mut self, handle: CurveHandle) -> bool;

    fn redraw(&mut self, force: bool);

    /// Suspend redraws until the matching [`Viewer::unlock_update`]. Locks nest.
    fn lock_update(&mut self);

    fn unlock_update(&mut self);
}

pub type ViewerRef = Rc<RefCell<dyn Viewer>>;

#[derive(Debug, Clone)]
enum CanvasItem {
    Curve {
        curve: Rc<dyn Curve>,
        auto_visible: bool,
    },
    Spectrum(SpectrumRef),
}

#[derive(Debug, Clone)]
struct CanvasEntry {
    item: CanvasItem,
    color: u32,
    calibration: Option<Calibration>,
}

impl CanvasEntry {
    fn to_calibrated(&self, x: f64) -> f64 {
        self.calibration.as_ref().map_or(x, |c| c.ch2e(x))
    }

    fn to_raw(&self, e: f64) -> Option<f64> {
        match &self.calibration {
            Some(c) => c.e2ch(e).ok(),
            None => Some(e),
        }
    }

    /// The calibrated interval this entry covers, and whether it should widen the view
    fn extent(&self) -> Option<(f64, f64, bool)> {
        let (lo, hi, widen) = match &self.item {
            CanvasItem::Spectrum(spectrum) => {
                let len = spectrum.borrow().histogram().len();
                if len == 0 {
                    return None;
                }
                (0.0, (len - 1) as f64, true)
            }
            CanvasItem::Curve {
                curve,
                auto_visible,
            } => {
                let (lo, hi) = curve.domain();
                (lo, hi, *auto_visible)
            }
        };
        let (a, b) = (self.to_calibrated(lo), self.to_calibrated(hi));
        Some((a.min(b), a.max(b), widen))
    }

    fn glyph(&self) -> char {
        match (&self.item, self.color) {
            (CanvasItem::Spectrum(_), _) => '.',
            (_, BACKGROUND_FUNC_COLOR) => '-',
            (_, PEAK_FUNC_COLOR) => '*',
            _ => '+',
        }
    }

    /// The value shown at calibrated position `e`, if the entry covers it
    fn value_at(&self, e: f64) -> Option<f64> {
        let x = self.to_raw(e)?;
        match &self.item {
            CanvasItem::Spectrum(spectrum) => {
                let spectrum = spectrum.borrow();
                let hist = spectrum.histogram();
                hist.channel_of(x).and_then(|ch| hist.count(ch))
            }
            CanvasItem::Curve { curve, .. } => {
                let (lo, hi) = curve.domain();
                if x >= lo.min(hi) && x <= hi.max(lo) {
                    Some(curve.eval(x))
                } else {
                    None
                }
            }
        }
    }
}

impl DisplayCurve for CanvasEntry {
    fn set_calibration(&mut self, calibration: Option<Calibration>) {
        self.calibration = calibration;
    }

    fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }
}

/// An in-memory viewer that keeps its display list and renders it on demand
#[derive(Debug, Default)]
pub struct Canvas {
    entries: BTreeMap<CurveHandle, CanvasEntry>,
    next_id: u64,
    lock_depth: usize,
    pending_redraw: bool,
    dirty: bool,
    frames: usize,
}

impl Canvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> Rc<RefCell<Canvas>> {
        Rc::new(RefCell::new(self))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, handle: CurveHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    pub fn handles(&self) -> Vec<CurveHandle> {
        self.entries.keys().copied().collect()
    }

    pub fn color_of(&self, handle: CurveHandle) -> Option<u32> {
        self.entries.get(&handle).map(|e| e.color)
    }

    pub fn calibration_of(&self, handle: CurveHandle) -> Option<&Calibration> {
        self.entries.get(&handle).and_then(|e| e.calibration.as_ref())
    }

    /// The number of redraws performed so far
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn is_locked(&self) -> bool {
        self.lock_depth > 0
    }

    fn insert(&mut self, item: CanvasItem, color: u32, calibration: Option<Calibration>) -> CurveHandle {
        let handle = CurveHandle::new(self.next_id);
        self.next_id += 1;
        self.entries.insert(
            handle,
            CanvasEntry {
                item,
                color,
                calibration,
            },
        );
        self.dirty = true;
        log::debug!("Canvas: added {handle} with color {color}");
        handle
    }

    fn x_range(&self) -> Option<(f64, f64)> {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for (a, b, widen) in self.entries.values().filter_map(|e| e.extent()) {
            if widen {
                lo = lo.min(a);
                hi = hi.max(b);
            }
        }
        if !(lo.is_finite() && hi.is_finite()) {
            // Nothing asks to widen the view, fall back to every curve
            for (a, b, _) in self.entries.values().filter_map(|e| e.extent()) {
                lo = lo.min(a);
                hi = hi.max(b);
            }
        }
        if lo.is_finite() && hi.is_finite() && hi > lo {
            Some((lo, hi))
        } else {
            None
        }
    }

    /// Render the display list as a `width` by `height` character plot in calibrated
    /// units, preceded by a line giving the plotted ranges. Spectra are drawn with `.`,
    /// background functions with `-`, peak functions with `*` and other curves with `+`.
    pub fn render(&self, width: usize, height: usize) -> String {
        let width = width.max(10);
        let height = height.max(5);
        let (x_min, x_max) = match self.x_range() {
            Some(range) => range,
            None => return String::from("(empty)\n"),
        };

        let columns: Vec<f64> = (0..width)
            .map(|i| x_min + (x_max - x_min) * i as f64 / (width - 1) as f64)
            .collect();
        let traces: Vec<(char, Vec<Option<f64>>)> = self
            .entries
            .values()
            .map(|entry| (entry.glyph(), columns.iter().map(|e| entry.value_at(*e)).collect()))
            .collect();

        let mut y_min = 0.0f64;
        let mut y_max = f64::NEG_INFINITY;
        for v in traces.iter().flat_map(|(_, t)| t.iter().flatten()) {
            if v.is_finite() {
                y_min = y_min.min(*v);
                y_max = y_max.max(*v);
            }
        }
        if !(y_max > y_min) {
            y_max = y_min + 1.0;
        }
        let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

        let mut grid = vec![vec![' '; width]; height];
        // Spectra first so that fit curves overlay them
        let mut ordered: Vec<&(char, Vec<Option<f64>>)> = traces.iter().collect();
        ordered.sort_by_key(|(glyph, _)| *glyph != '.');
        for (glyph, trace) in ordered {
            let mut prev: Option<(usize, usize)> = None;
            for (x, v) in trace.iter().enumerate() {
                match v.filter(|v| v.is_finite()) {
                    Some(v) => {
                        let y = map_y(v, y_min, y_max, height);
                        match prev {
                            Some((x0, y0)) if *glyph != '.' => draw_line(&mut grid, x0, y0, x, y, *glyph),
                            _ => grid[y][x] = *glyph,
                        }
                        prev = Some((x, y));
                    }
                    None => prev = None,
                }
            }
        }

        let mut out = String::new();
        out.push_str(&format!(
            "Plot: x=[{x_min:.3}, {x_max:.3}] | y=[{y_min:.2}, {y_max:.2}]\n"
        ));
        for row in grid {
            out.push_str(&row.into_iter().collect::<String>());
            out.push('\n');
        }
        out
    }
}

impl Viewer for Canvas {
    fn add_curve(&mut self, curve: Rc<dyn Curve>, color: u32, auto_visible: bool) -> CurveHandle {
        self.insert(
            CanvasItem::Curve {
                curve,
                auto_visible,
            },
            color,
            None,
        )
    }

    fn add_spectrum(&mut self, spectrum: SpectrumRef, color: u32) -> CurveHandle {
        let calibration = spectrum.borrow().calibration().cloned();
        self.insert(CanvasItem::Spectrum(spectrum), color, calibration)
    }

    fn display_curve(&mut self, handle: CurveHandle) -> Option<&mut dyn DisplayCurve> {
        match self.entries.get_mut(&handle) {
            Some(entry) => {
                self.dirty = true;
                Some(entry)
            }
            None => None,
        }
    }

    fn remove_curve(&mut self, handle: CurveHandle) -> bool {
        let removed = self.entries.remove(&handle).is_some();
        if removed {
            self.dirty = true;
            log::debug!("Canvas: removed {handle}");
        }
        removed
    }

    fn redraw(&mut self, force: bool) {
        if self.is_locked() {
            self.pending_redraw = true;
            return;
        }
        if force || self.dirty {
            self.frames += 1;
            self.dirty = false;
            log::trace!("Canvas: frame {} with {} items", self.frames, self.entries.len());
        }
    }

    fn lock_update(&mut self) {
        self.lock_depth += 1;
    }

    fn unlock_update(&mut self) {
        self.lock_depth = self.lock_depth.saturating_sub(1);
        if self.lock_depth == 0 && self.pending_redraw {
            self.pending_redraw = false;
            self.redraw(true);
        }
    }
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let span = (max - min).abs();
    let pad = (span * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let u = ((y - y_min) / (y_max - y_min)).clamp(0.0, 1.0);
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let mut x0 = x0 as isize;
    let mut y0 = y0 as isize;
    let x1 = x1 as isize;
    let y1 = y1 as isize;

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if y0 >= 0 && (y0 as usize) < grid.len() && x0 >= 0 && (x0 as usize) < grid[0].len() {
            grid[y0 as usize][x0 as usize] = ch;
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::BackgroundFunction;
    use crate::histogram::Histogram;
    use crate::spectrum::Spectrum;

    fn flat_spectrum() -> SpectrumRef {
        Spectrum::new(Histogram::new("flat", vec![4.0; 50])).into_shared()
    }

    #[test]
    fn test_display_list() {
        let mut canvas = Canvas::new();
        let bg = Rc::new(BackgroundFunction::constant(2.0, (10.0, 20.0)));
        let h1 = canvas.add_spectrum(flat_spectrum(), 3);
        let h2 = canvas.add_curve(bg, BACKGROUND_FUNC_COLOR, true);
        assert_ne!(h1, h2);
        assert_eq!(canvas.len(), 2);
        assert_eq!(canvas.color_of(h2), Some(BACKGROUND_FUNC_COLOR));

        canvas
            .display_curve(h2)
            .unwrap()
            .set_calibration(Some(Calibration::linear(0.0, 2.0)));
        assert_eq!(canvas.calibration_of(h2), Some(&Calibration::linear(0.0, 2.0)));

        assert!(canvas.remove_curve(h2));
        assert!(!canvas.remove_curve(h2));
        assert!(canvas.display_curve(h2).is_none());
        assert_eq!(canvas.handles(), vec![h1]);
    }

    #[test]
    fn test_nested_locks_defer_redraw() {
        let mut canvas = Canvas::new();
        canvas.lock_update();
        canvas.lock_update();
        canvas.add_spectrum(flat_spectrum(), 1);
        canvas.redraw(false);
        canvas.redraw(true);
        assert_eq!(canvas.frames(), 0);
        canvas.unlock_update();
        assert_eq!(canvas.frames(), 0);
        canvas.unlock_update();
        assert_eq!(canvas.frames(), 1);
        assert!(!canvas.is_locked());

        canvas.redraw(false);
        assert_eq!(canvas.frames(), 1);
        canvas.redraw(true);
        assert_eq!(canvas.frames(), 2);
    }

    #[test]
    fn test_render() {
        let mut canvas = Canvas::new();
        assert_eq!(canvas.render(40, 10), "(empty)\n");

        canvas.add_spectrum(flat_spectrum(), 1);
        let peak = Rc::new(BackgroundFunction::new(vec![10.0, 0.0, -0.5], 25.0, (20.0, 30.0)));
        canvas.add_curve(peak, PEAK_FUNC_COLOR, false);
        let plot = canvas.render(40, 10);
        let lines: Vec<&str> = plot.lines().collect();
        assert_eq!(lines.len(), 11);
        assert!(lines[0].starts_with("Plot: x=[0.000, 49.000]"));
        assert!(lines[1..].iter().all(|l| l.chars().count() == 40));
        let body = lines[1..].concat();
        assert!(body.contains('.'));
        assert!(body.contains('*'));
        assert!(!body.contains('-'));
    }
}
