//! Spectra and the collection of loaded spectra.
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::calibration::{Calibration, CalibrationError};
use crate::histogram::Histogram;
use crate::viewer::{CurveHandle, ViewerRef};

/// A spectrum shared between the collection, fits and the viewer
pub type SpectrumRef = Rc<RefCell<Spectrum>>;

/// Display colors handed out to spectra in order of their ids
const PALETTE: [u32; 8] = [2, 3, 4, 6, 7, 8, 9, 28];

pub fn color_for_id(id: usize) -> u32 {
    PALETTE[id % PALETTE.len()]
}

/// A histogram together with the calibration of its axis
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    histogram: Histogram,
    calibration: Option<Calibration>,
    color: u32,
}

impl Spectrum {
    pub fn new(histogram: Histogram) -> Self {
        Self {
            histogram,
            calibration: None,
            color: PALETTE[0],
        }
    }

    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = Some(calibration);
        self
    }

    pub fn into_shared(self) -> SpectrumRef {
        Rc::new(RefCell::new(self))
    }

    pub fn name(&self) -> &str {
        &self.histogram.name
    }

    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    pub fn set_calibration(&mut self, calibration: Option<Calibration>) {
        self.calibration = calibration;
    }

    pub fn color(&self) -> u32 {
        self.color
    }

    pub fn set_color(&mut self, color: u32) {
        self.color = color;
    }

    /// Convert a calibrated value to raw channels. Uncalibrated spectra use the identity.
    pub fn to_raw(&self, e: f64) -> Result<f64, CalibrationError> {
        match &self.calibration {
            Some(cal) => cal.e2ch(e),
            None => Ok(e),
        }
    }

    pub fn to_calibrated(&self, ch: f64) -> f64 {
        match &self.calibration {
            Some(cal) => cal.ch2e(ch),
            None => ch,
        }
    }
}

impl fmt::Display for Spectrum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({} channels", self.name(), self.histogram.len())?;
        if let Some(cal) = &self.calibration {
            write!(f, ", cal {}", cal)?;
        }
        f.write_str(")")
    }
}

struct CollectionEntry {
    spectrum: SpectrumRef,
    handle: Option<CurveHandle>,
}

/// Loaded spectra keyed by id.
///
/// A spectrum is visible when it has been placed on the attached viewer. Without a
/// viewer the visibility flag is kept so spectra show up once one is attached.
#[derive(Default)]
pub struct SpectrumCollection {
    entries: BTreeMap<usize, CollectionEntry>,
    visible: BTreeMap<usize, bool>,
    next_id: usize,
    active: Option<usize>,
    viewer: Option<ViewerRef>,
}

impl SpectrumCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_viewer(viewer: ViewerRef) -> Self {
        let mut this = Self::new();
        this.set_viewer(Some(viewer));
        this
    }

    pub fn viewer(&self) -> Option<&ViewerRef> {
        self.viewer.as_ref()
    }

    /// Attach a viewer, moving every visible spectrum from the old viewer to the new one
    pub fn set_viewer(&mut self, viewer: Option<ViewerRef>) {
        let ids: Vec<usize> = self.entries.keys().copied().collect();
        for id in ids.iter().copied() {
            self.undisplay(id);
        }
        self.viewer = viewer;
        for id in ids {
            if self.is_visible(id) {
                self.display(id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<usize> {
        self.entries.keys().copied().collect()
    }

    /// Add a spectrum, giving it the next id and the color for that id. Returns the id.
    pub fn add(&mut self, mut spectrum: Spectrum, visible: bool) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        spectrum.set_color(color_for_id(id));
        log::debug!("Adding spectrum {id}: {spectrum}");
        self.entries.insert(
            id,
            CollectionEntry {
                spectrum: spectrum.into_shared(),
                handle: None,
            },
        );
        self.visible.insert(id, visible);
        if visible {
            self.display(id);
        }
        if self.active.is_none() {
            self.active = Some(id);
        }
        id
    }

    pub fn get(&self, id: usize) -> Option<SpectrumRef> {
        self.entries.get(&id).map(|e| e.spectrum.clone())
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .find(|(_, e)| e.spectrum.borrow().name() == name)
            .map(|(id, _)| *id)
    }

    pub fn active_id(&self) -> Option<usize> {
        self.active
    }

    pub fn active(&self) -> Option<SpectrumRef> {
        self.active.and_then(|id| self.get(id))
    }

    /// Make a spectrum the active one, showing it if it was hidden
    pub fn activate(&mut self, id: usize) -> bool {
        if !self.entries.contains_key(&id) {
            return false;
        }
        self.active = Some(id);
        self.show(id)
    }

    pub fn show(&mut self, id: usize) -> bool {
        match self.visible.get_mut(&id) {
            Some(flag) => {
                *flag = true;
                self.display(id);
                true
            }
            None => false,
        }
    }

    pub fn hide(&mut self, id: usize) -> bool {
        match self.visible.get_mut(&id) {
            Some(flag) => {
                *flag = false;
                self.undisplay(id);
                true
            }
            None => false,
        }
    }

    pub fn is_visible(&self, id: usize) -> bool {
        self.visible.get(&id).copied().unwrap_or(false)
    }

    pub fn remove(&mut self, id: usize) -> Option<SpectrumRef> {
        self.undisplay(id);
        self.visible.remove(&id);
        let entry = self.entries.remove(&id)?;
        if self.active == Some(id) {
            self.active = self.entries.keys().next().copied();
        }
        Some(entry.spectrum)
    }

    pub fn remove_all(&mut self) {
        for id in self.ids() {
            self.remove(id);
        }
        self.active = None;
    }

    /// Change the calibration of a spectrum and of its displayed item
    pub fn recalibrate(&mut self, id: usize, calibration: Option<Calibration>) -> bool {
        let entry = match self.entries.get(&id) {
            Some(entry) => entry,
            None => return false,
        };
        entry.spectrum.borrow_mut().set_calibration(calibration.clone());
        if let (Some(viewer), Some(handle)) = (&self.viewer, entry.handle) {
            let mut viewer = viewer.borrow_mut();
            if let Some(curve) = viewer.display_curve(handle) {
                curve.set_calibration(calibration);
            }
            viewer.redraw(false);
        }
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, SpectrumRef, bool)> + '_ {
        self.entries
            .iter()
            .map(|(id, e)| (*id, e.spectrum.clone(), self.is_visible(*id)))
    }

    fn display(&mut self, id: usize) {
        let viewer = match &self.viewer {
            Some(viewer) => viewer.clone(),
            None => return,
        };
        if let Some(entry) = self.entries.get_mut(&id) {
            if entry.handle.is_some() {
                return;
            }
            let color = entry.spectrum.borrow().color();
            let mut viewer = viewer.borrow_mut();
            entry.handle = Some(viewer.add_spectrum(entry.spectrum.clone(), color));
            viewer.redraw(false);
        }
    }

    fn undisplay(&mut self, id: usize) {
        let viewer = match &self.viewer {
            Some(viewer) => viewer.clone(),
            None => return,
        };
        if let Some(handle) = self.entries.get_mut(&id).and_then(|e| e.handle.take()) {
            let mut viewer = viewer.borrow_mut();
            viewer.remove_curve(handle);
            viewer.redraw(false);
        }
    }
}
