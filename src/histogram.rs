//! Channel histograms as read from spectrum files.
//!
//! Channel `i` of a [`Histogram`] is centred on the raw coordinate `i`, so a raw
//! position maps to the channel it rounds to.
use std::fmt;
use std::ops::Range;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::{argmax, minmax};

/// A named one dimensional histogram of counts per channel
#[derive(Default, Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Histogram {
    pub name: String,
    pub title: String,
    pub counts: Vec<f64>,
}

impl Histogram {
    pub fn new(name: impl Into<String>, counts: Vec<f64>) -> Self {
        let name = name.into();
        Self {
            title: name.clone(),
            name,
            counts,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn count(&self, channel: usize) -> Option<f64> {
        self.counts.get(channel).copied()
    }

    /// The channel a raw coordinate falls into, if it lies within the histogram
    pub fn channel_of(&self, x: f64) -> Option<usize> {
        let ch = x.round();
        if ch < 0.0 || !ch.is_finite() || ch as usize >= self.len() {
            None
        } else {
            Some(ch as usize)
        }
    }

    /// The channels covering the raw interval between `a` and `b`, clamped to the
    /// histogram. The bounds may be given in either order.
    pub fn channel_range(&self, a: f64, b: f64) -> Range<usize> {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        if self.is_empty() || hi < -0.5 || lo > self.len() as f64 - 0.5 {
            return 0..0;
        }
        let start = lo.round().max(0.0) as usize;
        let stop = (hi.round().max(0.0) as usize + 1).min(self.len());
        start..stop
    }

    pub fn sum(&self, range: Range<usize>) -> f64 {
        self.counts[clamp(range, self.len())].iter().sum()
    }

    /// The channel holding the most counts in `range`
    pub fn max_in(&self, range: Range<usize>) -> Option<(usize, f64)> {
        let range = clamp(range, self.len());
        let start = range.start;
        argmax(&self.counts[range]).map(|(i, v)| (i + start, v))
    }

    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }

    pub fn minmax(&self) -> (f64, f64) {
        minmax(&self.counts)
    }
}

fn clamp(range: Range<usize>, len: usize) -> Range<usize> {
    let end = range.end.min(len);
    range.start.min(end)..end
}

/// A named two dimensional histogram, stored row-major
#[derive(Default, Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Matrix {
    pub name: String,
    pub title: String,
    pub rows: usize,
    pub columns: usize,
    pub counts: Vec<f64>,
}

impl Matrix {
    /// Build a matrix from its rows. Returns `None` when the rows differ in length.
    pub fn from_rows(name: impl Into<String>, rows: Vec<Vec<f64>>) -> Option<Self> {
        let columns = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.iter().any(|r| r.len() != columns) {
            return None;
        }
        let name = name.into();
        Some(Self {
            title: name.clone(),
            name,
            rows: rows.len(),
            columns,
            counts: rows.into_iter().flatten().collect(),
        })
    }

    pub fn get(&self, row: usize, column: usize) -> Option<f64> {
        if row >= self.rows || column >= self.columns {
            None
        } else {
            Some(self.counts[row * self.columns + column])
        }
    }

    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// Sum over rows, giving one count per column
    pub fn project_columns(&self) -> Histogram {
        let mut counts = vec![0.0; self.columns];
        for row in self.counts.chunks(self.columns.max(1)) {
            for (acc, v) in counts.iter_mut().zip(row) {
                *acc += v;
            }
        }
        Histogram::new(format!("{}_px", self.name), counts)
    }

    /// Sum over columns, giving one count per row
    pub fn project_rows(&self) -> Histogram {
        let counts: Vec<f64> = self
            .counts
            .chunks(self.columns.max(1))
            .map(|row| row.iter().sum::<f64>())
            .take(self.rows)
            .collect();
        Histogram::new(format!("{}_py", self.name), counts)
    }
}

/// The dimensionality of a stored histogram object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Histogram1D,
    Histogram2D,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ObjectKind::Histogram1D => f.write_str("1D"),
            ObjectKind::Histogram2D => f.write_str("2D"),
        }
    }
}

/// A histogram object of either dimensionality, as read from a file
#[derive(Debug, Clone, PartialEq)]
pub enum HistogramObject {
    Histogram(Histogram),
    Matrix(Matrix),
}

impl HistogramObject {
    pub fn name(&self) -> &str {
        match self {
            HistogramObject::Histogram(h) => &h.name,
            HistogramObject::Matrix(m) => &m.name,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            HistogramObject::Histogram(_) => ObjectKind::Histogram1D,
            HistogramObject::Matrix(_) => ObjectKind::Histogram2D,
        }
    }

    /// A short description of the object's extent, e.g. `4096` or `512x512`
    pub fn shape(&self) -> String {
        match self {
            HistogramObject::Histogram(h) => h.len().to_string(),
            HistogramObject::Matrix(m) => format!("{}x{}", m.rows, m.columns),
        }
    }
}
