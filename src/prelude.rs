pub use crate::engine::{Curve, EngineFactory, FitEngine, PeakSum};
pub use crate::plugins::HistogramContainer;
pub use crate::viewer::{DisplayCurve, Viewer};
