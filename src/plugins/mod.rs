//! Command plugins for the shell.
//!
//! Each plugin registers its commands on a [`CommandShell`] and receives the
//! collaborators it works on through a [`PluginContext`].
use std::cell::RefCell;
use std::rc::Rc;

use crate::calibration::CalibrationTable;
use crate::cmdline::{CommandError, CommandShell};
use crate::engine::EngineFactory;
use crate::spectrum::SpectrumCollection;
use crate::viewer::{Canvas, ViewerRef};

pub mod container;
pub mod file_browser;
pub mod fitting;
pub mod run;
pub mod spectra;

pub use container::{DirectoryContainer, HistogramContainer};
pub use file_browser::FileBrowser;
pub use fitting::FitManager;

/// The shared state plugin commands operate on
#[derive(Clone)]
pub struct PluginContext {
    pub spectra: Rc<RefCell<SpectrumCollection>>,
    pub canvas: Rc<RefCell<Canvas>>,
    pub calibrations: Rc<RefCell<CalibrationTable>>,
    pub factory: Rc<dyn EngineFactory>,
}

impl PluginContext {
    /// A context with an empty spectrum collection shown on `canvas`
    pub fn new(canvas: Rc<RefCell<Canvas>>, calibrations: CalibrationTable, factory: Rc<dyn EngineFactory>) -> Self {
        let viewer: ViewerRef = canvas.clone();
        Self {
            spectra: Rc::new(RefCell::new(SpectrumCollection::with_viewer(viewer))),
            canvas,
            calibrations: Rc::new(RefCell::new(calibrations)),
            factory,
        }
    }

    pub fn viewer(&self) -> ViewerRef {
        self.canvas.clone()
    }
}

/// State kept by the registered plugins
pub struct Plugins {
    pub browser: Rc<RefCell<FileBrowser>>,
    pub fits: Rc<RefCell<FitManager>>,
}

pub fn register_all(shell: &CommandShell, context: &PluginContext) -> Result<Plugins, CommandError> {
    let fits = fitting::register(shell, context)?;
    let browser = file_browser::register(shell, context, fits.clone())?;
    run::register(shell)?;
    spectra::register(shell, context, fits.clone())?;
    Ok(Plugins { browser, fits })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::cmdline::testing::SharedBuffer;
    use crate::estimator::EstimatorFactory;

    /// A shell with every plugin registered, writing to a buffer
    pub fn plugin_shell(calibrations: CalibrationTable) -> (CommandShell, SharedBuffer, PluginContext, Plugins) {
        let buf = SharedBuffer::new();
        let shell = CommandShell::new(Box::new(buf.clone()));
        let context = PluginContext::new(
            Canvas::new().into_shared(),
            calibrations,
            Rc::new(EstimatorFactory::default()),
        );
        shell.set_viewer(Some(context.viewer()));
        let plugins = register_all(&shell, &context).unwrap();
        (shell, buf, context, plugins)
    }
}
