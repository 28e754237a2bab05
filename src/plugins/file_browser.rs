//! The `root` commands: browse a histogram container and load spectra from it.
use std::cell::RefCell;
use std::path;
use std::rc::Rc;

use clap::Parser;

use crate::cmdline::{
    expand_user, parse_options, tabformat, CommandError, CommandOptions, CommandResult, CommandShell,
};
use crate::histogram::{HistogramObject, Matrix};
use crate::plugins::container::{DirectoryContainer, HistogramContainer};
use crate::plugins::{FitManager, PluginContext};
use crate::spectrum::Spectrum;

#[derive(Debug, Parser)]
#[command(name = "root get", about = "Load 1D histograms from the open container as spectra")]
struct GetArgs {
    /// Replace all loaded spectra
    #[arg(short, long)]
    replace: bool,
    /// Apply calibrations from the calibration table
    #[arg(short = 'c', long)]
    load_cal: bool,
    /// Load spectra without showing them
    #[arg(short = 'v', long)]
    invisible: bool,
    /// Names of the histograms, glob patterns allowed
    #[arg(required = true)]
    pattern: Vec<String>,
}

/// The open container and matrix
#[derive(Default)]
pub struct FileBrowser {
    container: Option<Box<dyn HistogramContainer>>,
    matrix: Option<Matrix>,
}

impl FileBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a directory container, closing the current one first
    pub fn open<P: AsRef<path::Path>>(&mut self, path: P) -> std::io::Result<()> {
        self.close();
        self.container = Some(Box::new(DirectoryContainer::open(path)?));
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(container) = self.container.take() {
            log::debug!("Closing {}", container.location().display());
        }
    }

    pub fn container(&self) -> Result<&dyn HistogramContainer, CommandError> {
        self.container
            .as_deref()
            .ok_or_else(|| CommandError::Failed("no histogram container open".to_string()))
    }

    pub fn matrix(&self) -> Option<&Matrix> {
        self.matrix.as_ref()
    }

    /// Keys matching any of `patterns`, sorted
    pub fn matching<S: AsRef<str>>(&self, patterns: &[S]) -> Result<Vec<String>, CommandError> {
        let container = self.container()?;
        let patterns = patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p.as_ref())
                    .map_err(|err| CommandError::Failed(format!("Invalid pattern `{}`: {err}", p.as_ref())))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(container
            .keys()
            .into_iter()
            .filter(|key| patterns.is_empty() || patterns.iter().any(|p| p.matches(key)))
            .collect())
    }

    fn complete(&self, text: &str) -> Vec<String> {
        match &self.container {
            Some(container) => container
                .keys()
                .into_iter()
                .filter(|k| k.starts_with(text))
                .collect(),
            None => Vec::new(),
        }
    }
}

fn change_directory(browser: &mut FileBrowser, args: &[String]) -> CommandResult {
    let path = expand_user(&args[0]);
    browser
        .open(&path)
        .map_err(|err| CommandError::Failed(format!("failed to open file {}: {err}", path.display())))
}

fn list(browser: &FileBrowser, shell: &CommandShell, args: &[String]) -> CommandResult {
    let keys = browser.matching(args)?;
    shell.write_raw(&tabformat(&keys, tabformat::DEFAULT_WIDTH));
    Ok(())
}

fn long_list(browser: &FileBrowser, shell: &CommandShell, args: &[String]) -> CommandResult {
    let keys = browser.matching(args)?;
    let container = browser.container()?;
    let width = keys.iter().map(|k| k.len()).max().unwrap_or(0);
    for key in keys {
        match container.get(&key) {
            Ok(object) => shell.msg(format!("{key:<width$}  {}  {}", object.kind(), object.shape())),
            Err(err) => shell.warn(format!("{key}: {err}")),
        }
    }
    Ok(())
}

fn get(
    browser: &FileBrowser,
    fits: &RefCell<FitManager>,
    context: &PluginContext,
    shell: &CommandShell,
    args: &[String],
) -> CommandResult {
    let Some(options) = parse_options::<GetArgs>(shell, "root get", args)? else {
        return Ok(());
    };
    let keys = browser.matching(&options.pattern)?;
    let container = browser.container()?;

    let viewer = context.viewer();
    viewer.borrow_mut().lock_update();
    if options.replace {
        context.spectra.borrow_mut().remove_all();
        fits.borrow_mut().drop_orphaned(&context.spectra.borrow());
    }
    let mut loaded = 0;
    for key in keys {
        let histogram = match container.get(&key) {
            Ok(HistogramObject::Histogram(histogram)) => histogram,
            Ok(HistogramObject::Matrix(_)) => {
                shell.warn(format!("{key} is not a 1D histogram object"));
                continue;
            }
            Err(err) => {
                shell.warn(format!("{key}: {err}"));
                continue;
            }
        };
        let mut spectrum = Spectrum::new(histogram);
        if options.load_cal {
            match context.calibrations.borrow().get(&key) {
                Some(calibration) => spectrum = spectrum.with_calibration(calibration.clone()),
                None => shell.warn(format!("no calibration found for {key}")),
            }
        }
        let mut spectra = context.spectra.borrow_mut();
        let id = spectra.add(spectrum, !options.invisible);
        if !options.invisible {
            spectra.activate(id);
        }
        loaded += 1;
    }
    viewer.borrow_mut().unlock_update();
    log::info!("Loaded {loaded} spectra from {}", container.location().display());
    shell.msg(format!("{loaded} spectra loaded"));
    Ok(())
}

fn open_matrix(browser: &mut FileBrowser, shell: &CommandShell, args: &[String]) -> CommandResult {
    let name = &args[0];
    let object = browser.container()?.get(name)?;
    match object {
        HistogramObject::Matrix(matrix) => {
            shell.msg(format!(
                "Opened matrix {} ({}x{}, {} counts)",
                matrix.name,
                matrix.rows,
                matrix.columns,
                matrix.total()
            ));
            browser.matrix = Some(matrix);
            Ok(())
        }
        HistogramObject::Histogram(_) => Err(CommandError::Failed(format!("{name} is not a 2d histogram"))),
    }
}

/// Register the `root` commands, returning the browser state they share
pub fn register(
    shell: &CommandShell,
    context: &PluginContext,
    fits: Rc<RefCell<FitManager>>,
) -> Result<Rc<RefCell<FileBrowser>>, CommandError> {
    let browser = Rc::new(RefCell::new(FileBrowser::new()));

    let state = browser.clone();
    shell.add_command(
        "root cd",
        move |_, args| change_directory(&mut state.borrow_mut(), args),
        CommandOptions::new().nargs(1).dir_args(),
    )?;

    let state = browser.clone();
    shell.add_command(
        "root ls",
        move |shell, args| list(&state.borrow(), shell, args),
        CommandOptions::new().max_args(1),
    )?;

    let state = browser.clone();
    shell.add_command(
        "root ll",
        move |shell, args| long_list(&state.borrow(), shell, args),
        CommandOptions::new().max_args(1).level(2),
    )?;

    let state = browser.clone();
    let names = browser.clone();
    let context = context.clone();
    shell.add_command(
        "root get",
        move |shell, args| get(&state.borrow(), &fits, &context, shell, args),
        CommandOptions::new()
            .min_args(1)
            .completer(move |text, _| names.borrow().complete(text))
            .usage("root get [-r] [-c] [-v] <pattern>..."),
    )?;

    let state = browser.clone();
    let names = browser.clone();
    shell.add_command(
        "root matrix",
        move |shell, args| open_matrix(&mut state.borrow_mut(), shell, args),
        CommandOptions::new()
            .nargs(1)
            .completer(move |text, _| names.borrow().complete(text))
            .usage("root matrix <matname>"),
    )?;

    Ok(browser)
}
