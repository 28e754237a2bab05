//! The `fit` commands, working on a fit of the active spectrum.
//!
//! There is one current fit at a time. It follows the active spectrum: a command run
//! after another spectrum was activated starts a fresh fit. `fit keep` sets the current
//! fit aside so its curves stay on the viewer and it shows up in `fit list`.
use std::cell::RefCell;
use std::rc::Rc;

use clap::Parser;

use crate::cmdline::{parse_options, CommandError, CommandOptions, CommandResult, CommandShell};
use crate::engine::EngineFactory;
use crate::fit::Fit;
use crate::plugins::PluginContext;
use crate::spectrum::SpectrumCollection;
use crate::viewer::ViewerRef;

#[derive(Debug, Parser)]
#[command(name = "fit execute", about = "Fit the background and peaks of the current fit")]
struct ExecuteArgs {
    /// Only fit the background
    #[arg(short, long, conflicts_with = "peaks_only")]
    background_only: bool,
    /// Fit the peaks without fitting the background first
    #[arg(short, long)]
    peaks_only: bool,
}

pub struct FitManager {
    factory: Rc<dyn EngineFactory>,
    viewer: ViewerRef,
    current: Option<(usize, Fit)>,
    kept: Vec<(usize, Fit)>,
}

impl FitManager {
    pub fn new(factory: Rc<dyn EngineFactory>, viewer: ViewerRef) -> Self {
        Self {
            factory,
            viewer,
            current: None,
            kept: Vec::new(),
        }
    }

    pub fn current(&self) -> Option<&Fit> {
        self.current.as_ref().map(|(_, fit)| fit)
    }

    pub fn kept(&self) -> impl Iterator<Item = &Fit> {
        self.kept.iter().map(|(_, fit)| fit)
    }

    /// The current fit of the active spectrum, created on demand
    pub fn current_mut(&mut self, spectra: &SpectrumCollection) -> Result<&mut Fit, CommandError> {
        let id = spectra
            .active_id()
            .ok_or_else(|| CommandError::Failed("no active spectrum".to_string()))?;
        if self.current.as_ref().map(|(sid, _)| *sid) != Some(id) {
            let spectrum = spectra
                .get(id)
                .ok_or_else(|| CommandError::Failed("no active spectrum".to_string()))?;
            log::debug!("Starting a new fit on spectrum {id}");
            let mut fit = Fit::new(self.factory.clone(), Some(spectrum));
            fit.attach(self.viewer.clone(), false);
            self.current = Some((id, fit));
        }
        match &mut self.current {
            Some((_, fit)) => Ok(fit),
            None => Err(CommandError::Failed("no active spectrum".to_string())),
        }
    }

    /// Discard the current fit and its curves
    pub fn clear(&mut self) -> bool {
        self.current.take().is_some()
    }

    pub fn keep(&mut self) -> Result<usize, CommandError> {
        match self.current.take() {
            Some((id, fit)) if fit.is_fitted() => {
                self.kept.push((id, fit));
                Ok(self.kept.len())
            }
            other => {
                self.current = other;
                Err(CommandError::Failed("no fitted peaks to keep".to_string()))
            }
        }
    }

    /// Drop the current and kept fits of spectra no longer in `spectra`, with their curves.
    /// Returns how many fits were dropped.
    pub fn drop_orphaned(&mut self, spectra: &SpectrumCollection) -> usize {
        let before = self.kept.len() + usize::from(self.current.is_some());
        if matches!(&self.current, Some((id, _)) if spectra.get(*id).is_none()) {
            self.current = None;
        }
        self.kept.retain(|(id, _)| spectra.get(*id).is_some());
        let dropped = before - self.kept.len() - usize::from(self.current.is_some());
        if dropped > 0 {
            log::debug!("Dropped {dropped} fits of removed spectra");
        }
        dropped
    }

    /// Re-apply the calibration of spectrum `id` to the curves of all its fits
    pub fn resync_spectrum(&mut self, id: usize) -> CommandResult {
        for (sid, fit) in self.current.iter_mut().chain(self.kept.iter_mut()) {
            if *sid == id {
                fit.resync()?;
            }
        }
        Ok(())
    }
}

fn parse_number(text: &str) -> Result<f64, CommandError> {
    text.parse::<f64>()
        .map_err(|_| CommandError::Parse(format!("`{text}` is not a number")))
}

fn parse_numbers(args: &[String]) -> Result<Vec<f64>, CommandError> {
    args.iter().map(|a| parse_number(a)).collect()
}

pub(crate) fn report_string(fit: &Fit) -> Result<String, CommandError> {
    let mut buf = Vec::new();
    fit.report(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn execute(fit: &mut Fit, shell: &CommandShell, args: &[String]) -> CommandResult {
    let Some(options) = parse_options::<ExecuteArgs>(shell, "fit execute", args)? else {
        return Ok(());
    };
    if options.background_only {
        let background = fit.fit_background(true)?;
        let coefficients: Vec<String> = background.coefficients().iter().map(|c| format!("{c:.6}")).collect();
        shell.msg(format!("Background: {}", coefficients.join(" ")));
        return Ok(());
    }
    if options.peaks_only || fit.backgrounds().is_empty() {
        fit.fit_peaks(None, true)?;
    } else {
        fit.fit_all()?;
    }
    shell.write_raw(&report_string(fit)?);
    Ok(())
}

fn set_tail(fit: &mut Fit, args: &[String]) -> CommandResult {
    let value = match args[1].as_str() {
        "none" => None,
        text => Some(parse_number(text)?),
    };
    match args[0].as_str() {
        "left" => fit.set_left_tail(value)?,
        "right" => fit.set_right_tail(value)?,
        side => return Err(CommandError::Parse(format!("tail side must be left or right, not `{side}`"))),
    }
    Ok(())
}

fn set_backgrounds(fit: &mut Fit, args: &[String]) -> CommandResult {
    if args.len() % 2 != 0 {
        return Err(CommandError::Usage {
            command: "fit backgrounds".to_string(),
            message: "background regions need an even number of boundaries".to_string(),
        });
    }
    let bounds = parse_numbers(args)?;
    let regions: Vec<(f64, f64)> = bounds.chunks_exact(2).map(|c| (c[0], c[1])).collect();
    fit.set_backgrounds(&regions)?;
    Ok(())
}

fn list(manager: &FitManager, shell: &CommandShell) -> CommandResult {
    if manager.kept.is_empty() {
        shell.msg("No fits kept");
    }
    for (i, fit) in manager.kept().enumerate() {
        shell.msg(format!("Fit {}:", i + 1));
        shell.write_raw(&report_string(fit)?);
    }
    Ok(())
}

/// Register the `fit` commands, returning the fits they share
pub fn register(shell: &CommandShell, context: &PluginContext) -> Result<Rc<RefCell<FitManager>>, CommandError> {
    let manager = Rc::new(RefCell::new(FitManager::new(context.factory.clone(), context.viewer())));

    type FitCommand = fn(&mut Fit, &CommandShell, &[String]) -> CommandResult;
    let on_current: [(&str, CommandOptions, FitCommand); 6] = [
        ("fit execute", CommandOptions::new().level(1), execute),
        ("fit region", CommandOptions::new().nargs(2).usage("fit region <e1> <e2>"), |fit, _, args| {
            let bounds = parse_numbers(args)?;
            fit.set_region(bounds[0], bounds[1])?;
            Ok(())
        }),
        ("fit peaks", CommandOptions::new().min_args(1).usage("fit peaks <e>..."), |fit, _, args| {
            fit.set_peaks(&parse_numbers(args)?)?;
            Ok(())
        }),
        (
            "fit backgrounds",
            CommandOptions::new().min_args(2).usage("fit backgrounds <lo> <hi> [<lo> <hi>...]"),
            |fit, _, args| set_backgrounds(fit, args),
        ),
        (
            "fit tail",
            CommandOptions::new().nargs(2).usage("fit tail <left|right> <value|none>"),
            |fit, _, args| set_tail(fit, args),
        ),
        ("fit show", CommandOptions::new().nargs(0), |fit, shell, _| {
            shell.write_raw(&report_string(fit)?);
            Ok(())
        }),
    ];
    for (title, options, command) in on_current {
        let manager = manager.clone();
        let spectra = context.spectra.clone();
        let options = if options.level.is_none() { options.level(2) } else { options };
        shell.add_command(
            title,
            move |shell, args| {
                let spectra = spectra.borrow();
                let mut manager = manager.borrow_mut();
                let fit = manager.current_mut(&spectra)?;
                command(fit, shell, args)
            },
            options,
        )?;
    }

    let state = manager.clone();
    shell.add_command(
        "fit clear",
        move |_, _| {
            state.borrow_mut().clear();
            Ok(())
        },
        CommandOptions::new().nargs(0).level(2),
    )?;

    let state = manager.clone();
    shell.add_command(
        "fit keep",
        move |shell, _| {
            let n = state.borrow_mut().keep()?;
            shell.msg(format!("Kept as fit {n}"));
            Ok(())
        },
        CommandOptions::new().nargs(0).level(2),
    )?;

    let state = manager.clone();
    shell.add_command(
        "fit list",
        move |shell, _| list(&state.borrow(), shell),
        CommandOptions::new().nargs(0).level(2),
    )?;

    Ok(manager)
}
