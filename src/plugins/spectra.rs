//! Commands for the loaded spectra, their calibration and the view.
use std::cell::RefCell;
use std::rc::Rc;

use crate::calibration::Calibration;
use crate::cmdline::{CommandError, CommandOptions, CommandResult, CommandShell};
use crate::plugins::{FitManager, PluginContext};

const VIEW_WIDTH: usize = 72;
const VIEW_HEIGHT: usize = 20;

fn parse_id(text: &str) -> Result<usize, CommandError> {
    text.parse::<usize>()
        .map_err(|_| CommandError::Parse(format!("`{text}` is not a spectrum id")))
}

fn no_such_spectrum(id: usize) -> CommandError {
    CommandError::Failed(format!("no spectrum with id {id}"))
}

fn list(context: &PluginContext, shell: &CommandShell) -> CommandResult {
    let spectra = context.spectra.borrow();
    if spectra.is_empty() {
        shell.msg("No spectra loaded");
        return Ok(());
    }
    let active = spectra.active_id();
    for (id, spectrum, visible) in spectra.iter() {
        shell.msg(format!(
            "{}{:>3}  {}{}",
            if active == Some(id) { "*" } else { " " },
            id,
            spectrum.borrow(),
            if visible { "" } else { "  (hidden)" }
        ));
    }
    Ok(())
}

fn set_calibration(context: &PluginContext, fits: &RefCell<FitManager>, shell: &CommandShell, args: &[String]) -> CommandResult {
    let coefficients = args
        .iter()
        .map(|a| {
            a.parse::<f64>()
                .map_err(|_| CommandError::Parse(format!("`{a}` is not a number")))
        })
        .collect::<Result<Vec<f64>, _>>()?;
    let calibration = Calibration::new(coefficients)?;
    let id = context
        .spectra
        .borrow()
        .active_id()
        .ok_or_else(|| CommandError::Failed("no active spectrum".to_string()))?;
    context.spectra.borrow_mut().recalibrate(id, Some(calibration.clone()));
    fits.borrow_mut().resync_spectrum(id)?;
    shell.msg(format!("Calibrated spectrum {id}: {calibration}"));
    Ok(())
}

fn show_calibration(context: &PluginContext, shell: &CommandShell) -> CommandResult {
    let spectrum = context
        .spectra
        .borrow()
        .active()
        .ok_or_else(|| CommandError::Failed("no active spectrum".to_string()))?;
    let spectrum = spectrum.borrow();
    match spectrum.calibration() {
        Some(calibration) => shell.msg(format!("{}: {calibration}", spectrum.name())),
        None => shell.msg(format!("{}: uncalibrated", spectrum.name())),
    }
    Ok(())
}

fn view(context: &PluginContext, shell: &CommandShell, args: &[String]) -> CommandResult {
    let width = args.first().map(|a| parse_id(a)).transpose()?.unwrap_or(VIEW_WIDTH);
    let height = args.get(1).map(|a| parse_id(a)).transpose()?.unwrap_or(VIEW_HEIGHT);
    shell.write_raw(&context.canvas.borrow().render(width, height));
    Ok(())
}

pub fn register(shell: &CommandShell, context: &PluginContext, fits: Rc<RefCell<FitManager>>) -> CommandResult {
    let ctx = context.clone();
    shell.add_command(
        "spectrum list",
        move |shell, _| list(&ctx, shell),
        CommandOptions::new().nargs(0),
    )?;

    let ctx = context.clone();
    shell.add_command(
        "spectrum activate",
        move |_, args| {
            let id = parse_id(&args[0])?;
            if ctx.spectra.borrow_mut().activate(id) {
                Ok(())
            } else {
                Err(no_such_spectrum(id))
            }
        },
        CommandOptions::new().nargs(1).level(2),
    )?;

    let ctx = context.clone();
    shell.add_command(
        "spectrum hide",
        move |_, args| {
            let id = parse_id(&args[0])?;
            if ctx.spectra.borrow_mut().hide(id) {
                Ok(())
            } else {
                Err(no_such_spectrum(id))
            }
        },
        CommandOptions::new().nargs(1).level(2),
    )?;

    let ctx = context.clone();
    shell.add_command(
        "calibration set",
        move |shell, args| set_calibration(&ctx, &fits, shell, args),
        CommandOptions::new().min_args(2).level(2).usage("calibration set <c0> <c1> [<c2>...]"),
    )?;

    let ctx = context.clone();
    shell.add_command(
        "calibration show",
        move |shell, _| show_calibration(&ctx, shell),
        CommandOptions::new().nargs(0),
    )?;

    let ctx = context.clone();
    shell.add_command(
        "view",
        move |shell, args| view(&ctx, shell, args),
        CommandOptions::new().max_args(2),
    )?;
    Ok(())
}
