//! A shell with every plugin registered, driven by a [`SessionConfig`].
use std::io;
use std::io::prelude::*;
use std::rc::Rc;

use crate::cmdline::{CommandError, CommandShell};
use crate::config::SessionConfig;
use crate::plugins::{register_all, PluginContext, Plugins};
use crate::viewer::Canvas;

pub struct Session {
    config: SessionConfig,
    shell: CommandShell,
    context: PluginContext,
    plugins: Plugins,
}

impl Session {
    pub fn new(config: SessionConfig, out: Box<dyn Write>) -> Result<Self, CommandError> {
        let calibrations = config.load_calibrations()?;
        let context = PluginContext::new(Canvas::new().into_shared(), calibrations, Rc::new(config.factory()));
        let shell = CommandShell::new(out);
        shell.set_viewer(Some(context.viewer()));
        let plugins = register_all(&shell, &context)?;
        log::debug!("Registered {} commands", shell.titles().len());
        Ok(Self {
            config,
            shell,
            context,
            plugins,
        })
    }

    pub fn shell(&self) -> &CommandShell {
        &self.shell
    }

    pub fn context(&self) -> &PluginContext {
        &self.context
    }

    pub fn plugins(&self) -> &Plugins {
        &self.plugins
    }

    /// Run the configured batch files, then the configured commands
    pub fn run_startup(&self) {
        for path in self.config.batch_files.iter() {
            if !self.shell.keep_running() {
                return;
            }
            if let Err(err) = self.shell.exec_cmdfile(path) {
                self.shell.error(format!("{}: {err}", path.display()));
            }
        }
        for line in self.config.commands.iter() {
            if !self.shell.keep_running() {
                return;
            }
            self.shell.do_line(line);
        }
    }

    /// Run the startup commands and, for interactive sessions, every line of `input`
    pub fn run<R: BufRead>(&self, input: R) -> io::Result<()> {
        self.run_startup();
        if self.config.interactive && self.shell.keep_running() {
            self.shell.main_loop(input)?;
        }
        Ok(())
    }
}
