//! The `run` command, executing a script of shell commands.
use crate::cmdline::{expand_user, CommandError, CommandOptions, CommandResult, CommandShell};

fn run(shell: &CommandShell, args: &[String]) -> CommandResult {
    let path = expand_user(&args[0]);
    shell.msg(format!("Running script {}", path.display()));
    if let Err(err) = shell.exec_cmdfile(&path) {
        shell.msg(err.to_string());
    }
    shell.msg("Finished!");
    Ok(())
}

pub fn register(shell: &CommandShell) -> Result<(), CommandError> {
    shell.add_command("run", run, CommandOptions::new().nargs(1).file_args())
}
