//! The interactive command shell.
//!
//! Commands live in a [`CommandTree`] under space separated titles such as
//! `fit execute`. Every element of a title may be abbreviated as long as the
//! abbreviation is unambiguous, where a node of a lower level wins over nodes of higher
//! levels. A node that has no command of its own falls through to its primary child,
//! the unique child of lowest level.
//!
//! A [`CommandShell`] owns the tree and an output sink. Input lines are split into
//! `;` separated fragments which are resolved and executed in turn. Lines starting
//! with `@` run a command file, lines starting with `!` run a system shell command.
use std::cell::{Cell, RefCell};
use std::fmt;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path;
use std::process;
use std::rc::Rc;

use clap::Parser;
use thiserror::Error;

use crate::calibration::CalibrationError;
use crate::fit::FitError;
use crate::viewer::ViewerRef;

pub mod tabformat;

pub use tabformat::tabformat;

pub const PROMPT: &str = "specfit> ";
const DEFAULT_LEVEL: u32 = 1;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Command not recognized")]
    NotRecognized,
    #[error("Command is ambiguous")]
    Ambiguous,
    #[error("Wrong number of arguments to `{command}`: {message}")]
    Usage { command: String, message: String },
    #[error("{0}")]
    Parse(String),
    #[error("Refusing to overwrite already existing command `{0}`")]
    Exists(String),
    #[error("No valid command node specified: `{0}`")]
    NoSuchCommand(String),
    #[error("Unterminated quote in command line")]
    UnterminatedQuote,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Fit(#[from] FitError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error("{0}")]
    Failed(String),
}

pub type CommandResult = Result<(), CommandError>;
pub type Handler = Rc<dyn Fn(&CommandShell, &[String]) -> CommandResult>;
/// Receives the word being completed and the arguments before it
pub type Completer = Rc<dyn Fn(&str, &[String]) -> Vec<String>>;

/// How a command is matched, checked and completed
#[derive(Clone, Default)]
pub struct CommandOptions {
    pub nargs: Option<usize>,
    pub min_args: Option<usize>,
    pub max_args: Option<usize>,
    pub level: Option<u32>,
    pub file_args: bool,
    pub dir_args: bool,
    pub completer: Option<Completer>,
    pub overwrite: bool,
    pub usage: Option<String>,
}

impl fmt::Debug for CommandOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandOptions")
            .field("nargs", &self.nargs)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("level", &self.level)
            .field("file_args", &self.file_args)
            .field("dir_args", &self.dir_args)
            .field("completer", &self.completer.is_some())
            .field("overwrite", &self.overwrite)
            .field("usage", &self.usage)
            .finish()
    }
}

impl CommandOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nargs(mut self, n: usize) -> Self {
        self.nargs = Some(n);
        self
    }

    pub fn min_args(mut self, n: usize) -> Self {
        self.min_args = Some(n);
        self
    }

    pub fn max_args(mut self, n: usize) -> Self {
        self.max_args = Some(n);
        self
    }

    pub fn level(mut self, level: u32) -> Self {
        self.level = Some(level);
        self
    }

    pub fn file_args(mut self) -> Self {
        self.file_args = true;
        self
    }

    pub fn dir_args(mut self) -> Self {
        self.dir_args = true;
        self
    }

    pub fn completer<F>(mut self, completer: F) -> Self
    where
        F: Fn(&str, &[String]) -> Vec<String> + 'static,
    {
        self.completer = Some(Rc::new(completer));
        self
    }

    pub fn overwrite(mut self) -> Self {
        self.overwrite = true;
        self
    }

    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }

    fn check_args(&self, title: &str, args: &[String]) -> CommandResult {
        let n = args.len();
        let message = match (self.nargs, self.min_args, self.max_args) {
            (Some(expected), _, _) if n != expected => Some(format!("expected {expected}, got {n}")),
            (_, Some(min), _) if n < min => Some(format!("expected at least {min}, got {n}")),
            (_, _, Some(max)) if n > max => Some(format!("expected at most {max}, got {n}")),
            _ => None,
        };
        match message {
            Some(message) => Err(CommandError::Usage {
                command: title.to_string(),
                message: match &self.usage {
                    Some(usage) => format!("{message}\nusage: {usage}"),
                    None => message,
                },
            }),
            None => Ok(()),
        }
    }
}

#[derive(Clone)]
struct Command {
    handler: Handler,
    options: CommandOptions,
}

#[derive(Default)]
struct Node {
    title: String,
    level: u32,
    command: Option<Command>,
    children: Vec<Node>,
}

enum ChildMatch {
    Missing,
    Found(usize),
    Ambiguous,
}

impl Node {
    fn new(title: &str, level: u32) -> Self {
        Self {
            title: title.to_string(),
            level,
            ..Default::default()
        }
    }

    fn find_child(&self, prefix: &str) -> ChildMatch {
        if let Some(i) = self.children.iter().position(|c| c.title == prefix) {
            return ChildMatch::Found(i);
        }
        let mut found: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate() {
            if !child.title.starts_with(prefix) {
                continue;
            }
            match found {
                None => found = Some(i),
                Some(j) if self.children[j].level != child.level => {
                    if self.children[j].level > child.level {
                        found = Some(i);
                    }
                }
                Some(_) => return ChildMatch::Ambiguous,
            }
        }
        found.map_or(ChildMatch::Missing, ChildMatch::Found)
    }

    /// The child of lowest level, if it is unique
    fn primary_child(&self) -> Option<usize> {
        let mut found: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate() {
            match found {
                Some(j) if child.level == self.children[j].level => return None,
                Some(j) if child.level > self.children[j].level => {}
                _ => found = Some(i),
            }
        }
        found
    }

    fn collect_titles(&self, prefix: &str, out: &mut Vec<String>) {
        for child in self.children.iter() {
            let title = if prefix.is_empty() {
                child.title.clone()
            } else {
                format!("{prefix} {}", child.title)
            };
            if child.command.is_some() {
                out.push(title.clone());
            }
            child.collect_titles(&title, out);
        }
    }
}

fn prune(node: &mut Node, path: &[usize]) {
    if let Some((first, rest)) = path.split_first() {
        let child = &mut node.children[*first];
        if rest.is_empty() {
            child.command = None;
        } else {
            prune(child, rest);
        }
        if child.command.is_none() && child.children.is_empty() {
            node.children.remove(*first);
        }
    }
}

/// A resolved command, ready to run
pub struct Resolved {
    pub title: String,
    pub args: Vec<String>,
    handler: Handler,
    options: CommandOptions,
}

pub struct CommandTree {
    root: Node,
    default_level: u32,
}

impl Default for CommandTree {
    fn default() -> Self {
        Self {
            root: Node::default(),
            default_level: DEFAULT_LEVEL,
        }
    }
}

impl CommandTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_default_level(&mut self, level: u32) {
        self.default_level = level;
    }

    pub fn add_command<F>(&mut self, title: &str, handler: F, options: CommandOptions) -> CommandResult
    where
        F: Fn(&CommandShell, &[String]) -> CommandResult + 'static,
    {
        let level = options.level.unwrap_or(self.default_level);
        let path: Vec<&str> = title.split_whitespace().collect();
        let (last, parents) = path
            .split_last()
            .ok_or_else(|| CommandError::Failed("Empty command title".to_string()))?;

        let mut node = &mut self.root;
        for elem in parents {
            let index = match node.children.iter().position(|c| c.title == *elem) {
                Some(i) => {
                    let child = &mut node.children[i];
                    child.level = child.level.min(level);
                    i
                }
                None => {
                    node.children.push(Node::new(elem, level));
                    node.children.len() - 1
                }
            };
            node = &mut node.children[index];
        }

        let command = Command {
            handler: Rc::new(handler),
            options,
        };
        match node.children.iter_mut().find(|c| c.title == *last) {
            Some(existing) if existing.command.is_some() && !command.options.overwrite => {
                Err(CommandError::Exists(path.join(" ")))
            }
            Some(existing) => {
                existing.command = Some(command);
                existing.level = level;
                Ok(())
            }
            None => {
                let mut leaf = Node::new(last, level);
                leaf.command = Some(command);
                node.children.push(leaf);
                Ok(())
            }
        }
    }

    /// Walk down the tree as far as `words` match, returning the child indices taken
    fn locate(&self, words: &[String]) -> Result<Vec<usize>, CommandError> {
        let mut node = &self.root;
        let mut path = Vec::new();
        for word in words {
            match node.find_child(word) {
                ChildMatch::Ambiguous => return Err(CommandError::Ambiguous),
                ChildMatch::Missing => break,
                ChildMatch::Found(i) => {
                    node = &node.children[i];
                    path.push(i);
                }
            }
        }
        Ok(path)
    }

    fn node_at(&self, path: &[usize]) -> (&Node, Vec<&str>) {
        let mut node = &self.root;
        let mut titles = Vec::with_capacity(path.len());
        for i in path {
            node = &node.children[*i];
            titles.push(node.title.as_str());
        }
        (node, titles)
    }

    /// Find the command named by the leading words, the rest being its arguments
    pub fn resolve(&self, words: &[String]) -> Result<Resolved, CommandError> {
        let path = self.locate(words)?;
        if path.is_empty() {
            return Err(CommandError::NotRecognized);
        }
        let (mut node, mut titles) = self.node_at(&path);
        while node.command.is_none() {
            let i = node.primary_child().ok_or(CommandError::NotRecognized)?;
            node = &node.children[i];
            titles.push(node.title.as_str());
        }
        let command = node.command.as_ref().ok_or(CommandError::NotRecognized)?;
        Ok(Resolved {
            title: titles.join(" "),
            args: words[path.len()..].to_vec(),
            handler: command.handler.clone(),
            options: command.options.clone(),
        })
    }

    pub fn remove_command(&mut self, title: &str) -> CommandResult {
        let missing = || CommandError::NoSuchCommand(title.to_string());
        let mut node = &self.root;
        let mut path = Vec::new();
        for word in title.split_whitespace() {
            let i = node.children.iter().position(|c| c.title == word).ok_or_else(missing)?;
            node = &node.children[i];
            path.push(i);
        }
        if path.is_empty() || node.command.is_none() {
            return Err(missing());
        }
        prune(&mut self.root, &path);
        Ok(())
    }

    /// The full titles of all commands, sorted
    pub fn titles(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.root.collect_titles("", &mut out);
        out.sort();
        out
    }

    /// Completions for the last word of `line`. Subcommands complete to `title `,
    /// file arguments to the matching entries of the directory named before the last
    /// `/` of the word, directories with a trailing `/`.
    pub fn complete(&self, line: &str) -> Vec<String> {
        let fragments = match split_cmdlines(line) {
            Ok(fragments) => fragments,
            Err(_) => return Vec::new(),
        };
        let mut words = if line.trim_end().ends_with(';') {
            Vec::new()
        } else {
            fragments.last().cloned().unwrap_or_default()
        };
        let ends_word = line.is_empty() || line.ends_with(char::is_whitespace) || line.ends_with(';');
        let last = if ends_word { String::new() } else { words.pop().unwrap_or_default() };

        let path = match self.locate(&words) {
            Ok(path) => path,
            Err(_) => return Vec::new(),
        };
        let (node, _) = self.node_at(&path);
        let args = &words[path.len()..];

        if args.is_empty() && !node.children.is_empty() {
            return node
                .children
                .iter()
                .filter(|c| c.title.starts_with(&last))
                .map(|c| format!("{} ", c.title))
                .collect();
        }
        let options = match &node.command {
            Some(command) => &command.options,
            None => return Vec::new(),
        };
        if let Some(completer) = &options.completer {
            completer(&last, args)
        } else if options.file_args || options.dir_args {
            let (dir, prefix) = match last.rfind('/') {
                Some(i) => (&last[..=i], &last[i + 1..]),
                None => ("", last.as_str()),
            };
            file_completions(if dir.is_empty() { "." } else { dir }, prefix, options.dir_args)
        } else {
            Vec::new()
        }
    }
}

fn file_completions(directory: &str, prefix: &str, dirs_only: bool) -> Vec<String> {
    let directory = expand_user(directory);
    let entries = match fs::read_dir(&directory) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    let mut options: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(prefix) {
                return None;
            }
            if entry.path().is_dir() {
                Some(format!("{name}/"))
            } else if !dirs_only {
                Some(format!("{name} "))
            } else {
                None
            }
        })
        .collect();
    options.sort();
    options
}

/// Replace a leading `~` with the home directory
pub fn expand_user(path: &str) -> path::PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = path::PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    path::PathBuf::from(path)
}

/// Split a line into `;` separated fragments of words. Single and double quotes group
/// words and protect `;`, a backslash outside single quotes escapes the next character.
/// Empty fragments are dropped.
pub fn split_cmdlines(line: &str) -> Result<Vec<Vec<String>>, CommandError> {
    let mut fragments = Vec::new();
    let mut words: Vec<String> = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('\''), c) => word.push(c),
            (_, '\\') => {
                if let Some(next) = chars.next() {
                    word.push(next);
                }
                in_word = true;
            }
            (Some(_), c) => word.push(c),
            (None, '\'') | (None, '"') => {
                quote = Some(c);
                in_word = true;
            }
            (None, ';') => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
                if !words.is_empty() {
                    fragments.push(std::mem::take(&mut words));
                }
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            (None, c) => {
                word.push(c);
                in_word = true;
            }
        }
    }
    if quote.is_some() {
        return Err(CommandError::UnterminatedQuote);
    }
    if in_word {
        words.push(word);
    }
    if !words.is_empty() {
        fragments.push(words);
    }
    Ok(fragments)
}

/// Parse the arguments of an option bearing command. `--help` prints the help text and
/// yields `None`, meaning the command should stop without error.
pub fn parse_options<T: Parser>(shell: &CommandShell, prog: &str, args: &[String]) -> Result<Option<T>, CommandError> {
    match T::try_parse_from(std::iter::once(prog).chain(args.iter().map(String::as_str))) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                shell.msg(err.render().to_string().trim_end());
                Ok(None)
            }
            _ => Err(CommandError::Parse(err.render().to_string().trim_end().to_string())),
        },
    }
}

#[derive(Debug, Parser)]
#[command(name = "exec", about = "Execute batch file(s) with commands. Globbing is supported.")]
struct ExecArgs {
    /// Path of a batch file
    #[arg(required = true)]
    batchfile: Vec<String>,
}

pub struct CommandShell {
    tree: RefCell<CommandTree>,
    out: RefCell<Box<dyn Write>>,
    viewer: RefCell<Option<ViewerRef>>,
    keep_running: Cell<bool>,
}

impl CommandShell {
    /// A shell writing to `out`, with the built-in commands registered
    pub fn new(out: Box<dyn Write>) -> Self {
        let shell = Self {
            tree: RefCell::new(CommandTree::new()),
            out: RefCell::new(out),
            viewer: RefCell::new(None),
            keep_running: Cell::new(true),
        };
        shell.register_builtins();
        shell
    }

    fn register_builtins(&self) {
        let builtins: [(&str, CommandOptions, fn(&CommandShell, &[String]) -> CommandResult); 5] = [
            ("exit", CommandOptions::new().nargs(0), |shell, _| {
                shell.exit();
                Ok(())
            }),
            ("quit", CommandOptions::new().nargs(0), |shell, _| {
                shell.exit();
                Ok(())
            }),
            ("exec", CommandOptions::new().level(2).file_args(), exec_command),
            ("shell", CommandOptions::new().level(2).nargs(0), |_, _| {
                let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
                process::Command::new(shell).status()?;
                Ok(())
            }),
            ("help", CommandOptions::new().max_args(1), |shell, args| {
                let titles: Vec<String> = shell
                    .titles()
                    .into_iter()
                    .filter(|t| args.first().map_or(true, |prefix| t.starts_with(prefix.as_str())))
                    .collect();
                shell.write_raw(&tabformat(&titles, tabformat::DEFAULT_WIDTH));
                Ok(())
            }),
        ];
        for (title, options, handler) in builtins {
            if let Err(err) = self.add_command(title, handler, options) {
                log::error!("Failed to register built-in command {title}: {err}");
            }
        }
    }

    pub fn add_command<F>(&self, title: &str, handler: F, options: CommandOptions) -> CommandResult
    where
        F: Fn(&CommandShell, &[String]) -> CommandResult + 'static,
    {
        self.tree.borrow_mut().add_command(title, handler, options)
    }

    pub fn remove_command(&self, title: &str) -> CommandResult {
        self.tree.borrow_mut().remove_command(title)
    }

    pub fn titles(&self) -> Vec<String> {
        self.tree.borrow().titles()
    }

    pub fn complete(&self, line: &str) -> Vec<String> {
        let line = line.trim_start();
        match line.chars().next() {
            Some('@') => {
                let word = &line[1..];
                let (dir, prefix) = match word.rfind('/') {
                    Some(i) => (&word[..=i], &word[i + 1..]),
                    None => (".", word),
                };
                file_completions(dir, prefix, false)
            }
            Some('!') => Vec::new(),
            _ => self.tree.borrow().complete(line),
        }
    }

    /// Set the viewer whose updates are locked around multi-command lines
    pub fn set_viewer(&self, viewer: Option<ViewerRef>) {
        *self.viewer.borrow_mut() = viewer;
    }

    pub fn keep_running(&self) -> bool {
        self.keep_running.get()
    }

    pub fn exit(&self) {
        log::debug!("Leaving the command loop");
        self.keep_running.set(false);
    }

    /// Write text as is, without a trailing newline
    pub fn write_raw(&self, text: &str) {
        let mut out = self.out.borrow_mut();
        if let Err(err) = out.write_all(text.as_bytes()).and_then(|_| out.flush()) {
            log::error!("Failed to write output: {err}");
        }
    }

    /// Write a line of output
    pub fn msg(&self, text: impl AsRef<str>) {
        self.write_raw(&format!("{}\n", text.as_ref()));
    }

    pub fn warn(&self, text: impl AsRef<str>) {
        log::warn!("{}", text.as_ref());
        self.msg(format!("WARNING: {}", text.as_ref()));
    }

    pub fn error(&self, text: impl AsRef<str>) {
        self.msg(format!("ERROR: {}", text.as_ref()));
    }

    /// Run each `;` separated command of `line`, stopping at the first failure. Lines
    /// holding several commands lock viewer updates until the last one has run.
    pub fn execute(&self, line: &str) -> CommandResult {
        let fragments = split_cmdlines(line)?;
        let viewer = if fragments.len() > 1 {
            self.viewer.borrow().clone()
        } else {
            None
        };
        if let Some(viewer) = &viewer {
            viewer.borrow_mut().lock_update();
        }
        let mut result = Ok(());
        for words in fragments {
            if !self.keep_running() {
                break;
            }
            result = self.execute_words(&words);
            if result.is_err() {
                break;
            }
        }
        if let Some(viewer) = &viewer {
            viewer.borrow_mut().unlock_update();
        }
        result
    }

    fn execute_words(&self, words: &[String]) -> CommandResult {
        let resolved = self.tree.borrow().resolve(words)?;
        resolved.options.check_args(&resolved.title, &resolved.args)?;
        log::debug!("Running `{}` with {:?}", resolved.title, resolved.args);
        (resolved.handler)(self, &resolved.args)
    }

    /// Handle one line of input, reporting errors instead of returning them
    pub fn do_line(&self, line: &str) {
        let line = line.trim_start();
        let result = if let Some(path) = line.strip_prefix('@') {
            self.exec_cmdfile(path.trim())
        } else if let Some(cmd) = line.strip_prefix('!') {
            self.exec_shell(cmd)
        } else if line.starts_with(':') || line.starts_with('%') {
            Err(CommandError::Failed(format!(
                "Unsupported command prefix `{}`",
                &line[..1]
            )))
        } else {
            self.execute(line)
        };
        if let Err(err) = result {
            self.error(err.to_string());
        }
    }

    /// Run a system shell command, copying its output
    pub fn exec_shell(&self, cmd: &str) -> CommandResult {
        let output = process::Command::new("sh").arg("-c").arg(cmd).output()?;
        self.write_raw(&String::from_utf8_lossy(&output.stdout));
        self.write_raw(&String::from_utf8_lossy(&output.stderr));
        Ok(())
    }

    /// Run the lines of a command file, echoing each before it runs. Blank lines and
    /// lines starting with `#` are skipped.
    pub fn exec_cmdfile<P: AsRef<path::Path>>(&self, path: P) -> CommandResult {
        let path = path.as_ref();
        self.msg(format!("Execute file: {}", path.display()));
        let reader = io::BufReader::new(fs::File::open(path)?);
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.msg(format!("file> {line}"));
            self.do_line(line);
            if !self.keep_running() {
                break;
            }
        }
        Ok(())
    }

    /// Prompt for and run lines from `reader` until it is exhausted or the shell exits
    pub fn main_loop<R: BufRead>(&self, mut reader: R) -> io::Result<()> {
        let mut line = String::new();
        while self.keep_running() {
            self.write_raw(PROMPT);
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                self.msg("");
                self.exit();
                break;
            }
            let line = line.trim();
            if !line.is_empty() {
                self.do_line(line);
            }
        }
        Ok(())
    }
}

fn exec_command(shell: &CommandShell, args: &[String]) -> CommandResult {
    let args = match parse_options::<ExecArgs>(shell, "exec", args)? {
        Some(args) => args,
        None => return Ok(()),
    };
    for pattern in args.batchfile {
        let expanded = expand_user(&pattern);
        let paths = glob::glob(&expanded.to_string_lossy())
            .map_err(|err| CommandError::Failed(format!("Invalid pattern `{pattern}`: {err}")))?;
        for path in paths.filter_map(|p| p.ok()) {
            shell.exec_cmdfile(path)?;
        }
    }
    Ok(())
}
