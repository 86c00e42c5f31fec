//! Built-in console commands

use std::path::Path;

use async_trait::async_trait;

use crate::common::{Error, Result};
use crate::dap::{Source, StackFrame};
use crate::engine::{Breakpoint, Engine};

use super::dispatcher::{Command, CommandSummary};

/// Short location of a frame, e.g. `main.rs:12`
fn frame_location(frame: &StackFrame) -> String {
    let source = frame
        .source
        .as_ref()
        .and_then(source_display_name)
        .unwrap_or_else(|| "?".to_string());
    format!("{}:{}", source, frame.line)
}

fn source_display_name(source: &Source) -> Option<String> {
    match (&source.path, &source.name) {
        (Some(path), _) => Some(
            Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.clone()),
        ),
        (None, Some(name)) => Some(name.clone()),
        (None, None) => None,
    }
}

fn format_breakpoint(bp: &Breakpoint) -> String {
    let status = if bp.enabled() {
        if bp.verified() {
            "✓"
        } else {
            "?"
        }
    } else {
        "○"
    };
    let location = match bp.path() {
        Some(path) => format!("{}:{}", path, bp.line()),
        None => format!(":{}", bp.line()),
    };
    match bp.message() {
        Some(message) => format!("  {} {} {} ({})", status, bp.index(), location, message),
        None => format!("  {} {} {}", status, bp.index(), location),
    }
}

fn parse_number<T: std::str::FromStr>(arg: Option<&&str>, usage: &str) -> Result<T> {
    arg.and_then(|a| a.parse().ok())
        .ok_or_else(|| Error::usage(usage))
}

/// `run`: start a launched program after configuring breakpoints
pub struct RunCommand;

#[async_trait]
impl Command for RunCommand {
    fn name(&self) -> &'static str {
        "run"
    }

    fn help_text(&self) -> &'static str {
        "Start the program"
    }

    async fn execute(&self, engine: &mut Engine, _args: &[&str]) -> Result<()> {
        engine.run().await
    }
}

pub struct ContinueCommand;

#[async_trait]
impl Command for ContinueCommand {
    fn name(&self) -> &'static str {
        "continue"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["c"]
    }

    fn help_text(&self) -> &'static str {
        "Continue the focus thread"
    }

    async fn execute(&self, engine: &mut Engine, _args: &[&str]) -> Result<()> {
        engine.continue_execution().await
    }
}

pub struct NextCommand;

#[async_trait]
impl Command for NextCommand {
    fn name(&self) -> &'static str {
        "next"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["n"]
    }

    fn help_text(&self) -> &'static str {
        "Step over the current line"
    }

    async fn execute(&self, engine: &mut Engine, _args: &[&str]) -> Result<()> {
        engine.step_over().await
    }
}

pub struct StepCommand;

#[async_trait]
impl Command for StepCommand {
    fn name(&self) -> &'static str {
        "step"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["s"]
    }

    fn help_text(&self) -> &'static str {
        "Step into the current line"
    }

    async fn execute(&self, engine: &mut Engine, _args: &[&str]) -> Result<()> {
        engine.step_in().await
    }
}

pub struct PauseCommand;

#[async_trait]
impl Command for PauseCommand {
    fn name(&self) -> &'static str {
        "pause"
    }

    fn help_text(&self) -> &'static str {
        "Break into the running program"
    }

    async fn execute(&self, engine: &mut Engine, _args: &[&str]) -> Result<()> {
        engine.break_into().await
    }
}

pub struct RestartCommand;

#[async_trait]
impl Command for RestartCommand {
    fn name(&self) -> &'static str {
        "restart"
    }

    fn help_text(&self) -> &'static str {
        "Restart the program, keeping breakpoints"
    }

    async fn execute(&self, engine: &mut Engine, _args: &[&str]) -> Result<()> {
        engine.relaunch().await
    }
}

/// `backtrace`: frames of the focus thread, selected frame marked
pub struct BacktraceCommand {
    levels: i64,
}

impl BacktraceCommand {
    pub fn new(levels: i64) -> Self {
        Self { levels }
    }
}

#[async_trait]
impl Command for BacktraceCommand {
    fn name(&self) -> &'static str {
        "backtrace"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["bt"]
    }

    fn help_text(&self) -> &'static str {
        "Show the focus thread's stack"
    }

    async fn execute(&self, engine: &mut Engine, _args: &[&str]) -> Result<()> {
        let thread = engine.active_thread()?;
        let (thread_id, selected) = (thread.id(), thread.selected_stack_frame().unwrap_or(0));

        let frames = engine.get_stack_trace(thread_id, self.levels).await?;
        let console = engine.console();
        if frames.is_empty() {
            console.output_line("No stack frames");
            return Ok(());
        }
        for (i, frame) in frames.iter().enumerate() {
            let marker = if i == selected { "*" } else { " " };
            console.output_line(&format!(
                "{} #{} {} at {}",
                marker,
                i,
                frame.name,
                frame_location(frame)
            ));
        }
        Ok(())
    }
}

/// `thread [id]`: list threads, or switch the focus thread
pub struct ThreadCommand;

#[async_trait]
impl Command for ThreadCommand {
    fn name(&self) -> &'static str {
        "thread"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["threads"]
    }

    fn help_text(&self) -> &'static str {
        "List threads, or 'thread <id>' to switch"
    }

    async fn execute(&self, engine: &mut Engine, args: &[&str]) -> Result<()> {
        let console = engine.console();

        if !args.is_empty() {
            let id: i64 = parse_number(args.first(), "Usage: thread <id>")?;
            engine.set_focus_thread(id)?;
            console.output_line(&format!("Switched to thread {}", id));
            return Ok(());
        }

        let registry = engine.threads()?;
        if registry.is_empty() {
            console.output_line("No threads");
            return Ok(());
        }
        let focus = registry.focus_thread_id();
        for thread in registry.all_threads() {
            let marker = if Some(thread.id()) == focus { "*" } else { " " };
            let status = if thread.is_running() { "running" } else { "stopped" };
            console.output_line(&format!(
                "{} {} - {} ({})",
                marker,
                thread.id(),
                thread.name(),
                status
            ));
        }
        Ok(())
    }
}

/// `frame [index]`: show or select a frame of the focus thread
pub struct FrameCommand;

#[async_trait]
impl Command for FrameCommand {
    fn name(&self) -> &'static str {
        "frame"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["f"]
    }

    fn help_text(&self) -> &'static str {
        "Show the selected frame, or 'frame <n>' to select one"
    }

    async fn execute(&self, engine: &mut Engine, args: &[&str]) -> Result<()> {
        let console = engine.console();

        if !args.is_empty() {
            let index: usize = parse_number(args.first(), "Usage: frame <index>")?;
            let thread_id = engine.active_thread()?.id();
            engine.set_selected_stack_frame(thread_id, index).await?;
        }

        let index = engine.active_thread()?.selected_stack_frame().unwrap_or(0);
        match engine.get_current_stack_frame().await? {
            Some(frame) => console.output_line(&format!(
                "#{} {} at {}",
                index,
                frame.name,
                frame_location(&frame)
            )),
            None => console.output_line("No stack frames"),
        }
        Ok(())
    }
}

/// `variables [scope]`: variables of the selected frame
pub struct VariablesCommand;

#[async_trait]
impl Command for VariablesCommand {
    fn name(&self) -> &'static str {
        "variables"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["vars"]
    }

    fn help_text(&self) -> &'static str {
        "Show variables of the selected frame, optionally of one scope"
    }

    async fn execute(&self, engine: &mut Engine, args: &[&str]) -> Result<()> {
        let scope = (!args.is_empty()).then(|| args.join(" "));
        let scopes = engine.get_variables(scope.as_deref()).await?;
        let console = engine.console();

        for scope in &scopes {
            console.output_line(&format!("{}:", scope.scope_name));
            match &scope.variables {
                Some(vars) if vars.is_empty() => console.output_line("  (none)"),
                Some(vars) => {
                    for var in vars {
                        console.output_line(&format!(
                            "  {} = {}{}",
                            var.name,
                            var.value,
                            var.type_name
                                .as_ref()
                                .map(|t| format!(" ({})", t))
                                .unwrap_or_default()
                        ));
                    }
                }
                None if scope.expensive => console.output_line(&format!(
                    "  (expensive; use 'variables {}' to fetch)",
                    scope.scope_name
                )),
                None => {}
            }
        }
        Ok(())
    }
}

/// `print <expr>`: evaluate in the selected frame
pub struct PrintCommand;

#[async_trait]
impl Command for PrintCommand {
    fn name(&self) -> &'static str {
        "print"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["p"]
    }

    fn help_text(&self) -> &'static str {
        "Evaluate an expression in the selected frame"
    }

    async fn execute(&self, engine: &mut Engine, args: &[&str]) -> Result<()> {
        if args.is_empty() {
            return Err(Error::usage("Usage: print <expression>"));
        }
        let expression = args.join(" ");
        let eval = engine.evaluate_expression(&expression).await?;
        engine.console().output_line(&format!(
            "{} = {}{}",
            expression,
            eval.result,
            eval.type_name
                .map(|t| format!(" ({})", t))
                .unwrap_or_default()
        ));
        Ok(())
    }
}

/// `list [line]`: source around the selected frame
pub struct ListCommand {
    lines: usize,
}

impl ListCommand {
    pub fn new(lines: usize) -> Self {
        Self { lines }
    }
}

#[async_trait]
impl Command for ListCommand {
    fn name(&self) -> &'static str {
        "list"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["l"]
    }

    fn help_text(&self) -> &'static str {
        "Show source around the selected frame, or from 'list <line>'"
    }

    async fn execute(&self, engine: &mut Engine, args: &[&str]) -> Result<()> {
        let frame = engine
            .get_current_stack_frame()
            .await?
            .ok_or_else(|| Error::usage("No stack frame to list source for"))?;
        let source = frame
            .source
            .clone()
            .ok_or_else(|| Error::usage("The selected frame has no source"))?;

        let current = frame.line as usize;
        let start = if args.is_empty() {
            current.saturating_sub(self.lines / 2).max(1)
        } else {
            parse_number::<usize>(args.first(), "Usage: list [line]")?.max(1)
        };

        let lines = engine.get_source_lines(&source, start, self.lines).await?;
        let console = engine.console();
        if lines.is_empty() {
            console.output_line("No source lines in range");
            return Ok(());
        }
        for (offset, text) in lines.iter().enumerate() {
            let number = start + offset;
            let marker = if number == current { "->" } else { "  " };
            console.output_line(&format!("{} {:>4} | {}", marker, number, text));
        }
        Ok(())
    }
}

/// `breakpoint`: set, list, enable, disable and delete breakpoints
pub struct BreakpointCommand;

const BREAKPOINT_USAGE: &str =
    "Usage: breakpoint <path>:<line> | list | enable <n> | disable <n> | delete <n>";

#[async_trait]
impl Command for BreakpointCommand {
    fn name(&self) -> &'static str {
        "breakpoint"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["b"]
    }

    fn help_text(&self) -> &'static str {
        "Set <path>:<line>, or list/enable/disable/delete breakpoints"
    }

    async fn execute(&self, engine: &mut Engine, args: &[&str]) -> Result<()> {
        let console = engine.console();

        match args {
            [] | ["list"] => {
                let breakpoints = engine.get_all_breakpoints();
                if breakpoints.is_empty() {
                    console.output_line("No breakpoints set");
                } else {
                    console.output_line("Breakpoints:");
                    for bp in breakpoints {
                        console.output_line(&format_breakpoint(bp));
                    }
                }
            }
            ["enable", rest @ ..] => {
                let index = parse_number(rest.first(), BREAKPOINT_USAGE)?;
                engine.set_breakpoint_enabled(index, true).await?;
                console.output_line(&format!("Breakpoint {} enabled", index));
            }
            ["disable", rest @ ..] => {
                let index = parse_number(rest.first(), BREAKPOINT_USAGE)?;
                engine.set_breakpoint_enabled(index, false).await?;
                console.output_line(&format!("Breakpoint {} disabled", index));
            }
            ["delete", rest @ ..] => {
                let index = parse_number(rest.first(), BREAKPOINT_USAGE)?;
                engine.delete_breakpoint(index).await?;
                console.output_line(&format!("Breakpoint {} deleted", index));
            }
            [location] => {
                let (path, line) = location
                    .rsplit_once(':')
                    .ok_or_else(|| Error::usage(BREAKPOINT_USAGE))?;
                let line: u32 = line.parse().map_err(|_| Error::usage(BREAKPOINT_USAGE))?;
                let path = Path::new(path)
                    .canonicalize()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_else(|_| path.to_string());

                let result = engine.set_source_breakpoint(&path, line).await?;
                console.output_line(&format!(
                    "Breakpoint {} set at {}:{}",
                    result.index, path, line
                ));
                if let Some(message) = result.message {
                    console.output_line(&message);
                }
            }
            _ => return Err(Error::usage(BREAKPOINT_USAGE)),
        }
        Ok(())
    }
}

/// `help`: list registered commands
pub struct HelpCommand {
    summaries: Vec<CommandSummary>,
}

impl HelpCommand {
    pub fn new(summaries: Vec<CommandSummary>) -> Self {
        Self { summaries }
    }
}

#[async_trait]
impl Command for HelpCommand {
    fn name(&self) -> &'static str {
        "help"
    }

    fn help_text(&self) -> &'static str {
        "Show this list"
    }

    async fn execute(&self, engine: &mut Engine, _args: &[&str]) -> Result<()> {
        let console = engine.console();
        let mut entries: Vec<(String, &str)> = self
            .summaries
            .iter()
            .map(|s| {
                let words = std::iter::once(s.name)
                    .chain(s.aliases.iter().copied())
                    .collect::<Vec<_>>()
                    .join(", ");
                (words, s.help_text)
            })
            .collect();
        entries.push(("help".to_string(), self.help_text()));

        let width = entries.iter().map(|(w, _)| w.len()).max().unwrap_or(0);
        for (words, help) in entries {
            console.output_line(&format!("  {:<width$}  {}", words, help, width = width));
        }
        Ok(())
    }
}
