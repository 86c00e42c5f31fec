//! Console command registry
//!
//! Each user command is a [`Command`] object registered under its name and
//! aliases. The dispatcher splits an input line into a command word and
//! arguments and hands the engine to the matching command.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::common::config::ConsoleConfig;
use crate::common::{Error, Result};
use crate::engine::Engine;

use super::commands;

/// A console command
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;

    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    /// One-line description shown by 'help'
    fn help_text(&self) -> &'static str;

    /// Run the command. Output goes to the engine's console.
    async fn execute(&self, engine: &mut Engine, args: &[&str]) -> Result<()>;
}

/// Name, aliases and help text of a registered command
#[derive(Debug, Clone)]
pub struct CommandSummary {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub help_text: &'static str,
}

/// Maps command words to registered commands
#[derive(Default)]
pub struct CommandDispatcher {
    commands: Vec<Box<dyn Command>>,
    by_word: HashMap<&'static str, usize>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher with every built-in command, 'help' included
    pub fn with_builtin_commands(config: &ConsoleConfig) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(Box::new(commands::RunCommand));
        dispatcher.register(Box::new(commands::ContinueCommand));
        dispatcher.register(Box::new(commands::NextCommand));
        dispatcher.register(Box::new(commands::StepCommand));
        dispatcher.register(Box::new(commands::PauseCommand));
        dispatcher.register(Box::new(commands::RestartCommand));
        dispatcher.register(Box::new(commands::BacktraceCommand::new(
            config.backtrace_levels,
        )));
        dispatcher.register(Box::new(commands::ThreadCommand));
        dispatcher.register(Box::new(commands::FrameCommand));
        dispatcher.register(Box::new(commands::VariablesCommand));
        dispatcher.register(Box::new(commands::PrintCommand));
        dispatcher.register(Box::new(commands::ListCommand::new(config.list_lines)));
        dispatcher.register(Box::new(commands::BreakpointCommand));

        let help = commands::HelpCommand::new(dispatcher.summaries());
        dispatcher.register(Box::new(help));
        dispatcher
    }

    /// Register a command; a later registration wins for a shared word
    pub fn register(&mut self, command: Box<dyn Command>) {
        let slot = self.commands.len();
        self.by_word.insert(command.name(), slot);
        for alias in command.aliases() {
            self.by_word.insert(*alias, slot);
        }
        self.commands.push(command);
    }

    pub fn find(&self, word: &str) -> Option<&dyn Command> {
        self.by_word
            .get(word)
            .map(|&slot| self.commands[slot].as_ref())
    }

    pub fn summaries(&self) -> Vec<CommandSummary> {
        self.commands
            .iter()
            .map(|c| CommandSummary {
                name: c.name(),
                aliases: c.aliases(),
                help_text: c.help_text(),
            })
            .collect()
    }

    /// Parse and run one input line; blank lines do nothing
    pub async fn dispatch(&self, engine: &mut Engine, line: &str) -> Result<()> {
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            return Ok(());
        };
        let args: Vec<&str> = words.collect();

        let command = self
            .find(word)
            .ok_or_else(|| Error::UnknownCommand(word.to_string()))?;

        tracing::debug!(command = command.name(), ?args, "Executing command");
        command.execute(engine, &args).await
    }
}
