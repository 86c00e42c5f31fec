//! dapshell - interactive debugger console
//!
//! Launches (or attaches to) a program under a DAP adapter and reads
//! commands from stdin whenever the program is stopped.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

use dapshell::common::{config::Config, logging};
use dapshell::console::{CommandDispatcher, Console, StdConsole};
use dapshell::dap::{AdapterExecutable, AttachArguments, LaunchArguments, SpawnConnector};
use dapshell::{AdapterAction, AdapterDescription, Engine, Error, Result};

#[derive(Parser)]
#[command(name = "dapshell", about = "Interactive debugger console for DAP adapters")]
#[command(version, long_about = None)]
struct Cli {
    /// Path to the executable to debug
    program: Option<PathBuf>,

    /// Arguments to pass to the program
    #[arg(last = true)]
    args: Vec<String>,

    /// Attach to a running process instead of launching one
    #[arg(long, value_name = "PID", conflicts_with = "program")]
    attach: Option<u32>,

    /// Debug adapter to use (default from config, else lldb-dap)
    #[arg(long)]
    adapter: Option<String>,

    /// Stop at program entry point
    #[arg(long)]
    stop_on_entry: bool,

    /// Configuration file to use instead of the default one
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let (log_file, _guard) = logging::init();
    if let Some(path) = &log_file {
        tracing::info!(path = %path.display(), "Logging to file");
    }

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {e}", "Error:".red().bold());
        std::process::exit(1);
    }
}

fn adapter_description(cli: Cli, config: &Config) -> Result<AdapterDescription> {
    let name = cli
        .adapter
        .unwrap_or_else(|| config.defaults.adapter.clone());
    let adapter = config
        .get_adapter(&name)
        .ok_or_else(|| Error::adapter_not_found(&name, &["config file", "PATH"]))?;

    let action = match (cli.attach, cli.program) {
        (Some(pid), _) => AdapterAction::Attach(AttachArguments {
            pid: Some(pid),
            extra: Default::default(),
        }),
        (None, Some(program)) => {
            let program = program.canonicalize().unwrap_or(program);
            AdapterAction::Launch(LaunchArguments {
                program: program.to_string_lossy().into_owned(),
                args: cli.args,
                cwd: std::env::current_dir()
                    .ok()
                    .map(|d| d.to_string_lossy().into_owned()),
                env: None,
                stop_on_entry: cli.stop_on_entry,
                extra: Default::default(),
            })
        }
        (None, None) => {
            return Err(Error::usage(
                "Nothing to debug: pass a program to launch or --attach <pid>",
            ))
        }
    };

    Ok(AdapterDescription {
        executable: AdapterExecutable {
            command: adapter.path,
            args: adapter.args,
        },
        adapter_id: adapter.adapter_id.unwrap_or(name),
        action,
    })
}

/// Forward stdin lines; the channel closes at EOF
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read stdin");
                    break;
                }
            }
        }
    });
    rx
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let description = adapter_description(cli, &config)?;

    let console = Arc::new(StdConsole::new(config.console.prompt.clone()));
    let connector = Arc::new(SpawnConnector::new(Duration::from_secs(
        config.timeouts.dap_request_secs,
    )));
    let mut engine = Engine::new(connector, console.clone())
        .with_suppressed_output(config.console.suppressed_output_categories.clone());
    let dispatcher = CommandDispatcher::with_builtin_commands(&config.console);

    engine.launch(description).await?;

    let mut input = spawn_stdin_reader();
    loop {
        tokio::select! {
            event = engine.next_event() => engine.handle_event(event).await,

            line = input.recv(), if console.is_input_open() => {
                let Some(line) = line else {
                    tracing::info!("stdin closed");
                    break;
                };
                if let Err(e) = dispatcher.dispatch(&mut engine, &line).await {
                    console.output_line(&format!("Error: {}", e));
                }
                console.prompt();
            }

            _ = tokio::signal::ctrl_c() => {
                if let Err(e) = engine.break_into().await {
                    tracing::debug!(error = %e, "Interrupt ignored");
                }
            }
        }

        if engine.shutdown_requested() {
            break;
        }
    }

    engine.close_session().await
}
