mod interrupt;
mod preflight;
mod render;
mod transaction;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use atomic_update_core::{exit_code_for, CommandRunner, Config, SystemRunner};
use atomic_update_stage::{rollback, TransactionContext, Workspace};
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::render::TerminalRenderer;
use crate::transaction::{execute, follow_up, Payload, TransactionOptions};

#[derive(Parser, Debug)]
#[command(name = "atomic-update")]
#[command(version = concat!("v", env!("CARGO_PKG_VERSION")))]
#[command(
    about = "Update the system in a snapshot, verify it in a container, then make it the default",
    long_about = None
)]
struct Cli {
    /// Reboot into the new snapshot after a successful update
    #[arg(long, global = true, conflicts_with = "apply")]
    reboot: bool,
    /// Switch the running system to the new snapshot without rebooting
    #[arg(long, global = true)]
    apply: bool,
    /// Open a shell in the staged snapshot before committing
    #[arg(long, global = true)]
    shell: bool,
    /// Base the update on the default snapshot, or on SNAPSHOT
    #[arg(
        long = "continue",
        global = true,
        value_name = "SNAPSHOT",
        num_args = 0..=1,
        require_equals = true
    )]
    continue_from: Option<Option<u32>>,
    /// Skip booting the snapshot before and after the update
    #[arg(long, global = true)]
    no_verify: bool,
    /// Let the package manager ask questions
    #[arg(long, global = true)]
    interactive: bool,
    #[arg(long, global = true)]
    debug: bool,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Distribution upgrade
    #[command(alias = "dup")]
    Upgrade,
    /// Run a command in the new snapshot
    Run {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Set SNAPSHOT, or the running snapshot, as the new default
    Rollback { snapshot: Option<u32> },
}

impl Cli {
    fn transaction_options(&self) -> TransactionOptions {
        TransactionOptions {
            reboot: self.reboot,
            apply: self.apply,
            shell: self.shell,
            continue_from: self.continue_from,
            skip_verify: self.no_verify,
            interactive: self.interactive,
        }
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    init_logging(cli.debug);
    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::from_default_env()
    } else if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run_cli(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let renderer = TerminalRenderer::current();
    preflight::check(&config)?;

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let options = cli.transaction_options();
    let payload = match cli.command {
        Commands::Rollback { snapshot } => {
            rollback(runner.as_ref(), snapshot)?;
            renderer.print_status("ok", "Reboot to switch into the rolled back snapshot");
            return Ok(());
        }
        Commands::Upgrade => Payload::Upgrade,
        Commands::Run { command } => Payload::Run(command),
    };

    let workspace = Workspace::acquire(&config)?;
    let ctx = Arc::new(TransactionContext::new(
        Arc::clone(&runner),
        config,
        workspace,
    ));
    if let Err(err) = interrupt::install(Arc::clone(&ctx)) {
        if let Err(cleanup_err) = ctx.cleanup() {
            error!("{cleanup_err:#}");
        }
        return Err(err);
    }

    let outcome = match execute(&ctx, &payload, &options, renderer) {
        Ok(outcome) => outcome,
        Err(err) => {
            interrupt::wait_if_interrupted(&ctx);
            return Err(err);
        }
    };
    follow_up(runner.as_ref(), ctx.config(), &outcome, &options, renderer)
}

#[cfg(test)]
mod tests;
