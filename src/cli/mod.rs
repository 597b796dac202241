//! CLI entry point
//!
//! Loads the configuration and every script up front, then runs each script
//! in its own session against fresh connections to both servers.

use std::path::PathBuf;
use std::time::Duration;

use colored::Colorize;

use crate::commands::Cli;
use crate::common::config::Config;
use crate::common::{logging, Result};
use crate::compare::EqualityMode;
use crate::connection::TcpConnection;
use crate::runner::RunOptions;
use crate::script::{load_script, Script};
use crate::sequencer::Sequencer;

/// Totals across all sessions of one invocation
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunTotals {
    pub scripts: usize,
    pub passed: usize,
    pub failed: usize,
    pub divergences: usize,
}

impl RunTotals {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Run the CLI; `Ok(false)` means some test case failed
pub async fn run(cli: Cli) -> Result<bool> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let log_file = config.logging.resolved_file();
    let _log_guard = logging::init(cli.verbose, log_file.as_deref());

    let options = run_options(&cli, &config);
    let connect_timeout = Duration::from_secs(config.timeouts.connect_secs);

    let scripts = cli
        .scripts
        .iter()
        .map(|path| load_script(path).map(|script| (path.clone(), script)))
        .collect::<Result<Vec<(PathBuf, Script)>>>()?;

    let mut totals = RunTotals::default();
    for (path, script) in &scripts {
        tracing::debug!(script = %path.display(), tests = script.test_count(), "Loaded script");

        let mut sequencer = Sequencer::new(options.clone());
        script.enqueue_into(&mut sequencer)?;

        let reference = TcpConnection::connect(&cli.reference, connect_timeout).await?;
        let candidate = TcpConnection::connect(&cli.candidate, connect_timeout).await?;

        let report = sequencer
            .run(Box::new(reference), Box::new(candidate))
            .await?;
        report.print_summary(&script.name);

        totals.scripts += 1;
        totals.passed += report.passed();
        totals.failed += report.failed();
        totals.divergences += report.divergences();
    }

    print_totals(&totals);
    Ok(totals.is_success())
}

/// Combine config file settings with command-line overrides
pub fn run_options(cli: &Cli, config: &Config) -> RunOptions {
    RunOptions {
        mode: EqualityMode::from_strict(cli.strict_objects || config.comparison.strict_objects),
        case_timeout: Duration::from_secs(cli.timeout.unwrap_or(config.timeouts.case_secs)),
    }
}

fn print_totals(totals: &RunTotals) {
    let line = format!(
        "{} scripts, {} passed, {} failed, {} divergent",
        totals.scripts, totals.passed, totals.failed, totals.divergences
    );
    if totals.is_success() {
        println!("\n{} {}\n", "✓".green().bold(), line.green().bold());
    } else {
        println!("\n{} {}\n", "✗".red().bold(), line.red().bold());
    }
}
