//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use crate::common::parse_endpoint;

#[derive(Parser, Debug)]
#[command(name = "difftest", about = "Differential query tests against two servers")]
#[command(version, long_about = None)]
pub struct Cli {
    /// Reference server endpoint (host:port or port)
    #[arg(value_parser = endpoint)]
    pub reference: String,

    /// Candidate server endpoint (host:port or port)
    #[arg(value_parser = endpoint)]
    pub candidate: String,

    /// Test scripts to run, each in its own session
    #[arg(required = true)]
    pub scripts: Vec<PathBuf>,

    /// Configuration file (default: the user config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Per-case timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Require objects to have identical key sets
    #[arg(long)]
    pub strict_objects: bool,

    /// Enable debug logging
    #[arg(long, short)]
    pub verbose: bool,
}

fn endpoint(raw: &str) -> Result<String, String> {
    parse_endpoint(raw).ok_or_else(|| format!("invalid endpoint '{}', expected host:port", raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arguments() {
        let cli = Cli::try_parse_from([
            "difftest",
            "28015",
            "db.local:28016",
            "a.yaml",
            "b.yaml",
            "--timeout",
            "5",
            "--strict-objects",
        ])
        .unwrap();
        assert_eq!(cli.reference, "127.0.0.1:28015");
        assert_eq!(cli.candidate, "db.local:28016");
        assert_eq!(cli.scripts.len(), 2);
        assert_eq!(cli.timeout, Some(5));
        assert!(cli.strict_objects);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_rejects_bad_endpoint_and_missing_scripts() {
        assert!(Cli::try_parse_from(["difftest", "nope", "28016", "a.yaml"]).is_err());
        assert!(Cli::try_parse_from(["difftest", "28015", "28016"]).is_err());
    }
}
