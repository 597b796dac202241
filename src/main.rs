//! difftest - differential query test runner
//!
//! Runs the same test scripts against a reference and a candidate query
//! server and reports every case where either one misses the expectation.

use clap::Parser;
use difftest::{cli, commands::Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli::run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    }
}
