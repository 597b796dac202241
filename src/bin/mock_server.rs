//! Mock query server binary
//!
//! Serves the reference engine over TCP. With fault injection flags it
//! stands in for a divergent candidate implementation.

use clap::Parser;
use difftest::common::config::Config;
use difftest::common::logging;
use difftest::server::{EngineOptions, QueryServer};

#[derive(Parser, Debug)]
#[command(name = "mock_server", about = "Reference query server for difftest")]
struct Args {
    /// Port to listen on (0 picks a free port)
    #[arg(long, short, default_value_t = 28015)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Elements per cursor batch (default from config)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Make calls to this function fail (repeatable)
    #[arg(long = "broken")]
    broken_functions: Vec<String>,

    /// Return sequences in reverse order
    #[arg(long)]
    reverse_streams: bool,
}

#[tokio::main]
async fn main() {
    logging::init_server();
    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> difftest::Result<()> {
    let config = Config::load()?;
    let batch_size = args.batch_size.unwrap_or(config.server.batch_size);
    let options = EngineOptions {
        broken_functions: args.broken_functions,
        reverse_streams: args.reverse_streams,
    };

    let server = QueryServer::bind(&format!("{}:{}", args.host, args.port), options, batch_size).await?;
    // Printed on stdout so scripts can pick up an ephemeral port
    println!("{}", server.local_addr()?);

    tokio::select! {
        result = server.serve() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            Ok(())
        }
    }
}
