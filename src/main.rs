use std::path::Path;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use ownerlink::cli::{Cli, Command, run_pair_command, run_status_command};
use ownerlink::config::load_dotenv;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    load_dotenv();

    let cli = Cli::parse();
    let dir = Path::new(".");

    match cli.command {
        Command::Pair(args) => run_pair_command(args, dir).await,
        Command::Status => run_status_command(dir),
    }
}

/// `RUST_LOG` filters (default `ownerlink=info`); `LOG_FORMAT=json` switches
/// to JSON lines. Logs go to stderr so operator output stays on stdout.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ownerlink=info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
