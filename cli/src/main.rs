//! testbay - device pool reservation and multi-role test orchestration

use clap::Parser;
use tracing_subscriber::EnvFilter;

use testbay_cli::cli::{Cli, error_code_for, exit_code_for, normalize_legacy_args};
use testbay_cli::output::json::format_error;

/// Logs go to stderr so stdout stays clean for results and `--json`.
fn init_tracing(quiet: bool) {
    let default = if quiet { "error" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse_from(normalize_legacy_args(std::env::args()));
    init_tracing(cli.quiet);
    let json = cli.json;

    let code = match cli.run().await {
        Ok(code) => code,
        Err(err) => {
            let code = exit_code_for(&err);
            if json {
                match format_error(&format!("{err:#}"), error_code_for(&err)) {
                    Ok(text) => println!("{text}"),
                    Err(_) => eprintln!("Error: {err:#}"),
                }
            } else {
                eprintln!("Error: {err:#}");
            }
            code
        }
    };
    std::process::exit(code);
}
