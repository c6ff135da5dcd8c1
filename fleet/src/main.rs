mod cli;
mod model;
mod output;
mod provision;
mod run;
mod run_error;
mod suites;
mod worker;

use clap::Parser;
use fleet_core::ExitCode;
use mimalloc::MiMalloc;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Workers log to stdout so the provisioner can relay it; everything else logs to stderr.
fn init_tracing(worker: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if worker {
        fmt.with_ansi(false).with_writer(std::io::stdout).init();
    } else {
        fmt.with_writer(std::io::stderr).init();
    }
}

#[tokio::main]
async fn main() {
    let cli = match cli::Cli::try_parse() {
        Ok(v) => v,
        Err(err) => {
            use clap::error::ErrorKind;
            let _ = err.print();
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::Success.as_i32(),
                _ => ExitCode::InvalidInput.as_i32(),
            };
            std::process::exit(code);
        }
    };

    init_tracing(matches!(cli.command, cli::Command::Worker));

    let res = match cli.command {
        cli::Command::Bench(args) => run::bench(args).await,
        cli::Command::Simulate(args) => run::simulate(args).await,
        cli::Command::Worker => worker::serve().await,
        cli::Command::List => run::list(),
    };

    let code = match res {
        Ok(code) => code.as_i32(),
        Err(err) => {
            eprintln!("{err}");
            err.exit_code().as_i32()
        }
    };
    std::process::exit(code);
}
