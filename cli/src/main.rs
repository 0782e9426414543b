/*!

This is the command line interface for running Sonobuoy diagnostics against a Kubernetes cluster.

!*/

mod delete;
mod duration;
mod gen;
mod logs;
mod retrieve;
mod run;
mod status;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Builder;
use log::{warn, LevelFilter};
use sonobuoy_model::SonobuoyManager;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// The command line interface for running Sonobuoy diagnostics and conformance tests.
#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Args {
    /// Set logging verbosity [trace|debug|info|warn|error]. If the environment variable `RUST_LOG`
    /// is present, it overrides the default logging behavior. See https://docs.rs/env_logger/latest
    #[clap(long = "log-level", default_value = "info")]
    log_level: LevelFilter,
    /// Path to the kubeconfig file. Also can be passed with the KUBECONFIG environment variable.
    #[clap(long = "kubeconfig")]
    kubeconfig: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Parser)]
enum Command {
    /// Start a run and optionally wait for it to finish.
    Run(run::Run),
    /// Print the manifest of a run without contacting the cluster.
    Gen(gen::Gen),
    /// Get the status of a run.
    Status(status::Status),
    /// Get the logs of every container of a run.
    Logs(logs::Logs),
    /// Download the results of a run.
    Retrieve(retrieve::Retrieve),
    /// Delete a run and everything it created.
    Delete(delete::Delete),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logger(args.log_level);
    if let Err(e) = run(args).await {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    match args.command {
        // Generating a manifest never needs a cluster.
        Command::Gen(gen) => gen.run(),
        Command::Run(run) => run.run(connect(&args.kubeconfig).await?, cancel_on_ctrl_c()).await,
        Command::Status(status) => status.run(connect(&args.kubeconfig).await?).await,
        Command::Logs(logs) => logs.run(connect(&args.kubeconfig).await?).await,
        Command::Retrieve(retrieve) => retrieve.run(connect(&args.kubeconfig).await?).await,
        Command::Delete(delete) => {
            delete
                .run(connect(&args.kubeconfig).await?, cancel_on_ctrl_c())
                .await
        }
    }
}

async fn connect(kubeconfig: &Option<PathBuf>) -> Result<SonobuoyManager> {
    match kubeconfig {
        Some(path) => SonobuoyManager::new_from_kubeconfig_path(path)
            .await
            .context(format!(
                "Unable to create sonobuoy client from path '{}'",
                path.display()
            )),
        None => SonobuoyManager::new()
            .await
            .context("Unable to create default sonobuoy client"),
    }
}

/// A token that is cancelled when the operator presses Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => token.cancel(),
            Err(e) => warn!("Unable to listen for Ctrl-C: {}", e),
        }
    });
    cancel
}

/// Initialize the logger with the value passed by `--log-level` (or its default) when the
/// `RUST_LOG` environment variable is not present. If present, the `RUST_LOG` environment variable
/// overrides `--log-level`/`level`.
fn init_logger(level: LevelFilter) {
    match std::env::var(env_logger::DEFAULT_FILTER_ENV).ok() {
        Some(_) => {
            // RUST_LOG exists; env_logger will use it.
            Builder::from_default_env().init();
        }
        None => {
            // RUST_LOG does not exist; use default log level for this crate and its library.
            Builder::new()
                .filter(Some(env!("CARGO_CRATE_NAME")), level)
                .filter(Some("sonobuoy_model"), level)
                .init();
        }
    }
}
