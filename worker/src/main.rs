use argh::FromArgs;
use env_logger::Builder;
use log::{info, LevelFilter};
use sonobuoy_model::clients::KubeGateway;
use sonobuoy_worker::{
    run_worker, ContainerMonitor, Error, NoMonitor, PodMonitor, ResultScope, Result,
    WorkerConfig,
};
use std::sync::Arc;

#[derive(FromArgs)]
/// Waits for a plugin to finish and submits its results to the aggregator.
struct Args {
    /// set logging verbosity [trace|debug|info|warn|error]. If the environment variable `RUST_LOG`
    /// is present, it overrides the default logging behavior. See https://docs.rs/env_logger/latest
    #[argh(option, default = "LevelFilter::Info")]
    log_level: LevelFilter,

    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
enum Command {
    Global(Global),
    SingleNode(SingleNode),
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "global",
    description = "submit the results of a plugin that runs once per cluster"
)]
struct Global {}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "single-node",
    description = "submit the results of a plugin that runs on every node"
)]
struct SingleNode {}

#[tokio::main]
async fn main() {
    let args: Args = argh::from_env();
    init_logger(args.log_level);
    if let Err(e) = run(args).await {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = WorkerConfig::from_env()?;
    let scope = match args.command {
        Command::Global(_) => ResultScope::Global,
        Command::SingleNode(_) => {
            if config.node_name.is_empty() {
                return Err(Error::InvalidConfig {
                    reason: "NODE_NAME is required for single-node plugins".to_string(),
                });
            }
            ResultScope::Node(config.node_name.clone())
        }
    };
    let monitor = monitor(&config).await?;
    run_worker(&config, scope, monitor.as_ref()).await?;
    info!("Results submitted");
    Ok(())
}

/// Watch the worker's own pod when it knows it, otherwise rely on the done file alone.
async fn monitor(config: &WorkerConfig) -> Result<Box<dyn ContainerMonitor>> {
    match (&config.pod_namespace, &config.pod_name) {
        (Some(namespace), Some(pod)) => {
            let gateway = KubeGateway::try_default()
                .await
                .map_err(|source| Error::Client { source })?;
            Ok(Box::new(PodMonitor::new(
                Arc::new(gateway),
                namespace.as_str(),
                pod.as_str(),
            )))
        }
        _ => Ok(Box::new(NoMonitor)),
    }
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
            // RUST_LOG does not exist; use default log level for the worker and its library.
            Builder::new()
                .filter(Some(env!("CARGO_CRATE_NAME")), level)
                .filter(Some("sonobuoy_model"), level)
                .init();
        }
    }
}
