/*!

This library drives conformance runs on a Kubernetes cluster. It checks that the cluster is ready,
creates the aggregator and its plugins, waits on the status the aggregator publishes, merges the
logs of every plugin container, retrieves the results archive and tears the run down again.

All cluster access goes through the [`clients::ClusterGateway`] trait.

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

pub use apply::apply_manifest;
pub use config::{validate_namespace, GenConfig, RunConfig};
pub use delete::{
    delete, is_e2e_namespace, AllOf, ConditionProgress, DeleteConfig, DeletionCondition,
    E2eNamespacesGone, NamespaceGone, RbacGone,
};
pub use error::{Error, Result};
pub use logs::{logs, LogConfig, LogReader};
pub use manager::SonobuoyManager;
pub use manifest::generate_manifest;
pub use output::{ProgressDeduplicator, ProgressPrinter, WaitOutputMode};
pub use plugin::{
    e2e_plugin, focus_regex, group_env_overrides, prepare_plugins, quote_meta, systemd_logs_plugin,
    Driver, E2eMode, EnvOverride, Plugin, PluginConfig, PluginTransform,
};
pub use preflight::{preflight_checks, PreflightConfig, PreflightError};
pub use retrieve::{
    extract_archives, retrieve, retrieve_results, unique_filename, untar_all, untar_gzip,
    untar_stream, RetrieveConfig,
};
pub use run::{run, server_version, status, wait_for_run};
pub use status::{AggregatorStatus, PluginStatus, ProgressUpdate, RunStatus};
pub use version::{check_version, KubeVersion, VersionError};

mod apply;
pub mod clients;
mod config;
pub mod constants;
mod delete;
mod error;
mod logs;
mod manager;
mod manifest;
mod output;
mod plugin;
mod preflight;
mod retrieve;
mod run;
mod status;
mod version;
