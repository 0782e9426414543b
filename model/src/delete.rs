use crate::clients::{self, ClusterGateway, ErrorClass};
use crate::config::validate_namespace;
use crate::constants::{
    COMPONENT_SONOBUOY, DEFAULT_NAMESPACE, DELETE_POLL_INTERVAL, LABEL_COMPONENT,
    LABEL_E2E_FRAMEWORK, LABEL_E2E_RUN, LABEL_NAMESPACE,
};
use crate::error::{self, Result};
use crate::output::ProgressPrinter;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use log::{debug, info, warn};
use snafu::{ensure, ResultExt};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// What to delete and whether to wait for it to be gone.
#[derive(Debug, Clone)]
pub struct DeleteConfig {
    pub namespace: String,
    /// Delete the cluster RBAC of every run, not just the one in `namespace`.
    pub delete_all: bool,
    /// Also delete the namespaces left behind by the e2e framework.
    pub e2e_namespaces: bool,
    /// Wait up to this long for everything to be gone. `None` or zero returns right after the
    /// deletes are issued.
    pub wait: Option<Duration>,
    pub poll_interval: Duration,
}

impl Default for DeleteConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            delete_all: false,
            e2e_namespaces: false,
            wait: None,
            poll_interval: DELETE_POLL_INTERVAL,
        }
    }
}

impl DeleteConfig {
    pub fn validate(&self) -> Result<()> {
        validate_namespace(&self.namespace)?;
        ensure!(
            !self.poll_interval.is_zero(),
            error::InvalidConfigSnafu {
                reason: "the poll interval must be greater than zero"
            }
        );
        Ok(())
    }

    /// The label selector of the cluster roles and bindings to delete.
    pub fn rbac_selector(&self) -> String {
        if self.delete_all {
            format!("{}={}", LABEL_COMPONENT, COMPONENT_SONOBUOY)
        } else {
            format!(
                "{}={},{}={}",
                LABEL_COMPONENT, COMPONENT_SONOBUOY, LABEL_NAMESPACE, self.namespace
            )
        }
    }

    fn wait_duration(&self) -> Option<Duration> {
        self.wait.filter(|wait| !wait.is_zero())
    }
}

/// One observation of a deletion condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionProgress {
    /// What is still blocking, or what is done.
    pub message: String,
    pub done: bool,
}

impl ConditionProgress {
    fn pending<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            done: false,
        }
    }

    fn done<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            done: true,
        }
    }
}

/// Something that has to be true before a deletion is complete.
#[async_trait]
pub trait DeletionCondition: Send + Sync {
    async fn check(&self, gateway: &dyn ClusterGateway) -> Result<ConditionProgress>;
}

/// The run's namespace no longer exists.
#[derive(Debug, Clone)]
pub struct NamespaceGone {
    pub namespace: String,
}

#[async_trait]
impl DeletionCondition for NamespaceGone {
    async fn check(&self, gateway: &dyn ClusterGateway) -> Result<ConditionProgress> {
        match gateway.get_namespace(&self.namespace).await {
            Ok(namespace) => {
                let phase = namespace
                    .status
                    .and_then(|status| status.phase)
                    .unwrap_or_else(|| "present".to_string());
                Ok(ConditionProgress::pending(format!(
                    "Namespace '{}' is {}",
                    self.namespace, phase
                )))
            }
            Err(e) if e.is_not_found() => Ok(ConditionProgress::done(format!(
                "Namespace '{}' has been deleted",
                self.namespace
            ))),
            Err(source) => Err(error::Error::Client {
                action: format!("get namespace '{}'", self.namespace),
                source,
            }),
        }
    }
}

/// No cluster role or binding matches the selector.
#[derive(Debug, Clone)]
pub struct RbacGone {
    pub label_selector: String,
}

#[async_trait]
impl DeletionCondition for RbacGone {
    async fn check(&self, gateway: &dyn ClusterGateway) -> Result<ConditionProgress> {
        let bindings = gateway
            .list_cluster_role_bindings(&self.label_selector)
            .await
            .context(error::ClientSnafu {
                action: "list cluster role bindings",
            })?;
        let roles = gateway
            .list_cluster_roles(&self.label_selector)
            .await
            .context(error::ClientSnafu {
                action: "list cluster roles",
            })?;
        if bindings.is_empty() && roles.is_empty() {
            Ok(ConditionProgress::done(
                "Cluster role bindings and cluster roles have been deleted",
            ))
        } else {
            Ok(ConditionProgress::pending(format!(
                "Waiting on {} cluster role binding(s) and {} cluster role(s) to be deleted",
                bindings.len(),
                roles.len()
            )))
        }
    }
}

/// No namespace created by the e2e framework is left.
#[derive(Debug, Clone, Default)]
pub struct E2eNamespacesGone;

#[async_trait]
impl DeletionCondition for E2eNamespacesGone {
    async fn check(&self, gateway: &dyn ClusterGateway) -> Result<ConditionProgress> {
        let remaining = e2e_namespaces(gateway).await?;
        if remaining.is_empty() {
            Ok(ConditionProgress::done("E2E namespaces have been deleted"))
        } else {
            Ok(ConditionProgress::pending(format!(
                "Waiting on {} e2e namespace(s) to be deleted",
                remaining.len()
            )))
        }
    }
}

/// Done once every condition is done. The messages of all conditions are reported, one per
/// line, so the one still blocking is visible.
pub struct AllOf(pub Vec<Box<dyn DeletionCondition>>);

#[async_trait]
impl DeletionCondition for AllOf {
    async fn check(&self, gateway: &dyn ClusterGateway) -> Result<ConditionProgress> {
        let mut messages = Vec::with_capacity(self.0.len());
        let mut done = true;
        for condition in &self.0 {
            let progress = condition.check(gateway).await?;
            done &= progress.done;
            messages.push(progress.message);
        }
        Ok(ConditionProgress {
            message: messages.join("\n"),
            done,
        })
    }
}

/// Namespaces created by the e2e framework carry both of its labels.
pub fn is_e2e_namespace(labels: &BTreeMap<String, String>) -> bool {
    labels.contains_key(LABEL_E2E_FRAMEWORK) && labels.contains_key(LABEL_E2E_RUN)
}

async fn e2e_namespaces(gateway: &dyn ClusterGateway) -> Result<Vec<Namespace>> {
    let selector = format!("{},{}", LABEL_E2E_FRAMEWORK, LABEL_E2E_RUN);
    let namespaces = gateway
        .list_namespaces(Some(&selector))
        .await
        .context(error::ClientSnafu {
            action: "list e2e namespaces",
        })?;
    Ok(namespaces
        .into_iter()
        .filter(|namespace| is_e2e_namespace(namespace.labels()))
        .collect())
}

/// Not-found and conflict mean somebody else already did or is doing the work.
fn absorb(result: clients::Result<()>, what: &str) -> Result<()> {
    match result {
        Ok(()) => {
            debug!("Deleting {}", what);
            Ok(())
        }
        Err(e) => match e.class() {
            ErrorClass::NotFound => {
                info!("{} already deleted", what);
                Ok(())
            }
            ErrorClass::Conflict => {
                warn!("{} delete in progress", what);
                Ok(())
            }
            _ => Err(error::Error::Client {
                action: format!("delete {}", what),
                source: e,
            }),
        },
    }
}

/// Issue every delete and return the condition that tells when they have all gone through.
async fn start_deletion(
    gateway: &dyn ClusterGateway,
    config: &DeleteConfig,
) -> Result<Box<dyn DeletionCondition>> {
    let mut conditions: Vec<Box<dyn DeletionCondition>> = Vec::new();

    absorb(
        gateway.delete_namespace(&config.namespace).await,
        &format!("Namespace '{}'", config.namespace),
    )?;
    conditions.push(Box::new(NamespaceGone {
        namespace: config.namespace.clone(),
    }));

    let selector = config.rbac_selector();
    absorb(
        gateway.delete_cluster_role_bindings(&selector).await,
        &format!("Cluster role bindings matching '{}'", selector),
    )?;
    absorb(
        gateway.delete_cluster_roles(&selector).await,
        &format!("Cluster roles matching '{}'", selector),
    )?;
    conditions.push(Box::new(RbacGone {
        label_selector: selector,
    }));

    if config.e2e_namespaces {
        for namespace in e2e_namespaces(gateway).await? {
            let name = namespace.name_any();
            absorb(
                gateway.delete_namespace(&name).await,
                &format!("E2E namespace '{}'", name),
            )?;
        }
        conditions.push(Box::new(E2eNamespacesGone));
    }

    Ok(Box::new(AllOf(conditions)))
}

/// Delete a run and, when `config.wait` is set, wait until it is gone.
pub async fn delete(
    gateway: &dyn ClusterGateway,
    config: &DeleteConfig,
    printer: &mut ProgressPrinter,
    cancel: &CancellationToken,
) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => error::CancelledSnafu.fail(),
        result = delete_to_completion(gateway, config, printer) => result,
    }
}

async fn delete_to_completion(
    gateway: &dyn ClusterGateway,
    config: &DeleteConfig,
    printer: &mut ProgressPrinter,
) -> Result<()> {
    config.validate()?;
    let condition = start_deletion(gateway, config).await?;
    let wait = match config.wait_duration() {
        Some(wait) => wait,
        None => return Ok(()),
    };
    tokio::time::timeout(
        wait,
        poll_until_done(gateway, condition.as_ref(), config.poll_interval, printer),
    )
    .await
    .map_err(|_| error::Error::WaitTimeout { duration: wait })?
}

async fn poll_until_done(
    gateway: &dyn ClusterGateway,
    condition: &dyn DeletionCondition,
    poll_interval: Duration,
    printer: &mut ProgressPrinter,
) -> Result<()> {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let progress = condition.check(gateway).await?;
        printer.update(&progress.message);
        if progress.done {
            printer.finish("Deletion complete");
            return Ok(());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn e2e_namespaces_need_both_labels() {
        let both = btreemap! {
            LABEL_E2E_FRAMEWORK.to_string() => "kubectl".to_string(),
            LABEL_E2E_RUN.to_string() => "1234".to_string(),
        };
        let framework = btreemap! { LABEL_E2E_FRAMEWORK.to_string() => "kubectl".to_string() };
        let run = btreemap! { LABEL_E2E_RUN.to_string() => "1234".to_string() };
        assert!(is_e2e_namespace(&both));
        assert!(!is_e2e_namespace(&framework));
        assert!(!is_e2e_namespace(&run));
        assert!(!is_e2e_namespace(&BTreeMap::new()));
    }

    #[test]
    fn rbac_selectors() {
        let scoped = DeleteConfig {
            namespace: "conformance".to_string(),
            ..Default::default()
        };
        assert_eq!(
            scoped.rbac_selector(),
            "component=sonobuoy,namespace=conformance"
        );
        let all = DeleteConfig {
            delete_all: true,
            ..scoped
        };
        assert_eq!(all.rbac_selector(), "component=sonobuoy");
    }

    #[test]
    fn absorbed_delete_errors() {
        let not_found = clients::Error::new(ErrorClass::NotFound, "gone");
        let conflict = clients::Error::new(ErrorClass::Conflict, "terminating");
        let forbidden = clients::Error::new(ErrorClass::Other, "forbidden");
        assert!(absorb(Err(not_found), "Namespace 'sonobuoy'").is_ok());
        assert!(absorb(Err(conflict), "Namespace 'sonobuoy'").is_ok());
        assert!(absorb(Err(forbidden), "Namespace 'sonobuoy'").is_err());
    }

    #[test]
    fn zero_wait_is_no_wait() {
        let config = DeleteConfig {
            wait: Some(Duration::ZERO),
            ..Default::default()
        };
        assert_eq!(config.wait_duration(), None);
    }
}
