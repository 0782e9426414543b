use crate::clients::{ClusterGateway, ErrorClass};
use crate::error::{self, Result};
use kube::api::DynamicObject;
use log::{debug, info, warn};
use serde::Deserialize;
use snafu::{OptionExt, ResultExt};

/// Namespaced objects without an explicit namespace are created here, like `kubectl` does.
const DEFAULT_OBJECT_NAMESPACE: &str = "default";

/// Create every document of `manifest`, in order. Empty documents are skipped.
///
/// Cluster scoped objects that already exist are left alone since they may be shared with a
/// previous run. A namespaced object that already exists fails the apply, which keeps two runs
/// from sharing a namespace.
pub async fn apply_manifest(gateway: &dyn ClusterGateway, manifest: &[u8]) -> Result<()> {
    for (index, document) in serde_yaml::Deserializer::from_slice(manifest).enumerate() {
        let value =
            serde_json::Value::deserialize(document).context(error::ApplyDecodeSnafu { index })?;
        if is_empty_document(&value) {
            debug!("Skipping empty document {}", index);
            continue;
        }
        let object: DynamicObject =
            serde_json::from_value(value).map_err(|e| error::Error::InvalidConfig {
                reason: format!("document {} is not a Kubernetes object: {}", index, e),
            })?;
        apply_object(gateway, index, object).await?;
    }
    Ok(())
}

fn is_empty_document(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

async fn apply_object(gateway: &dyn ClusterGateway, index: usize, object: DynamicObject) -> Result<()> {
    let types = object.types.as_ref().context(error::ApplyMissingTypeSnafu {
        index,
        what: "apiVersion and kind",
    })?;
    let name = object
        .metadata
        .name
        .clone()
        .context(error::ApplyMissingTypeSnafu {
            index,
            what: "metadata.name",
        })?;
    let kind = types.kind.clone();

    let mapping = gateway
        .resolve(&types.api_version, &types.kind)
        .await
        .context(error::ApplyResolveSnafu { kind: &kind })?;
    let namespace = if mapping.namespaced {
        Some(
            object
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| DEFAULT_OBJECT_NAMESPACE.to_string()),
        )
    } else {
        None
    };

    match gateway
        .create(&mapping, namespace.as_deref(), &object)
        .await
    {
        Ok(_) => {
            info!("Created {} '{}'", kind, name);
            Ok(())
        }
        Err(e) if !mapping.namespaced && e.class() == ErrorClass::AlreadyExists => {
            warn!("{} '{}' already exists, continuing", kind, name);
            Ok(())
        }
        Err(source) => Err(error::Error::Apply { kind, name, source }),
    }
}
