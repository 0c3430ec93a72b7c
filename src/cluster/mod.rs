// kubebackup/src/cluster/mod.rs
pub(crate) mod kubectl;

use anyhow::{Context, Result};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod, Secret};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::process::Child;

use crate::target::ResolvedTarget;

pub use kubectl::Kubectl;

/// The few cluster operations the backup pipeline relies on.
#[allow(async_fn_in_trait)]
pub trait Cluster {
    /// Namespace of the current context, used when no namespace is given.
    async fn current_namespace(&self) -> Result<String>;

    /// Fetches a secret from the current namespace. `None` when it does not exist.
    async fn get_secret(&self, name: &str) -> Result<Option<SecretData>>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>>;

    /// Runs a short command in the container and returns its trimmed stdout.
    async fn exec_output(&self, target: &ResolvedTarget, command: &[String]) -> Result<String>;

    /// Starts a command in the container with stdout piped back to us.
    fn spawn_exec(&self, target: &ResolvedTarget, command: &[String]) -> Result<Child>;

    /// The same cluster access, authenticated with another kubeconfig.
    fn with_kubeconfig(&self, kubeconfig: Option<&Path>) -> Self
    where
        Self: Sized;
}

/// Read helpers over the optional fields of a Pod.
pub trait PodExt {
    fn name(&self) -> &str;

    fn phase(&self) -> Option<&str>;

    /// Container names in the order they are declared in the pod spec.
    fn container_names(&self) -> Vec<&str>;

    fn container_status(&self, container: &str) -> Option<&ContainerStatus>;
}

impl PodExt for Pod {
    fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    fn phase(&self) -> Option<&str> {
        self.status.as_ref()?.phase.as_deref()
    }

    fn container_names(&self) -> Vec<&str> {
        self.spec
            .iter()
            .flat_map(|spec| spec.containers.iter())
            .map(|c| c.name.as_str())
            .collect()
    }

    fn container_status(&self, container: &str) -> Option<&ContainerStatus> {
        self.status
            .as_ref()?
            .container_statuses
            .as_ref()?
            .iter()
            .find(|s| s.name == container)
    }
}

/// Whether the container state reported by the kubelet is `running`.
pub fn is_running(status: &ContainerStatus) -> bool {
    status.state.as_ref().and_then(|s| s.running.as_ref()).is_some()
}

/// `kubectl get pods -o json` reports `kind: List`, which `k8s_openapi::List`
/// refuses to deserialize, so only the items are read.
#[derive(Debug, Deserialize)]
pub(crate) struct PodItems {
    #[serde(default)]
    pub items: Vec<Pod>,
}

/// Decoded key/value pairs of a secret.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretData {
    values: BTreeMap<String, Vec<u8>>,
}

impl From<Secret> for SecretData {
    fn from(secret: Secret) -> Self {
        let values = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, ByteString(bytes))| (key, bytes))
            .collect();
        Self { values }
    }
}

impl SecretData {
    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        self.values.get(key).map(Vec::as_slice)
    }

    /// Returns a field as trimmed UTF-8 text; empty fields count as absent.
    pub fn get_str(&self, key: &str) -> Result<Option<String>> {
        match self.values.get(key) {
            Some(bytes) => {
                let text = String::from_utf8(bytes.clone())
                    .with_context(|| format!("Secret field '{}' is not valid UTF-8", key))?;
                let text = text.trim().to_string();
                Ok(if text.is_empty() { None } else { Some(text) })
            }
            None => Ok(None),
        }
    }
}
