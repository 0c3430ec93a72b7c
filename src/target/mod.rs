// kubebackup/src/target/mod.rs
use anyhow::{Context, Result};
use std::fmt;
use tracing::{info, warn};

use k8s_openapi::api::core::v1::Pod;

use crate::cluster::{Cluster, PodExt, is_running};
use crate::config::{BackupConfig, TargetSelector};
use crate::errors::AppError;

/// The single container a backup runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} (container {})", self.namespace, self.pod, self.container)
    }
}

/// Namespace given on the command line, or the one of the current context.
pub async fn resolve_namespace<C: Cluster>(cluster: &C, config: &BackupConfig) -> Result<String> {
    match &config.namespace {
        Some(ns) => Ok(ns.clone()),
        None => cluster
            .current_namespace()
            .await
            .context("Failed to determine the current namespace"),
    }
}

/// Finds exactly one running, ready container to back up.
pub async fn resolve_target<C: Cluster>(
    cluster: &C,
    config: &BackupConfig,
) -> crate::errors::Result<ResolvedTarget> {
    let namespace = resolve_namespace(cluster, config).await.map_err(AppError::Target)?;

    let pod = match &config.target {
        Some(TargetSelector::Pod(name)) => cluster
            .get_pod(&namespace, name)
            .await
            .map_err(AppError::Target)?
            .ok_or_else(|| {
                AppError::Target(anyhow::anyhow!(
                    "Pod '{}' not found in namespace '{}'",
                    name,
                    namespace
                ))
            })?,
        Some(TargetSelector::Selector(selector)) => {
            let pods = cluster
                .list_pods(&namespace, selector)
                .await
                .map_err(AppError::Target)?;
            pick_single_pod(pods, &namespace, selector)?
        }
        None => {
            return Err(AppError::InvalidInvocation(
                "a pod name or selector is required".to_string(),
            ));
        }
    };

    let container = select_container(&pod, config.container.as_deref()).map_err(AppError::Target)?;
    ensure_ready(&pod, &container).map_err(AppError::Target)?;

    let target = ResolvedTarget {
        namespace,
        pod: pod.name().to_string(),
        container,
    };
    info!("🎯 Resolved backup target: {}", target);
    Ok(target)
}

fn pick_single_pod(mut pods: Vec<Pod>, namespace: &str, selector: &str) -> crate::errors::Result<Pod> {
    match pods.len() {
        0 => {
            warn!("⚠️ No pods found matching selector '{}' in namespace '{}'", selector, namespace);
            Err(AppError::NoTarget {
                namespace: namespace.to_string(),
                selector: selector.to_string(),
            })
        }
        1 => Ok(pods.remove(0)),
        _ => {
            let names: Vec<&str> = pods.iter().map(|p| p.name()).collect();
            Err(AppError::Target(anyhow::anyhow!(
                "Selector '{}' in namespace '{}' is ambiguous: matched {} pods ({})",
                selector,
                namespace,
                names.len(),
                names.join(", ")
            )))
        }
    }
}

/// Uses the requested container, or the first one declared in the pod spec.
fn select_container(pod: &Pod, requested: Option<&str>) -> Result<String> {
    let containers = pod.container_names();
    match requested {
        Some(name) => {
            if containers.contains(&name) {
                Ok(name.to_string())
            } else {
                Err(anyhow::anyhow!(
                    "Container '{}' not found in pod '{}'. Available containers: {}",
                    name,
                    pod.name(),
                    containers.join(", ")
                ))
            }
        }
        None => {
            let first = containers
                .first()
                .with_context(|| format!("Pod '{}' has no containers", pod.name()))?;
            info!(
                "No container specified, using first container '{}' of pod '{}'",
                first,
                pod.name()
            );
            Ok(first.to_string())
        }
    }
}

/// Checks the pod and container state once. A pod that is still starting
/// fails here instead of being waited for.
fn ensure_ready(pod: &Pod, container: &str) -> Result<()> {
    let phase = pod.phase().unwrap_or("Unknown");
    if phase != "Running" {
        anyhow::bail!("Pod '{}' is not running (phase: {})", pod.name(), phase);
    }

    let status = pod.container_status(container).with_context(|| {
        format!(
            "Pod '{}' reports no status for container '{}'",
            pod.name(),
            container
        )
    })?;

    if !is_running(status) {
        anyhow::bail!(
            "Container '{}' in pod '{}' is not running",
            container,
            pod.name()
        );
    }
    if !status.ready {
        anyhow::bail!(
            "Container '{}' in pod '{}' is not ready",
            container,
            pod.name()
        );
    }
    Ok(())
}
