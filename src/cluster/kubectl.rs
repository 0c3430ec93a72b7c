// kubebackup/src/cluster/kubectl.rs
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::{Child, Command};
use tracing::debug;

use k8s_openapi::api::core::v1::{Pod, Secret};

use super::{Cluster, PodItems, SecretData};
use crate::target::ResolvedTarget;

const SERVICE_ACCOUNT_NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";
const FALLBACK_NAMESPACE: &str = "default";

/// Talks to the cluster by shelling out to the kubectl binary.
#[derive(Debug, Clone)]
pub struct Kubectl {
    binary: PathBuf,
    kubeconfig: Option<PathBuf>,
}

impl Kubectl {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary, kubeconfig: None }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(kubeconfig) = &self.kubeconfig {
            cmd.arg("--kubeconfig").arg(kubeconfig);
        }
        cmd.stdin(Stdio::null());
        cmd
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        debug!(?args, "running kubectl");
        let output = self
            .command()
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to execute kubectl {}", args.join(" ")))?;

        if !output.status.success() {
            return Err(anyhow::anyhow!(
                "kubectl {} failed with status: {}\nStderr: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(output)
    }

    fn exec_args(target: &ResolvedTarget, command: &[String]) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "--namespace".to_string(),
            target.namespace.clone(),
            target.pod.clone(),
            "--container".to_string(),
            target.container.clone(),
            "--".to_string(),
        ];
        args.extend(command.iter().cloned());
        args
    }
}

impl Cluster for Kubectl {
    async fn current_namespace(&self) -> Result<String> {
        let from_context = self
            .run(&["config", "view", "--minify", "--output", "jsonpath={..namespace}"])
            .await
            .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string());

        match from_context {
            Ok(ns) if !ns.is_empty() => return Ok(ns),
            Ok(_) => debug!("current kubectl context has no namespace"),
            Err(e) => debug!("could not read namespace from kubectl context: {:#}", e),
        }

        match tokio::fs::read_to_string(SERVICE_ACCOUNT_NAMESPACE_FILE).await {
            Ok(ns) if !ns.trim().is_empty() => Ok(ns.trim().to_string()),
            _ => Ok(FALLBACK_NAMESPACE.to_string()),
        }
    }

    async fn get_secret(&self, name: &str) -> Result<Option<SecretData>> {
        let output = self
            .run(&["get", "secret", name, "--ignore-not-found", "--output", "json"])
            .await
            .with_context(|| format!("Failed to look up secret '{}'", name))?;

        parse_secret(name, &output.stdout)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        let output = self
            .run(&["get", "pod", name, "--namespace", namespace, "--ignore-not-found", "--output", "json"])
            .await
            .with_context(|| format!("Failed to look up pod '{}' in namespace '{}'", name, namespace))?;

        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let pod: Pod = serde_json::from_slice(&output.stdout)
            .with_context(|| format!("Failed to parse pod '{}' returned by kubectl", name))?;
        Ok(Some(pod))
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        let output = self
            .run(&["get", "pods", "--namespace", namespace, "--selector", selector, "--output", "json"])
            .await
            .with_context(|| format!("Failed to list pods matching '{}' in namespace '{}'", selector, namespace))?;

        let list: PodItems = serde_json::from_slice(&output.stdout)
            .context("Failed to parse pod list returned by kubectl")?;
        Ok(list.items)
    }

    async fn exec_output(&self, target: &ResolvedTarget, command: &[String]) -> Result<String> {
        let args = Self::exec_args(target, command);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run(&args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn spawn_exec(&self, target: &ResolvedTarget, command: &[String]) -> Result<Child> {
        self.command()
            .args(Self::exec_args(target, command))
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start kubectl exec in {}", target))
    }

    /// Same binary, pointed at an explicit kubeconfig file.
    fn with_kubeconfig(&self, kubeconfig: Option<&Path>) -> Self {
        Self {
            binary: self.binary.clone(),
            kubeconfig: kubeconfig.map(Path::to_path_buf),
        }
    }
}

/// Empty output means `--ignore-not-found` found nothing.
fn parse_secret(name: &str, stdout: &[u8]) -> Result<Option<SecretData>> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let secret: Secret = serde_json::from_slice(stdout)
        .with_context(|| format!("Failed to parse secret '{}' returned by kubectl", name))?;
    Ok(Some(SecretData::from(secret)))
}
