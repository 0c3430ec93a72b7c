// kubebackup/src/secrets/mod.rs
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::cluster::{Cluster, SecretData};
use crate::config::{BackupConfig, Environment};
use crate::errors::AppError;

pub const KUBECONFIG_KEY: &str = "kubeconfig";
pub const ACCESS_KEY_ID_KEY: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_ACCESS_KEY_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const BUCKET_KEY: &str = "S3_BUCKET";
pub const WEBHOOK_KEY: &str = "SLACK_WEBHOOK";

#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"********")
            .finish()
    }
}

/// Everything fetched from the environment or from cluster secrets.
#[derive(Debug, Clone, Default)]
pub struct ResolvedSecrets {
    pub kubeconfig: Option<PathBuf>,
    pub aws: Option<AwsCredentials>,
    pub bucket: Option<String>,
    pub webhook_url: Option<String>,
}

/// Which secrets a task needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecretNeeds {
    pub kubeconfig: bool,
    pub object_store: bool,
    pub webhook: bool,
}

/// Resolves credentials, preferring values already present in the
/// environment. Each secret is fetched from the cluster at most once.
pub struct SecretResolver<'a, C> {
    cluster: &'a C,
    config: &'a BackupConfig,
    env: &'a Environment,
    fetched: HashMap<String, Option<SecretData>>,
}

impl<'a, C: Cluster> SecretResolver<'a, C> {
    pub fn new(cluster: &'a C, config: &'a BackupConfig, env: &'a Environment) -> Self {
        Self {
            cluster,
            config,
            env,
            fetched: HashMap::new(),
        }
    }

    pub async fn resolve(&mut self, needs: SecretNeeds) -> crate::errors::Result<ResolvedSecrets> {
        let mut secrets = ResolvedSecrets::default();
        // The webhook goes first so that later failures can still be reported.
        if needs.webhook {
            secrets.webhook_url = self.resolve_webhook().await?;
        }
        if needs.kubeconfig {
            secrets.kubeconfig = self.resolve_kubeconfig().await?;
        }
        if needs.object_store {
            let (aws, bucket) = self.resolve_object_store().await?;
            secrets.aws = aws;
            secrets.bucket = bucket;
        }
        Ok(secrets)
    }

    async fn fetch(&mut self, purpose: &str, name: &str) -> crate::errors::Result<Option<SecretData>> {
        if name.is_empty() {
            return Err(AppError::InvalidInvocation(format!(
                "no secret name configured for the {}",
                purpose
            )));
        }
        if let Some(cached) = self.fetched.get(name) {
            return Ok(cached.clone());
        }

        info!("🔑 Fetching {} from secret '{}'", purpose, name);
        let secret = self
            .cluster
            .get_secret(name)
            .await
            .with_context(|| format!("Failed to fetch the {} from secret '{}'", purpose, name))
            .map_err(AppError::Secret)?;
        self.fetched.insert(name.to_string(), secret.clone());
        Ok(secret)
    }

    /// Writes the kubeconfig stored in the secret to disk, unless `KUBECONFIG`
    /// already points at one.
    pub async fn resolve_kubeconfig(&mut self) -> crate::errors::Result<Option<PathBuf>> {
        if !self.config.use_kubeconfig_from_secret {
            return Ok(None);
        }
        if let Some(existing) = self.env.get("KUBECONFIG") {
            info!("KUBECONFIG is already set to {}, not fetching it from a secret", existing);
            return Ok(Some(PathBuf::from(existing)));
        }

        let path = match &self.config.kubeconfig_path {
            Some(path) => path.clone(),
            None => default_kubeconfig_path(self.env).map_err(AppError::Secret)?,
        };
        if path.exists() {
            return Err(AppError::Secret(anyhow::anyhow!(
                "Kubeconfig {} already exists, refusing to overwrite it",
                path.display()
            )));
        }

        let name = self.config.kubeconfig_secret.clone();
        let secret = self.fetch("kubeconfig", &name).await?.ok_or_else(|| {
            AppError::Secret(anyhow::anyhow!("Kubeconfig secret '{}' not found", name))
        })?;
        let contents = secret.get_bytes(KUBECONFIG_KEY).ok_or_else(|| {
            AppError::Secret(anyhow::anyhow!(
                "Secret '{}' has no '{}' field",
                name,
                KUBECONFIG_KEY
            ))
        })?;

        write_kubeconfig(&path, contents).map_err(AppError::Secret)?;
        info!("✓ Kubeconfig from secret '{}' written to {}", name, path.display());
        Ok(Some(path))
    }

    /// Credentials and bucket. Without a bucket the backup goes to local disk,
    /// so a missing secret is only fatal once a bucket is known.
    pub async fn resolve_object_store(
        &mut self,
    ) -> crate::errors::Result<(Option<AwsCredentials>, Option<String>)> {
        let mut bucket = self.config.s3.bucket.clone();
        let mut credentials = match (
            self.env.get(ACCESS_KEY_ID_KEY),
            self.env.get(SECRET_ACCESS_KEY_KEY),
        ) {
            (Some(id), Some(key)) => Some(AwsCredentials {
                access_key_id: id.to_string(),
                secret_access_key: key.to_string(),
            }),
            _ => None,
        };

        if credentials.is_some() && bucket.is_some() {
            return Ok((credentials, bucket));
        }

        let name = self.config.aws_secret.clone();
        match self.fetch("object storage credentials", &name).await? {
            Some(secret) => {
                if credentials.is_none() {
                    credentials = credentials_from_secret(&secret).map_err(AppError::Secret)?;
                }
                if bucket.is_none() {
                    bucket = secret.get_str(BUCKET_KEY).map_err(AppError::Secret)?;
                    if let Some(b) = &bucket {
                        info!("Using bucket '{}' from secret '{}'", b, name);
                    }
                }
            }
            None if bucket.is_some() && credentials.is_none() => {
                return Err(AppError::Secret(anyhow::anyhow!(
                    "Bucket is configured but AWS credentials are neither in the environment nor in secret '{}' (not found)",
                    name
                )));
            }
            None => info!("Secret '{}' not found, no object storage configured", name),
        }

        if bucket.is_some() && credentials.is_none() {
            return Err(AppError::Secret(anyhow::anyhow!(
                "Bucket is configured but secret '{}' has no {} / {}",
                name,
                ACCESS_KEY_ID_KEY,
                SECRET_ACCESS_KEY_KEY
            )));
        }
        Ok((credentials, bucket))
    }

    pub async fn resolve_webhook(&mut self) -> crate::errors::Result<Option<String>> {
        if let Some(url) = self.env.get(WEBHOOK_KEY) {
            return Ok(Some(url.to_string()));
        }

        let name = self.config.slack_secret.clone();
        match self.fetch("notification webhook", &name).await? {
            Some(secret) => {
                let url = secret.get_str(WEBHOOK_KEY).map_err(AppError::Secret)?;
                if url.is_none() {
                    warn!("⚠️ Secret '{}' has no {} field, notifications disabled", name, WEBHOOK_KEY);
                }
                Ok(url)
            }
            None => {
                warn!("⚠️ Secret '{}' not found, notifications disabled", name);
                Ok(None)
            }
        }
    }
}

fn credentials_from_secret(secret: &SecretData) -> Result<Option<AwsCredentials>> {
    match (
        secret.get_str(ACCESS_KEY_ID_KEY)?,
        secret.get_str(SECRET_ACCESS_KEY_KEY)?,
    ) {
        (Some(access_key_id), Some(secret_access_key)) => Ok(Some(AwsCredentials {
            access_key_id,
            secret_access_key,
        })),
        _ => Ok(None),
    }
}

fn default_kubeconfig_path(env: &Environment) -> Result<PathBuf> {
    let home = env
        .get("HOME")
        .context("HOME is not set; pass --kubeconfig-path to choose where the kubeconfig is written")?;
    Ok(Path::new(home).join(".kube").join("config"))
}

/// Creates the kubeconfig file, failing if something is already there.
fn write_kubeconfig(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create kubeconfig directory: {}", parent.display())
            })?;
        }
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(path)
        .with_context(|| format!("Failed to create kubeconfig file: {}", path.display()))?;
    file.write_all(contents)
        .with_context(|| format!("Failed to write kubeconfig file: {}", path.display()))?;
    Ok(())
}
