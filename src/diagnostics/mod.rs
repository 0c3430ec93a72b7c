// kubebackup/src/diagnostics/mod.rs
use tracing::{info, warn};

use crate::backup::s3_upload::{build_client, check_s3_connection};
use crate::cluster::Cluster;
use crate::config::{BackupConfig, Environment};
use crate::errors::{AppError, Result};
use crate::notify::{Color, Notifier};
use crate::secrets::SecretResolver;
use crate::utils::mask_secret;

/// Variables worth showing, and whether their values must be masked.
const REPORTED_VARS: &[(&str, bool)] = &[
    ("KUBECONFIG", false),
    ("AWS_ACCESS_KEY_ID", false),
    ("AWS_SECRET_ACCESS_KEY", true),
    ("AWS_DEFAULT_REGION", false),
    ("AWS_ENDPOINT_URL", false),
    ("S3_BUCKET", false),
    ("S3_PREFIX", false),
    ("SLACK_WEBHOOK", true),
    ("BACKUP_TASK", false),
    ("BACKUP_NAMESPACE", false),
    ("BACKUP_TIMESTAMP", false),
    ("BACKUP_SECRET", false),
    ("LOCAL_BACKUP_DIR", false),
];

pub fn environment_report(config: &BackupConfig, env: &Environment) -> Vec<String> {
    let mut lines = vec![format!("{:#?}", config), "Environment:".to_string()];
    for (name, sensitive) in REPORTED_VARS {
        let value = match env.get(name) {
            Some(v) if *sensitive => mask_secret(v),
            Some(v) => v.to_string(),
            None => "<unset>".to_string(),
        };
        lines.push(format!("  {}={}", name, value));
    }
    lines
}

/// `dump-env`
pub fn dump_env(config: &BackupConfig, env: &Environment) {
    for line in environment_report(config, env) {
        println!("{}", line);
    }
}

/// `test-aws`: resolves object-store credentials, shows them masked and
/// checks that the bucket answers.
pub async fn test_aws<C: Cluster>(cluster: &C, config: &BackupConfig, env: &Environment) -> Result<()> {
    let (credentials, bucket) = SecretResolver::new(cluster, config, env)
        .resolve_object_store()
        .await?;

    let credentials = credentials.ok_or_else(|| {
        AppError::Secret(anyhow::anyhow!(
            "No AWS credentials in the environment or in secret '{}'",
            config.aws_secret
        ))
    })?;
    println!("AWS_ACCESS_KEY_ID={}", credentials.access_key_id);
    println!("AWS_SECRET_ACCESS_KEY={}", mask_secret(&credentials.secret_access_key));
    println!("S3_BUCKET={}", bucket.as_deref().unwrap_or("<unset>"));

    let Some(bucket) = bucket else {
        warn!("⚠️ No bucket configured, skipping connectivity check");
        return Ok(());
    };
    let client = build_client(&config.s3, &credentials).await;
    check_s3_connection(&client, &bucket).await.map_err(AppError::Storage)?;
    info!("✅ Object storage is reachable");
    Ok(())
}

/// `test-slack`: sends a test message to the configured webhook.
pub async fn test_slack<C: Cluster>(cluster: &C, config: &BackupConfig, env: &Environment) -> Result<()> {
    let webhook_url = SecretResolver::new(cluster, config, env).resolve_webhook().await?;
    let notifier = Notifier::new(webhook_url);
    if !notifier.is_configured() {
        return Err(AppError::Secret(anyhow::anyhow!(
            "No SLACK_WEBHOOK in the environment or in secret '{}'",
            config.slack_secret
        )));
    }

    let message = format!("kubebackup {} webhook test", env!("CARGO_PKG_VERSION"));
    if notifier.send(&message, Color::Good).await {
        info!("✅ Test notification delivered");
        Ok(())
    } else {
        Err(AppError::Transfer(anyhow::anyhow!("The webhook did not accept the test notification")))
    }
}
