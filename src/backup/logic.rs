// kubebackup/src/backup/logic.rs
use anyhow::Context;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tracing::{debug, error, info};

use super::archive::tar_command;
use super::db_dump::{mysqldump_command, resolve_database};
use super::naming::{build_filename, local_path, object_key};
use super::s3_upload::{S3Upload, build_client};
use super::sink::{Destination, Encoding, Sink};
use crate::cluster::Cluster;
use crate::config::{BackupConfig, Task};
use crate::errors::{AppError, Result};
use crate::secrets::ResolvedSecrets;
use crate::target::ResolvedTarget;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// What runs inside the container and how its output is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    MysqlDump { database: String },
    FileArchive { path: String },
}

impl Strategy {
    pub async fn prepare<C: Cluster>(
        cluster: &C,
        config: &BackupConfig,
        target: &ResolvedTarget,
    ) -> Result<Self> {
        match config.task {
            Task::BackupMysqlExec => {
                let database = resolve_database(cluster, target, config.database.as_deref())
                    .await
                    .map_err(AppError::BackupCommand)?;
                Ok(Strategy::MysqlDump { database })
            }
            Task::BackupFilesExec => {
                let path = config.files_path.clone().ok_or_else(|| {
                    AppError::InvalidInvocation("backup-files-exec requires --files-path".to_string())
                })?;
                Ok(Strategy::FileArchive { path })
            }
            other => Err(AppError::InvalidInvocation(format!(
                "{} is not a backup task",
                other.as_str()
            ))),
        }
    }

    pub fn command(&self) -> Vec<String> {
        match self {
            Strategy::MysqlDump { database } => mysqldump_command(database),
            Strategy::FileArchive { path } => tar_command(path),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Strategy::MysqlDump { .. } => ".gz",
            Strategy::FileArchive { .. } => ".tar.gz",
        }
    }

    /// Identifies what is being backed up when no --backup-name is given.
    pub fn source(&self) -> &str {
        match self {
            Strategy::MysqlDump { database } => database,
            Strategy::FileArchive { path } => path,
        }
    }

    /// mysqldump emits plain SQL, tar already compresses in the container.
    fn encoding(&self) -> Encoding {
        match self {
            Strategy::MysqlDump { .. } => Encoding::gzip(),
            Strategy::FileArchive { .. } => Encoding::Identity,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackupReport {
    pub target: ResolvedTarget,
    pub destination: Destination,
    pub bytes: u64,
    pub dry_run: bool,
}

pub fn artifact_filename(config: &BackupConfig, target: &ResolvedTarget, strategy: &Strategy) -> String {
    let name = config.backup_name.as_deref().unwrap_or(strategy.source());
    build_filename(
        &[&target.pod, &target.container, name, &config.timestamp],
        strategy.extension(),
    )
}

pub fn plan_destination(
    config: &BackupConfig,
    secrets: &ResolvedSecrets,
    target: &ResolvedTarget,
    filename: &str,
) -> Destination {
    match &secrets.bucket {
        Some(bucket) => Destination::S3 {
            bucket: bucket.clone(),
            key: object_key(
                config.s3.prefix.as_deref(),
                &target.namespace,
                &config.timestamp,
                filename,
            ),
        },
        None => Destination::Local(local_path(
            &config.local_backup_path,
            &target.namespace,
            &config.timestamp,
            filename,
        )),
    }
}

async fn open_sink(
    config: &BackupConfig,
    secrets: &ResolvedSecrets,
    destination: &Destination,
) -> anyhow::Result<Sink> {
    match destination {
        Destination::Local(path) => Sink::create_local(path.clone()).await,
        Destination::S3 { bucket, key } => {
            let credentials = secrets
                .aws
                .as_ref()
                .context("No AWS credentials resolved for the configured bucket")?;
            let client = build_client(&config.s3, credentials).await;
            Ok(Sink::S3(S3Upload::new(client, bucket, key)))
        }
    }
}

/// Copies the command output into the sink, chunk by chunk.
async fn pump<R: AsyncRead + Unpin>(reader: &mut R, mut encoding: Encoding, sink: &mut Sink) -> Result<()> {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .context("Failed to read backup stream from kubectl exec")
            .map_err(AppError::BackupCommand)?;
        if n == 0 {
            break;
        }
        let encoded = encoding.encode(&buf[..n]).map_err(AppError::Transfer)?;
        sink.write(&encoded).await.map_err(AppError::Transfer)?;
    }
    let tail = encoding.finish().map_err(AppError::Transfer)?;
    sink.write(&tail).await.map_err(AppError::Transfer)
}

async fn stream_command(child: &mut Child, encoding: Encoding, sink: &mut Sink) -> Result<()> {
    let mut stdout = child
        .stdout
        .take()
        .context("kubectl exec was started without a stdout pipe")
        .map_err(AppError::BackupCommand)?;
    pump(&mut stdout, encoding, sink).await
}

/// Runs the strategy's command in the target container and stores its output.
/// The destination is only finalised once the command exited successfully.
pub async fn perform_backup_orchestration<C: Cluster>(
    cluster: &C,
    config: &BackupConfig,
    secrets: &ResolvedSecrets,
    target: &ResolvedTarget,
) -> Result<BackupReport> {
    let strategy = Strategy::prepare(cluster, config, target).await?;
    let filename = artifact_filename(config, target, &strategy);
    let destination = plan_destination(config, secrets, target, &filename);
    let command = strategy.command();

    info!("🚀 Backing up {} from {} to {}", strategy.source(), target, destination);
    debug!(?command, "in-container command");

    let mut report = BackupReport {
        target: target.clone(),
        destination,
        bytes: 0,
        dry_run: config.dry_run,
    };

    if config.dry_run {
        info!("Transfer to {} skipped (dry run)", report.destination);
        return Ok(report);
    }

    let mut sink = open_sink(config, secrets, &report.destination)
        .await
        .map_err(AppError::Transfer)?;

    let mut child = match cluster.spawn_exec(target, &command) {
        Ok(child) => child,
        Err(e) => {
            sink.abort().await;
            return Err(AppError::BackupCommand(e));
        }
    };

    if let Err(e) = stream_command(&mut child, strategy.encoding(), &mut sink).await {
        error!("❌ Streaming backup of {} failed", target);
        let _ = child.kill().await;
        sink.abort().await;
        return Err(e);
    }

    let status = match child.wait().await {
        Ok(status) => status,
        Err(e) => {
            sink.abort().await;
            return Err(AppError::BackupCommand(
                anyhow::Error::new(e).context("Failed to wait for kubectl exec"),
            ));
        }
    };
    if !status.success() {
        sink.abort().await;
        return Err(AppError::BackupCommand(anyhow::anyhow!(
            "'{}' in {} exited with status: {}",
            command.join(" "),
            target,
            status
        )));
    }

    report.bytes = sink
        .finish()
        .await
        .with_context(|| format!("Failed to store backup at {}", report.destination))
        .map_err(AppError::Transfer)?;

    info!("✅ Stored {} bytes at {}", report.bytes, report.destination);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use std::path::PathBuf;

    fn target() -> ResolvedTarget {
        ResolvedTarget {
            namespace: "shop".to_string(),
            pod: "db-0".to_string(),
            container: "mysql".to_string(),
        }
    }

    fn mysql_config(root: PathBuf) -> BackupConfig {
        let mut config = BackupConfig::for_tests(Task::BackupMysqlExec);
        config.database = Some("app".to_string());
        config.local_backup_path = root;
        config
    }

    #[tokio::test]
    async fn test_mysql_backup_lands_in_local_layout() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut cluster = FakeCluster::new("shop");
        cluster.exec_script = "printf 'CREATE TABLE orders (id INT);\\n'".to_string();
        let config = mysql_config(dir.path().to_path_buf());

        let report = perform_backup_orchestration(&cluster, &config, &ResolvedSecrets::default(), &target())
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        let expected = dir.path().join("shop/20261019-1430/db-0-mysql-app-20261019-1430.gz");
        assert_eq!(report.destination, Destination::Local(expected.clone()));
        assert!(report.bytes > 0);

        let mut sql = String::new();
        GzDecoder::new(std::fs::File::open(&expected)?).read_to_string(&mut sql)?;
        assert_eq!(sql, "CREATE TABLE orders (id INT);\n");

        let commands = cluster.exec_commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].last().map(String::as_str), Some("app"));
        Ok(())
    }

    #[tokio::test]
    async fn test_files_backup_is_stored_as_is() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut cluster = FakeCluster::new("shop");
        cluster.exec_script = "printf 'tarball'".to_string();
        let mut config = BackupConfig::for_tests(Task::BackupFilesExec);
        config.files_path = Some("/var/www/html".to_string());
        config.backup_name = Some("uploads".to_string());
        config.local_backup_path = dir.path().to_path_buf();
        let target = ResolvedTarget {
            namespace: "shop".to_string(),
            pod: "my-website".to_string(),
            container: "website".to_string(),
        };

        let report = perform_backup_orchestration(&cluster, &config, &ResolvedSecrets::default(), &target)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        let expected = dir.path().join("shop/20261019-1430/my-website-uploads-20261019-1430.tar.gz");
        assert_eq!(report.destination, Destination::Local(expected.clone()));
        assert_eq!(std::fs::read(&expected)?, b"tarball");
        assert_eq!(cluster.exec_commands()[0][0], "tar");
        Ok(())
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cluster = FakeCluster::new("shop");
        let mut config = mysql_config(dir.path().to_path_buf());
        config.dry_run = true;

        let report = perform_backup_orchestration(&cluster, &config, &ResolvedSecrets::default(), &target())
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        assert!(report.dry_run);
        assert_eq!(report.bytes, 0);
        assert!(cluster.exec_commands().is_empty());
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_command_is_a_task_failure() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut cluster = FakeCluster::new("shop");
        cluster.exec_script = "printf 'partial'; exit 2".to_string();
        let config = mysql_config(dir.path().to_path_buf());

        let err = perform_backup_orchestration(&cluster, &config, &ResolvedSecrets::default(), &target())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::BackupCommand(_)));
        assert_eq!(err.exit_code(), crate::errors::EXIT_TASK_FAILED);
        Ok(())
    }

    #[tokio::test]
    async fn test_unwritable_destination_is_a_transfer_failure() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        // a file where the namespace directory should go
        std::fs::write(dir.path().join("shop"), b"")?;
        let cluster = FakeCluster::new("shop");
        let config = mysql_config(dir.path().to_path_buf());

        let err = perform_backup_orchestration(&cluster, &config, &ResolvedSecrets::default(), &target())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Transfer(_)));
        assert_eq!(err.exit_code(), crate::errors::EXIT_OPERATIONAL);
        Ok(())
    }

    #[test]
    fn test_bucket_destination_uses_prefix() {
        let mut config = BackupConfig::for_tests(Task::BackupMysqlExec);
        config.s3.prefix = Some("k8s".to_string());
        let secrets = ResolvedSecrets {
            bucket: Some("nightly".to_string()),
            ..Default::default()
        };

        let destination = plan_destination(&config, &secrets, &target(), "db-0-mysql-app-20261019-1430.gz");
        assert_eq!(
            destination.to_string(),
            "s3://nightly/k8s/shop/20261019-1430/db-0-mysql-app-20261019-1430.gz"
        );
    }

    #[test]
    fn test_backup_name_overrides_source() {
        let mut config = BackupConfig::for_tests(Task::BackupFilesExec);
        config.backup_name = Some("media library".to_string());
        let strategy = Strategy::FileArchive {
            path: "/srv/media".to_string(),
        };
        let name = artifact_filename(&config, &target(), &strategy);
        assert_eq!(name, "db-0-mysql-media_library-20261019-1430.tar.gz");
    }
}
