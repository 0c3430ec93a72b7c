mod logic;
pub(crate) mod archive;
pub(crate) mod db_dump;
pub(crate) mod naming;
pub(crate) mod s3_upload;
pub(crate) mod sink;

use crate::cluster::Cluster;
use crate::config::BackupConfig;
use crate::errors::Result;
use crate::secrets::ResolvedSecrets;
use crate::target::ResolvedTarget;

pub use logic::BackupReport;

/// Public entry point for the backup process.
/// Runs the task's strategy against an already resolved target.
pub async fn run_backup_flow<C: Cluster>(
    cluster: &C,
    config: &BackupConfig,
    secrets: &ResolvedSecrets,
    target: &ResolvedTarget,
) -> Result<BackupReport> {
    logic::perform_backup_orchestration(cluster, config, secrets, target).await
}
