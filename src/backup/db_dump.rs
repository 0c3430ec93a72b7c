// kubebackup/src/backup/db_dump.rs
use anyhow::{Context, Result};
use tracing::info;

use crate::cluster::Cluster;
use crate::target::ResolvedTarget;

/// Variable the official MySQL/MariaDB images use for the default database.
pub const DATABASE_ENV_VAR: &str = "MYSQL_DATABASE";
/// Password used by mysqldump inside the container.
pub const PASSWORD_ENV_VAR: &str = "MYSQL_ROOT_PASSWORD";

/// Uses the requested database, or reads MYSQL_DATABASE from the container.
pub async fn resolve_database<C: Cluster>(
    cluster: &C,
    target: &ResolvedTarget,
    requested: Option<&str>,
) -> Result<String> {
    if let Some(db) = requested {
        return Ok(db.to_string());
    }

    let command = read_env_command(DATABASE_ENV_VAR);
    let database = cluster
        .exec_output(target, &command)
        .await
        .with_context(|| format!("Failed to read {} from {}", DATABASE_ENV_VAR, target))?;

    if database.is_empty() {
        anyhow::bail!(
            "No database given and {} is not set in {}. Pass --database.",
            DATABASE_ENV_VAR,
            target
        );
    }
    info!("Using database '{}' from {} in {}", database, DATABASE_ENV_VAR, target);
    Ok(database)
}

fn read_env_command(var: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("printf '%s' \"${{{}:-}}\"", var),
    ]
}

/// mysqldump streaming a consistent snapshot to stdout. The database name is
/// passed as a positional argument so it is never interpreted by the shell.
pub fn mysqldump_command(database: &str) -> Vec<String> {
    let script = format!(
        "exec mysqldump --single-transaction --quick --routines --triggers --user=root --password=\"${}\" \"$1\"",
        PASSWORD_ENV_VAR
    );
    vec![
        "sh".to_string(),
        "-c".to_string(),
        script,
        "mysqldump".to_string(),
        database.to_string(),
    ]
}
