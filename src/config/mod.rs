// kubebackup/src/config/mod.rs
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use regex::Regex;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::LazyLock;

pub const DEFAULT_SECRET_NAME: &str = "kubebackup";
pub const DEFAULT_REGION: &str = "us-east-1";
/// Minute precision so that jobs started in the same minute share a run directory.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M";

static TIMESTAMP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid timestamp regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Task {
    /// Dump a MySQL database from inside the target container
    BackupMysqlExec,
    /// Archive a directory from inside the target container
    BackupFilesExec,
    /// Print the resolved configuration and relevant environment
    DumpEnv,
    /// Resolve object-store credentials and check bucket access
    TestAws,
    /// Send a test message to the configured webhook
    #[value(alias = "slack-test")]
    TestSlack,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::BackupMysqlExec => "backup-mysql-exec",
            Task::BackupFilesExec => "backup-files-exec",
            Task::DumpEnv => "dump-env",
            Task::TestAws => "test-aws",
            Task::TestSlack => "test-slack",
        }
    }

    pub fn is_backup(&self) -> bool {
        matches!(self, Task::BackupMysqlExec | Task::BackupFilesExec)
    }
}

/// Command-line options. Most options can also be set through the environment.
#[derive(Debug, Parser)]
#[command(
    name = "kubebackup",
    version,
    about = "Back up databases and files from pods running in a Kubernetes cluster",
    long_about = None
)]
pub struct Cli {
    /// Task to run
    #[arg(long, value_enum, env = "BACKUP_TASK")]
    pub task: Task,

    /// Namespace of the target pod (defaults to the current kubectl context)
    #[arg(long, env = "BACKUP_NAMESPACE")]
    pub namespace: Option<String>,

    /// Name of the pod to back up
    #[arg(long, conflicts_with = "selector")]
    pub pod: Option<String>,

    /// Label selector that must match exactly one pod
    #[arg(long, short = 'l')]
    pub selector: Option<String>,

    /// Container inside the pod (defaults to the first container)
    #[arg(long, short = 'c')]
    pub container: Option<String>,

    /// Database to dump (defaults to MYSQL_DATABASE inside the container)
    #[arg(long)]
    pub database: Option<String>,

    /// Path inside the container to archive
    #[arg(long)]
    pub files_path: Option<String>,

    /// Name used in the artifact filename instead of the database or path
    #[arg(long)]
    pub backup_name: Option<String>,

    /// Run timestamp; pin it to group several backups under one directory
    #[arg(long, env = "BACKUP_TIMESTAMP", value_parser = parse_timestamp)]
    pub timestamp: Option<String>,

    /// Resolve everything but skip the data transfer
    #[arg(long)]
    pub dry_run: bool,

    /// Default name of the secret holding credentials
    #[arg(long, env = "BACKUP_SECRET", default_value = DEFAULT_SECRET_NAME)]
    pub secret: String,

    /// Secret holding AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY and S3_BUCKET
    #[arg(long)]
    pub aws_secret: Option<String>,

    /// Secret holding SLACK_WEBHOOK
    #[arg(long)]
    pub slack_secret: Option<String>,

    /// Secret holding a kubeconfig under the `kubeconfig` key (implies --use-kubeconfig-from-secret)
    #[arg(long)]
    pub kubeconfig_secret: Option<String>,

    /// Fetch the kubeconfig from a secret before talking to the target cluster
    #[arg(long)]
    pub use_kubeconfig_from_secret: bool,

    /// Where to write the kubeconfig fetched from a secret
    #[arg(long)]
    pub kubeconfig_path: Option<PathBuf>,

    /// Bucket to stream backups into; local disk is used when unset
    #[arg(long, env = "S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Key prefix inside the bucket
    #[arg(long, env = "S3_PREFIX")]
    pub s3_prefix: Option<String>,

    /// Region of the bucket
    #[arg(long, env = "AWS_DEFAULT_REGION", default_value = DEFAULT_REGION)]
    pub s3_region: String,

    /// Custom endpoint for S3-compatible storage
    #[arg(long, env = "AWS_ENDPOINT_URL")]
    pub s3_endpoint: Option<String>,

    /// Root directory for local backups
    #[arg(long, env = "LOCAL_BACKUP_DIR", default_value = ".")]
    pub local_dir: PathBuf,
}

fn parse_timestamp(value: &str) -> Result<String, String> {
    if TIMESTAMP_RE.is_match(value) {
        Ok(value.to_string())
    } else {
        Err(format!(
            "'{}' may only contain letters, digits, '-' and '_'",
            value
        ))
    }
}

pub fn parse_args<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::try_parse_from(args)
}

pub fn default_timestamp(now: DateTime<Utc>) -> String {
    now.format(TIMESTAMP_FORMAT).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelector {
    Pod(String),
    Selector(String),
}

#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket: Option<String>,
    pub prefix: Option<String>,
    pub region: String,
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub task: Task,
    pub namespace: Option<String>,
    pub target: Option<TargetSelector>,
    pub container: Option<String>,
    pub database: Option<String>,
    pub files_path: Option<String>,
    pub backup_name: Option<String>,
    pub timestamp: String,
    pub dry_run: bool,
    pub kubeconfig_secret: String,
    pub aws_secret: String,
    pub slack_secret: String,
    pub use_kubeconfig_from_secret: bool,
    pub kubeconfig_path: Option<PathBuf>,
    pub s3: S3Settings,
    pub local_backup_path: PathBuf,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl BackupConfig {
    /// Flattens parsed options into the configuration used by every task.
    /// Empty values count as unset.
    pub fn from_cli(cli: Cli, now: DateTime<Utc>) -> Result<Self, String> {
        let secret = cli.secret.trim().to_string();
        let pick_secret = |specific: Option<String>| non_empty(specific).unwrap_or_else(|| secret.clone());

        let target = match (non_empty(cli.pod), non_empty(cli.selector)) {
            (Some(_), Some(_)) => return Err("--pod and --selector are mutually exclusive".to_string()),
            (Some(pod), None) => Some(TargetSelector::Pod(pod)),
            (None, Some(selector)) => Some(TargetSelector::Selector(selector)),
            (None, None) => None,
        };

        let config = BackupConfig {
            task: cli.task,
            namespace: non_empty(cli.namespace),
            target,
            container: non_empty(cli.container),
            database: non_empty(cli.database),
            files_path: non_empty(cli.files_path),
            backup_name: non_empty(cli.backup_name),
            timestamp: non_empty(cli.timestamp).unwrap_or_else(|| default_timestamp(now)),
            dry_run: cli.dry_run,
            use_kubeconfig_from_secret: cli.use_kubeconfig_from_secret
                || non_empty(cli.kubeconfig_secret.clone()).is_some(),
            kubeconfig_secret: pick_secret(cli.kubeconfig_secret),
            aws_secret: pick_secret(cli.aws_secret),
            slack_secret: pick_secret(cli.slack_secret),
            kubeconfig_path: cli.kubeconfig_path,
            s3: S3Settings {
                bucket: non_empty(cli.s3_bucket),
                prefix: non_empty(cli.s3_prefix).map(|p| p.trim_matches('/').to_string()).filter(|p| !p.is_empty()),
                region: non_empty(Some(cli.s3_region)).unwrap_or_else(|| DEFAULT_REGION.to_string()),
                endpoint_url: non_empty(cli.s3_endpoint),
            },
            local_backup_path: cli.local_dir,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if !self.task.is_backup() {
            return Ok(());
        }
        if self.target.is_none() {
            return Err(format!("{} requires --pod or --selector", self.task.as_str()));
        }
        if self.task == Task::BackupFilesExec && self.files_path.is_none() {
            return Err("backup-files-exec requires --files-path".to_string());
        }
        if let Some(endpoint) = &self.s3.endpoint_url {
            url::Url::parse(endpoint).map_err(|e| format!("invalid --s3-endpoint '{}': {}", endpoint, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
impl BackupConfig {
    /// Baseline configuration for tests: local destination, default secret names.
    pub fn for_tests(task: Task) -> Self {
        BackupConfig {
            task,
            namespace: None,
            target: None,
            container: None,
            database: None,
            files_path: None,
            backup_name: None,
            timestamp: "20261019-1430".to_string(),
            dry_run: false,
            kubeconfig_secret: DEFAULT_SECRET_NAME.to_string(),
            aws_secret: DEFAULT_SECRET_NAME.to_string(),
            slack_secret: DEFAULT_SECRET_NAME.to_string(),
            use_kubeconfig_from_secret: false,
            kubeconfig_path: None,
            s3: S3Settings {
                bucket: None,
                prefix: None,
                region: DEFAULT_REGION.to_string(),
                endpoint_url: None,
            },
            local_backup_path: PathBuf::from("."),
        }
    }
}

/// Snapshot of the process environment, taken once at startup.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    pub fn from_process() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Self { vars }
    }

    #[cfg(test)]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Returns the variable when it is set to a non-empty value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }
}
