//! Kubernetes Backup Tool
//!
//! Streams MySQL dumps and file archives out of running pods to local disk
//! or S3, then reports the outcome to a webhook.

// kubebackup/src/main.rs
mod backup;
mod cluster;
mod config;
mod diagnostics;
mod errors;
mod notify;
mod secrets;
mod target;
mod utils;

use chrono::Utc;
use clap::CommandFactory;
use clap::error::ErrorKind;
use std::ffi::OsString;
use std::process::ExitCode;
use tracing::warn;

use backup::BackupReport;
use cluster::{Cluster, Kubectl};
use config::{BackupConfig, Cli, Environment, Task};
use errors::{AppError, EXIT_INVALID_INVOCATION};
use notify::{Color, Notifier};
use secrets::{SecretNeeds, SecretResolver};

/// Main entry point for the backup tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    utils::logging::init_tracing();
    ExitCode::from(run_cli(std::env::args_os()).await)
}

/// Parses the arguments, runs the selected task and returns the exit code.
async fn run_cli<I, T>(args: I) -> u8
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let config = match prepare(args) {
        Ok(config) => config,
        Err((text, 0)) => {
            print!("{}", text);
            return 0;
        }
        Err((text, code)) => {
            eprint!("{}", text);
            return code;
        }
    };

    let env = Environment::from_process();
    match run_task(&config, &env).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            e.exit_code()
        }
    }
}

/// Builds the configuration, or the text to print and the exit code to use
/// when the invocation stops here (help, version, bad flags).
fn prepare<I, T>(args: I) -> Result<BackupConfig, (String, u8)>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = config::parse_args(args).map_err(|e| match e.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => (e.render().to_string(), 0),
        _ => (with_usage(&e.render().to_string()), EXIT_INVALID_INVOCATION),
    })?;

    BackupConfig::from_cli(cli, Utc::now()).map_err(|msg| {
        let message = format!("❌ {}", AppError::InvalidInvocation(msg));
        (with_usage(&message), EXIT_INVALID_INVOCATION)
    })
}

/// Appends the usage line unless the message already carries one.
fn with_usage(message: &str) -> String {
    let mut text = message.trim_end().to_string();
    if !text.contains("Usage:") {
        text.push_str("\n\n");
        text.push_str(Cli::command().render_usage().to_string().trim_end());
    }
    text.push('\n');
    text
}

fn connect() -> errors::Result<Kubectl> {
    let binary = utils::find_kubectl_executable().map_err(AppError::MissingDependency)?;
    Ok(Kubectl::new(binary))
}

async fn run_task(config: &BackupConfig, env: &Environment) -> errors::Result<()> {
    match config.task {
        Task::DumpEnv => {
            diagnostics::dump_env(config, env);
            Ok(())
        }
        Task::TestAws => diagnostics::test_aws(&connect()?, config, env).await,
        Task::TestSlack => diagnostics::test_slack(&connect()?, config, env).await,
        Task::BackupMysqlExec | Task::BackupFilesExec => run_backup(&connect()?, config, env).await,
    }
}

/// parse → resolve secrets → resolve target → execute → notify.
async fn run_backup<C: Cluster>(bootstrap: &C, config: &BackupConfig, env: &Environment) -> errors::Result<()> {
    println!("🚀 Starting {} (timestamp {})", config.task.as_str(), config.timestamp);

    let mut resolver = SecretResolver::new(bootstrap, config, env);
    let notifier = Notifier::new(resolver.resolve_webhook().await?);

    let outcome = async {
        let secrets = resolver
            .resolve(SecretNeeds {
                kubeconfig: config.use_kubeconfig_from_secret,
                object_store: true,
                webhook: false,
            })
            .await?;

        let cluster = bootstrap.with_kubeconfig(secrets.kubeconfig.as_deref());
        let target = target::resolve_target(&cluster, config).await?;
        backup::run_backup_flow(&cluster, config, &secrets, &target).await
    }
    .await;

    let (message, color) = outcome_message(config, &outcome);
    notifier.send(&message, color).await;

    match outcome {
        Ok(_) => {
            println!("{}", message);
            Ok(())
        }
        Err(e) if e.is_skip() => {
            warn!("{}", message);
            Err(e)
        }
        Err(e) => Err(e),
    }
}

fn outcome_message(config: &BackupConfig, outcome: &errors::Result<BackupReport>) -> (String, Color) {
    let task = config.task.as_str();
    match outcome {
        Ok(report) if report.dry_run => (
            format!(
                "🧪 Dry run of {} for {}: would store {}",
                task, report.target, report.destination
            ),
            Color::Warning,
        ),
        Ok(report) => (
            format!(
                "✅ {} of {} stored at {} ({} bytes)",
                task, report.target, report.destination, report.bytes
            ),
            Color::Good,
        ),
        Err(e) if e.is_skip() => (format!("⚠️ {} skipped: {}", task, e), Color::Warning),
        Err(e) => (format!("❌ {} failed: {}", task, e), Color::Danger),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::sink::Destination;
    use crate::cluster::fake::{FakeCluster, pod};
    use crate::config::TargetSelector;
    use crate::target::ResolvedTarget;
    use std::path::{Path, PathBuf};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn report(dry_run: bool) -> BackupReport {
        BackupReport {
            target: ResolvedTarget {
                namespace: "shop".to_string(),
                pod: "db-0".to_string(),
                container: "mysql".to_string(),
            },
            destination: Destination::Local(PathBuf::from("/backups/shop/20261019-1430/db-0.gz")),
            bytes: 42,
            dry_run,
        }
    }

    async fn webhook_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/backup"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        server
    }

    /// Colours of the notifications the webhook received, in order.
    async fn notified_colors(server: &MockServer) -> Vec<String> {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| {
                let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
                body["attachments"][0]["color"].as_str().unwrap().to_string()
            })
            .collect()
    }

    /// A pod `db-0` in `shop` and a webhook stored in the `slack` secret.
    fn cluster_with_webhook(server: &MockServer) -> FakeCluster {
        let webhook = format!("{}/hooks/backup", server.uri());
        FakeCluster::new("shop")
            .with_secret("slack", &[("SLACK_WEBHOOK", webhook.as_str())])
            .with_pod(pod("db-0", &[("app", "mysql")], &[("mysql", true)]))
    }

    fn mysql_config(local_dir: &Path) -> BackupConfig {
        let mut config = BackupConfig::for_tests(Task::BackupMysqlExec);
        config.target = Some(TargetSelector::Pod("db-0".to_string()));
        config.container = Some("mysql".to_string());
        config.database = Some("app".to_string());
        config.slack_secret = "slack".to_string();
        config.aws_secret = "aws".to_string();
        config.local_backup_path = local_dir.to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_unknown_task_is_invalid_invocation() {
        assert_eq!(run_cli(["kubebackup", "--task=bogus"]).await, 3);
    }

    #[tokio::test]
    async fn test_help_exits_zero() {
        assert_eq!(run_cli(["kubebackup", "--help"]).await, 0);
    }

    #[tokio::test]
    async fn test_backup_without_target_is_invalid_invocation() {
        assert_eq!(run_cli(["kubebackup", "--task=backup-mysql-exec"]).await, 3);
    }

    #[test]
    fn test_rejected_invocations_print_usage() {
        let (text, code) = prepare(["kubebackup", "--task=bogus"]).unwrap_err();
        assert_eq!(code, EXIT_INVALID_INVOCATION);
        assert!(text.contains("bogus"));
        assert!(text.contains("Usage:"));

        let (text, code) = prepare(["kubebackup", "--task=backup-mysql-exec"]).unwrap_err();
        assert_eq!(code, EXIT_INVALID_INVOCATION);
        assert!(text.contains("Invalid invocation"));
        assert!(text.contains("Usage:"));

        let (text, code) = prepare(["kubebackup", "--help"]).unwrap_err();
        assert_eq!(code, 0);
        assert_eq!(text.matches("Usage:").count(), 1);
    }

    #[test]
    fn test_outcome_colors() {
        let config = BackupConfig::for_tests(Task::BackupMysqlExec);

        let (message, color) = outcome_message(&config, &Ok(report(false)));
        assert_eq!(color, Color::Good);
        assert!(message.contains("shop/db-0"));
        assert!(message.contains("42 bytes"));

        let (_, color) = outcome_message(&config, &Ok(report(true)));
        assert_eq!(color, Color::Warning);

        let skipped = Err(AppError::NoTarget {
            namespace: "shop".to_string(),
            selector: "app=db".to_string(),
        });
        assert_eq!(outcome_message(&config, &skipped).1, Color::Warning);

        let failed = Err(AppError::BackupCommand(anyhow::anyhow!("mysqldump exited with 2")));
        let (message, color) = outcome_message(&config, &failed);
        assert_eq!(color, Color::Danger);
        assert!(message.contains("mysqldump exited with 2"));
    }

    #[tokio::test]
    async fn test_backup_pipeline_stores_dump_and_notifies() -> anyhow::Result<()> {
        let server = webhook_server().await;
        let cluster = cluster_with_webhook(&server);
        let dir = tempfile::tempdir()?;
        let config = mysql_config(dir.path());

        run_backup(&cluster, &config, &Environment::default()).await?;

        // webhook first, then the object-store secret
        assert_eq!(cluster.secret_lookups(), vec!["slack", "aws"]);
        let artifact = dir
            .path()
            .join("shop")
            .join("20261019-1430")
            .join("db-0-mysql-app-20261019-1430.gz");
        assert!(artifact.is_file());
        assert_eq!(notified_colors(&server).await, vec!["good"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_dump_is_notified_before_exit() -> anyhow::Result<()> {
        let server = webhook_server().await;
        let cluster = cluster_with_webhook(&server).with_exec_script("printf 'partial'; exit 2");
        let dir = tempfile::tempdir()?;
        let config = mysql_config(dir.path());

        let err = run_backup(&cluster, &config, &Environment::default()).await.unwrap_err();

        assert_eq!(err.exit_code(), errors::EXIT_TASK_FAILED);
        assert_eq!(notified_colors(&server).await, vec!["danger"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_selector_without_pods_is_skipped_with_warning() -> anyhow::Result<()> {
        let server = webhook_server().await;
        let cluster = cluster_with_webhook(&server);
        let dir = tempfile::tempdir()?;
        let mut config = mysql_config(dir.path());
        config.target = Some(TargetSelector::Selector("app=postgres".to_string()));

        let err = run_backup(&cluster, &config, &Environment::default()).await.unwrap_err();

        assert_eq!(err.exit_code(), errors::EXIT_NO_TARGET);
        assert_eq!(notified_colors(&server).await, vec!["warning"]);
        assert!(cluster.exec_commands().is_empty());
        Ok(())
    }
}
