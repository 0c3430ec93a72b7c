use thiserror::Error;

/// Exit code for a task that failed while resolving its target or running
/// the in-container command.
pub const EXIT_TASK_FAILED: u8 = 1;
/// Exit code for operational failures: secret lookups, transfers, S3 checks.
pub const EXIT_OPERATIONAL: u8 = 2;
/// Exit code for bad invocations and missing external tools.
pub const EXIT_INVALID_INVOCATION: u8 = 3;
/// Exit code for a selector that matched no pods.
pub const EXIT_NO_TARGET: u8 = 4;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid invocation: {0}")]
    InvalidInvocation(String),

    #[error("Missing dependency: {0:#}")]
    MissingDependency(anyhow::Error),

    #[error("Secret resolution failed: {0:#}")]
    Secret(anyhow::Error),

    #[error("Target resolution failed: {0:#}")]
    Target(anyhow::Error),

    #[error("No pods found matching selector '{selector}' in namespace '{namespace}'")]
    NoTarget { namespace: String, selector: String },

    #[error("Backup command failed: {0:#}")]
    BackupCommand(anyhow::Error),

    #[error("Transfer failed: {0:#}")]
    Transfer(anyhow::Error),

    #[error("Object storage check failed: {0:#}")]
    Storage(anyhow::Error),
}

impl AppError {
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::InvalidInvocation(_) | AppError::MissingDependency(_) => {
                EXIT_INVALID_INVOCATION
            }
            AppError::Secret(_) | AppError::Transfer(_) | AppError::Storage(_) => {
                EXIT_OPERATIONAL
            }
            AppError::Target(_) | AppError::BackupCommand(_) => EXIT_TASK_FAILED,
            AppError::NoTarget { .. } => EXIT_NO_TARGET,
        }
    }

    /// A skipped task is reported with a warning rather than as a failure.
    pub fn is_skip(&self) -> bool {
        matches!(self, AppError::NoTarget { .. })
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_follow_taxonomy() {
        assert_eq!(AppError::InvalidInvocation("x".into()).exit_code(), 3);
        assert_eq!(AppError::MissingDependency(anyhow::anyhow!("kubectl")).exit_code(), 3);
        assert_eq!(AppError::Secret(anyhow::anyhow!("lookup")).exit_code(), 2);
        assert_eq!(AppError::Transfer(anyhow::anyhow!("s3")).exit_code(), 2);
        assert_eq!(AppError::Target(anyhow::anyhow!("not ready")).exit_code(), 1);
        assert_eq!(AppError::BackupCommand(anyhow::anyhow!("mysqldump")).exit_code(), 1);

        let skipped = AppError::NoTarget {
            namespace: "prod".into(),
            selector: "app=db".into(),
        };
        assert_eq!(skipped.exit_code(), 4);
        assert!(skipped.is_skip());
    }

    #[test]
    fn test_error_message_keeps_context_chain() {
        let err = AppError::Secret(
            anyhow::anyhow!("secret \"kubebackup\" not found").context("Failed to fetch AWS secret"),
        );
        let message = err.to_string();
        assert!(message.contains("Failed to fetch AWS secret"));
        assert!(message.contains("not found"));
    }
}
