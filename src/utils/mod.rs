pub mod logging;

use anyhow::{Context, Result};
use std::path::PathBuf;
use which::which;

/// Finds the kubectl executable in the system PATH.
pub fn find_kubectl_executable() -> Result<PathBuf> {
    which("kubectl").context("kubectl executable not found in PATH. Please ensure the Kubernetes CLI is installed and in your PATH.")
}

/// Masks a credential for display, keeping only a short prefix.
pub fn mask_secret(value: &str) -> String {
    let visible: String = value.chars().take(4).collect();
    if value.chars().count() <= 8 {
        "********".to_string()
    } else {
        format!("{}********", visible)
    }
}
