// kubebackup/src/backup/archive.rs

/// `tar` writing a gzipped archive of `path` to stdout. Absolute paths are
/// archived relative to `/` so the archive carries no leading slash.
pub fn tar_command(path: &str) -> Vec<String> {
    let mut cmd = vec!["tar".to_string(), "-czf".to_string(), "-".to_string()];

    if path.starts_with('/') {
        let relative = path.trim_matches('/');
        cmd.push("-C".to_string());
        cmd.push("/".to_string());
        cmd.push(if relative.is_empty() { "." } else { relative }.to_string());
    } else {
        cmd.push(path.trim_end_matches('/').to_string());
    }
    cmd
}
