// kubebackup/src/backup/naming.rs
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9-]+").expect("valid regex"));
static REPEATED_DASHES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-{2,}").expect("valid regex"));

/// Replaces anything outside `[A-Za-z0-9-]` with `_`, collapses repeated
/// separators and trims them from both ends.
pub fn clean_part(part: &str) -> String {
    let replaced = UNSAFE_CHARS.replace_all(part, "_");
    let collapsed = REPEATED_DASHES.replace_all(&replaced, "-");
    collapsed.trim_matches(|c| c == '_' || c == '-').to_string()
}

/// Joins cleaned parts with `-`. A part is dropped when it is empty or when
/// the previously appended part already ends with it, so pod `my-website`
/// with container `website` yields `my-website`.
pub fn build_filename(parts: &[&str], extension: &str) -> String {
    let mut name = String::new();
    let mut last: Option<String> = None;

    for part in parts {
        let cleaned = clean_part(part);
        if cleaned.is_empty() {
            continue;
        }
        if last.as_deref().is_some_and(|prev| prev.ends_with(&cleaned)) {
            continue;
        }
        if !name.is_empty() {
            name.push('-');
        }
        name.push_str(&cleaned);
        last = Some(cleaned);
    }

    format!("{}{}", name, extension)
}

/// `[prefix/]namespace/timestamp/filename`
pub fn object_key(prefix: Option<&str>, namespace: &str, timestamp: &str, filename: &str) -> String {
    let mut segments: Vec<&str> = Vec::with_capacity(4);
    if let Some(prefix) = prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        segments.push(prefix);
    }
    segments.extend([namespace, timestamp, filename]);
    segments.join("/")
}

/// `root/namespace/timestamp/filename`
pub fn local_path(root: &Path, namespace: &str, timestamp: &str, filename: &str) -> PathBuf {
    root.join(namespace).join(timestamp).join(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_part_sanitizes_and_trims() {
        assert_eq!(clean_part("/var/www/html"), "var_www_html");
        assert_eq!(clean_part("my--site"), "my-site");
        assert_eq!(clean_part("  weird name!!"), "weird_name");
        assert_eq!(clean_part("under__score"), "under_score");
        assert_eq!(clean_part("---"), "");
    }

    #[test]
    fn test_duplicate_suffix_is_not_appended() {
        let name = build_filename(&["my-website", "website", "uploads", "20261019-1430"], ".tar.gz");
        assert_eq!(name, "my-website-uploads-20261019-1430.tar.gz");
    }

    #[test]
    fn test_database_filename() {
        let name = build_filename(&["db-0", "mysql", "app", "20261019-1430"], ".gz");
        assert_eq!(name, "db-0-mysql-app-20261019-1430.gz");
    }

    #[test]
    fn test_empty_parts_are_skipped() {
        let name = build_filename(&["web-0", "", "/", "2026"], ".tar.gz");
        assert_eq!(name, "web-0-2026.tar.gz");
    }

    #[test]
    fn test_filenames_only_contain_safe_characters() {
        let inputs = [
            ["wp@prod#1", "php fpm", "/srv/data/ä ö ü", "2026 10 19"],
            ["db.0", "mysql:8", "shop;drop table", "nightly/run"],
            ["$(rm -rf)", "`id`", "../../etc/passwd", "\n\t"],
        ];
        for parts in inputs {
            let name = build_filename(&parts, ".tar.gz");
            let stem = name.strip_suffix(".tar.gz").unwrap();
            assert!(
                stem.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
                "unexpected character in {}",
                name
            );
        }
    }

    #[test]
    fn test_object_key_with_and_without_prefix() {
        assert_eq!(
            object_key(Some("/backups/"), "shop", "20261019-1430", "db-0.gz"),
            "backups/shop/20261019-1430/db-0.gz"
        );
        assert_eq!(object_key(None, "shop", "20261019-1430", "db-0.gz"), "shop/20261019-1430/db-0.gz");
    }

    #[test]
    fn test_local_path_layout() {
        let path = local_path(Path::new("/backups"), "shop", "20261019-1430", "db-0.gz");
        assert_eq!(path, PathBuf::from("/backups/shop/20261019-1430/db-0.gz"));
    }
}
