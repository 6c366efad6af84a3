// src/sys/envfile.rs

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::Result;
use crate::render::Rendering;
use crate::sys::files::{read_or_empty, write_atomic};
use crate::sys::traits::{ApplyOutcome, EnvironmentStore};

/// Manages the proxy lines of a `KEY=value` environment file such as /etc/environment.
pub struct EnvFileStore {
    path: PathBuf,
}

impl EnvFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

/// The variable name of an environment-file line, tolerating `export ` and indentation.
fn line_key(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return None;
    }
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed).trim_start();
    trimmed.split_once('=').map(|(key, _)| key.trim_end())
}

/// Drops every existing line that sets one of the keys in `lines`, keeps the
/// rest in order, and appends `lines` at the end.
pub fn merge_env_lines(existing: &str, lines: &[&str]) -> String {
    let managed: HashSet<&str> = lines.iter().filter_map(|l| line_key(l)).collect();

    let mut out = String::with_capacity(existing.len() + lines.iter().map(|l| l.len() + 1).sum::<usize>());
    for line in existing.lines() {
        if line_key(line).is_some_and(|key| managed.contains(key)) {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[async_trait]
impl EnvironmentStore for EnvFileStore {
    async fn apply(&self, rendering: &Rendering) -> Result<ApplyOutcome> {
        let existing = read_or_empty(&self.path).await?;
        let updated = merge_env_lines(&existing, &rendering.lines());

        if updated == existing {
            debug!(path = %self.path.display(), "Environment file already up to date");
            return Ok(ApplyOutcome::Unchanged);
        }

        write_atomic(&self.path, updated, 0o644).await?;
        info!(path = %self.path.display(), "Environment file updated");
        Ok(ApplyOutcome::Changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{ProxyConfig, RenderTarget};

    #[test]
    fn test_merge_preserves_unrelated_lines() {
        let existing = "PATH=\"/usr/local/bin:/usr/bin\"\n# proxy\nexport no_proxy=old\nLANG=C.UTF-8\nNO_PROXY=old\n";
        let merged = merge_env_lines(existing, &["NO_PROXY=a,b", "no_proxy=a,b"]);
        assert_eq!(
            merged,
            "PATH=\"/usr/local/bin:/usr/bin\"\n# proxy\nLANG=C.UTF-8\nNO_PROXY=a,b\nno_proxy=a,b\n"
        );
    }

    #[test]
    fn test_merge_leaves_unmanaged_proxy_keys() {
        let existing = "HTTP_PROXY=http://proxy:3128\n";
        let merged = merge_env_lines(existing, &["NO_PROXY=a"]);
        assert_eq!(merged, "HTTP_PROXY=http://proxy:3128\nNO_PROXY=a\n");
    }

    #[test]
    fn test_merge_is_idempotent() {
        let once = merge_env_lines("LANG=C\n", &["NO_PROXY=a", "no_proxy=a"]);
        let twice = merge_env_lines(&once, &["NO_PROXY=a", "no_proxy=a"]);
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_apply_writes_then_reports_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("environment");
        std::fs::write(&path, "LANG=C.UTF-8\n").unwrap();

        let store = EnvFileStore::new(path.clone());
        let rendering = ProxyConfig::new().render(RenderTarget::EnvFile).unwrap();

        assert_eq!(store.apply(&rendering).await.unwrap(), ApplyOutcome::Changed);
        assert_eq!(store.apply(&rendering).await.unwrap(), ApplyOutcome::Unchanged);

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("LANG=C.UTF-8"));
        assert!(lines.next().unwrap().starts_with("NO_PROXY=169.254.169.254,"));
        assert!(lines.next().unwrap().starts_with("no_proxy=169.254.169.254,"));
        assert_eq!(lines.next(), None);
    }

    #[tokio::test]
    async fn test_apply_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.d").join("proxy.env");
        let store = EnvFileStore::new(path.clone());
        let rendering = ProxyConfig::new().render(RenderTarget::EnvFile).unwrap();

        assert_eq!(store.apply(&rendering).await.unwrap(), ApplyOutcome::Changed);
        assert!(path.exists());
    }
}
