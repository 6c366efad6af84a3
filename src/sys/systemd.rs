// src/sys/systemd.rs

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{NoProxyError, Result};
use crate::sys::files::{read_or_empty, write_atomic};
use crate::sys::traits::{ApplyOutcome, ServiceManager};

pub const DEFAULT_DROP_IN: &str = "proxy";

/// 🛡️ Zero-Trust: unit and drop-in names end up in a filesystem path and
/// on the systemctl command line.
pub(crate) fn validate_unit_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(NoProxyError::ConfigMalformed("Unit name cannot be empty".to_string()));
    }
    if name.starts_with('-') || name.contains("..") || name.contains('/') {
        return Err(NoProxyError::ConfigMalformed(format!(
            "Path traversal or option injection in unit name: '{}'",
            name
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
    {
        return Err(NoProxyError::ConfigMalformed(format!(
            "Invalid characters in unit name: '{}'",
            name
        )));
    }
    Ok(())
}

/// `amazon-ssm-agent` → `amazon-ssm-agent.service`; explicit suffixes are kept.
fn unit_file_name(unit: &str) -> String {
    const SUFFIXES: &[&str] = &[".service", ".socket", ".timer", ".mount", ".target", ".path"];
    if SUFFIXES.iter().any(|s| unit.ends_with(s)) {
        unit.to_string()
    } else {
        format!("{}.service", unit)
    }
}

pub struct SystemdOverrideManager {
    systemd_dir: PathBuf, // Injected path
    drop_in: String,
}

impl SystemdOverrideManager {
    pub fn new(systemd_dir: PathBuf, drop_in: &str) -> Result<Self> {
        let drop_in = drop_in.strip_suffix(".conf").unwrap_or(drop_in);
        // `.conf` alone would leave a hidden `.conf` file systemd never reads.
        validate_unit_name(drop_in)?;
        if drop_in.starts_with('.') {
            return Err(NoProxyError::ConfigMalformed(format!(
                "Drop-in name must not start with '.': '{}'",
                drop_in
            )));
        }
        Ok(Self {
            systemd_dir,
            drop_in: drop_in.to_string(),
        })
    }

    pub fn override_path(&self, unit: &str) -> Result<PathBuf> {
        validate_unit_name(unit)?;
        Ok(self
            .systemd_dir
            .join(format!("{}.d", unit_file_name(unit)))
            .join(format!("{}.conf", self.drop_in)))
    }

    async fn systemctl(&self, args: &[&str], unit: &str) -> Result<()> {
        debug!(?args, "Running systemctl");
        let output = Command::new("systemctl")
            .args(args)
            .output()
            .await
            .map_err(|e| NoProxyError::Service {
                unit: unit.to_string(),
                action: args.join(" "),
                stderr: format!("spawn error: {}", e),
            })?;

        if !output.status.success() {
            return Err(NoProxyError::Service {
                unit: unit.to_string(),
                action: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceManager for SystemdOverrideManager {
    async fn write_override(&self, unit: &str, body: &str) -> Result<(PathBuf, ApplyOutcome)> {
        let path = self.override_path(unit)?;

        if read_or_empty(&path).await? == body {
            debug!(path = %path.display(), "Drop-in already up to date");
            return Ok((path, ApplyOutcome::Unchanged));
        }

        write_atomic(&path, body.to_string(), 0o644).await?;
        info!(unit, path = %path.display(), "Wrote systemd drop-in");
        Ok((path, ApplyOutcome::Changed))
    }

    async fn reload_daemon(&self) -> Result<()> {
        self.systemctl(&["daemon-reload"], "systemd").await
    }

    async fn restart(&self, unit: &str) -> Result<()> {
        validate_unit_name(unit)?;
        let unit_file = unit_file_name(unit);
        self.systemctl(&["restart", "--", &unit_file], &unit_file).await?;
        info!(unit = %unit_file, "Restarted service");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::ProxyConfig;

    #[test]
    fn test_validate_unit_name() {
        assert!(validate_unit_name("amazon-ssm-agent").is_ok());
        assert!(validate_unit_name("snap.amazon-ssm-agent.amazon-ssm-agent.service").is_ok());
        assert!(validate_unit_name("getty@tty1.service").is_ok());

        assert!(validate_unit_name("").is_err());
        assert!(validate_unit_name("../../etc/passwd").is_err());
        assert!(validate_unit_name("foo/bar").is_err());
        assert!(validate_unit_name("--now").is_err());
        assert!(validate_unit_name("foo bar").is_err());
        assert!(validate_unit_name("foo;reboot").is_err());
    }

    #[test]
    fn test_override_path() {
        let mgr = SystemdOverrideManager::new(PathBuf::from("/etc/systemd/system"), "proxy").unwrap();
        assert_eq!(
            mgr.override_path("amazon-ssm-agent").unwrap(),
            PathBuf::from("/etc/systemd/system/amazon-ssm-agent.service.d/proxy.conf")
        );
        assert_eq!(
            mgr.override_path("docker.service").unwrap(),
            PathBuf::from("/etc/systemd/system/docker.service.d/proxy.conf")
        );
    }

    #[test]
    fn test_drop_in_suffix_is_normalised() {
        let mgr = SystemdOverrideManager::new(PathBuf::from("/run/systemd/system"), "10-proxy.conf").unwrap();
        assert_eq!(
            mgr.override_path("amazon-ssm-agent").unwrap(),
            PathBuf::from("/run/systemd/system/amazon-ssm-agent.service.d/10-proxy.conf")
        );
        assert!(SystemdOverrideManager::new(PathBuf::from("/x"), "../evil").is_err());
    }

    #[test]
    fn test_drop_in_without_stem_is_rejected() {
        for name in [".conf", "", ".hidden", "..conf"] {
            let err = SystemdOverrideManager::new(PathBuf::from("/x"), name).err();
            assert!(matches!(err, Some(NoProxyError::ConfigMalformed(_))), "{:?}", name);
        }
        // Only one suffix is stripped.
        let mgr = SystemdOverrideManager::new(PathBuf::from("/x"), "proxy.conf.conf").unwrap();
        assert_eq!(
            mgr.override_path("docker").unwrap(),
            PathBuf::from("/x/docker.service.d/proxy.conf.conf")
        );
    }

    #[tokio::test]
    async fn test_write_override_content_and_idempotency() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SystemdOverrideManager::new(dir.path().to_path_buf(), DEFAULT_DROP_IN).unwrap();
        let body = ProxyConfig::new().render_override().unwrap();

        let (path, outcome) = mgr.write_override("amazon-ssm-agent", &body).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Changed);
        assert_eq!(path, dir.path().join("amazon-ssm-agent.service.d/proxy.conf"));

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("[Service]\n"));
        assert!(written.contains("Environment=\"NO_PROXY=169.254.169.254,"));

        let (_, outcome) = mgr.write_override("amazon-ssm-agent", &body).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_write_override_rejects_bad_unit() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SystemdOverrideManager::new(dir.path().to_path_buf(), DEFAULT_DROP_IN).unwrap();
        let err = mgr.write_override("../sshd", "[Service]\n").await.unwrap_err();
        assert!(matches!(err, NoProxyError::ConfigMalformed(_)));
    }
}
