// src/sys/logs.rs

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::error::{NoProxyError, Result};
use crate::sys::systemd::validate_unit_name;
use crate::sys::traits::LogSource;

fn tail(text: &str, window: usize) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(window);
    lines[start..].iter().map(|l| l.to_string()).collect()
}

/// Keeps only the last `window` lines in memory while reading, so a
/// multi-gigabyte agent log costs one window, not the whole file.
async fn tail_reader<R: AsyncRead + Unpin>(reader: R, window: usize) -> std::io::Result<Vec<String>> {
    if window == 0 {
        return Ok(Vec::new());
    }
    let mut reader = BufReader::new(reader);
    let mut ring: VecDeque<String> = VecDeque::with_capacity(window.min(4096));
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        if ring.len() == window {
            ring.pop_front();
        }
        // Agent logs occasionally carry non-UTF-8 payloads; don't fail the scan over them.
        ring.push_back(String::from_utf8_lossy(&buf).into_owned());
    }
    Ok(ring.into())
}

// ==============================================================================
// 1. Plain Log File (e.g. /var/log/amazon/ssm/amazon-ssm-agent.log)
// ==============================================================================

pub struct FileLogSource {
    path: PathBuf,
}

impl FileLogSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl LogSource for FileLogSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn recent_lines(&self, window: usize) -> Result<Vec<String>> {
        let file = tokio::fs::File::open(&self.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                NoProxyError::LogSource(format!("log file {} does not exist", self.path.display()))
            } else {
                NoProxyError::io(&self.path, e)
            }
        })?;
        tail_reader(file, window)
            .await
            .map_err(|e| NoProxyError::io(&self.path, e))
    }
}

// ==============================================================================
// 2. systemd Journal
// ==============================================================================

pub struct JournalLogSource {
    unit: String,
}

impl JournalLogSource {
    pub fn new(unit: String) -> Self {
        Self { unit }
    }
}

#[async_trait]
impl LogSource for JournalLogSource {
    fn describe(&self) -> String {
        format!("journal:{}", self.unit)
    }

    async fn recent_lines(&self, window: usize) -> Result<Vec<String>> {
        validate_unit_name(&self.unit)?;

        let output = Command::new("journalctl")
            .args(["--no-pager", "-o", "short-iso", "-n"])
            .arg(window.to_string())
            .arg("-u")
            .arg(&self.unit)
            .output()
            .await
            .map_err(|e| NoProxyError::LogSource(format!("journalctl spawn error: {}", e)))?;

        if !output.status.success() {
            return Err(NoProxyError::LogSource(format!(
                "journalctl failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(tail(&String::from_utf8_lossy(&output.stdout), window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_keeps_most_recent() {
        assert_eq!(tail("a\nb\nc\n", 2), vec!["b", "c"]);
        assert_eq!(tail("a\nb", 10), vec!["a", "b"]);
        assert!(tail("a\nb", 0).is_empty());
    }

    #[tokio::test]
    async fn test_file_source_reads_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.log");
        std::fs::write(&path, "one\ntwo\nthree\n").unwrap();

        let source = FileLogSource::new(path.clone());
        assert_eq!(source.recent_lines(2).await.unwrap(), vec!["two", "three"]);
        assert_eq!(source.describe(), path.display().to_string());
    }

    #[tokio::test]
    async fn test_file_source_keeps_only_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.log");
        let body: String = (0..10_000).map(|i| format!("line {}\r\n", i)).collect();
        std::fs::write(&path, body).unwrap();

        let source = FileLogSource::new(path);
        assert_eq!(source.recent_lines(3).await.unwrap(), vec!["line 9997", "line 9998", "line 9999"]);
        assert!(source.recent_lines(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_source_tolerates_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.log");
        std::fs::write(&path, b"ok\n\xff\xfe proxyconnect tcp\nlast").unwrap();

        let lines = FileLogSource::new(path).recent_lines(10).await.unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].ends_with(" proxyconnect tcp"));
        assert_eq!(lines[2], "last");
    }

    #[tokio::test]
    async fn test_journal_source_rejects_unsafe_unit() {
        for unit in ["../x", "foo;reboot", "--since=yesterday", ""] {
            let err = JournalLogSource::new(unit.to_string()).recent_lines(10).await.unwrap_err();
            assert!(matches!(err, NoProxyError::ConfigMalformed(_)), "{:?}", unit);
        }
    }

    #[tokio::test]
    async fn test_file_source_missing_file() {
        let source = FileLogSource::new(PathBuf::from("/nonexistent/imds-noproxy/agent.log"));
        let err = source.recent_lines(10).await.unwrap_err();
        assert!(matches!(err, NoProxyError::LogSource(_)));
    }
}
