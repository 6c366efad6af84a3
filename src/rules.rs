// src/rules.rs

use serde::Serialize;

use crate::error::{NoProxyError, Result};

/// One host, address or URL prefix that must never be routed through the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExclusionEntry {
    pub pattern: &'static str,
    pub rationale: &'static str,
}

/// The recommended exclusions for an EC2 instance behind a corporate proxy.
///
/// Every entry is mandatory: `ProxyConfig` always seeds its list from this
/// table, and user additions can only be appended after it.
pub const RULE_TABLE: &[ExclusionEntry] = &[
    ExclusionEntry {
        pattern: "169.254.169.254",
        rationale: "Instance Metadata Service (IMDS): instance identity, role credentials, IMDSv2 tokens",
    },
    ExclusionEntry {
        pattern: "169.254.170.2",
        rationale: "Container task metadata and credentials endpoint (ECS/EKS task roles)",
    },
    ExclusionEntry {
        pattern: "169.254.169.123",
        rationale: "Amazon Time Sync Service, link-local and unreachable through a proxy",
    },
    ExclusionEntry {
        pattern: "127.0.0.1",
        rationale: "IPv4 loopback: local agents and sidecars",
    },
    ExclusionEntry {
        pattern: "::1",
        rationale: "IPv6 loopback",
    },
    ExclusionEntry {
        pattern: "localhost",
        rationale: "Loopback hostname",
    },
    ExclusionEntry {
        pattern: "instance-data",
        rationale: "Metadata hostname alias resolving to 169.254.169.254",
    },
    ExclusionEntry {
        pattern: "169.254.169.254/latest",
        rationale: "Path-suffixed IMDS form for bypass implementations that match full URLs",
    },
    ExclusionEntry {
        pattern: "169.254.170.2/v2",
        rationale: "Path-suffixed container credentials form for bypass implementations that match full URLs",
    },
];

pub fn mandatory_patterns() -> impl Iterator<Item = &'static str> {
    RULE_TABLE.iter().map(|entry| entry.pattern)
}

/// 🛡️ Rejects anything that could break out of a `KEY=v1,v2` line or a
/// quoted `Environment="..."` directive.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    if pattern.is_empty() {
        return Err(NoProxyError::ConfigMalformed(
            "Exclusion pattern cannot be empty".to_string(),
        ));
    }
    if pattern.trim() != pattern {
        return Err(NoProxyError::ConfigMalformed(format!(
            "Exclusion pattern has surrounding whitespace: '{}'",
            pattern
        )));
    }
    // Allow alphanumeric, dots, hyphens, underscores, colons (IPv6), slashes
    // (CIDR and path suffixes), brackets (bracketed IPv6) and the lone wildcard.
    if let Some(bad) = pattern.chars().find(|c| {
        !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '/' | '*' | '[' | ']'))
    }) {
        return Err(NoProxyError::ConfigMalformed(format!(
            "Invalid character {:?} in exclusion pattern '{}'",
            bad, pattern
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_table_patterns_are_valid_and_unique() {
        let mut seen = std::collections::HashSet::new();
        for entry in RULE_TABLE {
            assert!(validate_pattern(entry.pattern).is_ok(), "{}", entry.pattern);
            assert!(!entry.rationale.is_empty());
            assert!(seen.insert(entry.pattern), "duplicate {}", entry.pattern);
        }
    }

    #[test]
    fn test_rule_table_covers_metadata_and_loopback() {
        let patterns: Vec<&str> = mandatory_patterns().collect();
        for required in [
            "169.254.169.254",
            "169.254.170.2",
            "127.0.0.1",
            "::1",
            "localhost",
            "instance-data",
            "169.254.169.254/latest",
            "169.254.170.2/v2",
        ] {
            assert!(patterns.contains(&required), "missing {}", required);
        }
        // Primary metadata endpoint leads the table.
        assert_eq!(patterns[0], "169.254.169.254");
    }

    #[test]
    fn test_validate_pattern_accepts_common_forms() {
        assert!(validate_pattern("10.0.0.0/8").is_ok());
        assert!(validate_pattern(".internal.example.com").is_ok());
        assert!(validate_pattern("[fd00:ec2::254]").is_ok());
        assert!(validate_pattern("s3.us-east-1.amazonaws.com").is_ok());
        assert!(validate_pattern("*").is_ok());
    }

    #[test]
    fn test_validate_pattern_rejects_injection() {
        assert!(validate_pattern("").is_err());
        assert!(validate_pattern(" localhost").is_err());
        assert!(validate_pattern("a,b").is_err());
        assert!(validate_pattern("a b").is_err());
        assert!(validate_pattern("host\"").is_err());
        assert!(validate_pattern("host=1").is_err());
        assert!(validate_pattern("$(reboot)").is_err());
        assert!(validate_pattern("`id`").is_err());
        assert!(validate_pattern("host\n").is_err());
    }
}
