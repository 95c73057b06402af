use std::collections::HashMap;
use std::net::IpAddr;

use ipnet::IpNet;
use tracing::warn;

use crate::config::TokenConfigEntry;

/// Parsed, in-memory form of a `TokenConfigEntry` (spec §3, §4.5).
#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub allowed_remotes: Vec<IpNet>,
    pub allow_any_hostname: bool,
    pub max_mappings: usize,
}

/// Validates bearer tokens and enforces per-token remote-address ACLs
/// (spec §4.5, P6). Built once from config; immutable thereafter.
pub struct Authenticator {
    tokens: HashMap<String, TokenConfig>,
}

impl Authenticator {
    pub fn new(entries: &[TokenConfigEntry]) -> Self {
        let mut tokens = HashMap::with_capacity(entries.len());
        for entry in entries {
            let mut allowed_remotes = Vec::with_capacity(entry.allowed_remotes.len());
            let mut allow_any_hostname = false;
            for raw in &entry.allowed_remotes {
                match raw.parse::<IpNet>() {
                    Ok(net) => {
                        if raw.trim() == "0.0.0.0/0" {
                            allow_any_hostname = true;
                        }
                        allowed_remotes.push(net);
                    }
                    Err(_) => {
                        warn!(cidr = %raw, "authenticator: skipping malformed CIDR in token config");
                    }
                }
            }
            tokens.insert(
                entry.token.expose_secret().clone(),
                TokenConfig {
                    allowed_remotes,
                    allow_any_hostname,
                    max_mappings: entry.max_mappings,
                },
            );
        }
        Self { tokens }
    }

    /// Exact match against the in-memory token map.
    pub fn validate_token(&self, token: &str) -> Option<&TokenConfig> {
        self.tokens.get(token)
    }

    /// Empty `allowed_remotes` allows everything. IP literals are checked
    /// against the CIDR set; hostnames are allowed only when the wildcard
    /// `0.0.0.0/0` is present (spec §4.5, P6).
    pub fn is_remote_allowed(&self, cfg: &TokenConfig, remote_host: &str) -> bool {
        if cfg.allowed_remotes.is_empty() {
            return true;
        }
        match remote_host.parse::<IpAddr>() {
            Ok(ip) => cfg.allowed_remotes.iter().any(|net| net.contains(&ip)),
            Err(_) => cfg.allow_any_hostname,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::Secret;

    fn entry(token: &str, allowed: &[&str]) -> TokenConfigEntry {
        TokenConfigEntry {
            token: Secret::new(token.to_string()),
            allowed_remotes: allowed.iter().map(|s| s.to_string()).collect(),
            max_mappings: 16,
        }
    }

    #[test]
    fn empty_allowlist_permits_everything() {
        let auth = Authenticator::new(&[entry("T", &[])]);
        let cfg = auth.validate_token("T").unwrap();
        assert!(auth.is_remote_allowed(cfg, "example.com"));
        assert!(auth.is_remote_allowed(cfg, "10.1.2.3"));
    }

    #[test]
    fn hostnames_are_denied_without_the_wildcard() {
        let auth = Authenticator::new(&[entry("T", &["10.0.0.0/8"])]);
        let cfg = auth.validate_token("T").unwrap();
        assert!(!auth.is_remote_allowed(cfg, "example.com"));
        assert!(auth.is_remote_allowed(cfg, "10.1.2.3"));
        assert!(!auth.is_remote_allowed(cfg, "192.168.1.1"));
    }

    #[test]
    fn wildcard_permits_hostnames_too() {
        let auth = Authenticator::new(&[entry("T", &["0.0.0.0/0"])]);
        let cfg = auth.validate_token("T").unwrap();
        assert!(auth.is_remote_allowed(cfg, "example.com"));
    }

    #[test]
    fn malformed_cidrs_are_skipped_not_fatal() {
        let auth = Authenticator::new(&[entry("T", &["not-a-cidr", "10.0.0.0/8"])]);
        let cfg = auth.validate_token("T").unwrap();
        assert_eq!(cfg.allowed_remotes.len(), 1);
    }

    #[test]
    fn unknown_token_is_none() {
        let auth = Authenticator::new(&[entry("T", &[])]);
        assert!(auth.validate_token("WRONG").is_none());
    }
}
