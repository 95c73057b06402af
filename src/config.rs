use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SshError};
use crate::secret::Secret;

pub(crate) fn _default_ssh_port() -> u16 {
    22
}

fn _default_max_mappings() -> usize {
    16
}

fn _default_true() -> bool {
    true
}

/// One jump host in a `Chain`. Immutable once built (§3).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HopConfig {
    pub name: String,
    pub host: String,
    #[serde(default = "_default_ssh_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub auth: AuthMethodConfig,
    /// Accept any host key for this hop if `true` (development default per spec §9).
    #[serde(default = "_default_true")]
    pub insecure_accept_any_host_key: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthMethodConfig {
    Key {
        private_key_path: PathBuf,
        passphrase: Option<Secret<String>>,
    },
    Password {
        password: Secret<String>,
    },
}

impl Default for AuthMethodConfig {
    fn default() -> Self {
        AuthMethodConfig::Key {
            private_key_path: PathBuf::from("~/.ssh/id_ed25519"),
            passphrase: None,
        }
    }
}

/// A local-to-remote forwarding rule (§3).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForwardRuleConfig {
    pub local_listen_addr: String,
    pub remote_host: String,
    pub remote_port: u16,
    /// Hop names, outermost first, resolved against the loaded `HopConfig` set.
    pub via: Vec<String>,
}

/// A token accepted by a `PortalServer`, scoped to an ACL and quota (§3, §6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenConfigEntry {
    pub token: Secret<String>,
    #[serde(default)]
    pub allowed_remotes: Vec<String>,
    #[serde(default = "_default_max_mappings")]
    pub max_mappings: usize,
}

/// A reverse-portal mapping (§3).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PortMappingConfig {
    pub id: String,
    pub name: String,
    pub local_addr: String,
    pub remote_host: String,
    pub remote_port: u16,
    #[serde(default)]
    pub via: Vec<String>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default = "_default_true")]
    pub enabled: bool,
}

/// Portal server-side configuration (§6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PortalServerConfig {
    #[serde(default = "_default_true")]
    pub enabled: bool,
    pub listen_addr: String,
    pub tls_cert_path: PathBuf,
    pub tls_key_path: PathBuf,
    #[serde(default)]
    pub tokens: Vec<TokenConfigEntry>,
}

/// Top-level config shape a `ConfigSource` hands back (§6.1 ambient seam).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FabricConfig {
    #[serde(default)]
    pub hops: Vec<HopConfig>,
    #[serde(default)]
    pub forwards: Vec<ForwardRuleConfig>,
    pub portal_server: Option<PortalServerConfig>,
    #[serde(default)]
    pub mappings: Vec<PortMappingConfig>,
}

impl FabricConfig {
    pub fn from_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_str(&text)
    }
}

/// Resolves a `via` hop-name list (as attached to a `ForwardRuleConfig` or
/// `PortMappingConfig`) against the full hop set a caller loaded, in order,
/// erroring on the first name with no matching `HopConfig` (spec §3: "via is
/// resolved against a hop registry the caller supplies").
pub fn resolve_via(hops: &[HopConfig], via: &[String]) -> Result<Vec<HopConfig>, SshError> {
    via.iter()
        .map(|name| {
            hops.iter()
                .find(|hop| &hop.name == name)
                .cloned()
                .ok_or_else(|| SshError::UnknownHop(name.clone()))
        })
        .collect()
}

/// Seam an (out-of-scope) management API or CLI would implement to hand the
/// core a parsed config without the core depending on how it got there
/// (spec §9: "replace the ambient config with constructor arguments").
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<FabricConfig, ConfigError>;
}

/// The one concrete, in-scope `ConfigSource`: read YAML off disk.
pub struct FileConfigSource {
    pub path: PathBuf,
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<FabricConfig, ConfigError> {
        FabricConfig::from_file(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_yaml() {
        let yaml = r#"
hops:
  - name: bastion
    host: bastion.example.com
    user: alice
    auth:
      kind: password
      password: hunter2
forwards:
  - local_listen_addr: "127.0.0.1:17000"
    remote_host: 10.0.0.5
    remote_port: 8080
    via: [bastion]
"#;
        let cfg = FabricConfig::from_str(yaml).expect("parse");
        assert_eq!(cfg.hops.len(), 1);
        assert_eq!(cfg.hops[0].port, 22);
        assert_eq!(cfg.forwards[0].via, vec!["bastion".to_string()]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(FabricConfig::from_str("not: [valid, yaml: structure").is_err());
    }

    fn hop(name: &str) -> HopConfig {
        HopConfig {
            name: name.to_string(),
            host: format!("{name}.example.com"),
            port: 22,
            user: "alice".to_string(),
            auth: AuthMethodConfig::default(),
            insecure_accept_any_host_key: true,
        }
    }

    #[test]
    fn resolve_via_preserves_order() {
        let hops = vec![hop("a"), hop("b"), hop("c")];
        let resolved = resolve_via(&hops, &["c".to_string(), "a".to_string()]).unwrap();
        assert_eq!(resolved.iter().map(|h| h.name.as_str()).collect::<Vec<_>>(), vec!["c", "a"]);
    }

    #[test]
    fn resolve_via_rejects_unknown_hop_names() {
        let hops = vec![hop("a")];
        let err = resolve_via(&hops, &["nope".to_string()]).unwrap_err();
        assert!(matches!(err, SshError::UnknownHop(name) if name == "nope"));
    }
}
