//! Configuration for the bastion reconciliation engine.
//!
//! The engine is configured with a KDL document. Every section is optional;
//! missing keys fall back to the defaults below, which match a standard
//! appliance install.
//!
//! ```kdl
//! paths {
//!     config-dir "/etc/haproxy"
//!     archive-dir "/var/lib/bastion/archive"
//!     home-root "/home/bastion"
//!     model-file "/var/lib/bastion/model.json"
//! }
//! proxy {
//!     binary "/usr/sbin/haproxy"
//!     reload-command "systemctl reload haproxy"
//!     public-address "203.0.113.10"
//!     letsencrypt-port 8888
//! }
//! instance {
//!     role "master"
//!     sync-command "/usr/local/bin/bastion-sync {replica}"
//!     replica "proxy2.example.net"
//! }
//! ```

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub mod kdl;
mod layout;
pub mod validate;

pub use layout::Layout;
pub use validate::{ValidationError, ValidationResult, ValidationWarning};

/// Placeholder substituted with the replica name in `sync-command`
pub const REPLICA_PLACEHOLDER: &str = "{replica}";

/// Placeholder substituted with the domain in certificate commands
pub const DOMAIN_PLACEHOLDER: &str = "{domain}";

// ============================================================================
// Top-level configuration
// ============================================================================

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub paths: PathsConfig,
    pub proxy: ProxyConfig,
    pub instance: InstanceConfig,
    pub accounts: AccountsConfig,
    pub certificates: CertificatesConfig,
}

impl EngineConfig {
    /// Load configuration from a KDL file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

        info!(path = %path.display(), "Loading engine configuration");
        Self::from_kdl_str(&content)
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Parse configuration from KDL text
    pub fn from_kdl_str(content: &str) -> Result<Self> {
        let config = kdl::parse_document(content)?;
        debug!(
            role = ?config.instance.role,
            replicas = config.instance.replicas.len(),
            "Parsed engine configuration"
        );
        Ok(config)
    }

    /// Configuration rooted in a scratch directory, for tests
    pub fn default_for_testing(root: &Path) -> Self {
        Self {
            paths: PathsConfig {
                config_dir: root.join("haproxy"),
                archive_dir: root.join("archive"),
                home_root: root.join("home"),
                model_file: root.join("model.json"),
            },
            proxy: ProxyConfig {
                public_addresses: vec![IpAddr::from([203, 0, 113, 10])],
                ..ProxyConfig::default()
            },
            ..Self::default()
        }
    }

    /// Filesystem layout derived from the configured directories
    pub fn layout(&self) -> Layout {
        Layout::new(
            &self.paths.config_dir,
            &self.paths.archive_dir,
            &self.paths.home_root,
        )
    }

    /// Run semantic validation and lints
    pub fn validate(&self) -> ValidationResult {
        let mut result = validate::instance::validate_instance(self);
        result.merge(validate::lint::lint_config(self));
        result
    }

    pub fn is_master(&self) -> bool {
        self.instance.role == InstanceRole::Master
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Filesystem locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Holds haproxy.cfg, the routing maps, the templates and `certs/`
    pub config_dir: PathBuf,
    /// Superseded artifacts and certificates are moved here
    pub archive_dir: PathBuf,
    /// One subdirectory per SSH proxy account
    pub home_root: PathBuf,
    /// JSON snapshot of the domain model exported by the persistence layer
    pub model_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("/etc/haproxy"),
            archive_dir: PathBuf::from("/var/lib/bastion/archive"),
            home_root: PathBuf::from("/home/bastion"),
            model_file: PathBuf::from("/var/lib/bastion/model.json"),
        }
    }
}

/// External HAProxy process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub binary: PathBuf,
    /// Opaque shell command that makes the running proxy pick up new files
    pub reload_command: String,
    /// Addresses this proxy answers on; used to decide whether a domain has
    /// been cut over in DNS yet
    pub public_addresses: Vec<IpAddr>,
    /// Local port of the ACME HTTP-01 responder
    pub letsencrypt_port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/usr/sbin/haproxy"),
            reload_command: "systemctl reload haproxy".to_string(),
            public_addresses: Vec::new(),
            letsencrypt_port: 8888,
        }
    }
}

/// Role of this instance in the master/replica topology
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceRole {
    #[default]
    Master,
    Replica,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub role: InstanceRole,
    /// Address of the master; replicas forward ACME validation there
    pub master_address: Option<IpAddr>,
    /// Shell command run once per replica; `{replica}` is substituted
    pub sync_command: String,
    /// Replica names (master only)
    pub replicas: Vec<String>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            role: InstanceRole::Master,
            master_address: None,
            sync_command: format!("/usr/local/bin/bastion-sync {}", REPLICA_PLACEHOLDER),
            replicas: Vec::new(),
        }
    }
}

/// SSH proxy accounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountsConfig {
    /// Private key copied into every new proxy account
    pub default_key: PathBuf,
    /// File written inside the target container naming the proxy account
    pub marker_file: String,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            default_key: PathBuf::from("/etc/bastion/proxy_key"),
            marker_file: ".bastion_proxy_user".to_string(),
        }
    }
}

/// Certificate issuance collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificatesConfig {
    /// Shell command that obtains a certificate; `{domain}` is substituted.
    /// Exit code 0 means a usable certificate is now in `certs/`.
    pub issue_command: Option<String>,
    /// Shell command that removes a certificate; `{domain}` is substituted
    pub delete_command: Option<String>,
    /// Certificates expiring within this many days are reported
    pub expiry_warning_days: u32,
}

impl Default for CertificatesConfig {
    fn default() -> Self {
        Self {
            issue_command: None,
            delete_command: None,
            expiry_warning_days: 14,
        }
    }
}
