//! Domain model consumed by the engine.
//!
//! The relational persistence layer owns these entities; the engine only
//! reads them through a [`ModelProvider`]. Relations are nested the way the
//! provider loads them: a project carries its backends and containers, a
//! backend carries its domains and load-balancing members, a container
//! carries its SSH permission grants.

mod json_store;

use std::collections::HashSet;
use std::net::Ipv6Addr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use bastion_common::{BackendId, ContainerId, DomainId, ProjectId, UserId};

use crate::context::OperatorContext;

pub use json_store::JsonModelStore;

// ============================================================================
// Reserved labels
// ============================================================================

/// Backend label answering every request with 204
pub const NOCONTENT_LABEL: &str = "nocontent";
/// Backend label issuing 302 redirects
pub const TEMP_REDIRECT_LABEL: &str = "tempredirect";
/// Backend label issuing 301 redirects
pub const PERM_REDIRECT_LABEL: &str = "permredirect";
/// Map-only label for 302 prefix redirects
pub const TEMP_REDIRECT_PREFIX_LABEL: &str = "tempredirect_prefix";
/// Map-only label for 301 prefix redirects
pub const PERM_REDIRECT_PREFIX_LABEL: &str = "permredirect_prefix";

/// A redirect URL ending in this marker keeps the request path
pub const KEEP_PATH_MARKER: &str = "*";

// ============================================================================
// Errors
// ============================================================================

/// Errors from the model provider
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid model snapshot {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

// ============================================================================
// Backend kinds
// ============================================================================

/// How a backend is handled, resolved once from its label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// A pool of containers
    Normal,
    NoContent,
    TemporaryRedirect,
    PermanentRedirect,
}

impl BackendKind {
    pub fn from_label(label: &str) -> Self {
        match label {
            NOCONTENT_LABEL => BackendKind::NoContent,
            TEMP_REDIRECT_LABEL => BackendKind::TemporaryRedirect,
            PERM_REDIRECT_LABEL => BackendKind::PermanentRedirect,
            _ => BackendKind::Normal,
        }
    }

    pub fn is_redirect(self) -> bool {
        matches!(
            self,
            BackendKind::TemporaryRedirect | BackendKind::PermanentRedirect
        )
    }

    /// Value written to domain2backend.map for an exact-location domain
    pub fn map_label(self) -> Option<&'static str> {
        match self {
            BackendKind::Normal => None,
            BackendKind::NoContent => Some(NOCONTENT_LABEL),
            BackendKind::TemporaryRedirect => Some(TEMP_REDIRECT_LABEL),
            BackendKind::PermanentRedirect => Some(PERM_REDIRECT_LABEL),
        }
    }

    /// Value written to domain2backend.map for a prefix-redirect domain
    pub fn prefix_map_label(self) -> Option<&'static str> {
        match self {
            BackendKind::TemporaryRedirect => Some(TEMP_REDIRECT_PREFIX_LABEL),
            BackendKind::PermanentRedirect => Some(PERM_REDIRECT_PREFIX_LABEL),
            _ => None,
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A real person who may hold SSH grants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub login: String,
    #[serde(default)]
    pub public_key: Option<String>,
}

/// Grants a user SSH access to a container as a technical user
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPermission {
    pub user: User,
    /// Technical username inside the container
    pub permission: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl std::fmt::Debug for ContainerPermission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerPermission")
            .field("user", &self.user.login)
            .field("permission", &self.permission)
            .field("has_password", &self.password.is_some())
            .finish()
    }
}

/// A tenant VM or container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub label: String,
    #[serde(default)]
    pub host_id: Option<i64>,
    #[serde(default)]
    pub ipv6: Option<Ipv6Addr>,
    #[serde(default)]
    pub permissions: Vec<ContainerPermission>,
}

/// Load-balancing member of a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendContainer {
    pub container_id: ContainerId,
    /// Extra HAProxy `server` line options
    #[serde(default)]
    pub params: Option<String>,
}

/// Where a redirect domain sends its visitors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectTarget {
    /// Redirect to exactly this location
    Location(String),
    /// Redirect to this prefix, keeping the request path
    Prefix(String),
}

/// A routed domain name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub id: DomainId,
    pub domain: String,
    /// The operator installs the certificate manually
    #[serde(default)]
    pub cert_provided: bool,
    /// The certificate is issued and renewed automatically
    #[serde(default)]
    pub lets_encrypt: bool,
    #[serde(default)]
    pub redirect_to_url: Option<String>,
}

impl Domain {
    /// Interpret `redirect_to_url`; a trailing keep-path marker selects
    /// prefix redirection
    pub fn redirect_target(&self) -> Option<RedirectTarget> {
        let url = self.redirect_to_url.as_deref()?.trim();
        if url.is_empty() {
            return None;
        }

        match url.strip_suffix(KEEP_PATH_MARKER) {
            Some(prefix) => Some(RedirectTarget::Prefix(
                prefix.trim_end_matches('/').to_string(),
            )),
            None => Some(RedirectTarget::Location(url.to_string())),
        }
    }
}

/// Wire shape of a backend, before its label is resolved
#[derive(Serialize, Deserialize)]
struct BackendRecord {
    id: BackendId,
    label: String,
    #[serde(default)]
    fullname: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    params: Option<String>,
    #[serde(default)]
    domains: Vec<Domain>,
    #[serde(default)]
    members: Vec<BackendContainer>,
}

/// An HAProxy routing target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BackendRecord", into = "BackendRecord")]
pub struct Backend {
    pub id: BackendId,
    pub label: String,
    pub fullname: String,
    pub port: Option<u16>,
    /// Extra lines for the HAProxy backend stanza
    pub params: Option<String>,
    pub domains: Vec<Domain>,
    pub members: Vec<BackendContainer>,
    kind: BackendKind,
}

impl Backend {
    pub fn new(id: BackendId, label: impl Into<String>, port: Option<u16>) -> Self {
        let label = label.into();
        Self {
            id,
            kind: BackendKind::from_label(&label),
            fullname: label.clone(),
            label,
            port,
            params: None,
            domains: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }
}

impl From<BackendRecord> for Backend {
    fn from(record: BackendRecord) -> Self {
        Self {
            id: record.id,
            kind: BackendKind::from_label(&record.label),
            label: record.label,
            fullname: record.fullname,
            port: record.port,
            params: record.params,
            domains: record.domains,
            members: record.members,
        }
    }
}

impl From<Backend> for BackendRecord {
    fn from(backend: Backend) -> Self {
        Self {
            id: backend.id,
            label: backend.label,
            fullname: backend.fullname,
            port: backend.port,
            params: backend.params,
            domains: backend.domains,
            members: backend.members,
        }
    }
}

/// A tenant project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub label: String,
    #[serde(default)]
    pub fullname: String,
    #[serde(default)]
    pub backends: Vec<Backend>,
    #[serde(default)]
    pub containers: Vec<Container>,
}

impl Project {
    pub fn container(&self, id: ContainerId) -> Option<&Container> {
        self.containers.iter().find(|c| c.id == id)
    }
}

// ============================================================================
// Provider
// ============================================================================

/// Relation sets a caller needs populated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relations {
    pub backends: bool,
    pub domains: bool,
    pub members: bool,
    pub containers: bool,
    pub permissions: bool,
}

impl Relations {
    /// What config generation needs
    pub const ROUTING: Relations = Relations {
        backends: true,
        domains: true,
        members: true,
        containers: true,
        permissions: false,
    };

    /// What account reconciliation needs
    pub const ACCESS: Relations = Relations {
        backends: false,
        domains: false,
        members: false,
        containers: true,
        permissions: true,
    };
}

/// Source of the domain model
pub trait ModelProvider: Send + Sync {
    /// Projects visible to `ctx`, with the requested relations populated
    fn projects(
        &self,
        ctx: &OperatorContext,
        relations: Relations,
    ) -> Result<Vec<Project>, ModelError>;
}

/// Domain names that must be served with a LetsEncrypt certificate
pub fn lets_encrypt_domains(projects: &[Project]) -> HashSet<String> {
    projects
        .iter()
        .flat_map(|p| &p.backends)
        .flat_map(|b| &b.domains)
        .filter(|d| d.lets_encrypt)
        .map(|d| d.domain.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain(url: Option<&str>) -> Domain {
        Domain {
            id: DomainId::new(1),
            domain: "old.example.com".to_string(),
            cert_provided: false,
            lets_encrypt: false,
            redirect_to_url: url.map(str::to_string),
        }
    }

    #[test]
    fn test_backend_kind_from_label() {
        assert_eq!(BackendKind::from_label("nocontent"), BackendKind::NoContent);
        assert_eq!(
            BackendKind::from_label("tempredirect"),
            BackendKind::TemporaryRedirect
        );
        assert_eq!(
            BackendKind::from_label("permredirect"),
            BackendKind::PermanentRedirect
        );
        assert_eq!(BackendKind::from_label("prod"), BackendKind::Normal);
        // labels are exact; no case folding
        assert_eq!(BackendKind::from_label("NoContent"), BackendKind::Normal);
    }

    #[test]
    fn test_redirect_kinds() {
        assert!(!BackendKind::NoContent.is_redirect());
        assert!(BackendKind::PermanentRedirect.is_redirect());
        assert_eq!(BackendKind::NoContent.prefix_map_label(), None);
        assert_eq!(
            BackendKind::TemporaryRedirect.prefix_map_label(),
            Some("tempredirect_prefix")
        );
    }

    #[test]
    fn test_backend_kind_resolved_on_deserialize() {
        let backend: Backend = serde_json::from_str(
            r#"{"id": 3, "label": "permredirect", "domains": []}"#,
        )
        .unwrap();
        assert_eq!(backend.kind(), BackendKind::PermanentRedirect);

        let json = serde_json::to_string(&backend).unwrap();
        assert!(json.contains("\"label\":\"permredirect\""));
        assert!(!json.contains("kind"));
    }

    #[test]
    fn test_redirect_target() {
        assert_eq!(domain(None).redirect_target(), None);
        assert_eq!(domain(Some("  ")).redirect_target(), None);
        assert_eq!(
            domain(Some("https://new.example.com/landing")).redirect_target(),
            Some(RedirectTarget::Location(
                "https://new.example.com/landing".to_string()
            ))
        );
        assert_eq!(
            domain(Some("https://new.example.com/*")).redirect_target(),
            Some(RedirectTarget::Prefix(
                "https://new.example.com".to_string()
            ))
        );
    }

    #[test]
    fn test_permission_debug_hides_password() {
        let permission = ContainerPermission {
            user: User {
                id: UserId::new(1),
                login: "alice".to_string(),
                public_key: None,
            },
            permission: "root".to_string(),
            password: Some("hunter2".to_string()),
        };
        assert!(!format!("{:?}", permission).contains("hunter2"));
    }

    #[test]
    fn test_lets_encrypt_domains() {
        let mut backend = Backend::new(BackendId::new(1), "prod", Some(80));
        backend.domains.push(Domain {
            lets_encrypt: true,
            domain: "App.Example.com".to_string(),
            ..domain(None)
        });
        backend.domains.push(domain(None));
        let project = Project {
            id: ProjectId::new(1),
            label: "acme".to_string(),
            fullname: String::new(),
            backends: vec![backend],
            containers: vec![],
        };

        let domains = lets_encrypt_domains(&[project]);
        assert_eq!(domains.len(), 1);
        assert!(domains.contains("app.example.com"));
    }
}
