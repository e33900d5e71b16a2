//! Fixtures and recording fakes shared by the unit tests.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use time::{Duration, OffsetDateTime};

use bastion_common::{BackendId, ContainerId, DomainId, ProjectId, UserId};

use crate::accounts::{AccountError, OsAccountManager, ProxyAccount};
use crate::certs::{CertificateIssuer, IssueError};
use crate::context::OperatorContext;
use crate::haproxy::{DomainResolver, ProxyBinary};
use crate::model::{
    Backend, BackendContainer, Container, ContainerPermission, Domain, ModelError, ModelProvider,
    Project, Relations, User,
};
use crate::process::ProcessError;

// ============================================================================
// Certificates
// ============================================================================

pub fn days_from_now(days: i64) -> OffsetDateTime {
    OffsetDateTime::now_utc() + Duration::days(days)
}

/// Self-signed PEM certificate; the issuer organization marks LetsEncrypt
pub fn pem_cert(
    sans: &[&str],
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    lets_encrypt: bool,
) -> String {
    let names: Vec<String> = sans.iter().map(|s| s.to_string()).collect();
    let mut params = CertificateParams::new(names).unwrap();
    let organization = if lets_encrypt {
        "Let's Encrypt"
    } else {
        "Example CA"
    };
    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, organization);
    dn.push(DnType::CommonName, sans.first().copied().unwrap_or("test"));
    params.distinguished_name = dn;
    params.not_before = not_before;
    params.not_after = not_after;

    let key = KeyPair::generate().unwrap();
    params.self_signed(&key).unwrap().pem()
}

// ============================================================================
// Model builders
// ============================================================================

pub fn project(
    id: i64,
    label: &str,
    backends: Vec<Backend>,
    containers: Vec<Container>,
) -> Project {
    Project {
        id: ProjectId::new(id),
        label: label.to_string(),
        fullname: label.to_string(),
        backends,
        containers,
    }
}

pub fn backend(id: i64, label: &str, port: Option<u16>) -> Backend {
    Backend::new(BackendId::new(id), label, port)
}

pub fn container(id: i64, label: &str, ipv6: Option<&str>) -> Container {
    Container {
        id: ContainerId::new(id),
        label: label.to_string(),
        host_id: None,
        ipv6: ipv6.map(|a| a.parse().unwrap()),
        permissions: Vec::new(),
    }
}

pub fn member(container_id: i64, params: Option<&str>) -> BackendContainer {
    BackendContainer {
        container_id: ContainerId::new(container_id),
        params: params.map(str::to_string),
    }
}

pub fn domain(id: i64, name: &str) -> Domain {
    Domain {
        id: DomainId::new(id),
        domain: name.to_string(),
        cert_provided: false,
        lets_encrypt: false,
        redirect_to_url: None,
    }
}

pub fn le_domain(id: i64, name: &str) -> Domain {
    Domain {
        lets_encrypt: true,
        ..domain(id, name)
    }
}

pub fn grant(
    user_id: i64,
    login: &str,
    public_key: Option<&str>,
    permission: &str,
    password: Option<&str>,
) -> ContainerPermission {
    ContainerPermission {
        user: User {
            id: UserId::new(user_id),
            login: login.to_string(),
            public_key: public_key.map(str::to_string),
        },
        permission: permission.to_string(),
        password: password.map(str::to_string),
    }
}

/// In-memory model, filtered by the caller's visibility
#[derive(Debug, Clone, Default)]
pub struct StaticModel {
    projects: Vec<Project>,
}

impl StaticModel {
    pub fn new(projects: Vec<Project>) -> Self {
        Self { projects }
    }
}

impl ModelProvider for StaticModel {
    fn projects(
        &self,
        ctx: &OperatorContext,
        _relations: Relations,
    ) -> Result<Vec<Project>, ModelError> {
        Ok(self
            .projects
            .iter()
            .filter(|p| ctx.can_see(&p.label))
            .cloned()
            .collect())
    }
}

// ============================================================================
// Collaborator fakes
// ============================================================================

fn failure(command: &str) -> ProcessError {
    ProcessError::Failed {
        command: command.to_string(),
        status: "exit code 1".to_string(),
        stdout: String::new(),
        stderr: "injected failure".to_string(),
        details: "injected failure".to_string(),
    }
}

#[derive(Debug, Default)]
pub struct StaticResolver {
    answers: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn with(mut self, domain: &str, address: IpAddr) -> Self {
        self.answers
            .entry(domain.to_string())
            .or_default()
            .push(address);
        self
    }
}

impl DomainResolver for StaticResolver {
    fn lookup(&self, domain: &str) -> Vec<IpAddr> {
        self.answers.get(domain).cloned().unwrap_or_default()
    }
}

/// Records calls; rejects any config file containing `reject_marker`
#[derive(Debug, Default)]
pub struct RecordingBinary {
    reject_marker: Option<String>,
    fail_reload: bool,
    calls: Mutex<Vec<String>>,
}

impl RecordingBinary {
    pub fn rejecting(marker: &str) -> Self {
        Self {
            reject_marker: Some(marker.to_string()),
            ..Self::default()
        }
    }

    pub fn failing_reload() -> Self {
        Self {
            fail_reload: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl ProxyBinary for RecordingBinary {
    fn check_config(&self, config: &Path) -> Result<(), ProcessError> {
        self.calls
            .lock()
            .push(format!("check {}", config.display()));
        let content = std::fs::read_to_string(config).unwrap_or_default();
        match &self.reject_marker {
            Some(marker) if content.contains(marker.as_str()) => Err(failure("haproxy -c")),
            _ => Ok(()),
        }
    }

    fn reload(&self) -> Result<(), ProcessError> {
        self.calls.lock().push("reload".to_string());
        if self.fail_reload {
            Err(failure("reload"))
        } else {
            Ok(())
        }
    }
}

/// Records issuance calls; fails for the given domains
#[derive(Debug, Default)]
pub struct RecordingIssuer {
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl RecordingIssuer {
    pub fn failing_for(domains: &[&str]) -> Self {
        Self {
            failing: domains.iter().map(|d| d.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl CertificateIssuer for RecordingIssuer {
    fn check_cert_and_opt_create(&self, domain: &str) -> Result<bool, IssueError> {
        self.calls.lock().push(format!("issue {}", domain));
        if self.failing.contains(domain) {
            Err(failure("issue").into())
        } else {
            Ok(true)
        }
    }

    fn delete_cert(&self, domain: &str) -> Result<(), IssueError> {
        self.calls.lock().push(format!("delete {}", domain));
        Ok(())
    }
}

/// In-memory account database; `delete_user` removes the home directory
#[derive(Debug)]
pub struct FakeOs {
    home_root: PathBuf,
    users: Mutex<BTreeSet<String>>,
    failing: Mutex<HashSet<&'static str>>,
    calls: Mutex<Vec<String>>,
}

impl FakeOs {
    pub fn new(home_root: &Path) -> Self {
        Self {
            home_root: home_root.to_path_buf(),
            users: Mutex::new(BTreeSet::new()),
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn add_user(&self, name: &str) {
        self.users.lock().insert(name.to_string());
    }

    pub fn exists(&self, name: &str) -> bool {
        self.users.lock().contains(name)
    }

    pub fn users(&self) -> Vec<String> {
        self.users.lock().iter().cloned().collect()
    }

    /// Make every later call of `operation` fail
    pub fn fail_on(&self, operation: &'static str) {
        self.failing.lock().insert(operation);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, operation: &'static str, name: &str) -> Result<(), AccountError> {
        self.calls.lock().push(format!("{} {}", operation, name));
        if self.failing.lock().contains(operation) {
            return Err(AccountError::Process {
                account: name.to_string(),
                source: failure(operation),
            });
        }
        Ok(())
    }
}

impl OsAccountManager for FakeOs {
    fn user_exists(&self, name: &str) -> Result<bool, AccountError> {
        Ok(self.exists(name))
    }

    fn create_user(&self, name: &str, _home: &Path, _shell: &Path) -> Result<(), AccountError> {
        self.record("create_user", name)?;
        self.add_user(name);
        Ok(())
    }

    fn set_password(&self, name: &str, _password: &str) -> Result<(), AccountError> {
        self.record("set_password", name)
    }

    fn clear_password(&self, name: &str) -> Result<(), AccountError> {
        self.record("clear_password", name)
    }

    fn chown(&self, name: &str, _path: &Path) -> Result<(), AccountError> {
        self.record("chown", name)
    }

    fn delete_user(&self, name: &str) -> Result<(), AccountError> {
        self.record("delete_user", name)?;
        self.users.lock().remove(name);
        let home = self.home_root.join(name);
        if home.exists() {
            std::fs::remove_dir_all(&home)
                .map_err(|source| AccountError::Io { path: home, source })?;
        }
        Ok(())
    }

    fn push_marker(&self, account: &ProxyAccount, _marker_file: &str) -> Result<(), AccountError> {
        self.record("push_marker", &account.username)
    }
}
