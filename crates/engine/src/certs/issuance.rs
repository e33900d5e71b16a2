//! Certificate issuance collaborator.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};

use bastion_common::Warnings;
use bastion_config::{CertificatesConfig, DOMAIN_PLACEHOLDER};

use super::store::CertificateStore;
use super::CertError;
use crate::context::{OperatorContext, PermissionDenied};
use crate::model::{lets_encrypt_domains, ModelError, ModelProvider, Relations};
use crate::process::{Invocation, ProcessError};

/// Names safe to substitute into a shell command line
static DOMAIN_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9-]*[a-z0-9])?)+$")
        .expect("domain pattern is valid")
});

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("no {0} is configured")]
    NotConfigured(&'static str),

    #[error("refusing to pass '{0}' to the issuance command: not a plain domain name")]
    InvalidDomain(String),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Denied(#[from] PermissionDenied),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Certificates(#[from] CertError),
}

/// Obtains and removes certificates in the certificate directory
pub trait CertificateIssuer: Send + Sync {
    /// Make sure a usable certificate for `domain` is present, issuing one if
    /// needed. `Ok(true)` means one is now in place.
    fn check_cert_and_opt_create(&self, domain: &str) -> Result<bool, IssueError>;

    fn delete_cert(&self, domain: &str) -> Result<(), IssueError>;
}

/// Issuer driven by the configured shell commands
#[derive(Debug, Clone)]
pub struct CommandIssuer {
    issue_command: Option<String>,
    delete_command: Option<String>,
}

impl CommandIssuer {
    pub fn new(config: &CertificatesConfig) -> Self {
        Self {
            issue_command: config.issue_command.clone(),
            delete_command: config.delete_command.clone(),
        }
    }

    fn command_for(
        template: Option<&str>,
        what: &'static str,
        domain: &str,
    ) -> Result<Invocation, IssueError> {
        let template = template.ok_or(IssueError::NotConfigured(what))?;
        let domain = domain.to_ascii_lowercase();
        if !DOMAIN_NAME.is_match(&domain) {
            return Err(IssueError::InvalidDomain(domain));
        }
        let command_line = template.replace(DOMAIN_PLACEHOLDER, &domain);
        Ok(Invocation::shell(&command_line))
    }
}

impl CertificateIssuer for CommandIssuer {
    fn check_cert_and_opt_create(&self, domain: &str) -> Result<bool, IssueError> {
        let invocation = Self::command_for(self.issue_command.as_deref(), "issue-command", domain)?;
        match invocation.run() {
            Ok(_) => Ok(true),
            Err(ProcessError::Failed {
                status, details, ..
            }) => {
                debug!(
                    domain = %domain,
                    status = %status,
                    details = %details,
                    "Issuance declined"
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete_cert(&self, domain: &str) -> Result<(), IssueError> {
        Self::command_for(self.delete_command.as_deref(), "delete-command", domain)?.run()?;
        Ok(())
    }
}

/// Outcome of a bulk issuance pass
#[derive(Debug, Default)]
pub struct IssueReport {
    /// Domains that now have a certificate
    pub issued: Vec<String>,
    pub warnings: Warnings,
}

/// Issuance operations that keep the store consistent
pub struct CertificateService {
    store: Arc<CertificateStore>,
    issuer: Arc<dyn CertificateIssuer>,
}

impl CertificateService {
    pub fn new(store: Arc<CertificateStore>, issuer: Arc<dyn CertificateIssuer>) -> Self {
        Self { store, issuer }
    }

    /// Issue a certificate for one domain if needed
    pub fn ensure(&self, domain: &str) -> Result<bool, IssueError> {
        let result = self.issuer.check_cert_and_opt_create(domain);
        self.store.invalidate();
        result
    }

    pub fn remove(&self, domain: &str) -> Result<(), IssueError> {
        let result = self.issuer.delete_cert(domain);
        self.store.invalidate();
        result
    }

    /// Issue certificates for every LetsEncrypt domain that has none.
    ///
    /// Domains are processed one at a time to stay within the issuing
    /// authority's rate limits. A domain that fails is a warning.
    pub fn issue_missing(
        &self,
        ctx: &OperatorContext,
        model: &dyn ModelProvider,
    ) -> Result<IssueReport, IssueError> {
        ctx.require_admin("issue certificates")?;

        let mut report = IssueReport::default();
        let projects = model.projects(ctx, Relations::ROUTING)?;
        let map = self.store.get(&mut report.warnings)?;

        let mut missing: Vec<String> = lets_encrypt_domains(&projects)
            .into_iter()
            .filter(|domain| map.resolve(domain).is_none())
            .collect();
        missing.sort();

        if missing.is_empty() {
            debug!("Every LetsEncrypt domain has a certificate");
            return Ok(report);
        }

        info!(count = missing.len(), "Issuing missing certificates");
        for domain in missing {
            match self.issuer.check_cert_and_opt_create(&domain) {
                Ok(true) => report.issued.push(domain),
                Ok(false) => report
                    .warnings
                    .add(domain, "issuance did not produce a certificate"),
                Err(e) => report.warnings.add(domain, e.to_string()),
            }
        }

        self.store.invalidate();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        backend, days_from_now, le_domain, pem_cert, project, RecordingIssuer, StaticModel,
    };
    use bastion_config::EngineConfig;
    use tempfile::TempDir;

    fn config(issue: &str, delete: &str) -> CertificatesConfig {
        CertificatesConfig {
            issue_command: Some(issue.to_string()),
            delete_command: Some(delete.to_string()),
            ..CertificatesConfig::default()
        }
    }

    #[test]
    fn test_command_issuer_exit_codes() {
        let issuer = CommandIssuer::new(&config(r#"test "{domain}" = "good.example.com""#, "true"));
        assert!(issuer
            .check_cert_and_opt_create("good.example.com")
            .unwrap());
        assert!(!issuer
            .check_cert_and_opt_create("bad.example.com")
            .unwrap());
        issuer.delete_cert("good.example.com").unwrap();
    }

    #[test]
    fn test_command_issuer_lowercases_names() {
        let issuer = CommandIssuer::new(&config(
            r#"test "{domain}" = "app.example.com""#,
            r#"test "{domain}" = "app.example.com""#,
        ));
        assert!(issuer
            .check_cert_and_opt_create("App.Example.COM")
            .unwrap());
        issuer.delete_cert("APP.example.com").unwrap();
    }

    #[test]
    fn test_command_issuer_rejects_unsafe_names() {
        let issuer = CommandIssuer::new(&config("true {domain}", "true {domain}"));
        let err = issuer
            .check_cert_and_opt_create("x.example.com; rm -rf /")
            .unwrap_err();
        assert!(matches!(err, IssueError::InvalidDomain(_)));
        assert!(issuer.check_cert_and_opt_create("localhost").is_err());
    }

    #[test]
    fn test_command_issuer_not_configured() {
        let issuer = CommandIssuer::new(&CertificatesConfig::default());
        let err = issuer.delete_cert("a.example.com").unwrap_err();
        assert!(matches!(err, IssueError::NotConfigured("delete-command")));
    }

    fn service_fixture() -> (TempDir, Arc<CertificateStore>, StaticModel) {
        let root = TempDir::new().unwrap();
        let layout = EngineConfig::default_for_testing(root.path()).layout();
        std::fs::create_dir_all(layout.cert_dir()).unwrap();

        let covered = pem_cert(
            &["have.example.com"],
            days_from_now(-1),
            days_from_now(60),
            true
        );
        std::fs::write(layout.cert_dir().join("have.pem"), covered).unwrap();

        let mut prod = backend(1, "prod", Some(80));
        prod.domains.push(le_domain(1, "have.example.com"));
        prod.domains.push(le_domain(2, "b-need.example.com"));
        prod.domains.push(le_domain(3, "a-need.example.com"));
        let model = StaticModel::new(vec![project(1, "acme", vec![prod], vec![])]);

        let store = Arc::new(CertificateStore::new(&layout, Arc::new(model.clone())));
        (root, store, model)
    }

    #[test]
    fn test_issue_missing_is_sequential_and_collects_failures() {
        let (_root, store, model) = service_fixture();
        let issuer = Arc::new(RecordingIssuer::failing_for(&["b-need.example.com"]));
        let service = CertificateService::new(Arc::clone(&store), issuer.clone());

        let report = service
            .issue_missing(&OperatorContext::admin("root"), &model)
            .unwrap();

        assert_eq!(
            issuer.calls(),
            vec!["issue a-need.example.com", "issue b-need.example.com"]
        );
        assert_eq!(report.issued, vec!["a-need.example.com"]);
        assert!(report.warnings.mentions("b-need.example.com"));
    }

    #[test]
    fn test_issue_missing_requires_admin() {
        let (_root, store, model) = service_fixture();
        let issuer = Arc::new(RecordingIssuer::default());
        let service = CertificateService::new(store, issuer.clone());

        let err = service
            .issue_missing(&OperatorContext::operator("bob", ["acme"]), &model)
            .unwrap_err();
        assert!(matches!(err, IssueError::Denied(_)));
        assert!(issuer.calls().is_empty());
    }

    #[test]
    fn test_ensure_invalidates_store() {
        let (root, store, _model) = service_fixture();
        let issuer = Arc::new(RecordingIssuer::default());
        let service = CertificateService::new(Arc::clone(&store), issuer);

        let mut warnings = Warnings::new();
        assert!(store
            .resolve("a-need.example.com", &mut warnings)
            .unwrap()
            .is_none());

        let pem = pem_cert(
            &["a-need.example.com"],
            days_from_now(-1),
            days_from_now(60),
            true
        );
        let cert_dir = EngineConfig::default_for_testing(root.path())
            .layout()
            .cert_dir();
        std::fs::write(cert_dir.join("a-need.pem"), pem).unwrap();

        assert!(service.ensure("a-need.example.com").unwrap());
        assert!(store
            .resolve("a-need.example.com", &mut warnings)
            .unwrap()
            .is_some());
    }
}
