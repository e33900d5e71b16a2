//! Validate-then-replace deployment of the rendered artifacts.
//!
//! The main config is written to a staging file next to the live one and
//! checked with the proxy binary. Only a config that passes is renamed over
//! `haproxy.cfg`, so a rejected render never touches the live file. The maps
//! are plain data files and are overwritten after the check succeeds. There
//! is no transaction across the five files: a crash between writes can leave
//! a mixed set until the next deploy.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use bastion_common::Warnings;
use bastion_config::EngineConfig;

use super::binary::ProxyBinary;
use super::diff::{diff_lines, FileDiff};
use super::render::{Artifacts, Renderer};
use super::resolver::DomainResolver;
use crate::certs::{CertError, CertificateStore};
use crate::context::{OperatorContext, PermissionDenied};
use crate::model::{ModelError, ModelProvider, Relations};
use crate::process::ProcessError;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Denied(#[from] PermissionDenied),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Certificates(#[from] CertError),

    #[error("cannot read template {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The rendered config was rejected; the live config is unchanged
    #[error(
        "generated configuration failed validation, live configuration left untouched; \
         fix the problem and deploy again: {0}"
    )]
    Validation(#[source] ProcessError),

    #[error("live configuration failed validation after replacement: {0}")]
    LiveValidation(#[source] ProcessError),

    #[error("proxy reload failed: {0}")]
    Reload(#[source] ProcessError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeployOptions {
    /// Copy the previous artifacts to the archive directory first
    pub archive: bool,
    /// Report line diffs against the previous artifacts
    pub diff: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct DeployReport {
    pub warnings: Warnings,
    /// File name prefix of the archived copies, e.g. `pre-20250101-120000-`
    pub archived_prefix: Option<String>,
    pub diffs: Vec<FileDiff>,
}

/// Renders and installs the HAProxy configuration
pub struct ProxyConfigDeployer {
    config: EngineConfig,
    certs: Arc<CertificateStore>,
    binary: Arc<dyn ProxyBinary>,
    resolver: Arc<dyn DomainResolver>,
    model: Arc<dyn ModelProvider>,
}

impl ProxyConfigDeployer {
    pub fn new(
        config: EngineConfig,
        certs: Arc<CertificateStore>,
        binary: Arc<dyn ProxyBinary>,
        resolver: Arc<dyn DomainResolver>,
        model: Arc<dyn ModelProvider>,
    ) -> Self {
        Self {
            config,
            certs,
            binary,
            resolver,
            model,
        }
    }

    /// Render every artifact without touching the filesystem
    pub fn generate(
        &self,
        ctx: &OperatorContext,
        warnings: &mut Warnings,
    ) -> Result<Artifacts, DeployError> {
        ctx.require_admin("generate the proxy configuration")?;

        let layout = self.config.layout();
        let header = read_template(&layout.header_template())?;
        let footer = read_template(&layout.footer_template())?;

        let projects = self.model.projects(ctx, Relations::ROUTING)?;
        let certs = self.certs.get(warnings)?;

        let renderer = Renderer::new(&self.config, &certs, self.resolver.as_ref());
        Ok(renderer.render(&header, &footer, &projects, warnings))
    }

    pub fn deploy(
        &self,
        ctx: &OperatorContext,
        options: DeployOptions,
    ) -> Result<DeployReport, DeployError> {
        ctx.require_admin("deploy the proxy configuration")?;

        let mut report = DeployReport::default();
        let artifacts = self.generate(ctx, &mut report.warnings)?;
        let layout = self.config.layout();
        let targets = layout.artifacts();

        let previous: Vec<String> = if options.diff {
            targets
                .iter()
                .map(|path| std::fs::read_to_string(path).unwrap_or_default())
                .collect()
        } else {
            Vec::new()
        };

        if options.archive {
            report.archived_prefix = Some(archive_previous(&targets, layout.archive_dir())?);
        }

        let staging = layout.staging_cfg();
        write_file(&staging, &artifacts.config)?;
        if let Err(e) = self.binary.check_config(&staging) {
            if let Err(remove) = std::fs::remove_file(&staging) {
                warn!(
                    file = %staging.display(),
                    error = %remove,
                    "Failed to remove rejected config"
                );
            }
            return Err(DeployError::Validation(e));
        }

        let live = layout.haproxy_cfg();
        std::fs::rename(&staging, &live).map_err(|source| DeployError::Io {
            path: live.clone(),
            source,
        })?;
        info!(file = %live.display(), "Installed validated configuration");

        write_file(&layout.backend_map(), &artifacts.backend_map)?;
        write_file(&layout.cert_map(), &artifacts.cert_map)?;
        write_file(&layout.redirect_map(), &artifacts.redirect_map)?;
        write_file(&layout.prefix_map(), &artifacts.prefix_map)?;

        self.binary
            .check_config(&live)
            .map_err(DeployError::LiveValidation)?;
        self.binary.reload().map_err(DeployError::Reload)?;

        if options.diff {
            let current = [
                &artifacts.config,
                &artifacts.backend_map,
                &artifacts.cert_map,
                &artifacts.redirect_map,
                &artifacts.prefix_map,
            ];
            for ((path, old), new) in targets.iter().zip(&previous).zip(current) {
                let lines = diff_lines(old, new);
                if !lines.is_empty() {
                    report.diffs.push(FileDiff {
                        file: file_name(path),
                        lines,
                    });
                }
            }
        }

        info!(
            warnings = report.warnings.len(),
            changed_files = report.diffs.len(),
            "Proxy configuration deployed"
        );
        Ok(report)
    }
}

fn read_template(path: &Path) -> Result<String, DeployError> {
    std::fs::read_to_string(path).map_err(|source| DeployError::Template {
        path: path.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, content: &str) -> Result<(), DeployError> {
    std::fs::write(path, content).map_err(|source| DeployError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Copy existing artifacts to `archive_dir` under a shared `pre-<ts>-` prefix
fn archive_previous(targets: &[PathBuf], archive_dir: &Path) -> Result<String, DeployError> {
    let prefix = format!("pre-{}-", Local::now().format("%Y%m%d-%H%M%S"));
    std::fs::create_dir_all(archive_dir).map_err(|source| DeployError::Io {
        path: archive_dir.to_path_buf(),
        source,
    })?;

    for path in targets.iter().filter(|p| p.exists()) {
        let target = archive_dir.join(format!("{}{}", prefix, file_name(path)));
        std::fs::copy(path, &target).map_err(|source| DeployError::Io {
            path: target.clone(),
            source,
        })?;
        debug!(from = %path.display(), to = %target.display(), "Archived artifact");
    }

    Ok(prefix)
}
