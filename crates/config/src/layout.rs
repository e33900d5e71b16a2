//! Fixed filesystem layout of a proxy instance.
//!
//! File names are a wire contract with the HAProxy header template and with
//! the replica sync tooling, so they are constants rather than settings.

use std::path::{Path, PathBuf};

pub const HAPROXY_CFG: &str = "haproxy.cfg";
pub const DOMAIN2BACKEND_MAP: &str = "domain2backend.map";
pub const DOMAIN2CERT_MAP: &str = "domain2cert.map";
pub const DOMAIN2REDIRECT_MAP: &str = "domain2redirect.map";
pub const DOMAIN2PREFIX_MAP: &str = "domain2prefix.map";
pub const HEADER_TEMPLATE: &str = "haproxy.header.cfg";
pub const FOOTER_TEMPLATE: &str = "haproxy.footer.cfg";
pub const CERTS_DIR: &str = "certs";

/// Rendered-but-unvalidated config; renamed over `haproxy.cfg` on success
const STAGING_CFG: &str = "haproxy.cfg.new";

/// Resolved paths for one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    config_dir: PathBuf,
    archive_dir: PathBuf,
    home_root: PathBuf,
}

impl Layout {
    pub fn new(config_dir: &Path, archive_dir: &Path, home_root: &Path) -> Self {
        Self {
            config_dir: config_dir.to_path_buf(),
            archive_dir: archive_dir.to_path_buf(),
            home_root: home_root.to_path_buf(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    pub fn home_root(&self) -> &Path {
        &self.home_root
    }

    pub fn cert_dir(&self) -> PathBuf {
        self.config_dir.join(CERTS_DIR)
    }

    pub fn haproxy_cfg(&self) -> PathBuf {
        self.config_dir.join(HAPROXY_CFG)
    }

    pub fn staging_cfg(&self) -> PathBuf {
        self.config_dir.join(STAGING_CFG)
    }

    pub fn backend_map(&self) -> PathBuf {
        self.config_dir.join(DOMAIN2BACKEND_MAP)
    }

    pub fn cert_map(&self) -> PathBuf {
        self.config_dir.join(DOMAIN2CERT_MAP)
    }

    pub fn redirect_map(&self) -> PathBuf {
        self.config_dir.join(DOMAIN2REDIRECT_MAP)
    }

    pub fn prefix_map(&self) -> PathBuf {
        self.config_dir.join(DOMAIN2PREFIX_MAP)
    }

    pub fn header_template(&self) -> PathBuf {
        self.config_dir.join(HEADER_TEMPLATE)
    }

    pub fn footer_template(&self) -> PathBuf {
        self.config_dir.join(FOOTER_TEMPLATE)
    }

    /// The generated artifacts, main config first
    pub fn artifacts(&self) -> [PathBuf; 5] {
        [
            self.haproxy_cfg(),
            self.backend_map(),
            self.cert_map(),
            self.redirect_map(),
            self.prefix_map(),
        ]
    }
}
