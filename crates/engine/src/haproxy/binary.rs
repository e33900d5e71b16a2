//! The external HAProxy process.

use std::path::{Path, PathBuf};

use tracing::info;

use bastion_config::ProxyConfig;

use crate::process::{Invocation, ProcessError};

/// Config check and reload of the running proxy
pub trait ProxyBinary: Send + Sync {
    /// Run the proxy's config-check mode against `config`
    fn check_config(&self, config: &Path) -> Result<(), ProcessError>;

    /// Make the running proxy pick up the live files
    fn reload(&self) -> Result<(), ProcessError>;
}

/// The installed `haproxy` binary
#[derive(Debug, Clone)]
pub struct HaproxyBinary {
    binary: PathBuf,
    reload_command: String,
}

impl HaproxyBinary {
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            reload_command: config.reload_command.clone(),
        }
    }
}

impl ProxyBinary for HaproxyBinary {
    fn check_config(&self, config: &Path) -> Result<(), ProcessError> {
        Invocation::new(&self.binary)
            .arg("-c")
            .arg("-f")
            .arg(config)
            .run()?;
        Ok(())
    }

    fn reload(&self) -> Result<(), ProcessError> {
        info!(command = %self.reload_command, "Reloading proxy");
        Invocation::shell(&self.reload_command).run()?;
        Ok(())
    }
}
