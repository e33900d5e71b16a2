//! KDL document parsing.

mod helpers;
mod sections;

use anyhow::{anyhow, Result};
use tracing::{trace, warn};

use crate::EngineConfig;

/// Parse a complete KDL configuration document
pub fn parse_document(content: &str) -> Result<EngineConfig> {
    let doc: kdl::KdlDocument = content
        .parse()
        .map_err(|e: kdl::KdlError| anyhow!("{:?}", miette::Report::new(e)))?;

    let mut config = EngineConfig::default();

    for node in doc.nodes() {
        let name = node.name().value();
        trace!(section = %name, "Parsing configuration section");
        match name {
            "paths" => config.paths = sections::parse_paths(node)?,
            "proxy" => config.proxy = sections::parse_proxy(node)?,
            "instance" => config.instance = sections::parse_instance(node)?,
            "accounts" => config.accounts = sections::parse_accounts(node),
            "certificates" => config.certificates = sections::parse_certificates(node)?,
            other => {
                warn!(section = %other, "Ignoring unknown configuration section");
            }
        }
    }

    Ok(config)
}
