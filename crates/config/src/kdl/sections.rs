//! Section parsers for the engine configuration.

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use tracing::trace;

use crate::{
    AccountsConfig, CertificatesConfig, InstanceConfig, InstanceRole, PathsConfig, ProxyConfig,
};

use super::helpers::{get_int_entry, get_repeated_strings, get_string_entry};

fn parse_address(value: &str, key: &str) -> Result<IpAddr> {
    value
        .parse()
        .map_err(|_| anyhow!("Invalid IP address '{}' for '{}'", value, key))
}

/// Parse `paths { ... }`
pub fn parse_paths(node: &kdl::KdlNode) -> Result<PathsConfig> {
    let defaults = PathsConfig::default();
    let config = PathsConfig {
        config_dir: get_string_entry(node, "config-dir")
            .map(PathBuf::from)
            .unwrap_or(defaults.config_dir),
        archive_dir: get_string_entry(node, "archive-dir")
            .map(PathBuf::from)
            .unwrap_or(defaults.archive_dir),
        home_root: get_string_entry(node, "home-root")
            .map(PathBuf::from)
            .unwrap_or(defaults.home_root),
        model_file: get_string_entry(node, "model-file")
            .map(PathBuf::from)
            .unwrap_or(defaults.model_file),
    };

    trace!(
        config_dir = %config.config_dir.display(),
        home_root = %config.home_root.display(),
        "Parsed paths"
    );
    Ok(config)
}

/// Parse `proxy { ... }`
pub fn parse_proxy(node: &kdl::KdlNode) -> Result<ProxyConfig> {
    let defaults = ProxyConfig::default();

    let public_addresses = get_repeated_strings(node, "public-address")
        .iter()
        .map(|a| parse_address(a, "public-address"))
        .collect::<Result<Vec<_>>>()?;

    let letsencrypt_port = match get_int_entry(node, "letsencrypt-port") {
        Some(port) => u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| anyhow!("Invalid letsencrypt-port {}, expected 1-65535", port))?,
        None => defaults.letsencrypt_port,
    };

    Ok(ProxyConfig {
        binary: get_string_entry(node, "binary")
            .map(PathBuf::from)
            .unwrap_or(defaults.binary),
        reload_command: get_string_entry(node, "reload-command").unwrap_or(defaults.reload_command),
        public_addresses,
        letsencrypt_port,
    })
}

/// Parse `instance { ... }`
pub fn parse_instance(node: &kdl::KdlNode) -> Result<InstanceConfig> {
    let defaults = InstanceConfig::default();

    let role = match get_string_entry(node, "role").as_deref() {
        None | Some("master") => InstanceRole::Master,
        Some("replica") => InstanceRole::Replica,
        Some(other) => {
            return Err(anyhow!(
                "Invalid role '{}'. Valid roles: master, replica",
                other
            ));
        }
    };

    let master_address = get_string_entry(node, "master-address")
        .map(|a| parse_address(&a, "master-address"))
        .transpose()?;

    let config = InstanceConfig {
        role,
        master_address,
        sync_command: get_string_entry(node, "sync-command").unwrap_or(defaults.sync_command),
        replicas: get_repeated_strings(node, "replica"),
    };

    trace!(
        role = ?config.role,
        replica_count = config.replicas.len(),
        "Parsed instance"
    );
    Ok(config)
}

/// Parse `accounts { ... }`
pub fn parse_accounts(node: &kdl::KdlNode) -> AccountsConfig {
    let defaults = AccountsConfig::default();
    AccountsConfig {
        default_key: get_string_entry(node, "default-key")
            .map(PathBuf::from)
            .unwrap_or(defaults.default_key),
        marker_file: get_string_entry(node, "marker-file").unwrap_or(defaults.marker_file),
    }
}

/// Parse `certificates { ... }`
pub fn parse_certificates(node: &kdl::KdlNode) -> Result<CertificatesConfig> {
    let defaults = CertificatesConfig::default();

    let expiry_warning_days = match get_int_entry(node, "expiry-warning-days") {
        Some(days) => u32::try_from(days)
            .map_err(|_| anyhow!("Invalid expiry-warning-days {}", days))?,
        None => defaults.expiry_warning_days,
    };

    Ok(CertificatesConfig {
        issue_command: get_string_entry(node, "issue-command"),
        delete_command: get_string_entry(node, "delete-command"),
        expiry_warning_days,
    })
}
