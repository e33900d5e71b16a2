//! Topology and path validation.

use super::{ErrorCategory, ValidationError, ValidationResult};
use crate::{EngineConfig, InstanceRole, DOMAIN_PLACEHOLDER, REPLICA_PLACEHOLDER};

/// Validate role, replica list, paths and command templates
pub fn validate_instance(config: &EngineConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    let paths = [
        ("config-dir", &config.paths.config_dir),
        ("archive-dir", &config.paths.archive_dir),
        ("home-root", &config.paths.home_root),
        ("model-file", &config.paths.model_file),
        ("default-key", &config.accounts.default_key),
    ];
    for (key, path) in paths {
        if !path.is_absolute() {
            result.add_error(ValidationError::new(
                ErrorCategory::Paths,
                format!("'{}' must be an absolute path, got {:?}", key, path),
            ));
        }
    }

    match config.instance.role {
        InstanceRole::Replica => {
            if config.instance.master_address.is_none() {
                result.add_error(ValidationError::new(
                    ErrorCategory::Topology,
                    "A replica requires 'master-address' for ACME validation forwarding",
                ));
            }
            if !config.instance.replicas.is_empty() {
                result.add_error(ValidationError::new(
                    ErrorCategory::Topology,
                    "Only the master may list 'replica' entries",
                ));
            }
        }
        InstanceRole::Master => {
            if !config.instance.replicas.is_empty()
                && !config.instance.sync_command.contains(REPLICA_PLACEHOLDER)
            {
                result.add_error(ValidationError::new(
                    ErrorCategory::Command,
                    format!(
                        "'sync-command' must contain {} when replicas are configured",
                        REPLICA_PLACEHOLDER
                    ),
                ));
            }
        }
    }

    let cert_commands = [
        ("issue-command", &config.certificates.issue_command),
        ("delete-command", &config.certificates.delete_command),
    ];
    for (key, command) in cert_commands {
        if let Some(command) = command {
            if !command.contains(DOMAIN_PLACEHOLDER) {
                result.add_error(ValidationError::new(
                    ErrorCategory::Command,
                    format!("'{}' must contain {}", key, DOMAIN_PLACEHOLDER),
                ));
            }
        }
    }

    result
}
