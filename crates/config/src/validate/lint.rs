//! Configuration lints: settings that load but are probably wrong.

use super::{ValidationResult, ValidationWarning};
use crate::EngineConfig;

/// Collect warnings for suspicious but valid settings
pub fn lint_config(config: &EngineConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    // Without public addresses every LetsEncrypt domain looks "not cut over"
    if config.proxy.public_addresses.is_empty() {
        result.add_warning(ValidationWarning::new(
            "No 'public-address' configured; missing LetsEncrypt certificates will never be reported",
        ));
    }

    if config.is_master() && config.instance.master_address.is_some() {
        result.add_warning(ValidationWarning::new(
            "'master-address' is ignored on the master",
        ));
    }

    // Home root shared with real users risks orphan cleanup touching them
    if config.paths.home_root == std::path::Path::new("/home") {
        result.add_warning(ValidationWarning::new(
            "'home-root' is /home; proxy-named directories there are treated as managed accounts",
        ));
    }

    if config.certificates.issue_command.is_none() {
        result.add_warning(ValidationWarning::new(
            "No 'issue-command' configured; LetsEncrypt domains cannot be issued",
        ));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_lint_missing_public_address() {
        let config = EngineConfig::default();
        let result = lint_config(&config);

        assert!(result
            .warnings
            .iter()
            .any(|w| w.message.contains("public-address")));
    }

    #[test]
    fn test_lint_home_root() {
        let mut config = EngineConfig::default();
        config.paths.home_root = PathBuf::from("/home");

        let result = lint_config(&config);
        assert!(result.warnings.iter().any(|w| w.message.contains("/home")));
    }

    #[test]
    fn test_lint_master_address_on_master() {
        let mut config = EngineConfig::default();
        config.instance.master_address = Some("10.0.0.1".parse().unwrap());

        let result = lint_config(&config);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.message.contains("ignored on the master")));
    }
}
