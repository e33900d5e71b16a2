//! Semantic validation of the engine configuration.
//!
//! Parsing only checks shape. These passes check that the settings make
//! sense together (role vs replicas, absolute paths, placeholders).

pub mod instance;
pub mod lint;

use std::fmt;

/// Category of a validation error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Paths,
    Topology,
    Command,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Paths => f.write_str("paths"),
            ErrorCategory::Topology => f.write_str("topology"),
            ErrorCategory::Command => f.write_str("command"),
        }
    }
}

/// A setting that prevents the engine from running
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ValidationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// A setting that works but is probably not what the operator wants
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Outcome of all validation passes
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Turn errors into a single `anyhow` error, keeping warnings on success
    pub fn into_result(self) -> anyhow::Result<Vec<ValidationWarning>> {
        if self.errors.is_empty() {
            return Ok(self.warnings);
        }

        let messages: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        Err(anyhow::anyhow!(
            "Configuration has {} error(s):\n  {}",
            messages.len(),
            messages.join("\n  ")
        ))
    }
}
