//! Warning accumulation for batch operations.
//!
//! Batch operations (certificate scans, map generation, account cleanup,
//! replica fan-out) never abort on a per-item failure. They push a
//! [`Warning`] naming the offending item and carry on; the caller receives
//! the list alongside the success result.

use serde::Serialize;
use std::fmt;
use tracing::warn;

/// A single non-fatal problem found during a batch operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    /// The item the warning is about (domain, file, account, replica)
    pub subject: Option<String>,
    /// Human readable description
    pub message: String,
}

impl Warning {
    /// Create a warning that is not tied to a specific item
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            subject: None,
            message: message.into(),
        }
    }

    /// Create a warning about a specific item
    pub fn about(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subject: Some(subject.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subject {
            Some(subject) => write!(f, "{}: {}", subject, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Ordered list of warnings collected during one operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Warnings {
    items: Vec<Warning>,
}

impl Warnings {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning and emit it as a tracing event
    pub fn push(&mut self, warning: Warning) {
        match &warning.subject {
            Some(subject) => warn!(subject = %subject, "{}", warning.message),
            None => warn!("{}", warning.message),
        }
        self.items.push(warning);
    }

    /// Record a warning about a specific item
    pub fn add(&mut self, subject: impl Into<String>, message: impl Into<String>) {
        self.push(Warning::about(subject, message));
    }

    /// Append all warnings from another list without re-logging them
    pub fn extend(&mut self, other: Warnings) {
        self.items.extend(other.items);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Warning> {
        self.items.iter()
    }

    /// Check whether any warning mentions the given text
    pub fn mentions(&self, needle: &str) -> bool {
        self.items.iter().any(|w| {
            w.message.contains(needle) || w.subject.as_deref().is_some_and(|s| s.contains(needle))
        })
    }

    pub fn into_vec(self) -> Vec<Warning> {
        self.items
    }
}

impl<'a> IntoIterator for &'a Warnings {
    type Item = &'a Warning;
    type IntoIter = std::slice::Iter<'a, Warning>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl IntoIterator for Warnings {
    type Item = Warning;
    type IntoIter = std::vec::IntoIter<Warning>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
