//! Operator context passed into every engine entry point.

use std::collections::HashSet;

use thiserror::Error;

/// The caller was not allowed to perform the requested action
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("user '{user}' is not permitted to {action}")]
pub struct PermissionDenied {
    pub user: String,
    pub action: String,
}

/// Who is asking, and which projects they may see
///
/// Replaces ambient per-thread "current user" state: the model provider
/// filters by it, and operations touching every project require `admin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorContext {
    user: String,
    admin: bool,
    projects: HashSet<String>,
}

impl OperatorContext {
    /// An administrator who sees every project
    pub fn admin(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            admin: true,
            projects: HashSet::new(),
        }
    }

    /// A regular operator limited to the given project labels
    pub fn operator<I, S>(user: impl Into<String>, projects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user: user.into(),
            admin: false,
            projects: projects.into_iter().map(Into::into).collect(),
        }
    }

    /// Context used by the engine itself for internal lookups
    pub fn system() -> Self {
        Self::admin("system")
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn is_admin(&self) -> bool {
        self.admin
    }

    /// Whether the project with this label is visible to the caller
    pub fn can_see(&self, project_label: &str) -> bool {
        self.admin || self.projects.contains(project_label)
    }

    /// Reject non-administrators before anything is touched
    pub fn require_admin(&self, action: &str) -> Result<(), PermissionDenied> {
        if self.admin {
            Ok(())
        } else {
            Err(PermissionDenied {
                user: self.user.clone(),
                action: action.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_sees_everything() {
        let ctx = OperatorContext::admin("root");
        assert!(ctx.can_see("acme"));
        assert!(ctx.require_admin("deploy").is_ok());
    }

    #[test]
    fn test_operator_is_scoped() {
        let ctx = OperatorContext::operator("alice", ["acme"]);
        assert!(ctx.can_see("acme"));
        assert!(!ctx.can_see("globex"));

        let err = ctx
            .require_admin("deploy the proxy configuration")
            .unwrap_err();
        assert_eq!(err.user, "alice");
        assert_eq!(
            err.to_string(),
            "user 'alice' is not permitted to deploy the proxy configuration"
        );
    }
}
