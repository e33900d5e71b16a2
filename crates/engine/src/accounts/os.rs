//! OS account tools.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::plan::ProxyAccount;
use super::AccountError;
use crate::process::Invocation;

/// Narrow interface over the user management tools
pub trait OsAccountManager: Send + Sync {
    fn user_exists(&self, name: &str) -> Result<bool, AccountError>;

    /// Create the account with the given home and login shell, without
    /// creating the home directory
    fn create_user(&self, name: &str, home: &Path, shell: &Path) -> Result<(), AccountError>;

    fn set_password(&self, name: &str, password: &str) -> Result<(), AccountError>;

    fn clear_password(&self, name: &str) -> Result<(), AccountError>;

    /// Recursively hand `path` to the account
    fn chown(&self, name: &str, path: &Path) -> Result<(), AccountError>;

    /// Delete the account together with its home directory
    fn delete_user(&self, name: &str) -> Result<(), AccountError>;

    /// Record the proxy account name in `marker_file` inside the target
    /// container
    fn push_marker(&self, account: &ProxyAccount, marker_file: &str) -> Result<(), AccountError>;
}

/// Real accounts via useradd, userdel, passwd, chpasswd, chown and ssh
#[derive(Debug, Clone, Default)]
pub struct SystemAccountManager;

impl SystemAccountManager {
    pub fn new() -> Self {
        Self
    }

    fn run(account: &str, invocation: Invocation) -> Result<(), AccountError> {
        debug!(account = %account, command = %invocation.display(), "Account command");
        invocation.run().map_err(|source| AccountError::Process {
            account: account.to_string(),
            source,
        })?;
        Ok(())
    }
}

impl OsAccountManager for SystemAccountManager {
    fn user_exists(&self, name: &str) -> Result<bool, AccountError> {
        nix::unistd::User::from_name(name)
            .map(|user| user.is_some())
            .map_err(|source| AccountError::Lookup {
                account: name.to_string(),
                source,
            })
    }

    fn create_user(&self, name: &str, home: &Path, shell: &Path) -> Result<(), AccountError> {
        info!(account = %name, home = %home.display(), "Creating proxy account");
        Self::run(
            name,
            Invocation::new("useradd")
                .arg("-M")
                .arg("-U")
                .arg("-d")
                .arg(home)
                .arg("-s")
                .arg(shell)
                .arg(name),
        )
    }

    fn set_password(&self, name: &str, password: &str) -> Result<(), AccountError> {
        Self::run(
            name,
            Invocation::new("chpasswd").stdin(format!("{}:{}\n", name, password)),
        )
    }

    fn clear_password(&self, name: &str) -> Result<(), AccountError> {
        Self::run(name, Invocation::new("passwd").arg("-d").arg(name))
    }

    fn chown(&self, name: &str, path: &Path) -> Result<(), AccountError> {
        Self::run(
            name,
            Invocation::new("chown")
                .arg("-R")
                .arg(format!("{}:", name))
                .arg(path),
        )
    }

    fn delete_user(&self, name: &str) -> Result<(), AccountError> {
        info!(account = %name, "Deleting orphaned proxy account");
        Self::run(name, Invocation::new("userdel").arg("-r").arg(name))
    }

    fn push_marker(&self, account: &ProxyAccount, marker_file: &str) -> Result<(), AccountError> {
        let Some(target) = account.target else {
            return Ok(());
        };
        let remote = format!(
            "printf '%s\\n' '{}' > ~/'{}'",
            account.username, marker_file
        );
        Self::run(
            &account.username,
            Invocation::new("ssh")
                .arg("-q")
                .arg("-i")
                .arg(account.key_path())
                .arg("-o")
                .arg("BatchMode=yes")
                .arg("-o")
                .arg("StrictHostKeyChecking=no")
                .arg("-o")
                .arg("UserKnownHostsFile=/dev/null")
                .arg(format!("{}@{}", account.permission, target))
                .arg(remote),
        )
    }
}

/// Home directory names under `root`
pub(crate) fn home_entries(root: &Path) -> Result<Vec<(String, PathBuf)>, AccountError> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(AccountError::Io {
                path: root.to_path_buf(),
                source,
            })
        }
    };

    let mut homes = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| AccountError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            let name = entry.file_name().to_string_lossy().into_owned();
            homes.push((name, entry.path()));
        }
    }
    homes.sort();
    Ok(homes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_home_entries() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("b-web_root")).unwrap();
        std::fs::create_dir(root.path().join("a-web_root")).unwrap();
        std::fs::write(root.path().join("c-web_root"), "not a directory").unwrap();

        let names: Vec<String> = home_entries(root.path())
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["a-web_root", "b-web_root"]);
    }

    #[test]
    fn test_missing_home_root_is_empty() {
        assert!(home_entries(Path::new("/nonexistent/home"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_user_exists_for_root() {
        let os = SystemAccountManager::new();
        assert!(os.user_exists("root").unwrap());
        assert!(!os.user_exists("acme-nosuch_user").unwrap());
    }
}
