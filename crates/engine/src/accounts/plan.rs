//! Desired proxy accounts derived from container permission grants.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use bastion_common::Warnings;

use crate::model::{Project, User};

/// `<project>-<container>_<permission>`
static PROXY_USERNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]+-[a-z0-9][a-z0-9.-]*_[a-z_][a-z0-9_-]*$").expect("valid regex")
});

/// Longest name `useradd` accepts
const MAX_USERNAME_LEN: usize = 32;

/// Whether `name` follows the proxy account naming convention
pub fn is_proxy_username(name: &str) -> bool {
    name.len() <= MAX_USERNAME_LEN && PROXY_USERNAME.is_match(name)
}

pub fn proxy_username(project: &str, container: &str, permission: &str) -> String {
    format!("{}-{}_{}", project, container, permission)
}

/// One OS account forwarding to one technical user in one container
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ProxyAccount {
    pub username: String,
    pub project: String,
    pub container: String,
    /// Technical user inside the container
    pub permission: String,
    pub target: Option<Ipv6Addr>,
    pub home: PathBuf,
    #[serde(skip)]
    pub password: Option<String>,
    /// Real users allowed to log in, ordered by id
    pub members: Vec<User>,
}

impl std::fmt::Debug for ProxyAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyAccount")
            .field("username", &self.username)
            .field("target", &self.target)
            .field("home", &self.home)
            .field("has_password", &self.password.is_some())
            .field("members", &self.members.len())
            .finish()
    }
}

impl ProxyAccount {
    pub fn ssh_dir(&self) -> PathBuf {
        self.home.join(".ssh")
    }

    /// Login shell that forwards to the container
    pub fn shell_path(&self) -> PathBuf {
        self.home.join(".bastion-shell")
    }

    /// Private key used for the onward connection
    pub fn key_path(&self) -> PathBuf {
        self.ssh_dir().join("id_proxy")
    }

    pub fn authorized_keys_path(&self) -> PathBuf {
        self.ssh_dir().join("authorized_keys")
    }

    pub fn hushlogin_path(&self) -> PathBuf {
        self.home.join(".hushlogin")
    }

    /// Forwarding login shell; `None` without a target address
    pub fn shell_script(&self) -> Option<String> {
        let target = self.target?;
        Some(format!(
            "#!/bin/sh\n\
             exec ssh -q -t -i {} -o StrictHostKeyChecking=no \
             -o UserKnownHostsFile=/dev/null {} \"$SSH_ORIGINAL_COMMAND\"\n",
            shell_quote(&self.key_path().to_string_lossy()),
            shell_quote(&format!("{}@{}", self.permission, target)),
        ))
    }

    /// authorized_keys content; members without a key are reported
    pub fn authorized_keys(&self, warnings: &mut Warnings) -> String {
        let mut out = String::new();
        for user in &self.members {
            let key = user.public_key.as_deref().map(str::trim);
            match key.filter(|k| !k.is_empty()) {
                Some(key) => {
                    let _ = writeln!(
                        out,
                        "environment=\"SSH_LOGIN_USER={}\" {}",
                        self.username, key
                    );
                }
                None => warnings.add(
                    self.username.clone(),
                    format!("user '{}' has no public key", user.login),
                ),
            }
        }
        out
    }
}

/// Single-quote for `sh`
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Group every container's grants by technical user into proxy accounts
pub fn derive_accounts(
    projects: &[Project],
    home_root: &Path,
    warnings: &mut Warnings,
) -> Vec<ProxyAccount> {
    let mut accounts = Vec::new();

    for project in projects {
        for container in &project.containers {
            let mut groups: BTreeMap<&str, Vec<_>> = BTreeMap::new();
            for grant in &container.permissions {
                groups
                    .entry(grant.permission.as_str())
                    .or_default()
                    .push(grant);
            }

            for (permission, grants) in groups {
                let username = proxy_username(&project.label, &container.label, permission);
                if !is_proxy_username(&username) {
                    warnings.add(username, "not a valid proxy account name; skipping");
                    continue;
                }

                let password = grants.iter().find_map(|g| g.password.clone());
                let mut members: Vec<User> = grants.iter().map(|g| g.user.clone()).collect();
                members.sort_by_key(|u| u.id);
                members.dedup_by_key(|u| u.id);

                accounts.push(ProxyAccount {
                    home: home_root.join(&username),
                    username,
                    project: project.label.clone(),
                    container: container.label.clone(),
                    permission: permission.to_string(),
                    target: container.ipv6,
                    password,
                    members,
                });
            }
        }
    }

    accounts
}
