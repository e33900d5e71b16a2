//! Bring OS accounts in line with the derived proxy accounts.

use std::collections::HashSet;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use bastion_common::Warnings;
use bastion_config::EngineConfig;

use super::os::{home_entries, OsAccountManager};
use super::plan::{derive_accounts, is_proxy_username, ProxyAccount};
use super::AccountError;
use crate::context::OperatorContext;
use crate::model::{ModelProvider, Relations};

#[derive(Debug, Default, Serialize)]
pub struct ReconcileReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    pub warnings: Warnings,
}

/// Creates, refreshes and removes SSH proxy accounts
///
/// Every run rewrites the password, login shell and authorized_keys of
/// every account, so running twice without model changes is a no-op.
/// Failures creating an account or writing its password or shell abort the
/// run; marker pushes and orphan deletions only warn.
pub struct SshAccountReconciler {
    home_root: PathBuf,
    default_key: PathBuf,
    marker_file: String,
    is_master: bool,
    os: Arc<dyn OsAccountManager>,
    model: Arc<dyn ModelProvider>,
}

impl SshAccountReconciler {
    pub fn new(
        config: &EngineConfig,
        os: Arc<dyn OsAccountManager>,
        model: Arc<dyn ModelProvider>,
    ) -> Self {
        Self {
            home_root: config.paths.home_root.clone(),
            default_key: config.accounts.default_key.clone(),
            marker_file: config.accounts.marker_file.clone(),
            is_master: config.is_master(),
            os,
            model,
        }
    }

    pub fn reconcile(&self, ctx: &OperatorContext) -> Result<ReconcileReport, AccountError> {
        ctx.require_admin("reconcile SSH proxy accounts")?;

        let mut report = ReconcileReport::default();
        let projects = self.model.projects(ctx, Relations::ACCESS)?;
        let accounts = derive_accounts(&projects, &self.home_root, &mut report.warnings);

        let mut produced = HashSet::with_capacity(accounts.len());
        for account in &accounts {
            produced.insert(account.username.clone());
            self.apply(account, &mut report)?;
        }

        self.remove_orphans(&produced, &mut report)?;

        info!(
            created = report.created.len(),
            updated = report.updated.len(),
            deleted = report.deleted.len(),
            warnings = report.warnings.len(),
            "Proxy accounts reconciled"
        );
        Ok(report)
    }

    fn apply(
        &self,
        account: &ProxyAccount,
        report: &mut ReconcileReport,
    ) -> Result<(), AccountError> {
        let name = account.username.as_str();

        if self.os.user_exists(name)? {
            report.updated.push(name.to_string());
        } else {
            self.create(account)?;
            report.created.push(name.to_string());
        }

        match account.password.as_deref() {
            Some(password) => self.os.set_password(name, password)?,
            None => self.os.clear_password(name)?,
        }

        let keys = account.authorized_keys(&mut report.warnings);
        std::fs::create_dir_all(account.ssh_dir()).map_err(|source| AccountError::Io {
            path: account.ssh_dir(),
            source,
        })?;
        write_with_mode(&account.authorized_keys_path(), keys.as_bytes(), 0o600)?;

        let shell_written = match account.shell_script() {
            Some(script) => {
                write_with_mode(&account.shell_path(), script.as_bytes(), 0o755)?;
                true
            }
            None => {
                remove_if_present(&account.shell_path())?;
                report
                    .warnings
                    .add(name, "container has no IPv6 address; login shell removed");
                false
            }
        };
        self.os.chown(name, &account.home)?;

        if self.is_master && shell_written {
            if let Err(e) = self.os.push_marker(account, &self.marker_file) {
                report.warnings.add(
                    name,
                    format!("could not write marker into container: {}", e),
                );
            }
        }

        debug!(account = %name, members = account.members.len(), "Proxy account refreshed");
        Ok(())
    }

    fn create(&self, account: &ProxyAccount) -> Result<(), AccountError> {
        let ssh_dir = account.ssh_dir();
        std::fs::create_dir_all(&ssh_dir).map_err(|source| AccountError::Io {
            path: ssh_dir.clone(),
            source,
        })?;

        self.os
            .create_user(&account.username, &account.home, &account.shell_path())?;

        let key = std::fs::read(&self.default_key).map_err(|source| AccountError::Io {
            path: self.default_key.clone(),
            source,
        })?;
        write_with_mode(&account.key_path(), &key, 0o600)?;
        write_with_mode(&account.hushlogin_path(), b"", 0o644)?;
        Ok(())
    }

    /// Delete accounts that follow the naming convention but were not
    /// produced by this run; other home directories are never touched
    fn remove_orphans(
        &self,
        produced: &HashSet<String>,
        report: &mut ReconcileReport,
    ) -> Result<(), AccountError> {
        for (name, _) in home_entries(&self.home_root)? {
            if produced.contains(&name) || !is_proxy_username(&name) {
                continue;
            }
            match self.os.delete_user(&name) {
                Ok(()) => report.deleted.push(name),
                Err(e) => report
                    .warnings
                    .add(name, format!("failed to delete orphaned account: {}", e)),
            }
        }
        Ok(())
    }
}

fn write_with_mode(path: &Path, content: &[u8], mode: u32) -> Result<(), AccountError> {
    let io_err = |source| AccountError::Io {
        path: path.to_path_buf(),
        source,
    };
    std::fs::write(path, content).map_err(io_err)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(io_err)
}

fn remove_if_present(path: &Path) -> Result<(), AccountError> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(AccountError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{container, grant, project, FakeOs, StaticModel};
    use tempfile::TempDir;

    struct Fixture {
        _root: TempDir,
        config: EngineConfig,
        os: Arc<FakeOs>,
    }

    impl Fixture {
        fn new() -> Self {
            let root = TempDir::new().unwrap();
            let mut config = EngineConfig::default_for_testing(root.path());
            config.accounts.default_key = root.path().join("proxy_key");
            std::fs::write(&config.accounts.default_key, "PRIVATE KEY").unwrap();
            std::fs::create_dir_all(&config.paths.home_root).unwrap();
            let os = Arc::new(FakeOs::new(&config.paths.home_root));
            Self {
                _root: root,
                config,
                os,
            }
        }

        fn reconciler(&self, model: StaticModel) -> SshAccountReconciler {
            SshAccountReconciler::new(&self.config, self.os.clone(), Arc::new(model))
        }

        fn home(&self, name: &str) -> PathBuf {
            self.config.paths.home_root.join(name)
        }

        fn read(&self, name: &str, file: &str) -> String {
            std::fs::read_to_string(self.home(name).join(file)).unwrap()
        }
    }

    fn acme_model() -> StaticModel {
        let alice_key = Some("ssh-ed25519 AAAA alice");
        let mut web = container(11, "web1", Some("2001:db8::11"));
        web.permissions
            .push(grant(1, "alice", alice_key, "root", Some("pw")));
        web.permissions
            .push(grant(2, "bob", Some("ssh-ed25519 BBBB bob"), "root", None));
        StaticModel::new(vec![project(1, "acme", vec![], vec![web])])
    }

    #[test]
    fn test_creates_account() {
        let fx = Fixture::new();
        let report = fx
            .reconciler(acme_model())
            .reconcile(&OperatorContext::admin("root"))
            .unwrap();

        assert_eq!(report.created, vec!["acme-web1_root"]);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert!(fx.os.exists("acme-web1_root"));

        assert_eq!(fx.read("acme-web1_root", ".ssh/id_proxy"), "PRIVATE KEY");
        assert!(fx.home("acme-web1_root").join(".hushlogin").exists());
        let shell = fx.read("acme-web1_root", ".bastion-shell");
        assert!(shell.contains("'root@2001:db8::11'"));
        let keys = fx.read("acme-web1_root", ".ssh/authorized_keys");
        assert_eq!(keys.lines().count(), 2);

        let mode = std::fs::metadata(fx.home("acme-web1_root").join(".bastion-shell"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);

        let calls = fx.os.calls();
        assert!(calls.contains(&"set_password acme-web1_root".to_string()));
        assert!(calls.contains(&"push_marker acme-web1_root".to_string()));
    }

    #[test]
    fn test_second_run_is_idempotent() {
        let fx = Fixture::new();
        let reconciler = fx.reconciler(acme_model());
        let ctx = OperatorContext::admin("root");

        reconciler.reconcile(&ctx).unwrap();
        let shell = fx.read("acme-web1_root", ".bastion-shell");
        let keys = fx.read("acme-web1_root", ".ssh/authorized_keys");
        let users = fx.os.users();

        let report = reconciler.reconcile(&ctx).unwrap();
        assert!(report.created.is_empty());
        assert_eq!(report.updated, vec!["acme-web1_root"]);
        assert!(report.deleted.is_empty());
        assert_eq!(fx.os.users(), users);
        assert_eq!(fx.read("acme-web1_root", ".bastion-shell"), shell);
        assert_eq!(fx.read("acme-web1_root", ".ssh/authorized_keys"), keys);
        assert!(!fx.os.calls().iter().any(|c| c.starts_with("delete_user")));
    }

    #[test]
    fn test_password_is_cleared_when_absent() {
        let fx = Fixture::new();
        let mut web = container(11, "web1", Some("2001:db8::11"));
        let key = Some("ssh-ed25519 AAAA a");
        web.permissions.push(grant(1, "alice", key, "deploy", None));
        let model = StaticModel::new(vec![project(1, "acme", vec![], vec![web])]);

        fx.reconciler(model)
            .reconcile(&OperatorContext::admin("root"))
            .unwrap();
        let expected = "clear_password acme-web1_deploy".to_string();
        assert!(fx.os.calls().contains(&expected));
    }

    #[test]
    fn test_orphans_are_deleted_and_others_left_alone() {
        let fx = Fixture::new();
        fx.os.add_user("acme-old_root");
        std::fs::create_dir_all(fx.home("acme-old_root")).unwrap();
        std::fs::create_dir_all(fx.home("john")).unwrap();
        std::fs::create_dir_all(fx.home("lost+found")).unwrap();

        let report = fx
            .reconciler(acme_model())
            .reconcile(&OperatorContext::admin("root"))
            .unwrap();

        assert_eq!(report.deleted, vec!["acme-old_root"]);
        assert!(!fx.home("acme-old_root").exists());
        assert!(fx.home("john").exists());
        assert!(fx.home("lost+found").exists());
        assert!(fx.home("acme-web1_root").exists());
    }

    #[test]
    fn test_failed_delete_is_a_warning() {
        let fx = Fixture::new();
        std::fs::create_dir_all(fx.home("acme-old_root")).unwrap();
        fx.os.fail_on("delete_user");

        let report = fx
            .reconciler(acme_model())
            .reconcile(&OperatorContext::admin("root"))
            .unwrap();
        assert!(report.deleted.is_empty());
        assert!(report.warnings.mentions("acme-old_root"));
    }

    #[test]
    fn test_create_failure_aborts() {
        let fx = Fixture::new();
        fx.os.fail_on("create_user");

        let err = fx
            .reconciler(acme_model())
            .reconcile(&OperatorContext::admin("root"))
            .unwrap_err();
        assert!(matches!(err, AccountError::Process { .. }));
        assert!(!fx.os.exists("acme-web1_root"));
    }

    #[test]
    fn test_marker_failure_is_a_warning() {
        let fx = Fixture::new();
        fx.os.fail_on("push_marker");

        let report = fx
            .reconciler(acme_model())
            .reconcile(&OperatorContext::admin("root"))
            .unwrap();
        assert!(report.warnings.mentions("acme-web1_root"));
    }

    #[test]
    fn test_replica_does_not_push_marker() {
        let mut fx = Fixture::new();
        fx.config.instance.role = bastion_config::InstanceRole::Replica;

        fx.reconciler(acme_model())
            .reconcile(&OperatorContext::admin("root"))
            .unwrap();
        assert!(!fx.os.calls().iter().any(|c| c.starts_with("push_marker")));
    }

    #[test]
    fn test_missing_address_warns_but_keeps_account() {
        let fx = Fixture::new();
        let mut web = container(11, "web1", None);
        web.permissions
            .push(grant(1, "alice", Some("ssh-ed25519 AAAA a"), "root", None));
        let model = StaticModel::new(vec![project(1, "acme", vec![], vec![web])]);

        let report = fx
            .reconciler(model)
            .reconcile(&OperatorContext::admin("root"))
            .unwrap();
        assert_eq!(report.created, vec!["acme-web1_root"]);
        assert!(report.warnings.mentions("acme-web1_root"));
        assert!(!fx.home("acme-web1_root").join(".bastion-shell").exists());
        assert!(report.deleted.is_empty());
    }

    #[test]
    fn test_revoked_key_is_dropped_when_address_is_lost() {
        let fx = Fixture::new();
        let ctx = OperatorContext::admin("root");
        fx.reconciler(acme_model()).reconcile(&ctx).unwrap();
        assert!(fx.home("acme-web1_root").join(".bastion-shell").exists());

        let alice_key = Some("ssh-ed25519 AAAA alice");
        let mut web = container(11, "web1", None);
        web.permissions
            .push(grant(1, "alice", alice_key, "root", None));
        let model = StaticModel::new(vec![project(1, "acme", vec![], vec![web])]);
        let report = fx.reconciler(model).reconcile(&ctx).unwrap();

        let keys = fx.read("acme-web1_root", ".ssh/authorized_keys");
        assert!(keys.contains("AAAA alice"));
        assert!(!keys.contains("BBBB bob"));
        assert!(!fx.home("acme-web1_root").join(".bastion-shell").exists());
        assert!(report.warnings.mentions("acme-web1_root"));
        let calls = fx.os.calls();
        let pushes = calls.iter().filter(|c| c.starts_with("push")).count();
        assert_eq!(pushes, 1);
    }

    #[test]
    fn test_operator_cannot_reconcile() {
        let fx = Fixture::new();
        let err = fx
            .reconciler(acme_model())
            .reconcile(&OperatorContext::operator("alice", ["acme"]))
            .unwrap_err();
        assert!(matches!(err, AccountError::Denied(_)));
        assert!(fx.os.calls().is_empty());
    }
}
