//! SSH proxy accounts.
//!
//! Every (container, technical user) pair with at least one grant becomes an
//! OS account named `<project>-<container>_<permission>` under the proxy
//! home root. Its login shell re-executes `ssh` to the container, so a real
//! user logging into the bastion lands in the container as the technical
//! user.

mod os;
mod plan;
mod reconcile;

use std::path::PathBuf;

use thiserror::Error;

use crate::context::PermissionDenied;
use crate::model::ModelError;
use crate::process::ProcessError;

pub use os::{OsAccountManager, SystemAccountManager};
pub use plan::{derive_accounts, is_proxy_username, proxy_username, ProxyAccount};
pub use reconcile::{ReconcileReport, SshAccountReconciler};

#[derive(Debug, Error)]
pub enum AccountError {
    #[error(transparent)]
    Denied(#[from] PermissionDenied),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("account {account}: {source}")]
    Process {
        account: String,
        #[source]
        source: ProcessError,
    },

    #[error("cannot look up account {account}: {source}")]
    Lookup {
        account: String,
        #[source]
        source: nix::Error,
    },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
