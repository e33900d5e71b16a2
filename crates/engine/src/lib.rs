//! Bastion Engine Library
//!
//! Reconciliation engine for a multi-tenant HAProxy and SSH bastion
//! appliance. The persistent model of projects, backends, domains and
//! containers is turned into system state:
//!
//! - **Certificates**: a cached domain to certificate map over the PEM
//!   directory, with expired and superseded files archived
//! - **Proxy configuration**: HAProxy config and map files rendered from the
//!   model, validated and reloaded atomically
//! - **SSH accounts**: one OS account per container and technical user, with
//!   a forced `ssh` shell into the container
//! - **Replica sync**: concurrent propagation from the master to its replicas
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use bastion_config::EngineConfig;
//! use bastion_engine::{CertificateStore, JsonModelStore, OperatorContext};
//!
//! let config = EngineConfig::from_file("/etc/bastion/bastion.kdl")?;
//! let model = Arc::new(JsonModelStore::new(&config.paths.model_file));
//! let certs = CertificateStore::new(&config.layout(), model);
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod accounts;
pub mod certs;
pub mod context;
pub mod haproxy;
pub mod model;
pub mod process;
pub mod replica;

#[cfg(test)]
pub(crate) mod test_support;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Operator identity
pub use context::{OperatorContext, PermissionDenied};

// Persistent model
pub use model::{JsonModelStore, ModelError, ModelProvider, Project, Relations};

// Certificates
pub use certs::{
    CertError, CertInfo, CertificateIssuer, CertificateService, CertificateStore, CommandIssuer,
    DomainCertMap, IssueError, IssueReport,
};

// Proxy configuration
pub use haproxy::{
    DeployError, DeployOptions, DeployReport, HaproxyBinary, ProxyBinary, ProxyConfigDeployer,
    SystemResolver,
};

// SSH accounts
pub use accounts::{
    AccountError, OsAccountManager, ReconcileReport, SshAccountReconciler, SystemAccountManager,
};

// Replica fan-out
pub use replica::{ReplicaSyncFanout, SyncMode, SyncReport};

// Subprocesses
pub use process::{Invocation, ProcessError};
