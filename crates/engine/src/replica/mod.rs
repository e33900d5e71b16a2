//! Propagation of artifacts from the master to its replicas.
//!
//! The configured sync command transfers certificates, proxy state and the
//! model to one replica and restarts it there. The fan-out runs one task per
//! replica; a replica that fails is reported and never stops the others.

use serde::Serialize;
use tracing::{debug, info};

use bastion_common::{Warning, Warnings};
use bastion_config::{EngineConfig, REPLICA_PLACEHOLDER};

use crate::process::{Invocation, ProcessError};

/// How warnings reach the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Return warnings in the report
    Quiet,
    /// Print each warning to stderr as it is collected
    Verbose,
}

/// Result of syncing one replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaOutcome {
    pub replica: String,
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    /// One entry per replica, in configuration order
    pub outcomes: Vec<ReplicaOutcome>,
    pub warnings: Warnings,
}

impl SyncReport {
    pub fn failed(&self) -> impl Iterator<Item = &ReplicaOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded)
    }
}

#[derive(Debug, Clone)]
pub struct ReplicaSyncFanout {
    replicas: Vec<String>,
    sync_command: String,
    enabled: bool,
}

impl ReplicaSyncFanout {
    pub fn new(replicas: Vec<String>, sync_command: impl Into<String>, is_master: bool) -> Self {
        Self {
            replicas,
            sync_command: sync_command.into(),
            enabled: is_master,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.instance.replicas.clone(),
            config.instance.sync_command.clone(),
            config.is_master(),
        )
    }

    /// Only a master with replicas syncs
    pub fn is_active(&self) -> bool {
        self.enabled && !self.replicas.is_empty()
    }

    pub fn replicas(&self) -> &[String] {
        &self.replicas
    }

    /// Sync every replica concurrently and wait for all of them
    pub async fn sync(&self, mode: SyncMode) -> SyncReport {
        let mut report = SyncReport::default();
        if !self.is_active() {
            debug!("Replica sync inactive on this instance");
            return report;
        }

        info!(replicas = self.replicas.len(), "Syncing replicas");
        let handles: Vec<_> = self
            .replicas
            .iter()
            .map(|replica| {
                let invocation =
                    Invocation::shell(&self.sync_command.replace(REPLICA_PLACEHOLDER, replica));
                tokio::spawn(async move { invocation.run_async().await })
            })
            .collect();

        for (replica, handle) in self.replicas.iter().zip(handles) {
            let (outcome, warning) = match handle.await {
                Ok(Ok(output)) => (
                    ReplicaOutcome {
                        replica: replica.clone(),
                        succeeded: true,
                        stdout: output.stdout,
                        stderr: output.stderr,
                    },
                    None,
                ),
                Ok(Err(ProcessError::Failed {
                    status,
                    stdout,
                    stderr,
                    details,
                    ..
                })) => (
                    ReplicaOutcome {
                        replica: replica.clone(),
                        succeeded: false,
                        stdout,
                        stderr,
                    },
                    Some(format!("sync failed with {}: {}", status, details)),
                ),
                Ok(Err(e)) => (failed(replica), Some(e.to_string())),
                Err(join) => (
                    failed(replica),
                    Some(format!("sync task failed: {}", join)),
                ),
            };

            if let Some(message) = warning {
                let warning = Warning::about(replica.clone(), message);
                match mode {
                    SyncMode::Verbose => eprintln!("warning: {}", warning),
                    SyncMode::Quiet => report.warnings.push(warning),
                }
            }
            report.outcomes.push(outcome);
        }

        info!(
            replicas = report.outcomes.len(),
            failed = report.failed().count(),
            "Replica sync finished"
        );
        report
    }
}

fn failed(replica: &str) -> ReplicaOutcome {
    ReplicaOutcome {
        replica: replica.to_string(),
        succeeded: false,
        stdout: String::new(),
        stderr: String::new(),
    }
}
