//! TLS certificate pool.
//!
//! Certificates live as `*.pem` files in the instance's `certs/` directory.
//! [`CertificateStore`] scans them, decides which file serves which domain
//! name and caches the result until explicitly invalidated.
//! [`CertificateService`] drives the external issuance collaborator.

mod info;
mod issuance;
mod scan;
mod store;

use std::path::PathBuf;

use thiserror::Error;

use crate::model::ModelError;

pub use info::{CertInfo, ParseError};
pub use issuance::{CertificateIssuer, CertificateService, CommandIssuer, IssueError, IssueReport};
pub use scan::{scan_directory, wildcard_key, DomainCertMap};
pub use store::CertificateStore;

/// Hard failures of a certificate scan
#[derive(Debug, Error)]
pub enum CertError {
    #[error("certificate directory {path} does not exist or is not a directory")]
    MissingDirectory { path: PathBuf },

    #[error("certificate directory {path} is unreadable: {source}")]
    UnreadableDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot determine LetsEncrypt domains: {0}")]
    Model(#[from] ModelError),
}
