//! HAProxy configuration generation and deployment.
//!
//! Produces five files in the instance config directory:
//!
//! - `haproxy.cfg`: header template, the ACME validation backend, one stanza
//!   per regular backend with at least one container, footer template
//! - `domain2backend.map`: domain to HAProxy backend name or global label
//! - `domain2cert.map`: domain to certificate file name
//! - `domain2redirect.map`: domain to exact redirect location
//! - `domain2prefix.map`: domain to redirect prefix (request path kept)

mod binary;
mod deploy;
mod diff;
mod render;
mod resolver;

pub use binary::{HaproxyBinary, ProxyBinary};
pub use deploy::{DeployError, DeployOptions, DeployReport, ProxyConfigDeployer};
pub use diff::{diff_lines, DiffLine, FileDiff};
pub use render::{backend_name, Artifacts, Renderer, LETSENCRYPT_BACKEND};
pub use resolver::{DomainResolver, SystemResolver};
