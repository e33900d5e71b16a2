//! DNS lookups for the certificate cut-over check.

use std::net::IpAddr;

use hickory_resolver::Resolver;
use tracing::debug;

/// Resolves a domain to its current addresses
pub trait DomainResolver: Send + Sync {
    /// Addresses `domain` resolves to; empty when it does not resolve
    fn lookup(&self, domain: &str) -> Vec<IpAddr>;
}

/// Resolver using the host's `/etc/resolv.conf`
pub struct SystemResolver {
    resolver: Resolver,
}

impl SystemResolver {
    pub fn from_system_conf() -> std::io::Result<Self> {
        Ok(Self {
            resolver: Resolver::from_system_conf()?,
        })
    }
}

impl DomainResolver for SystemResolver {
    fn lookup(&self, domain: &str) -> Vec<IpAddr> {
        match self.resolver.lookup_ip(domain) {
            Ok(response) => response.iter().collect(),
            Err(e) => {
                debug!(domain = %domain, error = %e, "Domain does not resolve");
                Vec::new()
            }
        }
    }
}
