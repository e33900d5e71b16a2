//! Rendering of haproxy.cfg and the domain routing maps.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tracing::debug;

use bastion_common::Warnings;
use bastion_config::EngineConfig;

use super::resolver::DomainResolver;
use crate::certs::DomainCertMap;
use crate::model::{Backend, BackendKind, Domain, Project, RedirectTarget};

/// Name of the ACME HTTP-01 validation backend
pub const LETSENCRYPT_BACKEND: &str = "letsencrypt";

/// Rendered contents of every generated file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifacts {
    pub config: String,
    pub backend_map: String,
    pub cert_map: String,
    pub redirect_map: String,
    pub prefix_map: String,
}

/// HAProxy backend name of a regular backend
pub fn backend_name(project: &Project, backend: &Backend) -> String {
    format!("{}_{}_{}", project.label, backend.id, backend.label)
}

/// Renders artifacts from the model and the certificate pool
pub struct Renderer<'a> {
    config: &'a EngineConfig,
    certs: &'a DomainCertMap,
    resolver: &'a dyn DomainResolver,
}

#[derive(Default)]
struct Maps {
    backend: BTreeMap<String, String>,
    cert: BTreeMap<String, String>,
    redirect: BTreeMap<String, String>,
    prefix: BTreeMap<String, String>,
}

impl<'a> Renderer<'a> {
    pub fn new(
        config: &'a EngineConfig,
        certs: &'a DomainCertMap,
        resolver: &'a dyn DomainResolver,
    ) -> Self {
        Self {
            config,
            certs,
            resolver,
        }
    }

    pub fn render(
        &self,
        header: &str,
        footer: &str,
        projects: &[Project],
        warnings: &mut Warnings,
    ) -> Artifacts {
        let mut config = String::with_capacity(header.len() + footer.len() + 4096);
        config.push_str(header);
        if !header.is_empty() && !header.ends_with('\n') {
            config.push('\n');
        }
        config.push('\n');
        self.letsencrypt_backend(&mut config, warnings);

        let mut projects: Vec<&Project> = projects.iter().collect();
        projects.sort_by(|a, b| a.label.cmp(&b.label));

        let mut maps = Maps::default();
        for project in projects {
            let mut backends: Vec<&Backend> = project.backends.iter().collect();
            backends.sort_by_key(|b| b.id);

            for backend in backends {
                match backend.kind() {
                    BackendKind::Normal => {
                        if let Some(name) =
                            self.backend_stanza(&mut config, project, backend, warnings)
                        {
                            for domain in &backend.domains {
                                maps.backend.insert(domain.domain.clone(), name.clone());
                                self.certificate(&mut maps, domain, warnings);
                            }
                        }
                    }
                    kind => {
                        for domain in &backend.domains {
                            if global_route(&mut maps, kind, domain, warnings) {
                                self.certificate(&mut maps, domain, warnings);
                            }
                        }
                    }
                }
            }
        }

        config.push_str(footer);

        Artifacts {
            config,
            backend_map: render_map(&maps.backend),
            cert_map: render_map(&maps.cert),
            redirect_map: render_map(&maps.redirect),
            prefix_map: render_map(&maps.prefix),
        }
    }

    /// ACME validation is answered locally on the master and forwarded to
    /// the master from replicas
    fn letsencrypt_backend(&self, out: &mut String, warnings: &mut Warnings) {
        let local = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let target = if self.config.is_master() {
            local
        } else {
            match self.config.instance.master_address {
                Some(address) => address,
                None => {
                    warnings.add(
                        LETSENCRYPT_BACKEND,
                        "replica has no master-address; answering ACME challenges locally",
                    );
                    local
                }
            }
        };
        let address = SocketAddr::new(target, self.config.proxy.letsencrypt_port);

        let _ = writeln!(out, "backend {}", LETSENCRYPT_BACKEND);
        let _ = writeln!(out, "    mode http");
        let _ = writeln!(out, "    server {} {}", LETSENCRYPT_BACKEND, address);
        out.push('\n');
    }

    /// Emit a backend stanza; `None` when the backend has nothing to serve
    fn backend_stanza(
        &self,
        out: &mut String,
        project: &Project,
        backend: &Backend,
        warnings: &mut Warnings,
    ) -> Option<String> {
        let name = backend_name(project, backend);

        let Some(port) = backend.port else {
            warnings.add(name, "backend has no port; skipping");
            return None;
        };

        let mut servers = Vec::new();
        for member in &backend.members {
            let Some(container) = project.container(member.container_id) else {
                warnings.add(
                    name.clone(),
                    format!(
                        "member container {} does not exist; skipping",
                        member.container_id
                    ),
                );
                continue;
            };
            let Some(ipv6) = container.ipv6 else {
                warnings.add(
                    name.clone(),
                    format!(
                        "container '{}' has no IPv6 address; skipping",
                        container.label
                    ),
                );
                continue;
            };
            let mut line = format!(
                "    server {} {}",
                container.label,
                SocketAddr::new(IpAddr::V6(ipv6), port)
            );
            if let Some(params) = member
                .params
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
            {
                line.push(' ');
                line.push_str(params);
            }
            servers.push(line);
        }

        if servers.is_empty() {
            warnings.add(name, "backend has no containers; skipping");
            return None;
        }

        let _ = writeln!(out, "backend {}", name);
        if let Some(params) = backend.params.as_deref() {
            for line in params.lines().map(str::trim).filter(|l| !l.is_empty()) {
                let _ = writeln!(out, "    {}", line);
            }
        }
        for server in servers {
            let _ = writeln!(out, "{}", server);
        }
        out.push('\n');

        debug!(backend = %name, "Rendered backend");
        Some(name)
    }

    fn certificate(&self, maps: &mut Maps, domain: &Domain, warnings: &mut Warnings) {
        if let Some(cert) = self.certs.resolve(&domain.domain) {
            maps.cert
                .insert(domain.domain.clone(), cert.filename.clone());
            return;
        }

        if domain.cert_provided {
            warnings.add(
                domain.domain.clone(),
                "no certificate installed for this domain",
            );
        } else if domain.lets_encrypt && self.points_here(&domain.domain) {
            warnings.add(
                domain.domain.clone(),
                "no LetsEncrypt certificate although the domain resolves to this proxy",
            );
        }
    }

    fn points_here(&self, domain: &str) -> bool {
        let addresses = self.resolver.lookup(domain);
        addresses
            .iter()
            .any(|a| self.config.proxy.public_addresses.contains(a))
    }
}

/// Route a domain of a global backend; false when the domain is unroutable
fn global_route(
    maps: &mut Maps,
    kind: BackendKind,
    domain: &Domain,
    warnings: &mut Warnings,
) -> bool {
    let name = domain.domain.clone();

    if !kind.is_redirect() {
        if let Some(label) = kind.map_label() {
            maps.backend.insert(name, label.to_string());
        }
        return true;
    }

    match domain.redirect_target() {
        Some(RedirectTarget::Location(url)) => {
            if let Some(label) = kind.map_label() {
                maps.backend.insert(name.clone(), label.to_string());
            }
            maps.redirect.insert(name, url);
            true
        }
        Some(RedirectTarget::Prefix(url)) => {
            if let Some(label) = kind.prefix_map_label() {
                maps.backend.insert(name.clone(), label.to_string());
            }
            maps.prefix.insert(name, url);
            true
        }
        None => {
            warnings.add(name, "redirect domain has no target URL; skipping");
            false
        }
    }
}

fn render_map(entries: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (domain, value) in entries {
        let _ = writeln!(out, "{} {}", domain, value);
    }
    out
}
