//! Certificate directory scan and domain map construction.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use bastion_common::Warnings;

use super::info::CertInfo;
use super::CertError;

/// Which certificate serves which domain name
///
/// Keys are lowercased SAN entries, so wildcard certificates are stored
/// under their literal `*.suffix` key.
#[derive(Debug, Clone, Default)]
pub struct DomainCertMap {
    by_domain: HashMap<String, Arc<CertInfo>>,
    certificates: Vec<Arc<CertInfo>>,
}

impl DomainCertMap {
    /// Exact entry for `key`, without wildcard fallback
    pub fn get(&self, key: &str) -> Option<&Arc<CertInfo>> {
        self.by_domain.get(key)
    }

    /// Exact match first, then the one-level wildcard
    pub fn resolve(&self, domain: &str) -> Option<&Arc<CertInfo>> {
        let domain = domain.to_ascii_lowercase();
        if let Some(cert) = self.by_domain.get(&domain) {
            return Some(cert);
        }
        wildcard_key(&domain).and_then(|key| self.by_domain.get(&key))
    }

    /// Certificates that serve at least one name, in file name order
    pub fn certificates(&self) -> &[Arc<CertInfo>] {
        &self.certificates
    }

    pub fn len(&self) -> usize {
        self.by_domain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_domain.is_empty()
    }
}

/// `sub.example.com` -> `*.example.com`. Only the first label is replaced;
/// names without a dot have no wildcard form.
pub fn wildcard_key(domain: &str) -> Option<String> {
    let dot = domain.find('.')?;
    Some(format!("*{}", &domain[dot..]))
}

/// Scan `cert_dir` and build the domain map.
///
/// Expired certificates and certificates that end up serving no name are
/// moved to `archive_dir`. Per-file problems become warnings; only a
/// missing or unreadable directory is an error.
pub fn scan_directory(
    cert_dir: &Path,
    archive_dir: &Path,
    lets_encrypt_domains: &HashSet<String>,
    now: DateTime<Utc>,
    warnings: &mut Warnings,
) -> Result<DomainCertMap, CertError> {
    let candidates = list_pem_files(cert_dir, warnings)?;
    let stamp = now.format("%Y%m%d-%H%M%S").to_string();

    let mut by_domain: HashMap<String, Arc<CertInfo>> = HashMap::new();
    // number of names each file currently serves
    let mut usage: HashMap<String, i64> = HashMap::new();
    let mut registered: Vec<Arc<CertInfo>> = Vec::new();

    for path in candidates {
        let cert = match CertInfo::from_file(&path) {
            Ok(cert) => cert,
            Err(e) => {
                warnings.add(
                    path.display().to_string(),
                    format!("skipping certificate: {}", e),
                );
                continue;
            }
        };

        if cert.is_expired_at(now) {
            let target = format!(
                "{}-expired-{}-{}",
                stamp,
                cert.not_after.format("%Y%m%d"),
                cert.filename
            );
            info!(
                file = %cert.filename,
                not_after = %cert.not_after,
                "Archiving expired certificate"
            );
            archive(&cert.path, archive_dir, &target, warnings);
            continue;
        }

        if !cert.is_valid_at(now) {
            debug!(
                file = %cert.filename,
                not_before = %cert.not_before,
                "Certificate not yet valid"
            );
            continue;
        }

        let cert = Arc::new(cert);
        usage.insert(cert.filename.clone(), 0);
        registered.push(Arc::clone(&cert));

        for domain in &cert.domains {
            let required = lets_encrypt_domains.contains(domain);
            let wins = match by_domain.get(domain) {
                None => true,
                Some(incumbent) if cert.takes_precedence_over(incumbent, required) => {
                    debug!(
                        domain = %domain,
                        winner = %cert.filename,
                        loser = %incumbent.filename,
                        "Certificate superseded"
                    );
                    *usage.entry(incumbent.filename.clone()).or_default() -= 1;
                    true
                }
                Some(_) => false,
            };
            if wins {
                *usage.entry(cert.filename.clone()).or_default() += 1;
                by_domain.insert(domain.clone(), Arc::clone(&cert));
            }
        }
    }

    let mut certificates = Vec::with_capacity(registered.len());
    for cert in registered {
        if usage.get(&cert.filename).copied().unwrap_or(0) <= 0 {
            warnings.add(
                cert.filename.clone(),
                "certificate is superseded for every domain it covers; archiving",
            );
            archive(
                &cert.path,
                archive_dir,
                &format!("{}-replaced-{}", stamp, cert.filename),
                warnings,
            );
        } else {
            certificates.push(cert);
        }
    }

    info!(
        dir = %cert_dir.display(),
        certificates = certificates.len(),
        names = by_domain.len(),
        "Certificate directory scanned"
    );

    Ok(DomainCertMap {
        by_domain,
        certificates,
    })
}

fn list_pem_files(cert_dir: &Path, warnings: &mut Warnings) -> Result<Vec<PathBuf>, CertError> {
    if !cert_dir.is_dir() {
        return Err(CertError::MissingDirectory {
            path: cert_dir.to_path_buf(),
        });
    }
    std::fs::read_dir(cert_dir).map_err(|source| CertError::UnreadableDirectory {
        path: cert_dir.to_path_buf(),
        source,
    })?;

    let pattern = format!(
        "{}/*.pem",
        glob::Pattern::escape(&cert_dir.to_string_lossy())
    );
    let entries = glob::glob(&pattern).map_err(|e| CertError::UnreadableDirectory {
        path: cert_dir.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
    })?;

    let mut files = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => warnings.add(
                e.path().display().to_string(),
                format!("unreadable entry: {}", e.error()),
            ),
        }
    }
    files.sort();
    Ok(files)
}

/// Move `source` to `archive_dir/name`; failures are warnings
fn archive(source: &Path, archive_dir: &Path, name: &str, warnings: &mut Warnings) {
    let target = archive_dir.join(name);
    let result = std::fs::create_dir_all(archive_dir).and_then(|()| move_file(source, &target));
    if let Err(e) = result {
        warnings.add(
            source.display().to_string(),
            format!("failed to archive to {}: {}", target.display(), e),
        );
    }
}

/// Rename, falling back to copy+remove across filesystems
fn move_file(source: &Path, target: &Path) -> std::io::Result<()> {
    match std::fs::rename(source, target) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(source, target)?;
            std::fs::remove_file(source)
        }
    }
}
