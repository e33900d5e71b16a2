//! Process-wide certificate cache.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use bastion_common::Warnings;
use bastion_config::Layout;

use super::info::CertInfo;
use super::scan::{scan_directory, DomainCertMap};
use super::CertError;
use crate::context::OperatorContext;
use crate::model::{lets_encrypt_domains, ModelProvider, Relations};

/// Lazily built, explicitly invalidated domain -> certificate map
///
/// The first caller after construction or [`invalidate`](Self::invalidate)
/// rebuilds the map while every other caller waits on the same rebuild.
/// The map is never refreshed on its own: callers must invalidate after
/// issuing, deleting or installing a certificate, or after the set of
/// LetsEncrypt domains changes.
pub struct CertificateStore {
    cert_dir: PathBuf,
    archive_dir: PathBuf,
    model: Arc<dyn ModelProvider>,
    cache: RwLock<Option<Arc<DomainCertMap>>>,
    rebuild: Mutex<()>,
    /// Bumped by every invalidation under the cache write lock; a rebuild
    /// that started under an older generation is returned to its caller
    /// but not cached
    generation: AtomicU64,
}

impl CertificateStore {
    pub fn new(layout: &Layout, model: Arc<dyn ModelProvider>) -> Self {
        Self {
            cert_dir: layout.cert_dir(),
            archive_dir: layout.archive_dir().to_path_buf(),
            model,
            cache: RwLock::new(None),
            rebuild: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Current map, building it if needed.
    ///
    /// Scan warnings are appended to `warnings` only for the caller that
    /// performed the rebuild.
    pub fn get(&self, warnings: &mut Warnings) -> Result<Arc<DomainCertMap>, CertError> {
        if let Some(map) = self.cache.read().as_ref() {
            return Ok(Arc::clone(map));
        }

        let _rebuild = self.rebuild.lock();
        if let Some(map) = self.cache.read().as_ref() {
            return Ok(Arc::clone(map));
        }

        let generation = self.generation.load(Ordering::Acquire);
        let projects = self
            .model
            .projects(&OperatorContext::system(), Relations::ROUTING)?;
        let le_domains = lets_encrypt_domains(&projects);

        let map = Arc::new(scan_directory(
            &self.cert_dir,
            &self.archive_dir,
            &le_domains,
            Utc::now(),
            warnings,
        )?);

        let mut cache = self.cache.write();
        if self.generation.load(Ordering::Acquire) == generation {
            *cache = Some(Arc::clone(&map));
        } else {
            debug!("Certificate cache invalidated during rebuild; not caching result");
        }

        Ok(map)
    }

    /// Certificate serving `domain`, exact match then one-level wildcard
    pub fn resolve(
        &self,
        domain: &str,
        warnings: &mut Warnings,
    ) -> Result<Option<Arc<CertInfo>>, CertError> {
        Ok(self.get(warnings)?.resolve(domain).cloned())
    }

    /// Drop the cached map; the next lookup rescans
    pub fn invalidate(&self) {
        {
            let mut cache = self.cache.write();
            self.generation.fetch_add(1, Ordering::AcqRel);
            *cache = None;
        }
        info!(dir = %self.cert_dir.display(), "Certificate cache invalidated");
    }

    /// Build the cache on a background thread so startup does not block
    pub fn warm_in_background(self: &Arc<Self>) -> std::io::Result<std::thread::JoinHandle<()>> {
        let store = Arc::clone(self);
        std::thread::Builder::new()
            .name("cert-cache-warmup".to_string())
            .spawn(move || {
                let mut warnings = Warnings::new();
                match store.get(&mut warnings) {
                    Ok(map) => debug!(
                        names = map.len(),
                        warnings = warnings.len(),
                        "Certificate cache warmed"
                    ),
                    Err(e) => warn!(error = %e, "Certificate cache warm-up failed"),
                }
            })
    }

    /// Every certificate currently serving at least one name
    pub fn certificates(&self, warnings: &mut Warnings) -> Result<Vec<Arc<CertInfo>>, CertError> {
        Ok(self.get(warnings)?.certificates().to_vec())
    }

    /// Serving certificates that will not be valid `days` from now
    pub fn expiring_within(
        &self,
        days: u32,
        warnings: &mut Warnings,
    ) -> Result<Vec<Arc<CertInfo>>, CertError> {
        let now = Utc::now();
        Ok(self
            .certificates(warnings)?
            .into_iter()
            .filter(|cert| !cert.is_valid_for_days(now, days))
            .collect())
    }
}

impl std::fmt::Debug for CertificateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateStore")
            .field("cert_dir", &self.cert_dir)
            .field("cached", &self.cache.read().is_some())
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish()
    }
}
