//! Parsed view of one certificate file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use x509_parser::extensions::GeneralName;

/// Issuer organization of LetsEncrypt intermediates
const LETS_ENCRYPT_ORG: &str = "Let's Encrypt";

/// Why a certificate file could not be read
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a PEM file: {0}")]
    Pem(#[from] pem::PemError),

    #[error("no CERTIFICATE block")]
    NoCertificate,

    #[error("invalid X.509 certificate: {0}")]
    X509(String),

    #[error("validity timestamp out of range")]
    Timestamp,
}

/// Immutable facts about a certificate, captured at scan time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertInfo {
    /// File name inside the certificate directory, as written to
    /// domain2cert.map
    pub filename: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub lets_encrypt: bool,
    /// Lowercased SAN DNS names, possibly `*.suffix` wildcards
    pub domains: Vec<String>,
}

impl CertInfo {
    /// Read and parse a PEM file; the first CERTIFICATE block is the leaf
    pub fn from_file(path: &Path) -> Result<Self, ParseError> {
        let bytes = std::fs::read(path)?;
        Self::from_pem(path, &bytes)
    }

    pub fn from_pem(path: &Path, bytes: &[u8]) -> Result<Self, ParseError> {
        let blocks = pem::parse_many(bytes)?;
        let leaf = blocks
            .iter()
            .find(|block| block.tag() == "CERTIFICATE")
            .ok_or(ParseError::NoCertificate)?;

        let (_, cert) = x509_parser::parse_x509_certificate(leaf.contents())
            .map_err(|e| ParseError::X509(e.to_string()))?;

        let validity = cert.validity();
        let not_before = DateTime::from_timestamp(validity.not_before.timestamp(), 0)
            .ok_or(ParseError::Timestamp)?;
        let not_after = DateTime::from_timestamp(validity.not_after.timestamp(), 0)
            .ok_or(ParseError::Timestamp)?;

        let mut domains = Vec::new();
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                if let GeneralName::DNSName(dns) = name {
                    let dns = dns.trim().trim_end_matches('.').to_ascii_lowercase();
                    if !dns.is_empty() && !domains.contains(&dns) {
                        domains.push(dns);
                    }
                }
            }
        }

        let lets_encrypt = cert
            .issuer()
            .iter_organization()
            .filter_map(|org| org.as_str().ok())
            .any(|org| org.contains(LETS_ENCRYPT_ORG));

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            filename,
            path: path.to_path_buf(),
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            not_before,
            not_after,
            lets_encrypt,
            domains,
        })
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now <= self.not_after
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.not_after
    }

    /// Still valid `days` from `now`
    pub fn is_valid_for_days(&self, now: DateTime<Utc>, days: u32) -> bool {
        self.is_valid_at(now) && self.not_after >= now + Duration::days(i64::from(days))
    }

    /// Precedence rule for two certificates covering the same name.
    ///
    /// When the name must be served by LetsEncrypt and exactly one of the two
    /// is LetsEncrypt-issued, that one wins. Otherwise the later expiry wins;
    /// on a tie the incumbent is kept.
    pub fn takes_precedence_over(&self, incumbent: &CertInfo, lets_encrypt_required: bool) -> bool {
        if lets_encrypt_required && self.lets_encrypt != incumbent.lets_encrypt {
            return self.lets_encrypt;
        }
        self.not_after > incumbent.not_after
    }
}
