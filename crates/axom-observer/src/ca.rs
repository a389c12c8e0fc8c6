//! Certificate authority for the MITM proxy.
//!
//! Persists a root CA keypair under the configured directory and mints
//! per-hostname leaf certificates signed by it. Leaves are cached for the
//! process lifetime; generation is single-flighted per hostname so a burst
//! of handshakes for one host produces exactly one certificate.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    Issuer, KeyPair, KeyUsagePurpose, RsaKeySize, PKCS_RSA_SHA256,
};
use time::{Duration as TimeDuration, OffsetDateTime};
use tokio::sync::OnceCell;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio_rustls::rustls::ServerConfig;
use tracing::info;

/// CA certificate and key file names, relative to the CA directory.
const CA_CERT_FILENAME: &str = "ca.crt";
const CA_KEY_FILENAME: &str = "ca.key";

/// Root CA validity, ten years.
const CA_VALIDITY_DAYS: i64 = 3650;
/// Leaf validity, one year.
const LEAF_VALIDITY_DAYS: i64 = 365;

/// Install the process-wide rustls crypto provider. The dependency graph
/// compiles rustls with more than one provider, so every entry point that
/// builds a TLS config must pin one first. Safe to call repeatedly.
pub(crate) fn install_crypto_provider() {
    let _ = tokio_rustls::rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Certificate authority error type.
#[derive(Debug, thiserror::Error)]
pub enum CaError {
    #[error("failed to generate certificate material: {0}")]
    Generation(String),

    #[error("failed to read CA files: {0}")]
    Read(#[from] io::Error),

    #[error("failed to parse CA files: {0}")]
    Parse(String),

    #[error("TLS rejected the certificate: {0}")]
    Tls(#[from] tokio_rustls::rustls::Error),
}

/// Root CA plus the per-hostname leaf cache.
pub struct CertificateAuthority {
    issuer: Issuer<'static, KeyPair>,
    ca_cert_pem: String,
    ca_cert_der: CertificateDer<'static>,
    /// hostname → single-flight cell holding the leaf's server config.
    leaves: DashMap<String, Arc<OnceCell<Arc<ServerConfig>>>>,
}

impl CertificateAuthority {
    /// Load the root CA from `ca_dir`, generating and persisting a new one
    /// when the files are missing.
    ///
    /// # Errors
    ///
    /// Filesystem and parse failures are returned and are fatal at startup.
    pub fn ensure_root(ca_dir: impl AsRef<Path>) -> Result<Self, CaError> {
        install_crypto_provider();

        let ca_dir = ca_dir.as_ref();
        let cert_path = ca_dir.join(CA_CERT_FILENAME);
        let key_path = ca_dir.join(CA_KEY_FILENAME);

        if !cert_path.exists() || !key_path.exists() {
            info!(dir = %ca_dir.display(), "No CA found, generating a new root CA");
            generate_root(ca_dir, &cert_path, &key_path)?;
        } else {
            info!(cert = %cert_path.display(), "Loading CA certificate");
        }

        Self::load(&cert_path, &key_path)
    }

    /// Path of the CA certificate inside `ca_dir`.
    pub fn cert_path(ca_dir: &Path) -> PathBuf {
        ca_dir.join(CA_CERT_FILENAME)
    }

    /// The root certificate in PEM form, for distribution to clients.
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// Number of leaf certificates minted so far.
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Return the TLS server config for `hostname`, minting and caching a
    /// leaf certificate on first use.
    ///
    /// Concurrent callers for the same hostname observe exactly one leaf. A
    /// failed mint leaves the cache slot empty so the next handshake retries.
    pub async fn leaf_for(&self, hostname: &str) -> Result<Arc<ServerConfig>, CaError> {
        let cell = self
            .leaves
            .entry(hostname.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let config = cell
            .get_or_try_init(|| async { self.mint_leaf(hostname) })
            .await?;
        Ok(Arc::clone(config))
    }

    fn load(cert_path: &Path, key_path: &Path) -> Result<Self, CaError> {
        let cert_pem = fs::read_to_string(cert_path)?;
        let key_pem = fs::read_to_string(key_path)?;

        let key_pair = KeyPair::from_pem_and_sign_algo(&key_pem, &PKCS_RSA_SHA256)
            .map_err(|e| CaError::Parse(e.to_string()))?;
        let issuer = Issuer::from_ca_cert_pem(&cert_pem, key_pair)
            .map_err(|e| CaError::Parse(e.to_string()))?;

        let ca_cert_der = rustls_pemfile::certs(&mut cert_pem.as_bytes())
            .next()
            .ok_or_else(|| CaError::Parse("no certificate found in ca.crt".to_string()))?
            .map_err(CaError::Read)?;

        Ok(Self {
            issuer,
            ca_cert_pem: cert_pem,
            ca_cert_der,
            leaves: DashMap::new(),
        })
    }

    /// Generate a leaf certificate for `hostname` and wrap it in a rustls
    /// server config presenting the leaf plus the root.
    fn mint_leaf(&self, hostname: &str) -> Result<Arc<ServerConfig>, CaError> {
        let key_pair = KeyPair::generate_rsa_for(&PKCS_RSA_SHA256, RsaKeySize::_2048)
            .map_err(|e| CaError::Generation(e.to_string()))?;

        let mut params = CertificateParams::new(vec![hostname.to_string()])
            .map_err(|e| CaError::Generation(e.to_string()))?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, "Axom AI Observer");
        dn.push(DnType::CommonName, hostname);
        params.distinguished_name = dn;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.not_before = OffsetDateTime::now_utc() - TimeDuration::days(1);
        params.not_after = OffsetDateTime::now_utc() + TimeDuration::days(LEAF_VALIDITY_DAYS);

        let cert = params
            .signed_by(&key_pair, &self.issuer)
            .map_err(|e| CaError::Generation(e.to_string()))?;

        let chain = vec![cert.der().clone(), self.ca_cert_der.clone()];
        let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(chain, key_der)?;

        Ok(Arc::new(config))
    }
}

/// Generate a new root CA and persist both PEM files.
fn generate_root(ca_dir: &Path, cert_path: &Path, key_path: &Path) -> Result<(), CaError> {
    fs::create_dir_all(ca_dir)?;

    let key_pair = KeyPair::generate_rsa_for(&PKCS_RSA_SHA256, RsaKeySize::_2048)
        .map_err(|e| CaError::Generation(e.to_string()))?;

    let mut params = CertificateParams::new(Vec::new())
        .map_err(|e| CaError::Generation(e.to_string()))?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, "Axom AI Observer CA");
    dn.push(DnType::CountryName, "US");
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    params.not_before = OffsetDateTime::now_utc() - TimeDuration::days(1);
    params.not_after = OffsetDateTime::now_utc() + TimeDuration::days(CA_VALIDITY_DAYS);

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| CaError::Generation(e.to_string()))?;

    write_atomic(cert_path, cert.pem().as_bytes(), 0o644)?;
    write_atomic(key_path, key_pair.serialize_pem().as_bytes(), 0o600)?;

    info!(cert = %cert_path.display(), key = %key_path.display(), "Root CA persisted");
    Ok(())
}

/// Write a file via a temp sibling and rename, with the given mode on Unix.
fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    fs::rename(&tmp, path)
}
