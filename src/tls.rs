//! TLS material loading and developer-mode self-signed bootstrap (§6).
//!
//! Unlike a multi-tenant SNI match table, this gateway serves a single
//! wildcard certificate for the whole deployment, so `DynamicCert` here
//! just re-applies the same certificate/key pair on every handshake — the
//! `TlsAccept` seam is kept because it is how the gateway's TLS listener
//! plugs a certificate in at accept time, not because SNI-based selection
//! is needed.

use async_trait::async_trait;
use pingora::listeners::TlsAccept;
use pingora::tls::ext;
use pingora::tls::pkey::PKey;
use pingora::tls::ssl::SslRef;
use pingora::tls::x509::X509;

use crate::config::Config;
use crate::error::{ProxyError, ProxyResult};

pub struct CertMaterial {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

/// Loads the configured PEM cert/key, generating a developer-mode
/// self-signed wildcard if either file is missing (§6).
pub fn load_or_generate(config: &Config) -> ProxyResult<CertMaterial> {
    let cert_exists = std::path::Path::new(&config.tls_cert_path).exists();
    let key_exists = std::path::Path::new(&config.tls_key_path).exists();

    if cert_exists && key_exists {
        let cert_pem = std::fs::read(&config.tls_cert_path)?;
        let key_pem = std::fs::read(&config.tls_key_path)?;
        return Ok(CertMaterial { cert_pem, key_pem });
    }

    if !config.developer_mode {
        return Err(ProxyError::ConfigInvalid(format!(
            "TLS material missing at {} / {} and developer_mode is off",
            config.tls_cert_path, config.tls_key_path
        )));
    }

    log::warn!(
        "developer_mode: generating self-signed wildcard certificate for {}",
        config.hostname
    );
    generate_self_signed(config)
}

fn generate_self_signed(config: &Config) -> ProxyResult<CertMaterial> {
    let sans = vec![
        config.hostname.clone(),
        format!("{}.{}", config.admin_panel_subdomain, config.hostname),
        format!("admin-api.{}", config.hostname),
        format!("*.{}", config.hostname),
        "localhost".to_string(),
        "127.0.0.1".to_string(),
    ];

    let mut params = rcgen::CertificateParams::new(sans)
        .map_err(|e| ProxyError::Internal(format!("certificate params: {e}")))?;
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, format!("*.{}", config.hostname));
    params
        .distinguished_name
        .push(rcgen::DnType::OrganizationName, "Dev Local");
    params.not_before = time::OffsetDateTime::now_utc();
    params.not_after = params.not_before + time::Duration::days(365);

    let key_pair = rcgen::KeyPair::generate()
        .map_err(|e| ProxyError::Internal(format!("key generation: {e}")))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| ProxyError::Internal(format!("self-sign: {e}")))?;

    let cert_pem = cert.pem().into_bytes();
    let key_pem = key_pair.serialize_pem().into_bytes();

    if let Some(parent) = std::path::Path::new(&config.tls_cert_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&config.tls_cert_path, &cert_pem)?;
    std::fs::write(&config.tls_key_path, &key_pem)?;

    Ok(CertMaterial { cert_pem, key_pem })
}

pub struct DynamicCert {
    material: CertMaterial,
}

impl DynamicCert {
    pub fn new(material: CertMaterial) -> Box<Self> {
        Box::new(Self { material })
    }
}

#[async_trait]
impl TlsAccept for DynamicCert {
    async fn certificate_callback(&self, ssl: &mut SslRef) {
        match X509::from_pem(&self.material.cert_pem) {
            Ok(cert) => match PKey::private_key_from_pem(&self.material.key_pem) {
                Ok(key) => {
                    if let Err(e) = ext::ssl_use_certificate(ssl, &cert) {
                        log::error!("failed to use certificate: {e}");
                    }
                    if let Err(e) = ext::ssl_use_private_key(ssl, &key) {
                        log::error!("failed to use private key: {e}");
                    }
                }
                Err(e) => log::error!("failed to parse private key: {e}"),
            },
            Err(e) => log::error!("failed to parse certificate: {e}"),
        }
    }
}

pub fn into_tls_accept(material: CertMaterial) -> Box<dyn TlsAccept + Send + Sync> {
    DynamicCert::new(material)
}
