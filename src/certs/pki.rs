//! # PKI
//!
//! Self-signed CA and webhook serving certificate generation.
//!
//! The webhook only ever needs one CA and one leaf, so both are regenerated
//! together whenever the leaf gets close to expiry.

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, ExtendedKeyUsagePurpose,
    IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType, string::Ia5String,
};
use thiserror::Error;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::*;

const ORGANIZATION: &str = "Dockhand";

#[derive(Debug, Error)]
pub enum PkiError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("certificate generation failed: {0}")]
    Generation(String),

    #[error("certificate parsing error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, PkiError>;

/// A CA plus the leaf it signed, all PEM encoded
#[derive(Clone)]
pub struct CertificateBundle {
    pub ca_cert_pem: String,
    pub cert_pem: String,
    pub key_pem: String,
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("ca_cert_pem", &self.ca_cert_pem.len())
            .field("cert_pem", &self.cert_pem.len())
            .finish_non_exhaustive()
    }
}

/// Validity window and subject of a parsed certificate
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    /// Unix timestamp
    pub not_before: i64,
    /// Unix timestamp
    pub not_after: i64,
    pub common_name: String,
    pub dns_names: Vec<String>,
}

impl CertificateInfo {
    pub fn from_pem(pem_data: &str) -> Result<Self> {
        let (_, pem) = parse_x509_pem(pem_data.as_bytes())
            .map_err(|e| PkiError::Parse(format!("failed to parse PEM: {e}")))?;
        let cert = pem
            .parse_x509()
            .map_err(|e| PkiError::Parse(format!("failed to parse certificate: {e}")))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("")
            .to_string();

        let dns_names = cert
            .subject_alternative_name()
            .ok()
            .flatten()
            .map(|san| {
                san.value
                    .general_names
                    .iter()
                    .filter_map(|name| match name {
                        GeneralName::DNSName(dns) => Some((*dns).to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            common_name,
            dns_names,
        })
    }

    /// Seconds left at unix time `now`
    #[must_use]
    pub fn remaining_secs_at(&self, now: i64) -> i64 {
        self.not_after - now
    }
}

/// DNS names the webhook Service answers on
#[must_use]
pub fn service_dns_names(service: &str, namespace: &str) -> Vec<String> {
    vec![
        service.to_string(),
        format!("{service}.{namespace}"),
        format!("{service}.{namespace}.svc"),
    ]
}

fn validity(days: i64) -> (::time::OffsetDateTime, ::time::OffsetDateTime) {
    let now = ::time::OffsetDateTime::now_utc();
    (now, now + ::time::Duration::days(days))
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(ORGANIZATION.to_string()),
    );
    dn
}

/// Generate a fresh CA and a serving certificate for `service.namespace.svc`
pub fn generate_bundle(
    service: &str,
    namespace: &str,
    ca_validity_days: i64,
    cert_validity_days: i64,
) -> Result<CertificateBundle> {
    let mut ca_params = CertificateParams::default();
    ca_params.distinguished_name = distinguished_name(&format!("{service}-ca"));
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    (ca_params.not_before, ca_params.not_after) = validity(ca_validity_days);

    let ca_key = KeyPair::generate()
        .map_err(|e| PkiError::KeyGeneration(format!("failed to generate CA key: {e}")))?;
    let ca_cert = ca_params
        .self_signed(&ca_key)
        .map_err(|e| PkiError::Generation(format!("failed to create CA cert: {e}")))?;
    let ca_cert_pem = ca_cert.pem();

    let dns_names = service_dns_names(service, namespace);
    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(&format!("{service}.{namespace}.svc"));
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    (params.not_before, params.not_after) = validity(cert_validity_days);
    params.subject_alt_names = dns_names
        .iter()
        .map(|name| {
            Ia5String::try_from(name.clone())
                .map(SanType::DnsName)
                .map_err(|e| PkiError::Generation(format!("invalid DNS name '{name}': {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let key = KeyPair::generate()
        .map_err(|e| PkiError::KeyGeneration(format!("failed to generate server key: {e}")))?;
    let issuer = Issuer::from_ca_cert_pem(&ca_cert_pem, &ca_key)
        .map_err(|e| PkiError::Parse(format!("failed to create issuer: {e}")))?;
    let cert = params
        .signed_by(&key, &issuer)
        .map_err(|e| PkiError::Generation(format!("failed to sign server cert: {e}")))?;

    Ok(CertificateBundle {
        ca_cert_pem,
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    })
}

/// Whether `cert_pem` should be replaced at unix time `now`
///
/// Unparseable certificates always need renewal.
#[must_use]
pub fn needs_renewal(cert_pem: &str, threshold_days: i64, now: i64) -> bool {
    match CertificateInfo::from_pem(cert_pem) {
        Ok(info) => info.remaining_secs_at(now) <= threshold_days * 86_400,
        Err(_) => true,
    }
}
