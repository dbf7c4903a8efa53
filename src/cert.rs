// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Per-site leaf certificates: key, CSR, CA signature, install steps.

use crate::ca::Ca;
use crate::config::{validate_days, Layout};
use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::ext::LeafExtensions;
use crate::privileged::Step;
use rcgen::{
    CertificateParams, CertificateSigningRequestParams, DnType, KeyPair, SerialNumber,
    PKCS_RSA_SHA256,
};
use std::fs;
use std::path::Path;

pub const LEAF_ORG_NAME: &str = "Organization";

/// Key and certificate for one site, held in memory until installed.
pub struct LeafMaterial {
    pub domain: Domain,
    pub key_pem: String,
    pub cert_pem: String,
}

impl std::fmt::Debug for LeafMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeafMaterial")
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl LeafMaterial {
    /// Key (0600) then certificate (0644), overwriting any previous pair.
    pub fn install_steps(&self, layout: &Layout) -> Vec<Step> {
        vec![
            Step::write(layout.site_key(&self.domain), self.key_pem.clone(), 0o600),
            Step::write(layout.site_cert(&self.domain), self.cert_pem.clone(), 0o644),
        ]
    }
}

/// Check if a certificate with the given validity will outlive the CA.
fn check_ca_expiry_warning(ca: &Ca, days: u32) -> Option<String> {
    ca.days_remaining().ok().and_then(|ca_days_remaining| {
        if (days as i64) > ca_days_remaining {
            Some(format!(
                "certificate validity ({} days) exceeds the CA's remaining validity ({} days)",
                days, ca_days_remaining
            ))
        } else {
            None
        }
    })
}

/// Issues leaf certificates, staging the CSR and extension descriptor in a
/// scratch directory that is removed however issuance ends.
pub struct SiteCertIssuer<'a> {
    staging_parent: &'a Path,
    days: u32,
}

impl<'a> SiteCertIssuer<'a> {
    pub fn new(staging_parent: &'a Path, days: u32) -> Self {
        Self {
            staging_parent,
            days,
        }
    }

    pub fn issue(&self, domain: &Domain, ca: &Ca) -> Result<LeafMaterial> {
        validate_days(self.days)?;
        if let Some(warning) = check_ca_expiry_warning(ca, self.days) {
            tracing::warn!(domain = %domain, "{}", warning);
        }

        fs::create_dir_all(self.staging_parent).map_err(|e| Error::CreateDir {
            path: self.staging_parent.to_path_buf(),
            source: e,
        })?;
        let staging = tempfile::Builder::new()
            .prefix("issue-")
            .tempdir_in(self.staging_parent)
            .map_err(|e| Error::CreateDir {
                path: self.staging_parent.to_path_buf(),
                source: e,
            })?;

        let key_pair = KeyPair::generate_for(&PKCS_RSA_SHA256)?;

        let ext_path = staging.path().join(format!("{}.ext", domain));
        crate::fs::atomic_write(&ext_path, LeafExtensions::for_domain(domain).render().as_bytes())?;

        let csr_path = staging.path().join(format!("{}.csr", domain));
        crate::fs::atomic_write(&csr_path, build_csr(domain, &key_pair)?.as_bytes())?;

        let cert_pem = sign_staged(ca, &csr_path, &ext_path, self.days)?;

        let staging_path = staging.path().to_path_buf();
        staging.close().map_err(|e| Error::Remove {
            path: staging_path,
            source: e,
        })?;

        tracing::info!(domain = %domain, days = self.days, "issued site certificate");
        Ok(LeafMaterial {
            domain: domain.clone(),
            key_pem: key_pair.serialize_pem(),
            cert_pem,
        })
    }
}

fn build_csr(domain: &Domain, key_pair: &KeyPair) -> Result<String> {
    let mut params = CertificateParams::default();
    let dn = &mut params.distinguished_name;
    dn.push(DnType::CountryName, "US");
    dn.push(DnType::StateOrProvinceName, "State");
    dn.push(DnType::LocalityName, "City");
    dn.push(DnType::OrganizationName, LEAF_ORG_NAME);
    dn.push(DnType::CommonName, domain.as_str());

    Ok(params.serialize_request(key_pair)?.pem()?)
}

/// Sign a staged CSR with the CA, taking extensions from the staged descriptor.
fn sign_staged(ca: &Ca, csr_path: &Path, ext_path: &Path, days: u32) -> Result<String> {
    let read = |path: &Path| {
        fs::read_to_string(path).map_err(|e| Error::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })
    };

    let mut csr = CertificateSigningRequestParams::from_pem(&read(csr_path)?)
        .map_err(|e| Error::CertParse(format!("Failed to parse CSR: {}", e)))?;
    let extensions = LeafExtensions::parse(&read(ext_path)?)?;

    let now = time::OffsetDateTime::now_utc();
    csr.params.not_before = now;
    csr.params.not_after = now + time::Duration::days(days as i64);
    csr.params.serial_number = Some(random_serial());
    extensions.apply(&mut csr.params)?;

    let issuer = ca.issuer()?;
    let cert = csr.signed_by(&issuer).map_err(Error::CertGen)?;
    Ok(cert.pem())
}

/// 128-bit positive serial.
fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; 16];
    rand::Rng::fill(&mut rand::rng(), &mut bytes[..]);
    bytes[0] &= 0x7f;
    SerialNumber::from(bytes.to_vec())
}
