// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Root CA material and its trust lifecycle.

use crate::config::{validate_days, Config, Paths};
use crate::error::{Error, Result};
use crate::privileged::Executor;
use crate::trust::{self, TrustStore};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, PKCS_RSA_SHA256,
};
use std::fs;
use std::path::Path;

pub const CA_COMMON_NAME: &str = "SiteManager Local CA";
pub const CA_ORG_NAME: &str = "SiteManager";

/// Root key pair and self-signed certificate.
pub struct Ca {
    pub key_pair: KeyPair,
    pub cert_pem: String,
}

impl Ca {
    /// RSA 2048 key, SHA-256 self-signature.
    pub fn generate(days: u32) -> Result<Self> {
        validate_days(days)?;
        let key_pair = KeyPair::generate_for(&PKCS_RSA_SHA256)?;
        let cert = Self::create_ca_cert(&key_pair, days)?;
        let cert_pem = cert.pem();

        Ok(Self { key_pair, cert_pem })
    }

    pub fn load(paths: &Paths) -> Result<Self> {
        let read = |path: &Path| {
            fs::read_to_string(path).map_err(|e| Error::ReadFile {
                path: path.to_path_buf(),
                source: e,
            })
        };
        let cert_pem = read(&paths.ca_cert)?;
        let key_pair = KeyPair::from_pem(&read(&paths.ca_key)?)?;

        Ok(Self { key_pair, cert_pem })
    }

    /// Create an Issuer for signing certificates
    ///
    /// Note: This recreates the KeyPair because Issuer takes ownership
    pub fn issuer(&self) -> Result<Issuer<'_, KeyPair>> {
        let key_pair = KeyPair::from_pem(&self.key_pair.serialize_pem())?;
        Issuer::from_ca_cert_pem(&self.cert_pem, key_pair).map_err(Error::CertGen)
    }

    fn create_ca_cert(key_pair: &KeyPair, days: u32) -> Result<Certificate> {
        let mut params = CertificateParams::default();
        let dn = &mut params.distinguished_name;
        dn.push(DnType::CountryName, "US");
        dn.push(DnType::StateOrProvinceName, "State");
        dn.push(DnType::LocalityName, "City");
        dn.push(DnType::OrganizationName, CA_ORG_NAME);
        dn.push(DnType::CommonName, CA_COMMON_NAME);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let now = time::OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + time::Duration::days(days as i64);

        Ok(params.self_signed(key_pair)?)
    }

    /// Key first (0600), then certificate, both atomically.
    pub fn save(&self, paths: &Paths) -> Result<()> {
        paths.ensure_dir()?;
        crate::fs::atomic_write_secret(&paths.ca_key, self.key_pair.serialize_pem().as_bytes())?;
        crate::fs::atomic_write(&paths.ca_cert, self.cert_pem.as_bytes())?;
        Ok(())
    }

    pub fn days_remaining(&self) -> Result<i64> {
        let info = crate::x509::parse_cert_pem(&self.cert_pem)?;
        Ok(info.days_remaining())
    }
}

/// Trust state of one target, as reported by `ca status`.
#[derive(Debug, Clone)]
pub struct TargetStatus {
    pub name: String,
    pub trusted: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct CaStatus {
    pub days_remaining: i64,
    pub expiry: String,
    pub targets: Vec<TargetStatus>,
}

/// Bootstraps, trusts, untrusts and rotates the root CA.
///
/// Local files under the data dir are only written when the executor
/// persists; a dry run generates an in-memory CA and records the trust steps.
pub struct CaManager<'a> {
    paths: &'a Paths,
    config: &'a Config,
    exec: &'a dyn Executor,
    trust_home: Option<&'a Path>,
}

impl<'a> CaManager<'a> {
    pub fn new(
        paths: &'a Paths,
        config: &'a Config,
        exec: &'a dyn Executor,
        trust_home: Option<&'a Path>,
    ) -> Self {
        Self {
            paths,
            config,
            exec,
            trust_home,
        }
    }

    fn targets(&self) -> Vec<Box<dyn TrustStore>> {
        trust::discover_targets(&self.config.trust, self.trust_home)
    }

    /// Load the CA, generating and trusting a new one if the pair is incomplete.
    pub fn ensure(&self) -> Result<Ca> {
        if self.paths.ca_exists() {
            tracing::debug!(path = %self.paths.ca_cert.display(), "using existing CA");
            return Ca::load(self.paths);
        }

        let persist = self.exec.persists();
        if persist {
            // Half a pair is useless; start over.
            crate::fs::remove_if_exists(&self.paths.ca_key)?;
            crate::fs::remove_if_exists(&self.paths.ca_cert)?;
        }

        tracing::info!(days = self.config.ca_days, "generating root CA");
        let ca = Ca::generate(self.config.ca_days)?;
        if persist {
            ca.save(self.paths)?;
        }

        if let Err(e) = self.install_trust(&ca) {
            // Leaving the files would make the next run skip trust installation.
            if persist {
                self.discard_files();
            }
            return Err(e);
        }
        Ok(ca)
    }

    /// Remove both CA files, attempting each even if the other fails.
    fn discard_files(&self) {
        for path in [&self.paths.ca_key, &self.paths.ca_cert] {
            if let Err(e) = crate::fs::remove_if_exists(path) {
                tracing::warn!(path = %path.display(), error = %e, "could not discard CA file");
            }
        }
    }

    /// Install into every discovered target. Only a system store failure is fatal,
    /// and only after the remaining targets were attempted.
    pub fn install_trust(&self, ca: &Ca) -> Result<()> {
        let mut system_failure = None;

        for target in self.targets() {
            let outcome = target
                .install_pipeline(&self.paths.ca_cert, &ca.cert_pem)
                .and_then(|pipeline| pipeline.run(self.exec));
            match outcome {
                Ok(_) => tracing::info!(target = %target.name(), "CA trusted"),
                Err(e) if target.is_system() => {
                    tracing::warn!(target = %target.name(), error = %e, "system trust install failed");
                    system_failure = Some(e);
                }
                Err(e) => {
                    tracing::warn!(target = %target.name(), error = %e, "skipping trust target");
                }
            }
        }

        match system_failure {
            Some(e) => Err(Error::TrustStore(format!(
                "could not install the CA into the system store: {}",
                e
            ))),
            None => Ok(()),
        }
    }

    /// Uninstall from every discovered target. Never fails.
    pub fn remove_trust(&self) {
        for target in self.targets() {
            match target.removal_pipeline().and_then(|p| p.run(self.exec)) {
                Ok(report) if report.is_clean() => {
                    tracing::info!(target = %target.name(), "CA trust removed")
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(target = %target.name(), error = %e, "trust removal failed")
                }
            }
        }
    }

    /// Untrust and delete the current pair, then bootstrap a fresh one.
    pub fn regenerate(&self) -> Result<Ca> {
        self.remove_trust();
        if self.exec.persists() {
            crate::fs::remove_if_exists(&self.paths.ca_key)?;
            crate::fs::remove_if_exists(&self.paths.ca_cert)?;
            self.ensure()
        } else {
            // Dry run: act as if the pair were gone without touching it.
            tracing::info!(days = self.config.ca_days, "generating root CA");
            let ca = Ca::generate(self.config.ca_days)?;
            self.install_trust(&ca)?;
            Ok(ca)
        }
    }

    /// `None` when no CA has been generated yet.
    pub fn status(&self) -> Result<Option<CaStatus>> {
        if !self.paths.ca_exists() {
            return Ok(None);
        }
        let ca = Ca::load(self.paths)?;
        let info = crate::x509::parse_cert_pem(&ca.cert_pem)?;
        let targets = self
            .targets()
            .iter()
            .map(|target| TargetStatus {
                name: target.name(),
                trusted: target.is_trusted(&ca.cert_pem),
            })
            .collect();

        Ok(Some(CaStatus {
            days_remaining: info.days_remaining(),
            expiry: info.expiry_string(),
            targets,
        }))
    }
}
