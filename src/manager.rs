// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Site provisioning: the operations the CLI exposes.
//!
//! Each operation probes the nginx layout once, assembles a [`Pipeline`] and
//! runs it through the configured [`Executor`]. Create and update are strict
//! and only touch the registry after every step succeeded; delete is
//! best-effort and always drops the record.

use crate::ca::{CaManager, CaStatus};
use crate::cert::SiteCertIssuer;
use crate::config::{Config, Paths};
use crate::domain::{Domain, PhpVersion};
use crate::error::{Error, Result};
use crate::hosts::HostsFile;
use crate::nginx;
use crate::pipeline::{Pipeline, Policy};
use crate::privileged::{executor_for, Executor, Step};
use crate::probe::{self, Dependencies, HostCapabilities, Probe, SystemProbe};
use crate::registry::Registry;
use crate::site::{Site, SiteKind, SiteRequest, SiteUpdate};
use crate::x509::{self, CertInfo};
use std::path::PathBuf;

pub const PLACEHOLDER_INDEX: &str = "<?php phpinfo(); ?>\n";

/// What the status screen shows.
#[derive(Debug)]
pub enum Dashboard {
    MissingDependencies(Dependencies),
    Ready {
        sites: Vec<Site>,
        php_versions: Vec<PhpVersion>,
    },
}

pub struct SiteManager {
    paths: Paths,
    config: Config,
    exec: Box<dyn Executor>,
    probe: Box<dyn Probe>,
    trust_home: Option<PathBuf>,
}

impl SiteManager {
    pub fn new(paths: Paths, config: Config) -> Self {
        Self {
            exec: executor_for(config.elevation),
            probe: Box::new(SystemProbe::new(&config.layout)),
            trust_home: crate::trust::real_user_home(),
            paths,
            config,
        }
    }

    pub fn with_executor(mut self, exec: Box<dyn Executor>) -> Self {
        self.exec = exec;
        self
    }

    pub fn with_probe(mut self, probe: Box<dyn Probe>) -> Self {
        self.probe = probe;
        self
    }

    /// Home directory searched for browser NSS databases.
    pub fn with_trust_home(mut self, home: Option<PathBuf>) -> Self {
        self.trust_home = home;
        self
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn registry(&self) -> Registry {
        Registry::open(&self.paths.registry)
    }

    fn ca_manager(&self) -> CaManager<'_> {
        CaManager::new(
            &self.paths,
            &self.config,
            self.exec.as_ref(),
            self.trust_home.as_deref(),
        )
    }

    fn issuer(&self) -> SiteCertIssuer<'_> {
        SiteCertIssuer::new(self.paths.staging_parent(), self.config.cert_days)
    }

    fn run(&self, pipeline: &Pipeline) -> Result<()> {
        pipeline.run(self.exec.as_ref()).map(|_| ())
    }

    /// Document root, placeholder index for PHP sites, ownership.
    fn site_root_steps(&self, site: &Site) -> Vec<Step> {
        let layout = &self.config.layout;
        let public = layout.site_public(&site.domain);
        let mut steps = vec![Step::CreateDir {
            path: public.clone(),
        }];

        if let SiteKind::Php { .. } = site.kind {
            let index = public.join("index.php");
            if index.exists() {
                tracing::debug!(path = %index.display(), "keeping existing index.php");
            } else {
                steps.push(Step::write(index, PLACEHOLDER_INDEX, 0o644));
            }
        }

        match self.config.resolve_site_owner() {
            Some(owner) => steps.push(Step::Chown {
                path: layout.site_root(&site.domain),
                owner,
            }),
            None => tracing::warn!(domain = %site.domain, "no site owner found; leaving ownership as is"),
        }
        steps
    }

    pub fn create(&self, request: &SiteRequest) -> Result<Site> {
        let site = request.validate()?;
        let domain = &site.domain;
        if !domain.is_dev_tld() {
            tracing::warn!(
                domain = %domain,
                "not a development TLD; the hosts entry will shadow the public site"
            );
        }

        let registry = self.registry();
        if registry.get(domain)?.is_some() {
            return Err(Error::SiteExists(domain.to_string()));
        }

        let layout = &self.config.layout;
        let caps = HostCapabilities::probe(layout);
        let ca = self.ca_manager().ensure()?;
        let leaf = self.issuer().issue(domain, &ca)?;

        let mut pipeline = Pipeline::new(format!("create {}", domain));
        pipeline
            .extend_with(leaf.install_steps(layout), Policy::Strict)
            .extend_with(self.site_root_steps(&site), Policy::Strict)
            .append(nginx::activation_pipeline(&site, layout, &caps)?)
            .strict(HostsFile::new(&layout.hosts_file).upsert_step(domain)?);
        self.run(&pipeline)?;

        if self.exec.persists() {
            registry.insert(site.clone())?;
        }
        tracing::info!(domain = %domain, kind = %site.kind, "site created");
        Ok(site)
    }

    pub fn update(&self, domain: &Domain, update: &SiteUpdate) -> Result<Site> {
        let registry = self.registry();
        let mut site = registry
            .get(domain)?
            .ok_or_else(|| Error::SiteNotFound(domain.to_string()))?;

        if !site.apply(update)? {
            tracing::debug!(domain = %domain, "no field changed; rewriting config anyway");
        }

        let layout = &self.config.layout;
        let caps = HostCapabilities::probe(layout);
        self.run(&nginx::activation_pipeline(&site, layout, &caps)?)?;

        if self.exec.persists() {
            registry.put(site.clone())?;
        }
        tracing::info!(domain = %domain, kind = %site.kind, "site updated");
        Ok(site)
    }

    /// Remove everything provisioned for `domain`. Cleanup failures are logged
    /// and skipped; the record is dropped even if nginx then fails validation.
    pub fn delete(&self, domain: &Domain) -> Result<()> {
        let registry = self.registry();
        if registry.get(domain)?.is_none() {
            tracing::warn!(domain = %domain, "site is not registered; cleaning up leftovers");
        }

        let layout = &self.config.layout;
        let caps = HostCapabilities::probe(layout);

        let mut pipeline = Pipeline::new(format!("delete {}", domain));
        pipeline
            .extend_with(nginx::removal_steps(layout, &caps, domain), Policy::BestEffort)
            .best_effort(Step::RemoveFile {
                path: layout.site_cert(domain),
            })
            .best_effort(Step::RemoveFile {
                path: layout.site_key(domain),
            })
            .best_effort(Step::RemoveTree {
                path: layout.site_root(domain),
            });
        match HostsFile::new(&layout.hosts_file).remove_step(domain) {
            Ok(Some(step)) => {
                pipeline.best_effort(step);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(domain = %domain, error = %e, "cannot read hosts file"),
        }
        pipeline.append(nginx::reload_pipeline());

        let outcome = self.run(&pipeline);

        if self.exec.persists() {
            registry.remove(domain)?;
        }
        outcome?;
        tracing::info!(domain = %domain, "site deleted");
        Ok(())
    }

    fn reissue(&self, domain: &Domain, ca: &crate::ca::Ca) -> Result<()> {
        let leaf = self.issuer().issue(domain, ca)?;
        let mut pipeline = Pipeline::new(format!("install certificate for {}", domain));
        pipeline.extend_with(leaf.install_steps(&self.config.layout), Policy::Strict);
        self.run(&pipeline)
    }

    /// Issue a fresh leaf for a registered site and reload nginx.
    pub fn regenerate_site_cert(&self, domain: &Domain) -> Result<()> {
        if self.registry().get(domain)?.is_none() {
            return Err(Error::SiteNotFound(domain.to_string()));
        }
        let ca = self.ca_manager().ensure()?;
        self.reissue(domain, &ca)?;
        self.run(&nginx::reload_pipeline())?;
        tracing::info!(domain = %domain, "site certificate regenerated");
        Ok(())
    }

    /// Replace the CA and re-issue every registered site's certificate.
    pub fn regenerate_ca(&self) -> Result<()> {
        let ca = self.ca_manager().regenerate()?;
        let sites = self.registry().list()?;

        let mut failed = Vec::new();
        for site in &sites {
            if let Err(e) = self.reissue(&site.domain, &ca) {
                tracing::warn!(domain = %site.domain, error = %e, "certificate reissue failed");
                failed.push(site.domain.to_string());
            }
        }

        let reload = if sites.is_empty() {
            Ok(())
        } else {
            self.run(&nginx::reload_pipeline())
        };

        if !failed.is_empty() {
            return Err(Error::Reissue { failed });
        }
        reload?;
        tracing::info!(sites = sites.len(), "CA regenerated");
        Ok(())
    }

    /// Parse the installed leaf for `domain` and check it against the current CA.
    pub fn verify_site_cert(&self, domain: &Domain) -> Result<CertInfo> {
        let cert_path = self.config.layout.site_cert(domain);
        let leaf_pem = match std::fs::read_to_string(&cert_path) {
            Ok(pem) => pem,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::CertificateNotFound(domain.to_string()))
            }
            Err(e) => {
                return Err(Error::ReadFile {
                    path: cert_path,
                    source: e,
                })
            }
        };

        let ca_pem = std::fs::read_to_string(&self.paths.ca_cert).map_err(|e| Error::ReadFile {
            path: self.paths.ca_cert.clone(),
            source: e,
        })?;
        x509::verify_issued_by(&leaf_pem, &ca_pem)?;
        x509::parse_cert_pem(&leaf_pem)
    }

    pub fn ca_status(&self) -> Result<Option<CaStatus>> {
        self.ca_manager().status()
    }

    pub fn check_dependencies(&self) -> Dependencies {
        self.probe.detect()
    }

    pub fn install_dependencies(&self) -> Result<()> {
        self.run(&probe::install_pipeline())
    }

    pub fn list_php_versions(&self) -> Vec<PhpVersion> {
        self.probe.php_versions()
    }

    pub fn list_sites(&self) -> Result<Vec<Site>> {
        self.registry().list()
    }

    /// Dependencies first; sites and PHP versions are only read when nothing is missing.
    pub fn dashboard(&self) -> Result<Dashboard> {
        let deps = self.check_dependencies();
        if !deps.all_present() {
            tracing::debug!(missing = ?deps.missing(), "dependency gate closed");
            return Ok(Dashboard::MissingDependencies(deps));
        }
        Ok(Dashboard::Ready {
            sites: self.list_sites()?,
            php_versions: self.list_php_versions(),
        })
    }
}
