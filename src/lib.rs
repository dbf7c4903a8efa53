// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Trusted local HTTPS sites backed by nginx, a private root CA and `/etc/hosts`.
//!
//! ```rust,no_run
//! use site_manager::{Config, Paths, SiteManager, SiteRequest};
//!
//! let paths = Paths::new()?;
//! let config = Config::load(&paths.config)?;
//! let manager = SiteManager::new(paths, config);
//!
//! manager.create(&SiteRequest::proxy("app.local", 4000))?;
//! # Ok::<(), site_manager::Error>(())
//! ```

/// Root CA generation and trust lifecycle.
pub mod ca;
/// Leaf certificate issuance.
pub mod cert;
/// Configuration handling.
pub mod config;
/// Validated domain names and PHP versions.
pub mod domain;
/// Error types.
pub mod error;
/// X.509 extension descriptors for leaf certificates.
pub mod ext;
/// Filesystem utilities.
pub mod fs;
/// Hosts-file block management.
pub mod hosts;
/// Site provisioning operations.
pub mod manager;
/// nginx server block generation.
pub mod nginx;
/// Ordered step lists with failure policies.
pub mod pipeline;
/// Typed host mutations and their executors.
pub mod privileged;
/// Host inspection.
pub mod probe;
/// The site registry.
pub mod registry;
/// Site records.
pub mod site;
/// System and browser trust stores.
pub mod trust;
/// X.509 certificate parsing.
pub mod x509;

pub use ca::{Ca, CaManager, CaStatus, CA_COMMON_NAME, CA_ORG_NAME};
pub use cert::{LeafMaterial, SiteCertIssuer};
pub use config::{validate_days, Config, Elevation, Layout, Paths, MAX_CERT_DAYS};
pub use domain::{Domain, PhpVersion};
pub use error::{Error, Result};
pub use manager::{Dashboard, SiteManager};
pub use pipeline::{Pipeline, PipelineReport, Policy};
pub use privileged::{DirectExecutor, DryRunExecutor, ElevatedExecutor, Executor, Step};
pub use probe::{Dependencies, HostCapabilities, Probe, SystemProbe};
pub use registry::Registry;
pub use site::{Site, SiteKind, SiteRequest, SiteType, SiteUpdate};
pub use trust::TrustStore;
pub use x509::{parse_cert_pem, verify_issued_by, CertInfo};
