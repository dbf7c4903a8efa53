// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Read-only inspection of the host: installed tools, PHP versions, nginx layout.

use crate::config::Layout;
use crate::domain::PhpVersion;
use crate::pipeline::Pipeline;
use crate::privileged::{CommandSpec, Step};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

static PHP_BINARY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^php(\d+\.\d+)$").expect("invalid php binary regex"));

pub const INSTALL_PACKAGES: &[&str] = &["nginx", "php-fpm", "libnss3-tools", "openssl"];

/// Which required tools are on `PATH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dependencies {
    pub nginx: bool,
    pub php: bool,
    pub openssl: bool,
    pub certutil: bool,
}

impl Dependencies {
    pub fn all_present(&self) -> bool {
        self.missing().is_empty()
    }

    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("nginx", self.nginx),
            ("php", self.php),
            ("openssl", self.openssl),
            ("certutil", self.certutil),
        ]
        .into_iter()
        .filter(|(_, present)| !present)
        .map(|(name, _)| name)
        .collect()
    }
}

pub trait Probe {
    fn detect(&self) -> Dependencies;

    /// Installed PHP versions, ascending.
    fn php_versions(&self) -> Vec<PhpVersion>;
}

pub struct SystemProbe {
    php_bin_dir: PathBuf,
    search_path: Option<OsString>,
}

impl SystemProbe {
    pub fn new(layout: &Layout) -> Self {
        Self {
            php_bin_dir: layout.php_bin_dir.clone(),
            search_path: std::env::var_os("PATH"),
        }
    }

    /// Search `path` instead of the process `PATH`.
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    fn has(&self, program: &str) -> bool {
        let found = self
            .search_path
            .as_ref()
            .and_then(|path| find_in_path(program, path));
        tracing::debug!(program, found = ?found, "probing for binary");
        found.is_some()
    }
}

impl Probe for SystemProbe {
    fn detect(&self) -> Dependencies {
        Dependencies {
            nginx: self.has("nginx"),
            php: self.has("php"),
            openssl: self.has("openssl"),
            certutil: self.has("certutil"),
        }
    }

    fn php_versions(&self) -> Vec<PhpVersion> {
        list_php_versions(&self.php_bin_dir)
    }
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

pub fn find_in_path(program: &str, path: &std::ffi::OsStr) -> Option<PathBuf> {
    std::env::split_paths(path)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

/// `php<major>.<minor>` entries in `dir`, sorted numerically and deduplicated.
pub fn list_php_versions(dir: &Path) -> Vec<PhpVersion> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "cannot list php binaries");
            return Vec::new();
        }
    };

    let mut versions: Vec<PhpVersion> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?;
            let captures = PHP_BINARY_REGEX.captures(name)?;
            PhpVersion::parse(&captures[1]).ok()
        })
        .collect();
    versions.sort();
    versions.dedup();
    versions
}

/// nginx layout facts, probed once per operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCapabilities {
    /// `snippets/fastcgi-php.conf` is available (Debian packaging).
    pub fastcgi_snippet: bool,
    /// `sites-available`/`sites-enabled` layout instead of `conf.d`.
    pub sites_available: bool,
}

impl HostCapabilities {
    pub fn probe(layout: &Layout) -> Self {
        let caps = Self {
            fastcgi_snippet: layout
                .nginx_dir
                .join("snippets")
                .join("fastcgi-php.conf")
                .exists(),
            sites_available: layout.nginx_dir.join("sites-available").exists(),
        };
        tracing::debug!(?caps, "probed nginx layout");
        caps
    }
}

/// `apt-get update` then install every package the tool relies on.
pub fn install_pipeline() -> Pipeline {
    let mut install = vec!["install", "-y"];
    install.extend_from_slice(INSTALL_PACKAGES);

    let mut pipeline = Pipeline::new("install dependencies");
    pipeline
        .strict(Step::Run(CommandSpec::elevated("apt-get", ["update"])))
        .strict(Step::Run(CommandSpec::elevated("apt-get", install)));
    pipeline
}
