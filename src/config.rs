// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

use crate::domain::{Domain, PhpVersion};
use crate::error::{Error, Result};
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Current config file version. Increment when making breaking changes.
const CONFIG_VERSION: u32 = 1;

/// Maximum certificate validity period (10 years).
pub const MAX_CERT_DAYS: u32 = 3650;

/// How privileged steps are run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Elevation {
    #[default]
    Sudo,
    Pkexec,
    /// Caller is already privileged (or the layout points at writable paths).
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Config file version for future migration support
    #[serde(default = "default_config_version")]
    pub config_version: u32,
    #[serde(default = "default_cert_days")]
    pub cert_days: u32,
    #[serde(default = "default_ca_days")]
    pub ca_days: u32,
    #[serde(default)]
    pub elevation: Elevation,
    /// Owner of created site directories. Falls back to SUDO_USER, then USER.
    #[serde(default)]
    pub site_owner: Option<String>,
    #[serde(default)]
    pub layout: Layout,
    #[serde(default)]
    pub trust: TrustConfig,
}

fn default_config_version() -> u32 {
    CONFIG_VERSION
}

fn default_cert_days() -> u32 {
    365
}

fn default_ca_days() -> u32 {
    3650
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: CONFIG_VERSION,
            cert_days: default_cert_days(),
            ca_days: default_ca_days(),
            elevation: Elevation::default(),
            site_owner: None,
            layout: Layout::default(),
            trust: TrustConfig::default(),
        }
    }
}

/// Host-wide locations the provisioning steps touch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    pub web_root: PathBuf,
    pub cert_dir: PathBuf,
    pub key_dir: PathBuf,
    pub nginx_dir: PathBuf,
    pub hosts_file: PathBuf,
    pub php_fpm_socket_dir: PathBuf,
    pub php_bin_dir: PathBuf,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            web_root: PathBuf::from("/var/www"),
            cert_dir: PathBuf::from("/etc/ssl/certs"),
            key_dir: PathBuf::from("/etc/ssl/private"),
            nginx_dir: PathBuf::from("/etc/nginx"),
            hosts_file: PathBuf::from("/etc/hosts"),
            php_fpm_socket_dir: PathBuf::from("/run/php"),
            php_bin_dir: PathBuf::from("/usr/bin"),
        }
    }
}

impl Layout {
    /// Layout with every location rooted under `root`. Used by tests and chroot-style setups.
    pub fn rooted_at(root: &Path) -> Self {
        let defaults = Self::default();
        let reroot = |p: &Path| root.join(p.strip_prefix("/").unwrap_or(p));
        Self {
            web_root: reroot(&defaults.web_root),
            cert_dir: reroot(&defaults.cert_dir),
            key_dir: reroot(&defaults.key_dir),
            nginx_dir: reroot(&defaults.nginx_dir),
            hosts_file: reroot(&defaults.hosts_file),
            php_fpm_socket_dir: reroot(&defaults.php_fpm_socket_dir),
            php_bin_dir: reroot(&defaults.php_bin_dir),
        }
    }

    pub fn site_cert(&self, domain: &Domain) -> PathBuf {
        self.cert_dir.join(format!("{}.crt", domain))
    }

    pub fn site_key(&self, domain: &Domain) -> PathBuf {
        self.key_dir.join(format!("{}.key", domain))
    }

    pub fn site_root(&self, domain: &Domain) -> PathBuf {
        self.web_root.join(domain.as_str())
    }

    pub fn site_public(&self, domain: &Domain) -> PathBuf {
        self.site_root(domain).join("public")
    }

    pub fn fpm_socket(&self, version: &PhpVersion) -> PathBuf {
        self.php_fpm_socket_dir.join(version.fpm_socket_name())
    }

    fn validate(&self) -> Result<()> {
        for (name, path) in [
            ("web_root", &self.web_root),
            ("cert_dir", &self.cert_dir),
            ("key_dir", &self.key_dir),
            ("nginx_dir", &self.nginx_dir),
            ("hosts_file", &self.hosts_file),
            ("php_fpm_socket_dir", &self.php_fpm_socket_dir),
            ("php_bin_dir", &self.php_bin_dir),
        ] {
            if !path.is_absolute() {
                return Err(Error::Config(format!(
                    "layout.{} must be an absolute path, got: {}",
                    name,
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Overrides for the system trust store. Unset fields come from distro detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    pub anchor_dir: Option<PathBuf>,
    pub update_command: Option<Vec<String>>,
    pub nss_nickname: String,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            anchor_dir: None,
            update_command: None,
            nss_nickname: crate::ca::CA_COMMON_NAME.to_string(),
        }
    }
}

/// Application-private paths (CA material, registry, config).
#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
    pub ca_dir: PathBuf,
    pub ca_key: PathBuf,
    pub ca_cert: PathBuf,
    pub config: PathBuf,
    pub registry: PathBuf,
}

impl Paths {
    pub fn new() -> Result<Self> {
        Ok(Self::at(Self::base_dir()?))
    }

    pub fn at(base: PathBuf) -> Self {
        let ca_dir = base.join("ssl");
        Self {
            ca_key: ca_dir.join("rootCA.key"),
            ca_cert: ca_dir.join("rootCA.pem"),
            ca_dir,
            config: base.join("config.toml"),
            registry: base.join("sites.json"),
            base,
        }
    }

    fn base_dir() -> Result<PathBuf> {
        if let Ok(custom_root) = std::env::var("SITE_MANAGER_ROOT") {
            let path = PathBuf::from(&custom_root);
            if !path.is_absolute() {
                return Err(Error::Config(format!(
                    "SITE_MANAGER_ROOT must be an absolute path, got: {}",
                    custom_root
                )));
            }
            return Ok(path);
        }

        // When running with sudo, keep using the original user's data
        #[cfg(unix)]
        if let Some(home) = crate::trust::sudo_user_home() {
            return Ok(home.join(".local").join("share").join("site-manager"));
        }

        if let Some(proj_dirs) = ProjectDirs::from("", "", "site-manager") {
            Ok(proj_dirs.data_dir().to_path_buf())
        } else if let Some(base_dirs) = BaseDirs::new() {
            Ok(base_dirs.home_dir().join(".site-manager"))
        } else {
            Err(Error::Config(
                "Could not determine home directory. Set SITE_MANAGER_ROOT.".into(),
            ))
        }
    }

    pub fn ensure_dir(&self) -> Result<()> {
        for dir in [&self.base, &self.ca_dir] {
            if !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| Error::CreateDir {
                    path: dir.clone(),
                    source: e,
                })?;
            }
        }
        Ok(())
    }

    pub fn ca_exists(&self) -> bool {
        self.ca_key.exists() && self.ca_cert.exists()
    }

    /// Scratch space for CSRs and extension descriptors.
    pub fn staging_parent(&self) -> &Path {
        &self.base
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| Error::ReadFile {
                path: path.to_path_buf(),
                source: e,
            })?;
            toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.config_version > CONFIG_VERSION {
            tracing::warn!(
                found = self.config_version,
                supported = CONFIG_VERSION,
                "config.toml is newer than this build; unknown settings are ignored"
            );
        }

        validate_days(self.cert_days)?;
        if self.ca_days == 0 {
            return Err(Error::InvalidDays("ca_days cannot be 0".into()));
        }
        if self.ca_days > MAX_CERT_DAYS {
            return Err(Error::InvalidDays(format!(
                "ca_days cannot exceed {} (10 years)",
                MAX_CERT_DAYS
            )));
        }

        if let Some(owner) = &self.site_owner {
            if !is_valid_user_name(owner) {
                return Err(Error::Config(format!("invalid site_owner '{}'", owner)));
            }
        }

        if let Some(cmd) = &self.trust.update_command {
            if cmd.is_empty() {
                return Err(Error::Config("trust.update_command cannot be empty".into()));
            }
        }
        if self.trust.nss_nickname.trim().is_empty() {
            return Err(Error::Config("trust.nss_nickname cannot be empty".into()));
        }

        self.layout.validate()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        crate::fs::atomic_write(path, content.as_bytes())
    }

    /// Who should own a new site's document root.
    pub fn resolve_site_owner(&self) -> Option<String> {
        self.site_owner
            .clone()
            .or_else(|| std::env::var("SUDO_USER").ok())
            .or_else(|| std::env::var("USER").ok())
            .filter(|user| is_valid_user_name(user))
    }
}

/// Validate that the validity period is within allowed bounds.
pub fn validate_days(days: u32) -> Result<()> {
    if days == 0 {
        return Err(Error::InvalidDays("days cannot be 0".into()));
    }
    if days > MAX_CERT_DAYS {
        return Err(Error::InvalidDays(format!(
            "days cannot exceed {} (10 years)",
            MAX_CERT_DAYS
        )));
    }
    Ok(())
}

pub(crate) fn is_valid_user_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}
