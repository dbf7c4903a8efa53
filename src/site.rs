// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Site records and the requests that create or change them.

use crate::domain::{Domain, PhpVersion};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A registered site. Serialized as
/// `{"domain": "...", "type": "php", "phpVersion": "8.2"}` or
/// `{"domain": "...", "type": "proxy", "proxyPort": 4000}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub domain: Domain,
    #[serde(flatten)]
    pub kind: SiteKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SiteKind {
    Php {
        #[serde(rename = "phpVersion")]
        php_version: PhpVersion,
    },
    Proxy {
        #[serde(rename = "proxyPort")]
        proxy_port: u16,
    },
}

impl fmt::Display for SiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteKind::Php { php_version } => write!(f, "php {}", php_version),
            SiteKind::Proxy { proxy_port } => write!(f, "proxy 127.0.0.1:{}", proxy_port),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteType {
    Php,
    Proxy,
}

impl fmt::Display for SiteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SiteType::Php => "php",
            SiteType::Proxy => "proxy",
        })
    }
}

fn validate_port(port: u16) -> Result<u16> {
    if port == 0 {
        return Err(Error::InvalidSite("proxy port must be between 1 and 65535".into()));
    }
    Ok(port)
}

/// Unvalidated input for `create`, shaped like the stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteRequest {
    pub domain: String,
    #[serde(rename = "type")]
    pub site_type: SiteType,
    #[serde(default)]
    pub php_version: Option<String>,
    #[serde(default)]
    pub proxy_port: Option<u16>,
}

impl SiteRequest {
    pub fn php(domain: &str, version: &str) -> Self {
        Self {
            domain: domain.to_string(),
            site_type: SiteType::Php,
            php_version: Some(version.to_string()),
            proxy_port: None,
        }
    }

    pub fn proxy(domain: &str, port: u16) -> Self {
        Self {
            domain: domain.to_string(),
            site_type: SiteType::Proxy,
            php_version: None,
            proxy_port: Some(port),
        }
    }

    /// Exactly the field matching `type` must be set.
    pub fn validate(&self) -> Result<Site> {
        let domain = Domain::parse(&self.domain)?;
        let kind = match (self.site_type, &self.php_version, self.proxy_port) {
            (SiteType::Php, Some(version), None) => SiteKind::Php {
                php_version: PhpVersion::parse(version)?,
            },
            (SiteType::Proxy, None, Some(port)) => SiteKind::Proxy {
                proxy_port: validate_port(port)?,
            },
            (SiteType::Php, None, _) => {
                return Err(Error::InvalidSite("php sites need a PHP version".into()))
            }
            (SiteType::Proxy, _, None) => {
                return Err(Error::InvalidSite("proxy sites need a port".into()))
            }
            (site_type, _, _) => {
                return Err(Error::InvalidSite(format!(
                    "{} sites take only {}",
                    site_type,
                    match site_type {
                        SiteType::Php => "a PHP version",
                        SiteType::Proxy => "a proxy port",
                    }
                )))
            }
        };
        Ok(Site { domain, kind })
    }
}

/// Partial update. Only the field matching the record's kind is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteUpdate {
    #[serde(default)]
    pub php_version: Option<String>,
    #[serde(default)]
    pub proxy_port: Option<u16>,
}

impl Site {
    /// Apply `update` in place. Returns whether anything changed.
    pub fn apply(&mut self, update: &SiteUpdate) -> Result<bool> {
        match &mut self.kind {
            SiteKind::Php { php_version } => {
                if update.proxy_port.is_some() {
                    tracing::debug!(domain = %self.domain, "ignoring proxy port for php site");
                }
                match &update.php_version {
                    Some(raw) => {
                        let parsed = PhpVersion::parse(raw)?;
                        let changed = *php_version != parsed;
                        *php_version = parsed;
                        Ok(changed)
                    }
                    None => Ok(false),
                }
            }
            SiteKind::Proxy { proxy_port } => {
                if update.php_version.is_some() {
                    tracing::debug!(domain = %self.domain, "ignoring php version for proxy site");
                }
                match update.proxy_port {
                    Some(port) => {
                        let port = validate_port(port)?;
                        let changed = *proxy_port != port;
                        *proxy_port = port;
                        Ok(changed)
                    }
                    None => Ok(false),
                }
            }
        }
    }
}
