// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Validated site names and PHP versions.
//!
//! Every filesystem path and command argument built for a site goes through
//! these types, so nothing downstream has to quote or escape.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

static PHP_VERSION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,3})\.(\d{1,3})$").expect("invalid php version regex"));

/// Maximum DNS name length per RFC 1035
const MAX_DNS_NAME_LENGTH: usize = 253;

const MAX_LABEL_LENGTH: usize = 63;

/// TLDs that never resolve publicly. Anything else still works but gets a warning,
/// because the hosts entry shadows the real site.
pub const DEV_TLDS: &[&str] = &[
    ".test",
    ".example",
    ".invalid",
    ".localhost", // RFC 2606
    ".local",     // mDNS
    ".internal",
    ".lan",
    ".home",
    ".corp",
    ".intranet",
    ".private",
    ".devlocal",
];

/// A lowercase DNS hostname suitable for paths, certificates and nginx `server_name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Domain(String);

impl Domain {
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidDomain {
            domain: input.to_string(),
            reason: reason.to_string(),
        };

        let domain = input.trim().to_ascii_lowercase();

        if domain.is_empty() {
            return Err(invalid("domain cannot be empty"));
        }
        if domain.len() > MAX_DNS_NAME_LENGTH {
            return Err(invalid(&format!(
                "DNS name exceeds maximum length of {} characters",
                MAX_DNS_NAME_LENGTH
            )));
        }
        if domain.contains('*') {
            return Err(invalid(
                "wildcards are added automatically; register the bare domain",
            ));
        }
        if domain.parse::<std::net::IpAddr>().is_ok() {
            return Err(invalid("IP addresses cannot be registered as sites"));
        }

        for label in domain.split('.') {
            if label.is_empty() {
                return Err(invalid("empty label (leading, trailing or double dot)"));
            }
            if label.len() > MAX_LABEL_LENGTH {
                return Err(invalid("label exceeds 63 characters"));
            }
            if label.starts_with('-') || label.ends_with('-') {
                return Err(invalid("labels cannot start or end with a hyphen"));
            }
            if let Some(c) = label
                .chars()
                .find(|c| !c.is_ascii_alphanumeric() && *c != '-')
            {
                return Err(invalid(&format!("invalid character: '{}'", c)));
            }
        }

        // All-numeric final label would read as an IPv4 fragment
        if domain
            .rsplit('.')
            .next()
            .is_some_and(|tld| tld.chars().all(|c| c.is_ascii_digit()))
        {
            return Err(invalid("top-level label cannot be numeric"));
        }

        Ok(Self(domain))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `*.<domain>`, the second SAN entry on every leaf.
    pub fn wildcard(&self) -> String {
        format!("*.{}", self.0)
    }

    pub fn is_dev_tld(&self) -> bool {
        self.0 == "localhost" || DEV_TLDS.iter().any(|tld| self.0.ends_with(tld))
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Domain {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Domain> for String {
    fn from(value: Domain) -> Self {
        value.0
    }
}

/// A PHP-FPM version in `MAJOR.MINOR` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhpVersion {
    major: u16,
    minor: u16,
}

impl PhpVersion {
    pub fn parse(input: &str) -> Result<Self> {
        let caps = PHP_VERSION_REGEX
            .captures(input.trim())
            .ok_or_else(|| Error::InvalidPhpVersion(input.to_string()))?;
        let major = caps[1]
            .parse()
            .map_err(|_| Error::InvalidPhpVersion(input.to_string()))?;
        let minor = caps[2]
            .parse()
            .map_err(|_| Error::InvalidPhpVersion(input.to_string()))?;
        Ok(Self { major, minor })
    }

    /// Socket file name used by the Debian php-fpm packages.
    pub fn fpm_socket_name(&self) -> String {
        format!("php{}-fpm.sock", self)
    }
}

impl fmt::Display for PhpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl Ord for PhpVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor).cmp(&(other.major, other.minor))
    }
}

impl PartialOrd for PhpVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl TryFrom<String> for PhpVersion {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PhpVersion> for String {
    fn from(value: PhpVersion) -> Self {
        value.to_string()
    }
}
