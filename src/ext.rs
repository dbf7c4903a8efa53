// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! X.509 v3 extension descriptor for site certificates.
//!
//! The descriptor is kept in OpenSSL `-extfile` syntax so a staged copy can be
//! inspected or fed to `openssl x509 -req` by hand. The signer reads it back
//! with [`LeafExtensions::parse`].

use crate::domain::Domain;
use crate::error::{Error, Result};
use rcgen::{CertificateParams, IsCa, KeyUsagePurpose, SanType};
use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr};

const KEY_USAGE_NAMES: &[(&str, KeyUsagePurpose)] = &[
    ("digitalSignature", KeyUsagePurpose::DigitalSignature),
    ("nonRepudiation", KeyUsagePurpose::ContentCommitment),
    ("keyEncipherment", KeyUsagePurpose::KeyEncipherment),
    ("dataEncipherment", KeyUsagePurpose::DataEncipherment),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AltName {
    Dns(String),
    Ip(IpAddr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafExtensions {
    pub authority_key_identifier: bool,
    pub key_usages: Vec<&'static str>,
    pub alt_names: Vec<AltName>,
}

impl LeafExtensions {
    /// SAN set `{domain, *.domain, 127.0.0.1}` with the usual server key usages.
    pub fn for_domain(domain: &Domain) -> Self {
        Self {
            authority_key_identifier: true,
            key_usages: KEY_USAGE_NAMES.iter().map(|(name, _)| *name).collect(),
            alt_names: vec![
                AltName::Dns(domain.to_string()),
                AltName::Dns(domain.wildcard()),
                AltName::Ip(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            ],
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.authority_key_identifier {
            out.push_str("authorityKeyIdentifier=keyid,issuer\n");
        }
        out.push_str("basicConstraints=CA:FALSE\n");
        let _ = writeln!(out, "keyUsage = {}", self.key_usages.join(", "));
        out.push_str("subjectAltName = @alt_names\n\n[alt_names]\n");

        let (mut dns, mut ip) = (0, 0);
        for name in &self.alt_names {
            match name {
                AltName::Dns(value) => {
                    dns += 1;
                    let _ = writeln!(out, "DNS.{} = {}", dns, value);
                }
                AltName::Ip(value) => {
                    ip += 1;
                    let _ = writeln!(out, "IP.{} = {}", ip, value);
                }
            }
        }
        out
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut ext = Self {
            authority_key_identifier: false,
            key_usages: Vec::new(),
            alt_names: Vec::new(),
        };
        let mut saw_no_ca = false;
        let mut in_alt_names = false;

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') {
                in_alt_names = line == "[alt_names]";
                if !in_alt_names {
                    return Err(Error::ExtParse(format!("unexpected section {}", line)));
                }
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .map(|(k, v)| (k.trim(), v.trim()))
                .ok_or_else(|| Error::ExtParse(format!("expected key = value: {}", line)))?;

            if in_alt_names {
                let kind = key.split('.').next().unwrap_or(key);
                match kind {
                    "DNS" => ext.alt_names.push(AltName::Dns(value.to_string())),
                    "IP" => ext.alt_names.push(AltName::Ip(value.parse().map_err(|_| {
                        Error::ExtParse(format!("invalid IP address: {}", value))
                    })?)),
                    _ => return Err(Error::ExtParse(format!("unsupported SAN type: {}", key))),
                }
                continue;
            }

            match key {
                "authorityKeyIdentifier" => ext.authority_key_identifier = true,
                "basicConstraints" => {
                    if value != "CA:FALSE" {
                        return Err(Error::ExtParse(format!(
                            "leaf certificates must be CA:FALSE, got {}",
                            value
                        )));
                    }
                    saw_no_ca = true;
                }
                "keyUsage" => {
                    for usage in value.split(',').map(str::trim) {
                        let known = KEY_USAGE_NAMES
                            .iter()
                            .find(|(name, _)| *name == usage)
                            .ok_or_else(|| {
                                Error::ExtParse(format!("unsupported key usage: {}", usage))
                            })?;
                        ext.key_usages.push(known.0);
                    }
                }
                "subjectAltName" => {
                    if value != "@alt_names" {
                        return Err(Error::ExtParse(format!(
                            "subjectAltName must reference @alt_names, got {}",
                            value
                        )));
                    }
                }
                other => return Err(Error::ExtParse(format!("unsupported key: {}", other))),
            }
        }

        if !saw_no_ca {
            return Err(Error::ExtParse("missing basicConstraints=CA:FALSE".into()));
        }
        if ext.alt_names.is_empty() {
            return Err(Error::ExtParse("no subject alternative names".into()));
        }
        Ok(ext)
    }

    /// Set basic constraints, key usages, AKI and SANs on certificate parameters.
    pub fn apply(&self, params: &mut CertificateParams) -> Result<()> {
        params.is_ca = IsCa::ExplicitNoCa;
        params.use_authority_key_identifier_extension = self.authority_key_identifier;
        params.key_usages = self
            .key_usages
            .iter()
            .filter_map(|name| {
                KEY_USAGE_NAMES
                    .iter()
                    .find(|(known, _)| known == name)
                    .map(|(_, usage)| usage.clone())
            })
            .collect();

        params.subject_alt_names = self
            .alt_names
            .iter()
            .map(|name| match name {
                AltName::Dns(dns) => dns
                    .clone()
                    .try_into()
                    .map(SanType::DnsName)
                    .map_err(|_| Error::InvalidDomain {
                        domain: dns.clone(),
                        reason: "Invalid DNS name".into(),
                    }),
                AltName::Ip(ip) => Ok(SanType::IpAddress(*ip)),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(())
    }
}
