// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Parse and verify X.509 certificates without shelling out to openssl.

use crate::error::{Error, Result};
use x509_parser::prelude::*;

#[derive(Debug, Clone)]
pub struct CertInfo {
    pub not_after_timestamp: i64,
    pub not_before_timestamp: i64,
    pub common_name: Option<String>,
    pub organization: Option<String>,
    pub issuer_common_name: Option<String>,
    pub subject_alt_names: Vec<String>,
    pub is_ca: bool,
}

impl CertInfo {
    pub fn expiry_string(&self) -> String {
        match ::time::OffsetDateTime::from_unix_timestamp(self.not_after_timestamp) {
            Ok(dt) => format!("{}-{:02}-{:02}", dt.year(), dt.month() as u8, dt.day()),
            Err(_) => "Invalid date".to_string(),
        }
    }

    pub fn days_remaining(&self) -> i64 {
        let now = ::time::OffsetDateTime::now_utc();
        match ::time::OffsetDateTime::from_unix_timestamp(self.not_after_timestamp) {
            Ok(expiry) => (expiry - now).whole_days(),
            Err(_) => -1, // Treat invalid timestamps as expired
        }
    }

    pub fn is_expired(&self) -> bool {
        self.days_remaining() < 0
    }
}

fn decode_pem(pem_str: &str) -> Result<::pem::Pem> {
    let pem = ::pem::parse(pem_str)
        .map_err(|e| Error::CertParse(format!("Failed to parse PEM: {}", e)))?;

    if pem.tag() != "CERTIFICATE" {
        return Err(Error::CertParse(format!(
            "Expected CERTIFICATE, got {}",
            pem.tag()
        )));
    }
    Ok(pem)
}

fn decode_der(der: &[u8]) -> Result<X509Certificate<'_>> {
    X509Certificate::from_der(der)
        .map(|(_, cert)| cert)
        .map_err(|e| Error::CertParse(format!("Invalid X.509: {}", e)))
}

fn first_attr<'a, 'b: 'a>(
    mut values: impl Iterator<Item = &'a AttributeTypeAndValue<'b>>,
) -> Option<String> {
    values
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(String::from)
}

pub fn parse_cert_pem(pem_str: &str) -> Result<CertInfo> {
    let pem = decode_pem(pem_str)?;
    let cert = decode_der(pem.contents())?;

    let mut subject_alt_names = Vec::new();
    let mut is_ca = false;

    for ext in cert.extensions() {
        match ext.parsed_extension() {
            ParsedExtension::SubjectAlternativeName(san) => {
                for name in &san.general_names {
                    match name {
                        GeneralName::DNSName(dns) => subject_alt_names.push(dns.to_string()),
                        GeneralName::IPAddress(ip_bytes) if ip_bytes.len() == 4 => {
                            let ip = std::net::Ipv4Addr::new(
                                ip_bytes[0],
                                ip_bytes[1],
                                ip_bytes[2],
                                ip_bytes[3],
                            );
                            subject_alt_names.push(ip.to_string());
                        }
                        GeneralName::IPAddress(ip_bytes) if ip_bytes.len() == 16 => {
                            if let Ok(bytes) = <[u8; 16]>::try_from(*ip_bytes) {
                                subject_alt_names.push(std::net::Ipv6Addr::from(bytes).to_string());
                            }
                        }
                        _ => {}
                    }
                }
            }
            ParsedExtension::BasicConstraints(bc) => {
                is_ca = bc.ca;
            }
            _ => {}
        }
    }

    Ok(CertInfo {
        not_after_timestamp: cert.validity().not_after.timestamp(),
        not_before_timestamp: cert.validity().not_before.timestamp(),
        common_name: first_attr(cert.subject().iter_common_name()),
        organization: first_attr(cert.subject().iter_organization()),
        issuer_common_name: first_attr(cert.issuer().iter_common_name()),
        subject_alt_names,
        is_ca,
    })
}

/// Check that `leaf_pem` names `ca_pem` as issuer and carries a valid signature from its key.
pub fn verify_issued_by(leaf_pem: &str, ca_pem: &str) -> Result<()> {
    let leaf_block = decode_pem(leaf_pem)?;
    let ca_block = decode_pem(ca_pem)?;
    let leaf = decode_der(leaf_block.contents())?;
    let ca = decode_der(ca_block.contents())?;

    let mismatch = |reason: String| Error::CertVerify {
        domain: first_attr(leaf.subject().iter_common_name())
            .unwrap_or_else(|| "<unknown>".to_string()),
        reason,
    };

    if leaf.issuer().as_raw() != ca.subject().as_raw() {
        return Err(mismatch(format!(
            "issuer is '{}', expected '{}'",
            leaf.issuer(),
            ca.subject()
        )));
    }

    leaf.verify_signature(Some(ca.public_key()))
        .map_err(|e| mismatch(format!("signature check failed: {}", e)))
}
