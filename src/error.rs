// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Certificate generation failed: {0}")]
    CertGen(#[from] rcgen::Error),

    #[error("Invalid domain '{domain}': {reason}")]
    InvalidDomain { domain: String, reason: String },

    #[error("Invalid PHP version '{0}': expected MAJOR.MINOR, e.g. 8.2")]
    InvalidPhpVersion(String),

    #[error("Invalid site definition: {0}")]
    InvalidSite(String),

    #[error("Invalid validity period: {0}")]
    InvalidDays(String),

    #[error("Site '{0}' already exists. Use 'site-manager update' to change it.")]
    SiteExists(String),

    #[error("Site '{0}' not found")]
    SiteNotFound(String),

    #[error("Invalid path (non-UTF8): {0}")]
    InvalidPath(PathBuf),

    #[error("Trust store operation failed: {0}")]
    TrustStore(String),

    #[error("Sudo authentication failed or was cancelled.\nSite provisioning requires elevated privileges.")]
    SudoFailed,

    #[error("Command '{command}' not found.\n{hint}")]
    CommandNotFound { command: String, hint: String },

    #[error("Command failed: {command}\n{stderr}")]
    Command { command: String, stderr: String },

    #[error("Step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Certificate reissue failed for: {}", .failed.join(", "))]
    Reissue { failed: Vec<String> },

    #[error("Missing required dependencies: {}. Run 'site-manager deps install'.", .missing.join(", "))]
    MissingDependencies { missing: Vec<String> },

    #[error("Site registry error ({path}): {reason}")]
    Registry { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid extension descriptor: {0}")]
    ExtParse(String),

    #[error("Failed to parse certificate: {0}")]
    CertParse(String),

    #[error("Certificate for '{domain}' was not issued by the current CA: {reason}")]
    CertVerify { domain: String, reason: String },

    #[error("Certificate for '{0}' not found. Run 'site-manager cert regenerate {0}'.")]
    CertificateNotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;
