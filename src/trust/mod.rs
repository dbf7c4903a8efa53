// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Places the root CA is installed into: the system store and browser NSS databases.

mod linux;

pub use linux::{find_nss_databases, NssDatabase, SystemTrustStore, ANCHOR_FILE_NAME};

use crate::config::{is_valid_user_name, TrustConfig};
use crate::error::Result;
use crate::pipeline::Pipeline;
use std::path::{Path, PathBuf};

/// One trust target. Implementations only describe steps; the caller's
/// executor carries them out.
pub trait TrustStore {
    fn name(&self) -> String;

    /// The operating system store. Its failure is fatal for CA bootstrap.
    fn is_system(&self) -> bool {
        false
    }

    fn install_pipeline(&self, ca_cert: &Path, cert_pem: &str) -> Result<Pipeline>;

    fn removal_pipeline(&self) -> Result<Pipeline>;

    /// `None` when the state cannot be determined.
    fn is_trusted(&self, cert_pem: &str) -> Option<bool>;
}

/// System store first, then every NSS database under `home`.
pub fn discover_targets(config: &TrustConfig, home: Option<&Path>) -> Vec<Box<dyn TrustStore>> {
    let mut targets: Vec<Box<dyn TrustStore>> = vec![Box::new(SystemTrustStore::from_config(config))];

    match home {
        Some(home) => {
            for (path, label) in find_nss_databases(home) {
                targets.push(Box::new(NssDatabase::new(path, label, &config.nss_nickname)));
            }
        }
        None => tracing::debug!("no home directory; skipping browser trust stores"),
    }

    targets
}

/// Home of the user who invoked `sudo`, if we are running under it.
pub fn sudo_user_home() -> Option<PathBuf> {
    let user = std::env::var("SUDO_USER").ok()?;
    if !is_valid_user_name(&user) {
        return None;
    }
    let home = if user == "root" {
        PathBuf::from("/root")
    } else {
        PathBuf::from("/home").join(&user)
    };
    home.is_dir().then_some(home)
}

/// The real user's home directory, even when running with sudo.
pub fn real_user_home() -> Option<PathBuf> {
    sudo_user_home().or_else(|| {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .filter(|home| home.is_absolute() && home.is_dir())
    })
}

/// Normalize PEM content for comparison (remove whitespace variations)
fn same_pem(a: &str, b: &str) -> bool {
    let normalize = |s: &str| {
        s.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    };
    normalize(a) == normalize(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_pem_ignores_whitespace() {
        assert!(same_pem("-----A-----\nabc\n", "-----A-----\r\nabc\n\n"));
        assert!(!same_pem("-----A-----\nabc\n", "-----A-----\nabd\n"));
    }

    #[test]
    fn test_discover_system_target_first() {
        let home = tempfile::tempdir().unwrap();
        let targets = discover_targets(&TrustConfig::default(), Some(home.path()));
        assert_eq!(targets.len(), 1);
        assert!(targets[0].is_system());
    }

    #[test]
    fn test_discover_includes_nss_databases() {
        let home = tempfile::tempdir().unwrap();
        let nssdb = home.path().join(".pki").join("nssdb");
        std::fs::create_dir_all(&nssdb).unwrap();
        std::fs::write(nssdb.join("cert9.db"), "").unwrap();

        let targets = discover_targets(&TrustConfig::default(), Some(home.path()));
        assert_eq!(targets.len(), 2);
        assert!(!targets[1].is_system());
        assert_eq!(targets[1].name(), "Chrome/Chromium");
    }
}
