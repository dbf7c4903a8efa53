// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

use crate::config::TrustConfig;
use crate::error::{Error, Result};
use crate::fs::path_to_str;
use crate::pipeline::Pipeline;
use crate::privileged::{as_invoking_user, invoking_user, run_argv, CommandSpec, Step};
use crate::trust::{same_pem, TrustStore};
use std::path::{Path, PathBuf};

pub const ANCHOR_FILE_NAME: &str = "SiteManagerCA.crt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinuxDistro {
    Debian, // Ubuntu, Mint, Pop!_OS, etc.
    Fedora, // RHEL, CentOS, Rocky, Alma
    Arch,   // Manjaro, EndeavourOS
    Unknown,
}

impl LinuxDistro {
    fn anchor_dir(&self) -> Option<&'static Path> {
        match self {
            LinuxDistro::Debian => Some(Path::new("/usr/local/share/ca-certificates")),
            LinuxDistro::Fedora => Some(Path::new("/etc/pki/ca-trust/source/anchors")),
            LinuxDistro::Arch => Some(Path::new("/etc/ca-certificates/trust-source/anchors")),
            LinuxDistro::Unknown => None,
        }
    }

    fn update_command(&self) -> Option<&'static [&'static str]> {
        match self {
            LinuxDistro::Debian => Some(&["update-ca-certificates"]),
            LinuxDistro::Fedora => Some(&["update-ca-trust", "extract"]),
            LinuxDistro::Arch => Some(&["trust", "extract-compat"]),
            LinuxDistro::Unknown => None,
        }
    }

    /// Rebuild after an anchor was deleted. Debian keeps stale links without `--fresh`.
    fn refresh_command(&self) -> Option<&'static [&'static str]> {
        match self {
            LinuxDistro::Debian => Some(&["update-ca-certificates", "--fresh"]),
            other => other.update_command(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            LinuxDistro::Debian => "Debian/Ubuntu ca-certificates",
            LinuxDistro::Fedora => "Fedora/RHEL ca-trust",
            LinuxDistro::Arch => "Arch trust",
            LinuxDistro::Unknown => "Linux (unknown)",
        }
    }
}

fn detect_distro() -> LinuxDistro {
    if let Ok(content) = std::fs::read_to_string("/etc/os-release") {
        let content = content.to_lowercase();

        if content.contains("debian")
            || content.contains("ubuntu")
            || content.contains("mint")
            || content.contains("pop!_os")
        {
            return LinuxDistro::Debian;
        }

        if content.contains("fedora")
            || content.contains("rhel")
            || content.contains("centos")
            || content.contains("rocky")
            || content.contains("alma")
        {
            return LinuxDistro::Fedora;
        }

        if content.contains("arch") || content.contains("manjaro") || content.contains("endeavour")
        {
            return LinuxDistro::Arch;
        }
    }

    // Fallback: check for update commands
    if Path::new("/usr/sbin/update-ca-certificates").exists() {
        return LinuxDistro::Debian;
    }
    if Path::new("/usr/bin/update-ca-trust").exists() {
        return LinuxDistro::Fedora;
    }
    if Path::new("/usr/bin/trust").exists() {
        return LinuxDistro::Arch;
    }

    LinuxDistro::Unknown
}

fn to_owned_argv(argv: &[&str]) -> Vec<String> {
    argv.iter().map(|s| s.to_string()).collect()
}

fn command_step(argv: &[String]) -> Option<Step> {
    let (program, args) = argv.split_first()?;
    Some(Step::Run(CommandSpec::elevated(program, args.iter().cloned())))
}

/// The distro's CA anchor directory plus its rebuild command.
#[derive(Debug, Clone)]
pub struct SystemTrustStore {
    label: &'static str,
    anchor: Option<PathBuf>,
    update: Option<Vec<String>>,
    refresh: Option<Vec<String>>,
}

impl SystemTrustStore {
    /// Distro defaults, with `[trust]` overrides applied on top.
    pub fn from_config(config: &TrustConfig) -> Self {
        let distro = if config.anchor_dir.is_some() && config.update_command.is_some() {
            LinuxDistro::Unknown
        } else {
            detect_distro()
        };
        Self::for_distro(distro, config)
    }

    fn for_distro(distro: LinuxDistro, config: &TrustConfig) -> Self {
        let anchor = config
            .anchor_dir
            .clone()
            .or_else(|| distro.anchor_dir().map(Path::to_path_buf))
            .map(|dir| dir.join(ANCHOR_FILE_NAME));

        let (update, refresh) = match &config.update_command {
            Some(cmd) => (Some(cmd.clone()), Some(cmd.clone())),
            None => (
                distro.update_command().map(to_owned_argv),
                distro.refresh_command().map(to_owned_argv),
            ),
        };

        let label = if config.anchor_dir.is_some() || config.update_command.is_some() {
            "system (configured)"
        } else {
            distro.label()
        };

        Self {
            label,
            anchor,
            update,
            refresh,
        }
    }

    pub fn anchor_path(&self) -> Option<&Path> {
        self.anchor.as_deref()
    }
}

impl TrustStore for SystemTrustStore {
    fn name(&self) -> String {
        self.label.to_string()
    }

    fn is_system(&self) -> bool {
        true
    }

    fn install_pipeline(&self, _ca_cert: &Path, cert_pem: &str) -> Result<Pipeline> {
        let unsupported = || {
            Error::TrustStore(
                "Unknown Linux distribution. Set trust.anchor_dir and trust.update_command in config.toml."
                    .into(),
            )
        };
        let anchor = self.anchor.as_ref().ok_or_else(unsupported)?;
        let update = self
            .update
            .as_deref()
            .and_then(command_step)
            .ok_or_else(unsupported)?;

        let mut pipeline = Pipeline::new("system trust install");
        pipeline
            .strict(Step::write(anchor, cert_pem, 0o644))
            .strict(update);
        Ok(pipeline)
    }

    fn removal_pipeline(&self) -> Result<Pipeline> {
        let mut pipeline = Pipeline::new("system trust removal");
        if let Some(anchor) = &self.anchor {
            pipeline.best_effort(Step::RemoveFile {
                path: anchor.clone(),
            });
        }
        if let Some(refresh) = self.refresh.as_deref().and_then(command_step) {
            pipeline.best_effort(refresh);
        }
        Ok(pipeline)
    }

    fn is_trusted(&self, cert_pem: &str) -> Option<bool> {
        let anchor = self.anchor.as_ref()?;
        match std::fs::read_to_string(anchor) {
            Ok(content) => Some(same_pem(&content, cert_pem)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Some(false),
            Err(_) => None,
        }
    }
}

// ============================================================================
// Browser NSS Support
// ============================================================================

/// One NSS certificate database, managed with `certutil` as the invoking user.
#[derive(Debug, Clone)]
pub struct NssDatabase {
    path: PathBuf,
    label: String,
    nickname: String,
}

impl NssDatabase {
    pub fn new(path: PathBuf, label: String, nickname: &str) -> Self {
        Self {
            path,
            label,
            nickname: nickname.to_string(),
        }
    }

    fn db_arg(&self) -> Result<String> {
        Ok(format!("sql:{}", path_to_str(&self.path)?))
    }

    fn delete_step(&self) -> Result<Step> {
        Ok(Step::Run(CommandSpec::user(
            "certutil",
            [
                "-d".to_string(),
                self.db_arg()?,
                "-D".to_string(),
                "-n".to_string(),
                self.nickname.clone(),
            ],
        )))
    }
}

impl TrustStore for NssDatabase {
    fn name(&self) -> String {
        self.label.clone()
    }

    fn install_pipeline(&self, ca_cert: &Path, _cert_pem: &str) -> Result<Pipeline> {
        let add = CommandSpec::user(
            "certutil",
            [
                "-d".to_string(),
                self.db_arg()?,
                "-A".to_string(),
                "-t".to_string(),
                "C,,".to_string(),
                "-n".to_string(),
                self.nickname.clone(),
                "-i".to_string(),
                path_to_str(ca_cert)?.to_string(),
            ],
        );

        let mut pipeline = Pipeline::new(format!("nss install ({})", self.label));
        // Replace any previous CA under the same nickname.
        pipeline.best_effort(self.delete_step()?).strict(Step::Run(add));
        Ok(pipeline)
    }

    fn removal_pipeline(&self) -> Result<Pipeline> {
        let mut pipeline = Pipeline::new(format!("nss removal ({})", self.label));
        pipeline.best_effort(self.delete_step()?);
        Ok(pipeline)
    }

    fn is_trusted(&self, cert_pem: &str) -> Option<bool> {
        let argv = vec![
            "certutil".to_string(),
            "-d".to_string(),
            self.db_arg().ok()?,
            "-L".to_string(),
            "-n".to_string(),
            self.nickname.clone(),
            "-a".to_string(),
        ];
        match run_argv(&as_invoking_user(argv, invoking_user().as_deref()), None) {
            Ok(output) => Some(same_pem(&String::from_utf8_lossy(&output.stdout), cert_pem)),
            Err(Error::Command { .. }) => Some(false),
            Err(_) => None,
        }
    }
}

fn has_nss_db(dir: &Path) -> bool {
    dir.join("cert9.db").exists() || dir.join("cert8.db").exists()
}

/// Find NSS databases for browsers (Chrome, Chromium, Firefox) under `home`.
///
/// Looks in:
/// - ~/.pki/nssdb/ (Chrome/Chromium)
/// - ~/.mozilla/firefox/ (native Firefox)
/// - ~/snap/firefox/common/.mozilla/firefox/ (Snap Firefox)
/// - ~/.var/app/org.mozilla.firefox/.mozilla/firefox/ (Flatpak Firefox)
pub fn find_nss_databases(home: &Path) -> Vec<(PathBuf, String)> {
    let mut databases = Vec::new();

    let chrome_nss = home.join(".pki").join("nssdb");
    if has_nss_db(&chrome_nss) {
        databases.push((chrome_nss, "Chrome/Chromium".to_string()));
    }

    let firefox_dirs = [
        ("Firefox", home.join(".mozilla").join("firefox")),
        (
            "Firefox snap",
            home.join("snap/firefox/common/.mozilla/firefox"),
        ),
        (
            "Firefox flatpak",
            home.join(".var/app/org.mozilla.firefox/.mozilla/firefox"),
        ),
    ];

    for (flavor, firefox_dir) in &firefox_dirs {
        let Ok(entries) = std::fs::read_dir(firefox_dir) else {
            continue;
        };

        let mut profiles: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_dir() && has_nss_db(path))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    // "xyz.default", "xyz.default-release", ...
                    .is_some_and(|name| name.contains(".default"))
            })
            .collect();
        profiles.sort();

        for profile in profiles {
            let name = profile
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            databases.push((profile, format!("{} ({})", flavor, name)));
        }
    }

    databases
}
