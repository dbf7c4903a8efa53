// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use site_manager::config::TrustConfig;
use site_manager::{
    Config, Dependencies, DirectExecutor, Elevation, Error, Executor, Layout, Paths, PhpVersion,
    Probe, Result, SiteManager, Step,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Applies file steps inside the sandbox and records commands without running them.
#[derive(Clone, Default)]
pub struct SandboxExecutor {
    log: Arc<Mutex<Vec<String>>>,
    fail_on: Arc<Mutex<Option<String>>>,
}

impl SandboxExecutor {
    /// Every step seen so far, rendered as a command line.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    /// Fail any step whose rendering contains `needle`.
    pub fn fail_on(&self, needle: &str) {
        *self.fail_on.lock().unwrap() = Some(needle.to_string());
    }

    pub fn succeed(&self) {
        *self.fail_on.lock().unwrap() = None;
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.log().iter().any(|line| line.contains(needle))
    }
}

impl Executor for SandboxExecutor {
    fn execute(&self, step: &Step) -> Result<()> {
        let line = step.to_string();
        self.log.lock().unwrap().push(line.clone());

        if let Some(needle) = self.fail_on.lock().unwrap().as_deref() {
            if line.contains(needle) {
                return Err(Error::Command {
                    command: line,
                    stderr: "injected failure".into(),
                });
            }
        }

        match step {
            Step::Run(_) | Step::Chown { .. } => Ok(()),
            _ => DirectExecutor.execute(step),
        }
    }
}

#[derive(Clone)]
pub struct FakeProbe {
    pub deps: Dependencies,
    pub versions: Vec<PhpVersion>,
}

impl FakeProbe {
    pub fn complete() -> Self {
        Self {
            deps: Dependencies {
                nginx: true,
                php: true,
                openssl: true,
                certutil: true,
            },
            versions: vec![
                PhpVersion::parse("8.2").unwrap(),
                PhpVersion::parse("8.3").unwrap(),
            ],
        }
    }
}

impl Probe for FakeProbe {
    fn detect(&self) -> Dependencies {
        self.deps
    }

    fn php_versions(&self) -> Vec<PhpVersion> {
        self.versions.clone()
    }
}

/// A throwaway host: data dir, rooted layout with a Debian-style nginx tree,
/// a system anchor directory and an empty home for NSS discovery.
pub struct Sandbox {
    pub dir: TempDir,
    pub paths: Paths,
    pub config: Config,
    pub exec: SandboxExecutor,
    pub home: PathBuf,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("host");
        let layout = Layout::rooted_at(&root);

        std::fs::create_dir_all(layout.nginx_dir.join("sites-available")).unwrap();
        std::fs::create_dir_all(layout.nginx_dir.join("sites-enabled")).unwrap();

        let home = dir.path().join("home");
        std::fs::create_dir_all(&home).unwrap();

        let config = Config {
            elevation: Elevation::None,
            site_owner: Some("tester".into()),
            layout,
            trust: TrustConfig {
                anchor_dir: Some(root.join("usr/local/share/ca-certificates")),
                update_command: Some(vec!["update-ca-certificates".into()]),
                ..TrustConfig::default()
            },
            ..Config::default()
        };

        Self {
            paths: Paths::at(dir.path().join("data")),
            config,
            exec: SandboxExecutor::default(),
            home,
            dir,
        }
    }

    pub fn manager(&self) -> SiteManager {
        self.manager_with_probe(FakeProbe::complete())
    }

    pub fn manager_with_probe(&self, probe: FakeProbe) -> SiteManager {
        SiteManager::new(self.paths.clone(), self.config.clone())
            .with_executor(Box::new(self.exec.clone()))
            .with_probe(Box::new(probe))
            .with_trust_home(Some(self.home.clone()))
    }

    pub fn layout(&self) -> &Layout {
        &self.config.layout
    }

    pub fn hosts(&self) -> String {
        std::fs::read_to_string(&self.config.layout.hosts_file).unwrap_or_default()
    }

    pub fn anchor(&self) -> PathBuf {
        self.config
            .trust
            .anchor_dir
            .as_ref()
            .unwrap()
            .join(site_manager::trust::ANCHOR_FILE_NAME)
    }
}
