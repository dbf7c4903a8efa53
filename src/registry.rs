// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! The JSON document of registered sites.
//!
//! Every call re-reads the file; nothing is cached between operations.

use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::site::Site;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    sites: Vec<Site>,
}

pub struct Registry {
    path: PathBuf,
}

impl Registry {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Document> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Document::default()),
            Err(e) => {
                return Err(Error::ReadFile {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(Document::default());
        }
        serde_json::from_str(&content).map_err(|e| Error::Registry {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    fn save(&self, doc: &Document) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDir {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let mut json = serde_json::to_string_pretty(doc).map_err(|e| Error::Registry {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        json.push('\n');
        crate::fs::atomic_write(&self.path, json.as_bytes())
    }

    /// All records, in insertion order.
    pub fn list(&self) -> Result<Vec<Site>> {
        Ok(self.load()?.sites)
    }

    pub fn get(&self, domain: &Domain) -> Result<Option<Site>> {
        Ok(self
            .load()?
            .sites
            .into_iter()
            .find(|site| &site.domain == domain))
    }

    /// Add a new record. Fails if the domain is already registered.
    pub fn insert(&self, site: Site) -> Result<()> {
        let mut doc = self.load()?;
        if doc.sites.iter().any(|s| s.domain == site.domain) {
            return Err(Error::SiteExists(site.domain.to_string()));
        }
        doc.sites.push(site);
        self.save(&doc)
    }

    /// Replace an existing record, keeping its position.
    pub fn put(&self, site: Site) -> Result<()> {
        let mut doc = self.load()?;
        let slot = doc
            .sites
            .iter_mut()
            .find(|s| s.domain == site.domain)
            .ok_or_else(|| Error::SiteNotFound(site.domain.to_string()))?;
        *slot = site;
        self.save(&doc)
    }

    /// Drop a record, returning it if it was present.
    pub fn remove(&self, domain: &Domain) -> Result<Option<Site>> {
        let mut doc = self.load()?;
        let Some(index) = doc.sites.iter().position(|s| &s.domain == domain) else {
            return Ok(None);
        };
        let removed = doc.sites.remove(index);
        self.save(&doc)?;
        Ok(Some(removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::{SiteKind, SiteRequest};

    fn registry() -> (tempfile::TempDir, Registry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::open(dir.path().join("data").join("sites.json"));
        (dir, registry)
    }

    #[test]
    fn test_missing_file_is_empty() {
        let (_dir, registry) = registry();
        assert!(registry.list().unwrap().is_empty());
    }

    #[test]
    fn test_insert_preserves_order_and_rejects_duplicates() {
        let (_dir, registry) = registry();
        registry
            .insert(SiteRequest::php("b.test", "8.2").validate().unwrap())
            .unwrap();
        registry
            .insert(SiteRequest::proxy("a.test", 3000).validate().unwrap())
            .unwrap();

        let domains: Vec<String> = registry
            .list()
            .unwrap()
            .iter()
            .map(|s| s.domain.to_string())
            .collect();
        assert_eq!(domains, vec!["b.test", "a.test"]);

        let err = registry
            .insert(SiteRequest::proxy("b.test", 1).validate().unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::SiteExists(_)));
    }

    #[test]
    fn test_put_and_remove() {
        let (_dir, registry) = registry();
        let mut site = SiteRequest::proxy("a.test", 3000).validate().unwrap();
        registry.insert(site.clone()).unwrap();

        site.kind = SiteKind::Proxy { proxy_port: 4000 };
        registry.put(site.clone()).unwrap();
        assert_eq!(registry.get(&site.domain).unwrap(), Some(site.clone()));

        assert_eq!(registry.remove(&site.domain).unwrap(), Some(site.clone()));
        assert_eq!(registry.remove(&site.domain).unwrap(), None);
        assert!(matches!(registry.put(site), Err(Error::SiteNotFound(_))));
    }

    #[test]
    fn test_reads_external_edits() {
        let (_dir, registry) = registry();
        std::fs::create_dir_all(registry.path().parent().unwrap()).unwrap();
        std::fs::write(
            registry.path(),
            r#"{"sites":[{"domain":"app.local","type":"proxy","proxyPort":4000}]}"#,
        )
        .unwrap();

        let sites = registry.list().unwrap();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].kind, SiteKind::Proxy { proxy_port: 4000 });
    }

    #[test]
    fn test_corrupt_document() {
        let (_dir, registry) = registry();
        std::fs::create_dir_all(registry.path().parent().unwrap()).unwrap();
        std::fs::write(registry.path(), "{not json").unwrap();
        assert!(matches!(registry.list(), Err(Error::Registry { .. })));
    }
}
