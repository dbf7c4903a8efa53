// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Marker-delimited loopback entries in the hosts file.
//!
//! ```text
//! #start site-manager-app.local
//! 127.0.0.1 app.local
//! #end site-manager-app.local
//! ```

use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::privileged::Step;
use std::path::Path;

pub const LOOPBACK: &str = "127.0.0.1";

pub fn start_marker(domain: &Domain) -> String {
    format!("#start site-manager-{}", domain)
}

pub fn end_marker(domain: &Domain) -> String {
    format!("#end site-manager-{}", domain)
}

fn mapping_line(domain: &Domain) -> String {
    format!("{} {}", LOOPBACK, domain)
}

/// The full block, newline-terminated.
pub fn block(domain: &Domain) -> String {
    format!(
        "{}\n{}\n{}\n",
        start_marker(domain),
        mapping_line(domain),
        end_marker(domain)
    )
}

fn is_line(line: &str, expected: &str) -> bool {
    line.trim_end_matches(['\n', '\r']).trim() == expected
}

/// Remove every block for `domain`. Other text is left byte-for-byte intact.
///
/// A start marker with no matching end marker takes only itself and an
/// immediately following mapping line for `domain` with it.
pub fn strip_block(text: &str, domain: &Domain) -> String {
    let start = start_marker(domain);
    let end = end_marker(domain);
    let mapping = mapping_line(domain);

    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < lines.len() {
        if !is_line(lines[i], &start) {
            out.push_str(lines[i]);
            i += 1;
            continue;
        }

        match lines[i + 1..].iter().position(|l| is_line(l, &end)) {
            Some(offset) => i += offset + 2,
            None => {
                i += 1;
                if lines
                    .get(i)
                    .is_some_and(|l| l.split_whitespace().collect::<Vec<_>>().join(" ") == mapping)
                {
                    i += 1;
                }
            }
        }
    }

    out
}

pub fn has_block(text: &str, domain: &Domain) -> bool {
    let start = start_marker(domain);
    text.lines().any(|l| is_line(l, &start))
}

/// Replace any existing block for `domain` with a fresh one at the end.
pub fn upsert_block(text: &str, domain: &Domain) -> String {
    let mut out = strip_block(text, domain);
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&block(domain));
    out
}

/// The hosts file at a given path.
pub struct HostsFile<'a> {
    path: &'a Path,
}

impl<'a> HostsFile<'a> {
    pub fn new(path: &'a Path) -> Self {
        Self { path }
    }

    /// Current contents; a missing file reads as empty.
    pub fn read(&self) -> Result<String> {
        match std::fs::read_to_string(self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(Error::ReadFile {
                path: self.path.to_path_buf(),
                source: e,
            }),
        }
    }

    fn write_step(&self, text: String) -> Step {
        Step::write(self.path, text, 0o644)
    }

    pub fn upsert_step(&self, domain: &Domain) -> Result<Step> {
        let text = self.read()?;
        Ok(self.write_step(upsert_block(&text, domain)))
    }

    /// `None` when there is no block to remove.
    pub fn remove_step(&self, domain: &Domain) -> Result<Option<Step>> {
        let text = self.read()?;
        if !has_block(&text, domain) {
            tracing::debug!(domain = %domain, "no hosts block to remove");
            return Ok(None);
        }
        Ok(Some(self.write_step(strip_block(&text, domain))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "127.0.0.1 localhost\n::1 localhost\n";

    fn d(name: &str) -> Domain {
        Domain::parse(name).unwrap()
    }

    #[test]
    fn test_upsert_appends_block() {
        let text = upsert_block(BASE, &d("a.test"));
        assert_eq!(
            text,
            "127.0.0.1 localhost\n::1 localhost\n\
             #start site-manager-a.test\n127.0.0.1 a.test\n#end site-manager-a.test\n"
        );
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let once = upsert_block(BASE, &d("a.test"));
        let twice = upsert_block(&once, &d("a.test"));
        assert_eq!(once, twice);
        assert_eq!(twice.matches("#start site-manager-a.test").count(), 1);
    }

    #[test]
    fn test_upsert_without_trailing_newline() {
        let text = upsert_block("127.0.0.1 localhost", &d("a.test"));
        assert!(text.starts_with("127.0.0.1 localhost\n#start site-manager-a.test\n"));
    }

    #[test]
    fn test_strip_leaves_other_blocks() {
        let text = upsert_block(&upsert_block(BASE, &d("a.test")), &d("b.test"));
        let stripped = strip_block(&text, &d("a.test"));
        assert!(!has_block(&stripped, &d("a.test")));
        assert!(has_block(&stripped, &d("b.test")));
        assert!(stripped.starts_with(BASE));
    }

    #[test]
    fn test_markers_match_whole_lines_only() {
        // a.test must not touch the block for a.test.local
        let text = upsert_block(BASE, &d("a.test.local"));
        assert_eq!(strip_block(&text, &d("a.test")), text);
        assert!(!has_block(&text, &d("a.test")));
    }

    #[test]
    fn test_unterminated_block() {
        let text = format!(
            "{}#start site-manager-a.test\n127.0.0.1 a.test\n10.0.0.1 other\n",
            BASE
        );
        assert_eq!(
            strip_block(&text, &d("a.test")),
            format!("{}10.0.0.1 other\n", BASE)
        );
    }

    #[test]
    fn test_strip_without_block_is_identity() {
        assert_eq!(strip_block(BASE, &d("a.test")), BASE);
        assert_eq!(strip_block("", &d("a.test")), "");
    }

    #[test]
    fn test_hosts_file_steps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        let hosts = HostsFile::new(&path);

        // missing file: upsert writes just the block
        match hosts.upsert_step(&d("a.test")).unwrap() {
            Step::WriteFile { contents, mode, .. } => {
                assert_eq!(contents, block(&d("a.test")).into_bytes());
                assert_eq!(mode, 0o644);
            }
            other => panic!("unexpected step {}", other),
        }

        std::fs::write(&path, BASE).unwrap();
        assert!(hosts.remove_step(&d("a.test")).unwrap().is_none());

        std::fs::write(&path, upsert_block(BASE, &d("a.test"))).unwrap();
        match hosts.remove_step(&d("a.test")).unwrap() {
            Some(Step::WriteFile { contents, .. }) => assert_eq!(contents, BASE.as_bytes()),
            _ => panic!("expected a write step"),
        }
    }
}
