// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! nginx virtual hosts for registered sites.
//!
//! Server blocks are assembled from typed directives and rendered in one
//! place, so every value that reaches the file has already been validated.

use crate::config::Layout;
use crate::domain::{Domain, PhpVersion};
use crate::error::Result;
use crate::fs::path_to_str;
use crate::pipeline::Pipeline;
use crate::privileged::{CommandSpec, Step};
use crate::probe::HostCapabilities;
use crate::site::{Site, SiteKind};
use std::fmt;
use std::path::{Path, PathBuf};

const INDENT: &str = "    ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    name: &'static str,
    args: Vec<String>,
}

impl Directive {
    pub fn new<I, S>(name: &'static str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name,
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        f.write_str(";")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    matcher: String,
    directives: Vec<Directive>,
}

impl Location {
    pub fn new(matcher: impl Into<String>, directives: Vec<Directive>) -> Self {
        Self {
            matcher: matcher.into(),
            directives,
        }
    }
}

/// A `server { ... }` block: groups of directives separated by blank lines,
/// followed by locations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerBlock {
    groups: Vec<Vec<Directive>>,
    locations: Vec<Location>,
}

impl ServerBlock {
    pub fn group(mut self, directives: Vec<Directive>) -> Self {
        self.groups.push(directives);
        self
    }

    pub fn location(mut self, location: Location) -> Self {
        self.locations.push(location);
        self
    }

    pub fn directives(&self) -> impl Iterator<Item = &Directive> {
        self.groups
            .iter()
            .flatten()
            .chain(self.locations.iter().flat_map(|l| l.directives.iter()))
    }
}

impl fmt::Display for ServerBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "server {{")?;
        let mut first = true;
        for group in &self.groups {
            if !first {
                writeln!(f)?;
            }
            first = false;
            for directive in group {
                writeln!(f, "{}{}", INDENT, directive)?;
            }
        }
        for location in &self.locations {
            if !first {
                writeln!(f)?;
            }
            first = false;
            writeln!(f, "{}location {} {{", INDENT, location.matcher)?;
            for directive in &location.directives {
                writeln!(f, "{}{}{}", INDENT, INDENT, directive)?;
            }
            writeln!(f, "{}}}", INDENT)?;
        }
        writeln!(f, "}}")
    }
}

fn path_arg(path: &Path) -> Result<String> {
    path_to_str(path).map(str::to_string)
}

fn php_location(layout: &Layout, caps: &HostCapabilities, version: &PhpVersion) -> Result<Location> {
    let fastcgi_pass = Directive::new(
        "fastcgi_pass",
        [format!("unix:{}", path_arg(&layout.fpm_socket(version))?)],
    );

    let directives = if caps.fastcgi_snippet {
        vec![
            Directive::new("include", ["snippets/fastcgi-php.conf"]),
            fastcgi_pass,
        ]
    } else {
        vec![
            Directive::new("try_files", ["$uri", "=404"]),
            Directive::new("fastcgi_split_path_info", [r"^(.+\.php)(/.+)$"]),
            Directive::new("fastcgi_index", ["index.php"]),
            Directive::new(
                "fastcgi_param",
                ["SCRIPT_FILENAME", "$document_root$fastcgi_script_name"],
            ),
            Directive::new("include", ["fastcgi_params"]),
            fastcgi_pass,
        ]
    };
    Ok(Location::new(r"~ \.php$", directives))
}

fn proxy_location(port: u16) -> Location {
    Location::new(
        "/",
        vec![
            Directive::new("proxy_pass", [format!("http://127.0.0.1:{}", port)]),
            Directive::new("proxy_http_version", ["1.1"]),
            Directive::new("proxy_set_header", ["Upgrade", "$http_upgrade"]),
            Directive::new("proxy_set_header", ["Connection", "'upgrade'"]),
            Directive::new("proxy_set_header", ["Host", "$host"]),
            Directive::new("proxy_cache_bypass", ["$http_upgrade"]),
        ],
    )
}

/// Build the server block for `site`.
pub fn server_block(site: &Site, layout: &Layout, caps: &HostCapabilities) -> Result<ServerBlock> {
    let domain = &site.domain;
    let tls = vec![
        Directive::new("ssl_certificate", [path_arg(&layout.site_cert(domain))?]),
        Directive::new("ssl_certificate_key", [path_arg(&layout.site_key(domain))?]),
    ];

    let block = match &site.kind {
        SiteKind::Php { php_version } => ServerBlock::default()
            .group(vec![
                Directive::new("listen", ["80"]),
                Directive::new("listen", ["443", "ssl"]),
                Directive::new("server_name", [domain.as_str()]),
                Directive::new("root", [path_arg(&layout.site_public(domain))?]),
                Directive::new("index", ["index.php", "index.html"]),
            ])
            .group(tls)
            .location(Location::new(
                "/",
                vec![Directive::new(
                    "try_files",
                    ["$uri", "$uri/", "/index.php?$query_string"],
                )],
            ))
            .location(php_location(layout, caps, php_version)?),
        SiteKind::Proxy { proxy_port } => ServerBlock::default()
            .group(vec![
                Directive::new("listen", ["80"]),
                Directive::new("listen", ["443", "ssl"]),
                Directive::new("server_name", [domain.as_str()]),
            ])
            .group(tls)
            .location(proxy_location(*proxy_port)),
    };
    Ok(block)
}

pub fn render(site: &Site, layout: &Layout, caps: &HostCapabilities) -> Result<String> {
    Ok(server_block(site, layout, caps)?.to_string())
}

/// Where a site's config lives, and the enabling symlink if the layout uses one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VhostPaths {
    pub config: PathBuf,
    pub enabled_link: Option<PathBuf>,
}

pub fn vhost_paths(layout: &Layout, caps: &HostCapabilities, domain: &Domain) -> VhostPaths {
    if caps.sites_available {
        VhostPaths {
            config: layout.nginx_dir.join("sites-available").join(domain.as_str()),
            enabled_link: Some(layout.nginx_dir.join("sites-enabled").join(domain.as_str())),
        }
    } else {
        VhostPaths {
            config: layout.nginx_dir.join("conf.d").join(format!("{}.conf", domain)),
            enabled_link: None,
        }
    }
}

pub fn test_step() -> Step {
    Step::Run(CommandSpec::elevated("nginx", ["-t"]))
}

pub fn reload_step() -> Step {
    Step::Run(CommandSpec::elevated("systemctl", ["reload", "nginx"]))
}

/// Validate then reload. Reload never runs if validation fails.
pub fn reload_pipeline() -> Pipeline {
    let mut pipeline = Pipeline::new("nginx reload");
    pipeline.strict(test_step()).strict(reload_step());
    pipeline
}

/// Write the config, enable it, validate and reload. All strict.
pub fn activation_pipeline(site: &Site, layout: &Layout, caps: &HostCapabilities) -> Result<Pipeline> {
    let paths = vhost_paths(layout, caps, &site.domain);
    let mut pipeline = Pipeline::new(format!("activate {}", site.domain));

    pipeline.strict(Step::write(
        &paths.config,
        render(site, layout, caps)?,
        0o644,
    ));
    if let Some(link) = paths.enabled_link {
        pipeline.strict(Step::Symlink {
            target: paths.config.clone(),
            link,
        });
    }
    pipeline.append(reload_pipeline());
    Ok(pipeline)
}

/// Steps removing a site's config and its symlink.
pub fn removal_steps(layout: &Layout, caps: &HostCapabilities, domain: &Domain) -> Vec<Step> {
    let paths = vhost_paths(layout, caps, domain);
    let mut steps = Vec::new();
    if let Some(link) = paths.enabled_link {
        steps.push(Step::RemoveFile { path: link });
    }
    steps.push(Step::RemoveFile { path: paths.config });
    steps
}
