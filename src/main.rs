// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use site_manager::{
    Config, Dashboard, Dependencies, Domain, DryRunExecutor, Error, Paths, Result, SiteKind,
    SiteManager, SiteRequest, SiteUpdate,
};
use std::io::{self, Write};
use tracing_subscriber::EnvFilter;

/// Display a confirmation prompt and return true if user confirms with 'y' or 'yes'
fn confirm_prompt(message: &str) -> bool {
    print!("{} [y/N] ", message);
    io::stdout().flush().ok();
    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        return false;
    }
    let input = input.trim().to_lowercase();
    input == "y" || input == "yes"
}

#[derive(Parser)]
#[command(name = "site-manager")]
#[command(about = "Trusted local HTTPS sites with nginx, PHP-FPM and a private CA")]
#[command(version)]
#[command(after_help = "\
EXAMPLES:
    site-manager create app.local --proxy 4000    # https://app.local -> 127.0.0.1:4000
    site-manager create shop.test --php 8.2       # PHP-FPM site in /var/www/shop.test
    site-manager update shop.test --php 8.3       # Switch PHP version
    site-manager status                           # Dependencies, sites, PHP versions
    site-manager --dry-run delete shop.test       # Show what delete would do")]
struct Cli {
    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Show detailed output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Print the privileged steps instead of running them
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check or install nginx, PHP, OpenSSL and certutil
    Deps {
        #[command(subcommand)]
        action: DepsAction,
    },

    /// List installed PHP versions
    PhpVersions,

    /// List registered sites
    List,

    /// Show dependencies, sites and PHP versions
    Status,

    /// Create a site: certificate, nginx config and hosts entry
    Create {
        /// Domain name (e.g., app.local)
        domain: String,

        /// Serve with PHP-FPM at this version (e.g., 8.2)
        #[arg(long, value_name = "VERSION", conflicts_with = "proxy", required_unless_present = "proxy")]
        php: Option<String>,

        /// Reverse-proxy to 127.0.0.1 on this port
        #[arg(long, value_name = "PORT")]
        proxy: Option<u16>,
    },

    /// Change a site's PHP version or proxy port
    Update {
        /// Domain name of a registered site
        domain: String,

        /// New PHP version (PHP sites only)
        #[arg(long, value_name = "VERSION", conflicts_with = "proxy", required_unless_present = "proxy")]
        php: Option<String>,

        /// New upstream port (proxy sites only)
        #[arg(long, value_name = "PORT")]
        proxy: Option<u16>,
    },

    /// Delete a site and everything provisioned for it
    Delete {
        /// Domain name
        domain: String,

        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Root CA management
    Ca {
        #[command(subcommand)]
        action: CaAction,
    },

    /// Site certificate management
    Cert {
        #[command(subcommand)]
        action: CertAction,
    },

    /// Show a site's installed certificate and verify it against the CA
    Inspect {
        /// Domain name
        domain: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum DepsAction {
    /// Report which required tools are installed
    Check,

    /// Install missing tools with apt-get
    Install,
}

#[derive(Subcommand)]
enum CaAction {
    /// Show CA expiry and trust state
    Status,

    /// Replace the CA and re-issue every site certificate
    Regenerate {
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum CertAction {
    /// Issue a fresh certificate for a site
    Regenerate {
        /// Domain name
        domain: String,
    },
}

/// Output helper that respects --quiet and --verbose flags.
#[derive(Clone, Copy)]
struct Output {
    quiet: bool,
    verbose: bool,
}

impl Output {
    fn new(quiet: bool, verbose: bool) -> Self {
        Self { quiet, verbose }
    }

    /// Print a standard message (suppressed with --quiet)
    fn print(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg);
        }
    }

    /// Print a verbose message (only shown with --verbose)
    fn verbose(&self, msg: &str) {
        if self.verbose {
            println!("{}", msg);
        }
    }
}

fn init_tracing(quiet: bool, verbose: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    // Reset SIGPIPE to default behavior (exit) instead of panic
    // This prevents "broken pipe" panics when output is piped to tools like grep/head
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);
    let out = Output::new(cli.quiet, cli.verbose);

    if let Commands::Completions { shell } = cli.command {
        return cmd_completions(shell);
    }

    let paths = Paths::new()?;
    let config = Config::load(&paths.config)?;
    out.verbose(&format!("Data directory: {}", paths.base.display()));

    let dry_run = cli.dry_run.then(DryRunExecutor::new);
    let mut manager = SiteManager::new(paths, config);
    if let Some(recorder) = &dry_run {
        manager = manager.with_executor(Box::new(recorder.clone()));
    }

    let result = match cli.command {
        Commands::Deps { action } => match action {
            DepsAction::Check => cmd_deps_check(&manager, out),
            DepsAction::Install => cmd_deps_install(&manager, out),
        },
        Commands::PhpVersions => cmd_php_versions(&manager),
        Commands::List => cmd_list(&manager, out),
        Commands::Status => cmd_status(&manager),
        Commands::Create { domain, php, proxy } => cmd_create(&manager, &domain, php, proxy, out),
        Commands::Update { domain, php, proxy } => cmd_update(&manager, &domain, php, proxy, out),
        Commands::Delete { domain, yes } => {
            cmd_delete(&manager, &domain, yes || dry_run.is_some(), out)
        }
        Commands::Ca { action } => match action {
            CaAction::Status => cmd_ca_status(&manager),
            CaAction::Regenerate { yes } => {
                cmd_ca_regenerate(&manager, yes || dry_run.is_some(), out)
            }
        },
        Commands::Cert { action } => match action {
            CertAction::Regenerate { domain } => cmd_cert_regenerate(&manager, &domain, out),
        },
        Commands::Inspect { domain } => cmd_inspect(&manager, &domain),
        Commands::Completions { .. } => Ok(()),
    };

    if let Some(recorder) = dry_run {
        println!("Dry run, nothing was changed. Planned steps:");
        let planned = recorder.planned();
        if planned.is_empty() {
            println!("    (none)");
        }
        for step in planned {
            println!("    {}", step);
        }
    }

    result
}

fn check_mark(ok: bool) -> &'static str {
    if ok {
        "[ok]"
    } else {
        "[missing]"
    }
}

fn print_dependencies(deps: &Dependencies) {
    println!("    {:<10} {}", "nginx", check_mark(deps.nginx));
    println!("    {:<10} {}", "php", check_mark(deps.php));
    println!("    {:<10} {}", "openssl", check_mark(deps.openssl));
    println!("    {:<10} {} (libnss3-tools)", "certutil", check_mark(deps.certutil));
}

fn cmd_deps_check(manager: &SiteManager, out: Output) -> Result<()> {
    let deps = manager.check_dependencies();
    if !out.quiet {
        println!("Dependencies:");
        print_dependencies(&deps);
    }

    if deps.all_present() {
        Ok(())
    } else {
        Err(Error::MissingDependencies {
            missing: deps.missing().into_iter().map(String::from).collect(),
        })
    }
}

fn cmd_deps_install(manager: &SiteManager, out: Output) -> Result<()> {
    out.print("Installing nginx, php-fpm, libnss3-tools and openssl (requires sudo)...");
    manager.install_dependencies()?;
    out.print("Dependencies installed.");
    Ok(())
}

fn cmd_php_versions(manager: &SiteManager) -> Result<()> {
    for version in manager.list_php_versions() {
        println!("{}", version);
    }
    Ok(())
}

fn cmd_list(manager: &SiteManager, out: Output) -> Result<()> {
    let sites = manager.list_sites()?;
    if sites.is_empty() {
        out.print("No sites registered. Create one with 'site-manager create'.");
        return Ok(());
    }
    for site in sites {
        println!("{:<30} {}", site.domain, site.kind);
    }
    Ok(())
}

fn cmd_status(manager: &SiteManager) -> Result<()> {
    println!("site-manager status");
    println!("===================");
    println!();

    match manager.dashboard()? {
        Dashboard::MissingDependencies(deps) => {
            println!("Dependencies:");
            print_dependencies(&deps);
            println!();
            println!("Missing: {}", deps.missing().join(", "));
            println!("Run 'site-manager deps install' to install them.");
        }
        Dashboard::Ready {
            sites,
            php_versions,
        } => {
            let versions: Vec<String> = php_versions.iter().map(ToString::to_string).collect();
            println!(
                "PHP versions: {}",
                if versions.is_empty() {
                    "(none found)".to_string()
                } else {
                    versions.join(", ")
                }
            );
            println!();
            println!("Sites:");
            if sites.is_empty() {
                println!("    (none)");
            }
            for site in sites {
                println!("    https://{:<30} {}", site.domain, site.kind);
            }
        }
    }
    Ok(())
}

fn cmd_create(
    manager: &SiteManager,
    domain: &str,
    php: Option<String>,
    proxy: Option<u16>,
    out: Output,
) -> Result<()> {
    let request = match (php, proxy) {
        (Some(version), None) => SiteRequest::php(domain, &version),
        (None, Some(port)) => SiteRequest::proxy(domain, port),
        _ => {
            return Err(Error::InvalidSite(
                "pass exactly one of --php or --proxy".into(),
            ))
        }
    };

    let site = manager.create(&request)?;
    out.print(&format!("Created https://{} ({})", site.domain, site.kind));
    if let SiteKind::Php { .. } = site.kind {
        out.print(&format!(
            "Document root: {}",
            manager.config().layout.site_public(&site.domain).display()
        ));
    }
    Ok(())
}

fn cmd_update(
    manager: &SiteManager,
    domain: &str,
    php: Option<String>,
    proxy: Option<u16>,
    out: Output,
) -> Result<()> {
    let domain = Domain::parse(domain)?;
    let site = manager.update(
        &domain,
        &SiteUpdate {
            php_version: php,
            proxy_port: proxy,
        },
    )?;
    out.print(&format!("Updated https://{} ({})", site.domain, site.kind));
    Ok(())
}

fn cmd_delete(manager: &SiteManager, domain: &str, yes: bool, out: Output) -> Result<()> {
    let domain = Domain::parse(domain)?;
    if !yes
        && !confirm_prompt(&format!(
            "Delete {} including its document root {}?",
            domain,
            manager.config().layout.site_root(&domain).display()
        ))
    {
        out.print("Cancelled.");
        return Ok(());
    }

    manager.delete(&domain)?;
    out.print(&format!("Deleted {}", domain));
    Ok(())
}

fn cmd_ca_status(manager: &SiteManager) -> Result<()> {
    let Some(status) = manager.ca_status()? else {
        println!("CA: not generated yet (created with the first site)");
        return Ok(());
    };

    println!("CA: {}", manager.paths().ca_cert.display());
    println!("    Expires: {} ({} days)", status.expiry, status.days_remaining);
    for target in status.targets {
        let state = match target.trusted {
            Some(true) => "trusted",
            Some(false) => "NOT trusted",
            None => "unknown",
        };
        println!("    {}: {}", target.name, state);
    }
    Ok(())
}

fn cmd_ca_regenerate(manager: &SiteManager, yes: bool, out: Output) -> Result<()> {
    if !yes
        && !confirm_prompt(
            "Replace the root CA? Every site certificate will be re-issued and browsers must trust the new CA.",
        )
    {
        out.print("Cancelled.");
        return Ok(());
    }

    manager.regenerate_ca()?;
    out.print("CA regenerated and site certificates re-issued.");
    Ok(())
}

fn cmd_cert_regenerate(manager: &SiteManager, domain: &str, out: Output) -> Result<()> {
    let domain = Domain::parse(domain)?;
    manager.regenerate_site_cert(&domain)?;
    out.print(&format!("Certificate for {} regenerated.", domain));
    Ok(())
}

fn cmd_inspect(manager: &SiteManager, domain: &str) -> Result<()> {
    let domain = Domain::parse(domain)?;
    let layout = &manager.config().layout;
    let info = manager.verify_site_cert(&domain)?;

    println!("Certificate: {}", domain);
    println!("===========");
    println!();
    println!("File:       {}", layout.site_cert(&domain).display());
    println!("Key:        {}", layout.site_key(&domain).display());
    println!();

    if let Some(cn) = &info.common_name {
        println!("Common Name: {}", cn);
    }
    if let Some(issuer) = &info.issuer_common_name {
        println!("Issuer:     {} (verified)", issuer);
    }

    if !info.subject_alt_names.is_empty() {
        println!("SANs:");
        for san in &info.subject_alt_names {
            println!("    - {}", san);
        }
    }

    println!();

    let days = info.days_remaining();
    if info.is_expired() {
        println!("Status:     EXPIRED ({} days ago)", -days);
    } else if days <= 7 {
        println!("Status:     Expiring soon ({} days)", days);
    } else {
        println!("Status:     Valid ({} days remaining)", days);
    }
    println!("Expires:    {}", info.expiry_string());

    Ok(())
}

fn cmd_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "site-manager", &mut std::io::stdout());
    Ok(())
}
