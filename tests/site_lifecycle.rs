// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::{FakeProbe, Sandbox};
use site_manager::manager::PLACEHOLDER_INDEX;
use site_manager::{
    Dashboard, Domain, DryRunExecutor, Error, PhpVersion, Registry, SiteKind, SiteManager,
    SiteRequest, SiteUpdate,
};

fn d(name: &str) -> Domain {
    Domain::parse(name).unwrap()
}

#[test]
fn test_create_proxy_site() {
    let sandbox = Sandbox::new();
    let manager = sandbox.manager();
    let layout = sandbox.layout();

    let site = manager
        .create(&SiteRequest::proxy("app.local", 4000))
        .unwrap();
    assert_eq!(site.kind, SiteKind::Proxy { proxy_port: 4000 });

    let config_path = layout.nginx_dir.join("sites-available/app.local");
    let config = std::fs::read_to_string(&config_path).unwrap();
    assert!(config.contains("server_name app.local;"));
    assert!(config.contains("proxy_pass http://127.0.0.1:4000;"));
    assert!(config.contains(&format!(
        "ssl_certificate {};",
        layout.site_cert(&d("app.local")).display()
    )));

    let link = layout.nginx_dir.join("sites-enabled/app.local");
    assert_eq!(std::fs::read_link(&link).unwrap(), config_path);

    assert!(sandbox.hosts().contains("#start site-manager-app.local\n127.0.0.1 app.local\n"));
    assert!(sandbox.exec.ran("nginx -t"));
    assert!(sandbox.exec.ran("systemctl reload nginx"));

    let sites = manager.list_sites().unwrap();
    assert_eq!(sites, vec![site]);
}

#[test]
fn test_create_bootstraps_and_trusts_ca() {
    let sandbox = Sandbox::new();
    let manager = sandbox.manager();
    assert!(manager.ca_status().unwrap().is_none());

    manager
        .create(&SiteRequest::proxy("app.local", 4000))
        .unwrap();

    assert!(sandbox.paths.ca_exists());
    let ca_pem = std::fs::read_to_string(&sandbox.paths.ca_cert).unwrap();
    assert_eq!(std::fs::read_to_string(sandbox.anchor()).unwrap(), ca_pem);
    assert!(sandbox.exec.ran("update-ca-certificates"));

    let status = manager.ca_status().unwrap().unwrap();
    assert!(status.days_remaining > 3000);
    assert_eq!(status.targets.len(), 1);
    assert_eq!(status.targets[0].trusted, Some(true));

    let info = manager.verify_site_cert(&d("app.local")).unwrap();
    assert_eq!(info.common_name.as_deref(), Some("app.local"));
    assert!(info
        .subject_alt_names
        .contains(&"*.app.local".to_string()));
}

#[test]
fn test_second_site_reuses_ca() {
    let sandbox = Sandbox::new();
    let manager = sandbox.manager();

    manager.create(&SiteRequest::proxy("one.local", 3000)).unwrap();
    let ca_pem = std::fs::read_to_string(&sandbox.paths.ca_cert).unwrap();
    sandbox.exec.clear();

    manager.create(&SiteRequest::proxy("two.local", 3001)).unwrap();
    assert_eq!(std::fs::read_to_string(&sandbox.paths.ca_cert).unwrap(), ca_pem);
    assert!(!sandbox.exec.ran("update-ca-certificates"));
    manager.verify_site_cert(&d("one.local")).unwrap();
    manager.verify_site_cert(&d("two.local")).unwrap();
}

#[test]
fn test_create_duplicate_rejected() {
    let sandbox = Sandbox::new();
    let manager = sandbox.manager();

    manager.create(&SiteRequest::proxy("app.local", 4000)).unwrap();
    let err = manager
        .create(&SiteRequest::php("app.local", "8.2"))
        .unwrap_err();
    assert!(matches!(err, Error::SiteExists(_)));
    assert_eq!(manager.list_sites().unwrap().len(), 1);
}

#[test]
fn test_create_php_site_root() {
    let sandbox = Sandbox::new();
    let manager = sandbox.manager();
    let layout = sandbox.layout();

    manager.create(&SiteRequest::php("shop.test", "8.2")).unwrap();

    let index = layout.site_public(&d("shop.test")).join("index.php");
    assert_eq!(std::fs::read_to_string(index).unwrap(), PLACEHOLDER_INDEX);
    assert!(sandbox.exec.ran(&format!(
        "chown -R tester:tester {}",
        layout.site_root(&d("shop.test")).display()
    )));

    let config =
        std::fs::read_to_string(layout.nginx_dir.join("sites-available/shop.test")).unwrap();
    assert!(config.contains("php8.2-fpm.sock"));
    assert!(config.contains(&format!(
        "root {};",
        layout.site_public(&d("shop.test")).display()
    )));
}

#[test]
fn test_create_keeps_existing_index() {
    let sandbox = Sandbox::new();
    let manager = sandbox.manager();
    let public = sandbox.layout().site_public(&d("shop.test"));
    std::fs::create_dir_all(&public).unwrap();
    std::fs::write(public.join("index.php"), "<?php echo 'mine';").unwrap();

    manager.create(&SiteRequest::php("shop.test", "8.2")).unwrap();
    assert_eq!(
        std::fs::read_to_string(public.join("index.php")).unwrap(),
        "<?php echo 'mine';"
    );
}

#[test]
fn test_create_failure_leaves_no_record() {
    let sandbox = Sandbox::new();
    let manager = sandbox.manager();
    sandbox.exec.fail_on("nginx -t");

    let err = manager
        .create(&SiteRequest::proxy("app.local", 4000))
        .unwrap_err();
    assert!(matches!(err, Error::Step { .. }));
    assert!(manager.list_sites().unwrap().is_empty());
    // hosts entry comes after nginx validation
    assert!(!sandbox.hosts().contains("app.local"));
    assert!(!sandbox.exec.ran("systemctl reload nginx"));
}

#[test]
fn test_create_rejects_invalid_input_before_any_step() {
    let sandbox = Sandbox::new();
    let manager = sandbox.manager();

    assert!(manager.create(&SiteRequest::proxy("bad domain", 4000)).is_err());
    assert!(manager.create(&SiteRequest::proxy("app.local", 0)).is_err());
    assert!(manager.create(&SiteRequest::php("app.local", "eight")).is_err());
    assert!(sandbox.exec.log().is_empty());
    assert!(!sandbox.paths.ca_exists());
}

#[test]
fn test_trust_failure_discards_new_ca() {
    let sandbox = Sandbox::new();
    let manager = sandbox.manager();
    sandbox.exec.fail_on("update-ca-certificates");

    let err = manager
        .create(&SiteRequest::proxy("app.local", 4000))
        .unwrap_err();
    assert!(matches!(err, Error::TrustStore(_)));
    assert!(!sandbox.paths.ca_key.exists());
    assert!(!sandbox.paths.ca_cert.exists());
    assert!(!sandbox.layout().site_cert(&d("app.local")).exists());
    assert!(manager.list_sites().unwrap().is_empty());

    // next attempt bootstraps again
    sandbox.exec.succeed();
    manager.create(&SiteRequest::proxy("app.local", 4000)).unwrap();
    assert!(sandbox.paths.ca_exists());
}

#[test]
fn test_delete_removes_everything() {
    let sandbox = Sandbox::new();
    let manager = sandbox.manager();
    let layout = sandbox.layout();
    let domain = d("shop.test");

    manager.create(&SiteRequest::php("shop.test", "8.2")).unwrap();
    sandbox.exec.clear();
    manager.delete(&domain).unwrap();

    assert!(manager.list_sites().unwrap().is_empty());
    assert!(!sandbox.hosts().contains("site-manager-shop.test"));
    assert!(!layout.site_cert(&domain).exists());
    assert!(!layout.site_key(&domain).exists());
    assert!(!layout.site_root(&domain).exists());
    assert!(!layout.nginx_dir.join("sites-available/shop.test").exists());
    assert!(std::fs::symlink_metadata(layout.nginx_dir.join("sites-enabled/shop.test")).is_err());

    let log = sandbox.exec.log();
    assert_eq!(log[log.len() - 2], "nginx -t");
    assert_eq!(log[log.len() - 1], "systemctl reload nginx");
}

#[test]
fn test_delete_keeps_other_sites() {
    let sandbox = Sandbox::new();
    let manager = sandbox.manager();

    manager.create(&SiteRequest::proxy("one.local", 3000)).unwrap();
    manager.create(&SiteRequest::proxy("two.local", 3001)).unwrap();
    manager.delete(&d("one.local")).unwrap();

    let sites = manager.list_sites().unwrap();
    assert_eq!(sites.len(), 1);
    assert_eq!(sites[0].domain, d("two.local"));
    assert!(sandbox.hosts().contains("#start site-manager-two.local"));
    assert!(!sandbox.hosts().contains("#start site-manager-one.local"));
}

#[test]
fn test_delete_drops_record_when_nginx_rejects() {
    let sandbox = Sandbox::new();
    let manager = sandbox.manager();

    manager.create(&SiteRequest::proxy("app.local", 4000)).unwrap();
    sandbox.exec.fail_on("nginx -t");

    assert!(manager.delete(&d("app.local")).is_err());
    assert!(manager.list_sites().unwrap().is_empty());
    assert!(!sandbox.layout().site_cert(&d("app.local")).exists());
}

#[test]
fn test_delete_continues_past_failed_removal() {
    let sandbox = Sandbox::new();
    let manager = sandbox.manager();
    let layout = sandbox.layout();
    let domain = d("shop.test");

    manager.create(&SiteRequest::php("shop.test", "8.2")).unwrap();
    sandbox.exec.fail_on("shop.test.crt");

    manager.delete(&domain).unwrap();

    assert!(layout.site_cert(&domain).exists());
    assert!(!layout.site_key(&domain).exists());
    assert!(!layout.site_root(&domain).exists());
    assert!(!sandbox.hosts().contains("site-manager-shop.test"));
    assert!(manager.list_sites().unwrap().is_empty());
    assert!(sandbox.exec.ran("systemctl reload nginx"));
}

#[test]
fn test_delete_unregistered_cleans_leftovers() {
    let sandbox = Sandbox::new();
    let manager = sandbox.manager();
    let layout = sandbox.layout();
    let domain = d("stale.local");

    std::fs::create_dir_all(&layout.cert_dir).unwrap();
    std::fs::write(layout.site_cert(&domain), "stale").unwrap();
    std::fs::create_dir_all(layout.hosts_file.parent().unwrap()).unwrap();
    std::fs::write(
        &layout.hosts_file,
        site_manager::hosts::upsert_block("127.0.0.1 localhost\n", &domain),
    )
    .unwrap();

    manager.delete(&domain).unwrap();
    assert!(!layout.site_cert(&domain).exists());
    assert_eq!(sandbox.hosts(), "127.0.0.1 localhost\n");
}

#[test]
fn test_update_php_version() {
    let sandbox = Sandbox::new();
    let manager = sandbox.manager();
    let domain = d("shop.test");

    manager.create(&SiteRequest::php("shop.test", "8.2")).unwrap();
    let site = manager
        .update(
            &domain,
            &SiteUpdate {
                php_version: Some("8.3".into()),
                proxy_port: None,
            },
        )
        .unwrap();

    assert_eq!(
        site.kind,
        SiteKind::Php {
            php_version: PhpVersion::parse("8.3").unwrap()
        }
    );
    let config = std::fs::read_to_string(
        sandbox.layout().nginx_dir.join("sites-available/shop.test"),
    )
    .unwrap();
    assert!(config.contains("php8.3-fpm.sock"));
    assert_eq!(manager.list_sites().unwrap(), vec![site]);
}

#[test]
fn test_update_ignores_field_for_other_kind() {
    let sandbox = Sandbox::new();
    let manager = sandbox.manager();
    let domain = d("shop.test");

    let created = manager.create(&SiteRequest::php("shop.test", "8.2")).unwrap();
    let updated = manager
        .update(
            &domain,
            &SiteUpdate {
                php_version: None,
                proxy_port: Some(9000),
            },
        )
        .unwrap();

    assert_eq!(updated, created);
    assert_eq!(manager.list_sites().unwrap(), vec![created]);
}

#[test]
fn test_update_proxy_port() {
    let sandbox = Sandbox::new();
    let manager = sandbox.manager();

    manager.create(&SiteRequest::proxy("app.local", 4000)).unwrap();
    manager
        .update(
            &d("app.local"),
            &SiteUpdate {
                php_version: None,
                proxy_port: Some(5173),
            },
        )
        .unwrap();

    let config = std::fs::read_to_string(
        sandbox.layout().nginx_dir.join("sites-available/app.local"),
    )
    .unwrap();
    assert!(config.contains("proxy_pass http://127.0.0.1:5173;"));
    assert!(!config.contains("127.0.0.1:4000"));
}

#[test]
fn test_update_unknown_site() {
    let sandbox = Sandbox::new();
    let err = sandbox
        .manager()
        .update(&d("nope.local"), &SiteUpdate::default())
        .unwrap_err();
    assert!(matches!(err, Error::SiteNotFound(_)));
}

#[test]
fn test_regenerate_site_cert() {
    let sandbox = Sandbox::new();
    let manager = sandbox.manager();
    let domain = d("app.local");

    manager.create(&SiteRequest::proxy("app.local", 4000)).unwrap();
    let before = std::fs::read_to_string(sandbox.layout().site_cert(&domain)).unwrap();

    manager.regenerate_site_cert(&domain).unwrap();
    let after = std::fs::read_to_string(sandbox.layout().site_cert(&domain)).unwrap();
    assert_ne!(before, after);
    manager.verify_site_cert(&domain).unwrap();

    let err = manager.regenerate_site_cert(&d("nope.local")).unwrap_err();
    assert!(matches!(err, Error::SiteNotFound(_)));
}

#[test]
fn test_regenerate_ca_reissues_every_site() {
    let sandbox = Sandbox::new();
    let manager = sandbox.manager();

    manager.create(&SiteRequest::proxy("one.local", 3000)).unwrap();
    manager.create(&SiteRequest::php("two.test", "8.2")).unwrap();
    let old_ca = std::fs::read_to_string(&sandbox.paths.ca_cert).unwrap();
    let old_leaf = std::fs::read_to_string(sandbox.layout().site_cert(&d("one.local"))).unwrap();

    manager.regenerate_ca().unwrap();

    let new_ca = std::fs::read_to_string(&sandbox.paths.ca_cert).unwrap();
    assert_ne!(old_ca, new_ca);
    assert_eq!(std::fs::read_to_string(sandbox.anchor()).unwrap(), new_ca);
    for site in manager.list_sites().unwrap() {
        manager.verify_site_cert(&site.domain).unwrap();
    }
    assert!(site_manager::verify_issued_by(&old_leaf, &new_ca).is_err());
}

#[test]
fn test_regenerate_ca_survives_trust_removal_failure() {
    let sandbox = Sandbox::new();
    let manager = sandbox.manager();

    manager.create(&SiteRequest::proxy("one.local", 3000)).unwrap();
    manager.create(&SiteRequest::proxy("two.local", 3001)).unwrap();
    let old_ca = std::fs::read_to_string(&sandbox.paths.ca_cert).unwrap();
    sandbox
        .exec
        .fail_on(&format!("rm -f {}", sandbox.anchor().display()));

    manager.regenerate_ca().unwrap();

    let new_ca = std::fs::read_to_string(&sandbox.paths.ca_cert).unwrap();
    assert_ne!(old_ca, new_ca);
    assert_eq!(std::fs::read_to_string(sandbox.anchor()).unwrap(), new_ca);
    manager.verify_site_cert(&d("one.local")).unwrap();
    manager.verify_site_cert(&d("two.local")).unwrap();
}

#[test]
fn test_regenerate_ca_continues_past_failed_site() {
    let sandbox = Sandbox::new();
    let manager = sandbox.manager();

    manager.create(&SiteRequest::proxy("one.local", 3000)).unwrap();
    manager.create(&SiteRequest::proxy("two.local", 3001)).unwrap();
    sandbox.exec.clear();
    sandbox.exec.fail_on("one.local.key");

    match manager.regenerate_ca().unwrap_err() {
        Error::Reissue { failed } => assert_eq!(failed, vec!["one.local".to_string()]),
        other => panic!("expected reissue error, got {:?}", other),
    }

    manager.verify_site_cert(&d("two.local")).unwrap();
    assert!(manager.verify_site_cert(&d("one.local")).is_err());
    assert!(sandbox.exec.ran("systemctl reload nginx"));
    assert_eq!(manager.list_sites().unwrap().len(), 2);
}

#[test]
fn test_verify_missing_cert() {
    let sandbox = Sandbox::new();
    let err = sandbox
        .manager()
        .verify_site_cert(&d("app.local"))
        .unwrap_err();
    assert!(matches!(err, Error::CertificateNotFound(_)));
}

#[test]
fn test_dashboard_gates_on_dependencies() {
    let sandbox = Sandbox::new();
    // a corrupt registry would fail list_sites
    std::fs::create_dir_all(&sandbox.paths.base).unwrap();
    std::fs::write(&sandbox.paths.registry, "{not json").unwrap();

    let mut probe = FakeProbe::complete();
    probe.deps.php = false;
    match sandbox.manager_with_probe(probe).dashboard().unwrap() {
        Dashboard::MissingDependencies(deps) => assert_eq!(deps.missing(), vec!["php"]),
        other => panic!("expected missing dependencies, got {:?}", other),
    }

    assert!(matches!(
        sandbox.manager().dashboard().unwrap_err(),
        Error::Registry { .. }
    ));
}

#[test]
fn test_dashboard_lists_sites_and_versions() {
    let sandbox = Sandbox::new();
    let manager = sandbox.manager();
    manager.create(&SiteRequest::proxy("app.local", 4000)).unwrap();

    match manager.dashboard().unwrap() {
        Dashboard::Ready {
            sites,
            php_versions,
        } => {
            assert_eq!(sites.len(), 1);
            assert_eq!(
                php_versions,
                vec![
                    PhpVersion::parse("8.2").unwrap(),
                    PhpVersion::parse("8.3").unwrap()
                ]
            );
        }
        other => panic!("expected ready dashboard, got {:?}", other),
    }
}

#[test]
fn test_dry_run_changes_nothing() {
    let sandbox = Sandbox::new();
    let dry = DryRunExecutor::new();
    let manager = SiteManager::new(sandbox.paths.clone(), sandbox.config.clone())
        .with_executor(Box::new(dry.clone()))
        .with_probe(Box::new(FakeProbe::complete()))
        .with_trust_home(Some(sandbox.home.clone()));

    manager.create(&SiteRequest::php("shop.test", "8.2")).unwrap();

    let planned = dry.planned();
    assert!(planned.iter().any(|s| s == "update-ca-certificates"));
    assert!(planned.iter().any(|s| s == "nginx -t"));
    assert!(planned.iter().any(|s| s.starts_with("write ") && s.contains("hosts")));

    assert!(!sandbox.paths.ca_cert.exists());
    assert!(!sandbox.paths.registry.exists());
    assert!(!sandbox.layout().site_cert(&d("shop.test")).exists());
    assert!(!sandbox.layout().hosts_file.exists());
    assert!(Registry::open(&sandbox.paths.registry).list().unwrap().is_empty());
}
