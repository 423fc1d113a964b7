//! Proxy config manager and reload protocol tests

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use berth::errors::DeployError;
use berth::exec::{CommandOutput, CommandRunner, CommandSpec};
use berth::models::project::{DeploymentSource, Project, ProjectType, UploadType};
use berth::proxy::{ProxyManager, ProxyReloader};
use berth::storage::layout::StorageLayout;

use crate::support::{proxy_settings, CountingTier, ScriptedRunner};

fn project(id: &str, name: &str, project_type: ProjectType, port: Option<u16>) -> Project {
    Project {
        id: id.to_string(),
        name: name.to_string(),
        project_type,
        port,
        package_manager: None,
        domains: Vec::new(),
        serve_dir: Some(".".to_string()),
        deployment_source: DeploymentSource::Ui,
        upload_type: UploadType::FullSource,
        env_injected_at_build: false,
        has_source: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_default_tier_order() {
    let tmp = tempfile::tempdir().unwrap();
    let reloader = ProxyReloader::new(&proxy_settings(tmp.path()), Arc::new(ScriptedRunner::new()));
    assert_eq!(reloader.tier_names(), vec!["admin-api", "systemctl", "caddy-cli"]);
}

#[tokio::test]
async fn test_first_successful_tier_wins() {
    let tmp = tempfile::tempdir().unwrap();
    let (admin, admin_attempts) = CountingTier::new("admin-api", false);
    let (systemd, systemd_attempts) = CountingTier::new("systemctl", true);
    let (cli, cli_attempts) = CountingTier::new("caddy-cli", true);

    let reloader = ProxyReloader::new(&proxy_settings(tmp.path()), Arc::new(ScriptedRunner::new()))
        .with_tiers(vec![Box::new(admin), Box::new(systemd), Box::new(cli)]);

    assert_eq!(reloader.reload().await.unwrap(), "systemctl");
    assert_eq!(admin_attempts.load(Ordering::SeqCst), 1);
    assert_eq!(systemd_attempts.load(Ordering::SeqCst), 1);
    assert_eq!(cli_attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_every_tier_failing_reports_each_attempt() {
    let tmp = tempfile::tempdir().unwrap();
    let (a, _) = CountingTier::new("admin-api", false);
    let (b, _) = CountingTier::new("caddy-cli", false);
    let reloader = ProxyReloader::new(&proxy_settings(tmp.path()), Arc::new(ScriptedRunner::new()))
        .with_tiers(vec![Box::new(a), Box::new(b)]);

    match reloader.reload().await.unwrap_err() {
        DeployError::ProxyReload { attempts } => {
            let tiers: Vec<_> = attempts.iter().map(|a| a.tier.as_str()).collect();
            assert_eq!(tiers, vec!["admin-api", "caddy-cli"]);
            assert_eq!(attempts[1].detail, "caddy-cli unavailable");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_invalid_config_never_reaches_a_tier() {
    let tmp = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new();
    runner.fail("caddy validate", 1, "Error: adapting config: unknown directive");
    let (tier, attempts) = CountingTier::new("admin-api", true);

    let reloader = ProxyReloader::new(&proxy_settings(tmp.path()), Arc::new(runner))
        .with_tiers(vec![Box::new(tier)]);

    let err = reloader.reload().await.unwrap_err();
    assert!(matches!(err, DeployError::InvalidProxyConfig(ref d) if d.contains("unknown directive")));
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
}

fn manager(root: &std::path::Path) -> ProxyManager {
    let settings = proxy_settings(root);
    let (tier, _) = CountingTier::new("fake", true);
    let reloader =
        ProxyReloader::new(&settings, Arc::new(ScriptedRunner::new())).with_tiers(vec![Box::new(tier)]);
    ProxyManager::with_reloader(settings, 3030, StorageLayout::new(root.join("data")), reloader)
}

#[tokio::test]
async fn test_main_config_is_byte_identical_across_regenerations() {
    let tmp = tempfile::tempdir().unwrap();
    let proxy = manager(tmp.path());
    let main = proxy.settings().main_config.clone();

    proxy.initialize().await.unwrap();
    let first = fs::read_to_string(&main).unwrap();
    proxy.refresh_main_config().await.unwrap();
    let second = fs::read_to_string(&main).unwrap();

    assert_eq!(first, second);
    assert!(first.contains("reverse_proxy 127.0.0.1:3030"));
    assert!(first.contains(&format!(
        "import {}/*.caddy",
        proxy.settings().projects_dir.display()
    )));
}

#[tokio::test]
async fn test_reload_restores_a_broken_main_config() {
    let tmp = tempfile::tempdir().unwrap();
    let proxy = manager(tmp.path());
    proxy.initialize().await.unwrap();

    let main = proxy.settings().main_config.clone();
    fs::write(&main, ":80 {\n\trespond \"hand edited\"\n}\n").unwrap();

    proxy.reload().await.unwrap();
    let restored = fs::read_to_string(&main).unwrap();
    assert!(restored.contains(&format!(
        "import {}/*.caddy",
        proxy.settings().projects_dir.display()
    )));
}

#[tokio::test]
async fn test_fragments_follow_project_routing() {
    let tmp = tempfile::tempdir().unwrap();
    let proxy = manager(tmp.path());
    proxy.initialize().await.unwrap();

    let mut api = project("p-api", "My API", ProjectType::DynamicNode, Some(41000));
    api.domains = vec!["api.example.com".to_string()];
    proxy.update_project_config(&api).await.unwrap();

    let path_fragment = proxy.settings().projects_dir.join("p-api.caddy");
    let domain_fragment = proxy.settings().domains_dir.join("p-api.caddy");
    let contents = fs::read_to_string(&path_fragment).unwrap();
    assert!(contents.contains("handle_path /app/my-api/*"));
    assert!(contents.contains("reverse_proxy 127.0.0.1:41000"));
    assert!(fs::read_to_string(&domain_fragment)
        .unwrap()
        .contains("api.example.com {"));

    // dropping the domains removes the domain fragment
    api.domains.clear();
    proxy.update_project_config(&api).await.unwrap();
    assert!(!domain_fragment.exists());
    assert!(proxy.fragment_exists("p-api").await);

    proxy.delete_project_config("p-api").await.unwrap();
    assert!(!proxy.fragment_exists("p-api").await);
}

#[tokio::test]
async fn test_static_fragment_serves_files() {
    let tmp = tempfile::tempdir().unwrap();
    let proxy = manager(tmp.path());

    let blog = project("p-blog", "blog", ProjectType::StaticPlain, None);
    proxy.update_project_config(&blog).await.unwrap();

    let contents = fs::read_to_string(proxy.settings().projects_dir.join("p-blog.caddy")).unwrap();
    assert!(contents.contains("try_files {path} /index.html"));
    assert!(contents.contains("file_server"));
    assert!(!contents.contains("reverse_proxy"));
}

/// `caddy validate` fails while any domain fragment names a rejected host
struct RejectingValidator {
    domains_dir: PathBuf,
}

#[async_trait]
impl CommandRunner for RejectingValidator {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, DeployError> {
        let rejected = spec.display().contains("validate")
            && fs::read_dir(&self.domains_dir)
                .map(|entries| {
                    entries.flatten().any(|e| {
                        fs::read_to_string(e.path())
                            .map(|c| c.contains("rejected.example.com"))
                            .unwrap_or(false)
                    })
                })
                .unwrap_or(false);
        Ok(CommandOutput {
            exit_code: Some(if rejected { 1 } else { 0 }),
            stdout: String::new(),
            stderr: if rejected { "Error: unrecognized directive".to_string() } else { String::new() },
        })
    }
}

fn validating_manager(root: &std::path::Path) -> ProxyManager {
    let settings = proxy_settings(root);
    let runner = Arc::new(RejectingValidator {
        domains_dir: settings.domains_dir.clone(),
    });
    let (tier, _) = CountingTier::new("fake", true);
    let reloader = ProxyReloader::new(&settings, runner).with_tiers(vec![Box::new(tier)]);
    ProxyManager::with_reloader(settings, 3030, StorageLayout::new(root.join("data")), reloader)
}

#[tokio::test]
async fn test_rejected_config_restores_previous_fragments() {
    let tmp = tempfile::tempdir().unwrap();
    let proxy = validating_manager(tmp.path());
    proxy.initialize().await.unwrap();

    let mut api = project("p-api", "api", ProjectType::DynamicNode, Some(41000));
    api.domains = vec!["api.example.com".to_string()];
    proxy.update_project_config(&api).await.unwrap();

    let path_fragment = proxy.settings().projects_dir.join("p-api.caddy");
    let domain_fragment = proxy.settings().domains_dir.join("p-api.caddy");
    let path_before = fs::read(&path_fragment).unwrap();
    let domains_before = fs::read(&domain_fragment).unwrap();

    api.port = Some(41001);
    api.domains = vec!["rejected.example.com".to_string()];
    let err = proxy.update_project_config(&api).await.unwrap_err();
    assert_eq!(err.kind(), "PROXY_CONFIG_INVALID");

    assert_eq!(fs::read(&path_fragment).unwrap(), path_before);
    assert_eq!(fs::read(&domain_fragment).unwrap(), domains_before);

    // other projects keep reloading
    let blog = project("p-blog", "blog", ProjectType::StaticPlain, None);
    proxy.update_project_config(&blog).await.unwrap();
    assert!(proxy.fragment_exists("p-blog").await);
}

#[tokio::test]
async fn test_rejected_first_config_leaves_no_fragments() {
    let tmp = tempfile::tempdir().unwrap();
    let proxy = validating_manager(tmp.path());
    proxy.initialize().await.unwrap();

    let mut api = project("p-new", "new", ProjectType::DynamicNode, Some(41002));
    api.domains = vec!["rejected.example.com".to_string()];
    assert!(proxy.update_project_config(&api).await.is_err());

    assert!(!proxy.fragment_exists("p-new").await);
    assert!(!proxy.settings().domains_dir.join("p-new.caddy").exists());
}
