//! End-to-end deployment pipeline tests with scripted external tools

use std::fs;

use tokio::sync::mpsc;

use berth::analyzer::Strategy;
use berth::errors::DeployError;
use berth::models::activity::ActivityKind;
use berth::models::deployment::{DeployProgress, DeploymentStatus};
use berth::models::project::ProjectType;
use berth::runtime::mock::MockSupervisor;
use berth::runtime::{ProcessState, RuntimeLifecycle};
use berth::storage::repos::{
    ActivityRepository, DeploymentRepository, PortRepository, ProjectRepository,
};

use crate::support::{node_api, node_api_with_build, owned, request, Harness, ScriptedRunner, STATIC_SITE};

#[tokio::test]
async fn test_static_site_deploys_without_port_or_process() {
    let h = Harness::new().await;
    let archive = h.archive("blog.tar.gz", STATIC_SITE);

    let project = h
        .orchestrator
        .deploy(request(archive.clone(), "blog", ProjectType::StaticPlain))
        .await
        .unwrap();

    assert_eq!(project.port, None);
    assert_eq!(project.serve_dir.as_deref(), Some("."));
    assert!(h.fragment(&project.id).exists());
    assert!(h.live_file(&project.id, "index.html").is_some());
    assert!(!archive.exists());

    // nothing to install, build or supervise
    assert!(!h.runner.ran("npm"));
    assert_eq!(h.supervisor.count_calls("start:").await, 0);
    assert_eq!(h.store.get_by_service(&project.id).await.unwrap(), None);

    let deployment = h
        .store
        .get_latest_by_project(&project.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Success);
    assert_eq!(deployment.build_mode, Some(Strategy::Static));
    assert!(deployment.completed_at.is_some());
    assert!(deployment.logs.contains("Extracted 2 files"));

    let deploys: Vec<_> = h
        .store
        .recent(10)
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.kind == ActivityKind::Deploy)
        .collect();
    assert_eq!(deploys.len(), 1);
    assert_eq!(deploys[0].project_name, "blog");
}

#[tokio::test]
async fn test_node_api_gets_port_process_and_route() {
    let h = Harness::new().await;
    let files = node_api("v1");
    let archive = h.archive("api.tar.gz", &owned(&files));

    let project = h
        .orchestrator
        .deploy(request(archive, "api", ProjectType::DynamicNode))
        .await
        .unwrap();

    let port = project.port.unwrap();
    assert!((20000..=20100).contains(&port));
    assert!(h.runner.ran("npm install"));
    assert!(!h.runner.ran("npm run build"));
    assert_eq!(h.runtime.status(&project).await.unwrap(), ProcessState::Online);

    let fragment = fs::read_to_string(h.fragment(&project.id)).unwrap();
    assert!(fragment.contains(&format!("reverse_proxy 127.0.0.1:{}", port)));
    assert!(h.reloads.load(std::sync::atomic::Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_redeploy_keeps_port_and_replaces_files() {
    let h = Harness::new().await;
    let v1 = node_api("v1");
    let first = h
        .orchestrator
        .deploy(request(h.archive("v1.tar.gz", &owned(&v1)), "api", ProjectType::DynamicNode))
        .await
        .unwrap();

    let v2 = node_api("v2");
    let second = h
        .orchestrator
        .deploy(request(h.archive("v2.tar.gz", &owned(&v2)), "api", ProjectType::DynamicNode))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.port, second.port);
    assert_eq!(first.created_at, second.created_at);
    assert!(h.live_file(&second.id, "server.js").unwrap().contains("v2"));

    let deployments = h.store.list_by_project(&second.id).await.unwrap();
    assert_eq!(deployments.len(), 2);
    assert!(deployments.iter().all(|d| d.status == DeploymentStatus::Success));
    assert_eq!(h.store.get_all().await.unwrap().len(), 1);

    // the old process was stopped before its directory was replaced
    assert_eq!(h.supervisor.count_calls(&format!("stop:{}", second.id)).await, 1);
    assert_eq!(h.supervisor.count_calls(&format!("start:{}", second.id)).await, 2);
}

#[tokio::test]
async fn test_failed_build_leaves_live_deployment_untouched() {
    let runner = ScriptedRunner::new();
    runner.fail("npm run build", 2, "src/server.ts(1,1): error TS2304: Cannot find name 'x'");
    let h = Harness::with(runner, MockSupervisor::new()).await;

    let v1 = node_api("v1");
    let live = h
        .orchestrator
        .deploy(request(h.archive("v1.tar.gz", &owned(&v1)), "api", ProjectType::DynamicNode))
        .await
        .unwrap();

    let fragment_before = fs::read(h.fragment(&live.id)).unwrap();

    let broken = node_api_with_build();
    let archive = h.archive("v2.tar.gz", &owned(&broken));
    let err = h
        .orchestrator
        .deploy(request(archive.clone(), "api", ProjectType::DynamicNode))
        .await
        .unwrap_err();

    match &err {
        DeployError::Build { stage, exit_code, stderr } => {
            assert_eq!(stage, "Build");
            assert_eq!(*exit_code, Some(2));
            assert!(stderr.contains("TS2304"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!archive.exists());

    // previous files, port and process are still in place
    assert!(h.live_file(&live.id, "server.js").unwrap().contains("v1"));
    assert_eq!(fs::read(h.fragment(&live.id)).unwrap(), fragment_before);
    let stored = h.store.get_by_id(&live.id).await.unwrap().unwrap();
    assert_eq!(stored.port, live.port);
    assert_eq!(h.supervisor.count_calls("stop:").await, 0);
    assert_eq!(h.runtime.status(&live).await.unwrap(), ProcessState::Online);

    let latest = h.store.get_latest_by_project(&live.id).await.unwrap().unwrap();
    assert_eq!(latest.status, DeploymentStatus::Failed);
    assert!(latest.error_message.unwrap().contains("TS2304"));
    assert!(h.layout.staging_root().entry_names().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_first_deploy_registers_nothing() {
    let runner = ScriptedRunner::new();
    runner.fail("npm run build", 1, "build exploded");
    let h = Harness::with(runner, MockSupervisor::new()).await;

    let files = node_api_with_build();
    let err = h
        .orchestrator
        .deploy(request(h.archive("w.tar.gz", &owned(&files)), "worker", ProjectType::DynamicNode))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "BUILD_ERROR");

    let state = h.store.snapshot().await;
    assert!(state.projects.is_empty());
    assert!(state.ports.is_empty());
    assert_eq!(state.deployments.len(), 1);
    assert_eq!(state.deployments[0].status, DeploymentStatus::Failed);
    assert!(state
        .activity
        .iter()
        .any(|a| a.kind == ActivityKind::Error && a.project_name == "worker"));
}

#[tokio::test]
async fn test_missing_manifest_is_rejected_before_install() {
    let h = Harness::new().await;
    let archive = h.archive("bad.tar.gz", &[("server.js", "listen()")]);

    let err = h
        .orchestrator
        .deploy(request(archive, "api", ProjectType::DynamicNode))
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::Validation(_)));
    assert!(!h.runner.ran("npm install"));
    assert!(h.store.snapshot().await.ports.is_empty());
}

#[tokio::test]
async fn test_missing_archive_creates_no_deployment() {
    let h = Harness::new().await;
    let missing = h.uploads().join("nope.tar.gz");

    let err = h
        .orchestrator
        .deploy(request(missing, "api", ProjectType::DynamicNode))
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 400);
    let state = h.store.snapshot().await;
    assert!(state.deployments.is_empty());
    assert!(state
        .activity
        .iter()
        .any(|a| a.kind == ActivityKind::Error && a.project_name == "api"));
}

#[tokio::test]
async fn test_malformed_domain_is_rejected_before_any_change() {
    let h = Harness::new().await;
    let files = node_api("v1");
    let mut bad = request(h.archive("a.tar.gz", &owned(&files)), "api", ProjectType::DynamicNode);
    bad.domains = vec!["api.example.com".to_string(), "bad domain {".to_string()];

    let err = h.orchestrator.deploy(bad).await.unwrap_err();
    assert!(matches!(err, DeployError::Validation(ref m) if m.contains("bad domain {")));

    let state = h.store.snapshot().await;
    assert!(state.projects.is_empty());
    assert!(state.deployments.is_empty());
    assert!(!h.runner.ran("npm install"));
    assert_eq!(h.reloads.load(std::sync::atomic::Ordering::SeqCst), 0);

    let files = node_api("v1");
    let mut good = request(h.archive("b.tar.gz", &owned(&files)), "api", ProjectType::DynamicNode);
    good.domains = vec!["api.example.com".to_string(), "*.preview.example.com".to_string()];
    assert!(h.orchestrator.deploy(good).await.is_ok());
}

fn vite_site(extra: &[(&'static str, &'static str)]) -> Vec<(&'static str, String)> {
    let mut files = vec![
        (
            "package.json",
            r#"{"name":"site","scripts":{"build":"vite build"}}"#.to_string(),
        ),
        ("package-lock.json", "{}".to_string()),
        ("index.html", "<div id=\"app\"></div>".to_string()),
        ("src/main.js", "console.log('site')".to_string()),
    ];
    files.extend(extra.iter().map(|(p, c)| (*p, c.to_string())));
    files
}

#[tokio::test]
async fn test_buildable_static_site_builds_under_its_path() {
    let h = Harness::new().await;
    let files = vite_site(&[(
        "vite.config.js",
        "import { defineConfig } from 'vite'\nexport default defineConfig({})\n",
    )]);

    let project = h
        .orchestrator
        .deploy(request(h.archive("s.tar.gz", &owned(&files)), "Site", ProjectType::StaticBuildable))
        .await
        .unwrap();
    assert_eq!(project.port, None);

    let env = h.runner.env_of("npm run build").unwrap();
    assert_eq!(env.get("PUBLIC_URL").map(String::as_str), Some("/app/site"));
    assert_eq!(env.get("BASE_PATH").map(String::as_str), Some("/app/site"));

    assert!(h.live_file(&project.id, "package.json").unwrap().contains("\"homepage\": \"/app/site\""));
    assert!(h.live_file(&project.id, "vite.config.js").unwrap().contains("base: '/app/site/'"));

    let deployment = h.store.get_latest_by_project(&project.id).await.unwrap().unwrap();
    assert_eq!(deployment.build_mode, Some(Strategy::BuildAndServe));
}

#[tokio::test]
async fn test_subpath_patch_failure_only_warns() {
    let h = Harness::new().await;
    // a directory where the vite config should be makes the patch fail
    let files = vite_site(&[("vite.config.js/README.md", "not a config")]);

    let project = h
        .orchestrator
        .deploy(request(h.archive("s.tar.gz", &owned(&files)), "site", ProjectType::StaticBuildable))
        .await
        .unwrap();

    assert!(h.runner.ran("npm run build"));
    let deployment = h.store.get_latest_by_project(&project.id).await.unwrap().unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Success);
    assert!(deployment.logs.contains("[warning] Sub-path patches skipped"));
    assert!(h.fragment(&project.id).exists());
}

#[tokio::test]
async fn test_streaming_ends_with_one_terminal_frame() {
    let h = Harness::new().await;
    let (tx, mut rx) = mpsc::channel(64);

    h.orchestrator
        .deploy_streaming(
            request(h.archive("blog.tar.gz", STATIC_SITE), "blog", ProjectType::StaticPlain),
            tx,
        )
        .await
        .unwrap();

    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        frames.push(frame);
    }

    let (last, progress) = frames.split_last().unwrap();
    assert!(matches!(last, DeployProgress::Completed { project } if project.name == "blog"));

    let mut previous = 0;
    for frame in progress {
        match frame {
            DeployProgress::Progress { percent, .. } => {
                assert!(*percent >= previous);
                previous = *percent;
            }
            other => panic!("terminal frame before the end: {:?}", other),
        }
    }
    assert_eq!(previous, 100);
}

#[tokio::test]
async fn test_streaming_failure_frame_carries_error_code() {
    let h = Harness::new().await;
    let (tx, mut rx) = mpsc::channel(64);

    let result = h
        .orchestrator
        .deploy_streaming(
            request(h.archive("bad.tar.gz", &[("server.js", "listen()")]), "api", ProjectType::DynamicNode),
            tx,
        )
        .await;
    assert!(result.is_err());

    let mut last = None;
    while let Some(frame) = rx.recv().await {
        last = Some(frame);
    }
    match last.unwrap() {
        DeployProgress::Failed { code, .. } => assert_eq!(code, "VALIDATION_ERROR"),
        other => panic!("unexpected frame {:?}", other),
    }
}

#[tokio::test]
async fn test_switching_to_static_retires_process_and_port() {
    let h = Harness::new().await;
    let files = node_api("v1");
    let api = h
        .orchestrator
        .deploy(request(h.archive("a.tar.gz", &owned(&files)), "app", ProjectType::DynamicNode))
        .await
        .unwrap();
    assert!(api.port.is_some());

    let site = h
        .orchestrator
        .deploy(request(h.archive("b.tar.gz", STATIC_SITE), "app", ProjectType::StaticPlain))
        .await
        .unwrap();

    assert_eq!(site.id, api.id);
    assert_eq!(site.port, None);
    assert_eq!(h.store.get_by_service(&api.id).await.unwrap(), None);
    assert!(h
        .supervisor
        .calls()
        .await
        .iter()
        .any(|c| c == &format!("delete:{}", api.id)));
    let fragment = fs::read_to_string(h.fragment(&site.id)).unwrap();
    assert!(fragment.contains("file_server"));
}

#[tokio::test]
async fn test_concurrent_deploys_of_one_project_serialize() {
    let h = Harness::new().await;
    let v1 = node_api("v1");
    let v2 = node_api("v2");
    let a = request(h.archive("1.tar.gz", &owned(&v1)), "api", ProjectType::DynamicNode);
    let b = request(h.archive("2.tar.gz", &owned(&v2)), "api", ProjectType::DynamicNode);

    let (first, second) = tokio::join!(h.orchestrator.deploy(a), h.orchestrator.deploy(b));
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.id, second.id);
    assert_eq!(first.port, second.port);
    assert_eq!(h.store.get_all().await.unwrap().len(), 1);
    assert_eq!(h.store.snapshot().await.ports.len(), 1);
}

#[tokio::test]
async fn test_delete_project_tears_everything_down() {
    let h = Harness::new().await;
    let files = node_api("v1");
    let project = h
        .orchestrator
        .deploy(request(h.archive("a.tar.gz", &owned(&files)), "api", ProjectType::DynamicNode))
        .await
        .unwrap();

    let deleted = h.orchestrator.delete_project(&project.id).await.unwrap();
    assert_eq!(deleted.id, project.id);

    assert!(h.store.get_by_id(&project.id).await.unwrap().is_none());
    assert_eq!(h.store.get_by_service(&project.id).await.unwrap(), None);
    assert!(!h.fragment(&project.id).exists());
    assert!(!h.layout.project_dir(&project.id).path().exists());
    assert_eq!(
        h.supervisor.count_calls(&format!("delete:{}", project.id)).await,
        // one before the launch, one for the teardown
        2
    );

    let err = h.orchestrator.delete_project(&project.id).await.unwrap_err();
    assert!(matches!(err, DeployError::NotFound(_)));
}
