//! Env mutability classification over stored projects

use chrono::Utc;

use berth::deploy::{classify, EnvMutability, EnvPolicyInput};
use berth::models::project::{DeploymentSource, Project, ProjectType, UploadType};

fn project(project_type: ProjectType, upload_type: UploadType) -> Project {
    Project {
        id: "p1".to_string(),
        name: "site".to_string(),
        project_type,
        port: None,
        package_manager: None,
        domains: Vec::new(),
        serve_dir: None,
        deployment_source: DeploymentSource::Cli,
        upload_type,
        env_injected_at_build: false,
        has_source: upload_type != UploadType::DistOnly,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[test]
fn test_cli_prebuilt_spa_without_env_is_immutable() {
    let spa = project(ProjectType::StaticBuildable, UploadType::Prebuilt);
    let policy = classify(EnvPolicyInput::from(&spa));
    assert!(!policy.is_mutable());

    let json = serde_json::to_value(&policy).unwrap();
    assert_eq!(json["mutability"], "immutable");
    assert_eq!(json["reason"], "built-without-env");
}

#[test]
fn test_env_injected_at_build_makes_it_mutable() {
    let mut spa = project(ProjectType::StaticBuildable, UploadType::Prebuilt);
    spa.env_injected_at_build = true;
    assert_eq!(classify(EnvPolicyInput::from(&spa)), EnvMutability::Mutable);
}

#[test]
fn test_dist_only_upload_has_no_source() {
    let spa = project(ProjectType::StaticBuildable, UploadType::DistOnly);
    let json = serde_json::to_value(classify(EnvPolicyInput::from(&spa))).unwrap();
    assert_eq!(json["reason"], "no-source");
}

#[test]
fn test_node_api_is_mutable_whatever_the_upload() {
    for upload in [UploadType::FullSource, UploadType::DistOnly, UploadType::Prebuilt] {
        let api = project(ProjectType::DynamicNode, upload);
        assert!(classify(EnvPolicyInput::from(&api)).is_mutable());
    }
}
