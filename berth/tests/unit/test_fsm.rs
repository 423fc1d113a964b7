//! FSM unit tests

use berth::deploy::fsm::{DeploymentEvent, DeploymentFsm};
use berth::models::deployment::DeploymentStatus;

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::new();
    assert_eq!(fsm.state(), DeploymentStatus::Queued);
    assert!(fsm.error().is_none());
    assert!(fsm.completed_at().is_none());
}

#[test]
fn test_fsm_deploy_failure_after_go_live() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::Build).unwrap();
    fsm.process(DeploymentEvent::Deploy).unwrap();
    let status = fsm
        .process(DeploymentEvent::Fail("proxy reload failed".to_string()))
        .unwrap();

    assert_eq!(status, DeploymentStatus::Failed);
    assert_eq!(fsm.error(), Some("proxy reload failed"));
    assert!(fsm.completed_at().is_some());
}

#[test]
fn test_fsm_invalid_transition() {
    let mut fsm = DeploymentFsm::new();
    fsm.process(DeploymentEvent::Build).unwrap();

    // Cannot succeed before going live
    let err = fsm.process(DeploymentEvent::Succeed).unwrap_err();
    assert_eq!(err.kind(), "INTERNAL_ERROR");
    assert_eq!(fsm.state(), DeploymentStatus::Building);
}

#[test]
fn test_status_wire_names() {
    let json = serde_json::to_string(&DeploymentStatus::Deploying).unwrap();
    assert_eq!(json, "\"deploying\"");
    assert!(DeploymentStatus::Success.is_terminal());
    assert!(!DeploymentStatus::Building.is_terminal());
}
