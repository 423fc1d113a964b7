//! Deployment module

pub mod archive;
pub mod build;
pub mod env_policy;
pub mod fsm;
pub mod locks;
pub mod patches;
pub mod pipeline;

pub use env_policy::{classify, EnvMutability, EnvPolicyInput};
pub use pipeline::{Orchestrator, OrchestratorDeps};
