//! Runtime lifecycle management
//!
//! Process-backed projects run under an external supervisor; static
//! projects are "running" when their proxy fragment exists.

pub mod lifecycle;
pub mod mock;
pub mod pm2;
pub mod supervisor;

pub use lifecycle::{
    ProcessInfo, ReconcileReport, RuntimeLifecycle, RuntimeManager, Workload, WorkloadKind,
};
pub use pm2::Pm2Supervisor;
pub use supervisor::{
    ConnectionState, ProcessDescriptor, ProcessState, ProcessSupervisor, StartCommand,
    SupervisedProcess, SupervisorConnection,
};
