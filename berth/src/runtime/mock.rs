//! Mock supervisor for testing.
//!
//! Keeps processes in memory and records every call it receives.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::errors::DeployError;
use crate::runtime::supervisor::{
    ProcessDescriptor, ProcessState, ProcessSupervisor, SupervisedProcess,
};

/// In-memory supervisor
pub struct MockSupervisor {
    processes: Mutex<BTreeMap<String, SupervisedProcess>>,
    descriptors: Mutex<BTreeMap<String, ProcessDescriptor>>,
    calls: Mutex<Vec<String>>,
    /// Status given to newly started processes
    pub start_status: ProcessState,
    /// If true, `start` fails
    pub fail_start: bool,
}

impl Default for MockSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSupervisor {
    pub fn new() -> Self {
        Self {
            processes: Mutex::new(BTreeMap::new()),
            descriptors: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            start_status: ProcessState::Online,
            fail_start: false,
        }
    }

    /// Register a process as if it was already running
    pub async fn insert_process(&self, name: &str, status: ProcessState) {
        self.processes.lock().await.insert(
            name.to_string(),
            SupervisedProcess {
                name: name.to_string(),
                pid: Some(4242),
                status,
                uptime_ms: 1000,
                cpu: 1.5,
                memory: 64 * 1024 * 1024,
            },
        );
    }

    /// Calls received so far, e.g. `start:api`
    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    pub async fn count_calls(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Descriptor the process was last started with
    pub async fn descriptor(&self, name: &str) -> Option<ProcessDescriptor> {
        self.descriptors.lock().await.get(name).cloned()
    }

    async fn record(&self, call: String) {
        self.calls.lock().await.push(call);
    }

    async fn set_status(&self, name: &str, status: ProcessState) -> Result<(), DeployError> {
        let mut processes = self.processes.lock().await;
        let process = processes
            .get_mut(name)
            .ok_or_else(|| DeployError::Supervisor(format!("process {} not found", name)))?;
        process.status = status;
        Ok(())
    }
}

#[async_trait]
impl ProcessSupervisor for MockSupervisor {
    async fn connect(&self) -> Result<(), DeployError> {
        self.record("connect".to_string()).await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DeployError> {
        self.record("disconnect".to_string()).await;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SupervisedProcess>, DeployError> {
        self.record("list".to_string()).await;
        Ok(self.processes.lock().await.values().cloned().collect())
    }

    async fn start(&self, descriptor: &ProcessDescriptor) -> Result<(), DeployError> {
        self.record(format!("start:{}", descriptor.name)).await;
        if self.fail_start {
            return Err(DeployError::Supervisor("start refused".to_string()));
        }
        self.insert_process(&descriptor.name, self.start_status).await;
        self.descriptors
            .lock()
            .await
            .insert(descriptor.name.clone(), descriptor.clone());
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), DeployError> {
        self.record(format!("stop:{}", name)).await;
        self.set_status(name, ProcessState::Stopped).await
    }

    async fn restart(&self, name: &str) -> Result<(), DeployError> {
        self.record(format!("restart:{}", name)).await;
        self.set_status(name, ProcessState::Online).await
    }

    async fn delete(&self, name: &str) -> Result<(), DeployError> {
        self.record(format!("delete:{}", name)).await;
        self.processes.lock().await.remove(name);
        Ok(())
    }
}
