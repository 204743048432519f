use crate::cluster::Cluster;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle action a provisioning run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }

    /// Action tag understood by the automation playbooks.
    pub fn act(&self) -> &'static str {
        match self {
            Action::Create | Action::Update => "launch",
            Action::Delete => "destroy",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of one provisioning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Ok,
    /// Setup, compilation, or discovery failed.
    Fail,
    /// The automation process reported failure.
    RunFail,
}

impl TaskStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, TaskStatus::Ok)
    }
}

#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    /// The cluster as left by the run (discovered IPs, service URLs).
    pub cluster: Cluster,
}

impl TaskOutcome {
    pub fn ok(cluster: Cluster) -> Self {
        Self {
            status: TaskStatus::Ok,
            cluster,
        }
    }

    pub fn failed(status: TaskStatus, cluster: Cluster) -> Self {
        Self { status, cluster }
    }
}

/// Boundary between the coordinator and the orchestration tier.
///
/// Each call resolves exactly once, after the full automation run.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Full provisioning: instances, then services.
    async fn create(&self, cluster: Cluster) -> TaskOutcome;

    /// Reconfigure existing nodes only.
    async fn update(&self, cluster: Cluster) -> TaskOutcome;

    async fn delete(&self, cluster: Cluster) -> TaskOutcome;
}
