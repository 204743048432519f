use crate::service::Service;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A provisioned (or provisioning) multi-service cluster.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Cluster {
    #[serde(default)]
    pub id: String,

    /// `<display_name>-<project_name>`, unique within a project.
    #[serde(default)]
    pub name: String,

    pub display_name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub project_id: String,

    /// Slave host count.
    #[serde(default)]
    pub n_hosts: u32,

    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub master_flavor: String,

    #[serde(default)]
    pub slaves_flavor: String,

    #[serde(default)]
    pub storage_flavor: String,

    #[serde(default)]
    pub monitoring_flavor: String,

    #[serde(default)]
    pub services: Vec<Service>,

    #[serde(default)]
    pub entity_status: EntityStatus,

    #[serde(default)]
    pub master_ip: String,

    #[serde(default)]
    pub monitoring: bool,

    /// Public SSH keys installed on every node.
    #[serde(default)]
    pub keys: Vec<String>,

    /// Optimistic concurrency token, bumped by every store update.
    #[serde(default)]
    pub revision: u64,

    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,

    #[serde(default)]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Cluster {
    pub fn full_name(display_name: &str, project_name: &str) -> String {
        format!("{}-{}", display_name, project_name)
    }

    pub fn service_of_type(&self, service_type: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.service_type == service_type)
    }

    pub fn uses_version(&self, service_type: &str, version: &str) -> bool {
        self.services
            .iter()
            .any(|s| s.service_type == service_type && s.version == version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityStatus {
    #[default]
    Inited,
    Active,
    Failed,
    Stopping,
    Missing,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Inited => "INITED",
            EntityStatus::Active => "ACTIVE",
            EntityStatus::Failed => "FAILED",
            EntityStatus::Stopping => "STOPPING",
            EntityStatus::Missing => "MISSING",
        }
    }

    /// Only settled clusters accept Update or Delete.
    pub fn accepts_modification(&self) -> bool {
        matches!(self, EntityStatus::Active | EntityStatus::Failed)
    }

    /// A run is expected to be in progress.
    pub fn is_transient(&self) -> bool {
        matches!(self, EntityStatus::Inited | EntityStatus::Stopping)
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_gating() {
        assert!(EntityStatus::Active.accepts_modification());
        assert!(EntityStatus::Failed.accepts_modification());
        assert!(!EntityStatus::Inited.accepts_modification());
        assert!(!EntityStatus::Stopping.accepts_modification());
        assert!(EntityStatus::Stopping.is_transient());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&EntityStatus::Stopping).unwrap();
        assert_eq!(json, "\"STOPPING\"");
        let status: EntityStatus = serde_json::from_str("\"FAILED\"").unwrap();
        assert_eq!(status, EntityStatus::Failed);
    }

    #[test]
    fn test_full_name() {
        assert_eq!(Cluster::full_name("demo", "research"), "demo-research");
    }
}
