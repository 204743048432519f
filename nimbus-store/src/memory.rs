use crate::db::{Database, Result};
use crate::error::StoreError;
use crate::persist::StateFile;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use nimbus_core::{Cluster, Flavor, Image, Project, ServiceType};
use std::sync::Arc;
use tracing::debug;

/// In-memory database for single-process deployments.
///
/// Every mutation is written through to the JSON state file when one is
/// configured, and the file is loaded back on startup.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    pub service_types: Arc<DashMap<String, ServiceType>>,
    pub clusters: Arc<DashMap<String, Cluster>>,
    pub projects: Arc<DashMap<String, Project>>,
    pub images: Arc<DashMap<String, Image>>,
    pub flavors: Arc<DashMap<String, Flavor>>,
    /// (project id, cluster name) → cluster id
    cluster_names: Arc<DashMap<(String, String), String>>,
    state_file: Option<Arc<StateFile>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Database persisted to `path`, restored from it if it exists.
    pub fn with_state_file(path: impl Into<std::path::PathBuf>) -> Self {
        let file = StateFile::new(path);
        let db = Self::default();
        file.load(&db);
        Self {
            state_file: Some(Arc::new(file)),
            ..db
        }
    }

    /// Rebuild the name index after a bulk load.
    pub(crate) fn rebuild_name_index(&self) {
        self.cluster_names.clear();
        for entry in self.clusters.iter() {
            let c = entry.value();
            self.cluster_names
                .insert((c.project_id.clone(), c.name.clone()), c.id.clone());
        }
    }

    async fn persist(&self) {
        if let Some(file) = &self.state_file {
            file.save(self).await;
        }
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn read_service_type(&self, name: &str) -> Result<Option<ServiceType>> {
        Ok(self.service_types.get(name).map(|e| e.value().clone()))
    }

    async fn list_service_types(&self) -> Result<Vec<ServiceType>> {
        let mut types: Vec<ServiceType> = self.service_types.iter().map(|e| e.value().clone()).collect();
        types.sort_by(|a, b| a.service_type.cmp(&b.service_type));
        Ok(types)
    }

    async fn write_service_type(&self, service_type: &ServiceType) -> Result<()> {
        match self.service_types.entry(service_type.service_type.clone()) {
            Entry::Occupied(_) => return Err(StoreError::exists("service type", &service_type.service_type)),
            Entry::Vacant(v) => {
                v.insert(service_type.clone());
            }
        }
        debug!(service_type = %service_type.service_type, "Service type written");
        self.persist().await;
        Ok(())
    }

    async fn update_service_type(&self, service_type: &ServiceType) -> Result<()> {
        match self.service_types.get_mut(&service_type.service_type) {
            Some(mut entry) => *entry = service_type.clone(),
            None => return Err(StoreError::not_found("service type", &service_type.service_type)),
        }
        self.persist().await;
        Ok(())
    }

    async fn delete_service_type(&self, name: &str) -> Result<()> {
        if self.service_types.remove(name).is_none() {
            return Err(StoreError::not_found("service type", name));
        }
        self.persist().await;
        Ok(())
    }

    async fn read_cluster(&self, project_id: &str, id_or_name: &str) -> Result<Option<Cluster>> {
        if let Some(c) = self.clusters.get(id_or_name)
            && c.project_id == project_id
        {
            return Ok(Some(c.value().clone()));
        }
        let id = self
            .cluster_names
            .get(&(project_id.to_string(), id_or_name.to_string()))
            .map(|e| e.value().clone());
        Ok(id.and_then(|id| self.clusters.get(&id).map(|c| c.value().clone())))
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        Ok(self.clusters.iter().map(|e| e.value().clone()).collect())
    }

    async fn write_cluster(&self, cluster: &Cluster) -> Result<Cluster> {
        if self.clusters.contains_key(&cluster.id) {
            return Err(StoreError::exists("cluster", &cluster.id));
        }
        let mut stored = cluster.clone();
        stored.revision = 1;
        stored.created_at = Some(chrono::Utc::now());
        stored.updated_at = stored.created_at;

        match self
            .cluster_names
            .entry((cluster.project_id.clone(), cluster.name.clone()))
        {
            Entry::Occupied(_) => return Err(StoreError::exists("cluster", &cluster.name)),
            Entry::Vacant(v) => {
                v.insert(cluster.id.clone());
            }
        }
        self.clusters.insert(stored.id.clone(), stored.clone());
        debug!(cluster_id = %stored.id, status = %stored.entity_status, "Cluster written");
        self.persist().await;
        Ok(stored)
    }

    async fn update_cluster(&self, cluster: &Cluster) -> Result<Cluster> {
        let stored = {
            let mut entry = self
                .clusters
                .get_mut(&cluster.id)
                .ok_or_else(|| StoreError::not_found("cluster", &cluster.id))?;
            if entry.revision != cluster.revision {
                return Err(StoreError::Conflict {
                    id: cluster.id.clone(),
                    expected: cluster.revision,
                    found: entry.revision,
                });
            }
            let mut next = cluster.clone();
            next.revision = entry.revision + 1;
            next.created_at = entry.created_at;
            next.updated_at = Some(chrono::Utc::now());
            *entry = next.clone();
            next
        };
        debug!(
            cluster_id = %stored.id,
            status = %stored.entity_status,
            revision = stored.revision,
            "Cluster updated"
        );
        self.persist().await;
        Ok(stored)
    }

    async fn delete_cluster(&self, project_id: &str, id: &str) -> Result<()> {
        let removed = self
            .clusters
            .remove_if(id, |_, c| c.project_id == project_id)
            .ok_or_else(|| StoreError::not_found("cluster", id))?;
        self.cluster_names
            .remove(&(removed.1.project_id.clone(), removed.1.name.clone()));
        debug!(cluster_id = %id, "Cluster deleted");
        self.persist().await;
        Ok(())
    }

    async fn read_project(&self, id_or_name: &str) -> Result<Option<Project>> {
        if let Some(p) = self.projects.get(id_or_name) {
            return Ok(Some(p.value().clone()));
        }
        Ok(self
            .projects
            .iter()
            .find(|e| e.value().name == id_or_name)
            .map(|e| e.value().clone()))
    }

    async fn write_project(&self, project: &Project) -> Result<()> {
        self.projects.insert(project.id.clone(), project.clone());
        self.persist().await;
        Ok(())
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.projects.iter().map(|e| e.value().clone()).collect())
    }

    async fn delete_project(&self, id: &str) -> Result<()> {
        if self.projects.remove(id).is_none() {
            return Err(StoreError::not_found("project", id));
        }
        self.persist().await;
        Ok(())
    }

    async fn read_image(&self, name: &str) -> Result<Option<Image>> {
        Ok(self.images.get(name).map(|e| e.value().clone()))
    }

    async fn write_image(&self, image: &Image) -> Result<()> {
        self.images.insert(image.name.clone(), image.clone());
        self.persist().await;
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<Image>> {
        Ok(self.images.iter().map(|e| e.value().clone()).collect())
    }

    async fn delete_image(&self, name: &str) -> Result<()> {
        if self.images.remove(name).is_none() {
            return Err(StoreError::not_found("image", name));
        }
        self.persist().await;
        Ok(())
    }

    async fn read_flavor(&self, name: &str) -> Result<Option<Flavor>> {
        Ok(self.flavors.get(name).map(|e| e.value().clone()))
    }

    async fn write_flavor(&self, flavor: &Flavor) -> Result<()> {
        self.flavors.insert(flavor.name.clone(), flavor.clone());
        self.persist().await;
        Ok(())
    }

    async fn list_flavors(&self) -> Result<Vec<Flavor>> {
        Ok(self.flavors.iter().map(|e| e.value().clone()).collect())
    }

    async fn delete_flavor(&self, name: &str) -> Result<()> {
        if self.flavors.remove(name).is_none() {
            return Err(StoreError::not_found("flavor", name));
        }
        self.persist().await;
        Ok(())
    }
}
