use crate::error::StoreError;
use async_trait::async_trait;
use nimbus_core::{Cluster, Flavor, Image, Project, ServiceType, ServiceVersion};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence capability shared by the coordinator and the launcher.
///
/// Single reads return `None` when the record is absent. Cluster updates are
/// compare-and-swap on [`Cluster::revision`].
#[async_trait]
pub trait Database: Send + Sync {
    // ── Catalog ──

    async fn read_service_type(&self, name: &str) -> Result<Option<ServiceType>>;

    /// All service types, ordered by type name.
    async fn list_service_types(&self) -> Result<Vec<ServiceType>>;

    /// Insert a new service type. Fails if the type already exists.
    async fn write_service_type(&self, service_type: &ServiceType) -> Result<()>;

    /// Replace an existing service type.
    async fn update_service_type(&self, service_type: &ServiceType) -> Result<()>;

    async fn delete_service_type(&self, name: &str) -> Result<()>;

    /// Look up a version by id or version string.
    async fn read_service_version(
        &self,
        service_type: &str,
        id_or_version: &str,
    ) -> Result<Option<ServiceVersion>> {
        Ok(self.read_service_type(service_type).await?.and_then(|st| {
            st.versions
                .into_iter()
                .find(|v| v.id == id_or_version || v.version == id_or_version)
        }))
    }

    // ── Clusters ──

    /// Look up a cluster of a project by id or name.
    async fn read_cluster(&self, project_id: &str, id_or_name: &str) -> Result<Option<Cluster>>;

    async fn list_clusters(&self) -> Result<Vec<Cluster>>;

    async fn list_project_clusters(&self, project_id: &str) -> Result<Vec<Cluster>> {
        Ok(self
            .list_clusters()
            .await?
            .into_iter()
            .filter(|c| c.project_id == project_id)
            .collect())
    }

    /// Insert a new cluster with revision 1. Fails if its id or its name
    /// within the project is taken.
    async fn write_cluster(&self, cluster: &Cluster) -> Result<Cluster>;

    /// Replace a cluster if the stored revision equals `cluster.revision`.
    /// Returns the stored record with the bumped revision.
    async fn update_cluster(&self, cluster: &Cluster) -> Result<Cluster>;

    async fn delete_cluster(&self, project_id: &str, id: &str) -> Result<()>;

    // ── Projects, images, flavors ──

    /// Look up a project by id or name.
    async fn read_project(&self, id_or_name: &str) -> Result<Option<Project>>;

    async fn write_project(&self, project: &Project) -> Result<()>;

    async fn list_projects(&self) -> Result<Vec<Project>>;

    async fn delete_project(&self, id: &str) -> Result<()>;

    async fn read_image(&self, name: &str) -> Result<Option<Image>>;

    /// Insert or replace an image keyed by name.
    async fn write_image(&self, image: &Image) -> Result<()>;

    async fn list_images(&self) -> Result<Vec<Image>>;

    async fn delete_image(&self, name: &str) -> Result<()>;

    async fn read_flavor(&self, name: &str) -> Result<Option<Flavor>>;

    /// Insert or replace a flavor keyed by name.
    async fn write_flavor(&self, flavor: &Flavor) -> Result<()>;

    async fn list_flavors(&self) -> Result<Vec<Flavor>>;

    async fn delete_flavor(&self, name: &str) -> Result<()>;
}
