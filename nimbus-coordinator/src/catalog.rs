use arc_swap::ArcSwap;
use nimbus_core::authoring::{
    ServiceConfigPatch, ServiceTypePatch, ServiceVersionPatch, add_config, check_type_deletable,
    check_version_deletable, prepare_service_type, prepare_version,
};
use nimbus_core::{Catalog, CatalogError, NimbusError, ServiceConfig, ServiceType, ServiceVersion};
use nimbus_store::Database;
use std::sync::Arc;
use tracing::{debug, info};

/// Catalog mutations plus the snapshot cluster requests validate against.
///
/// Every mutation is checked against a freshly loaded catalog and the
/// clusters currently in the store, then written, then the snapshot is
/// swapped. Readers holding an older snapshot are unaffected.
pub struct CatalogManager {
    db: Arc<dyn Database>,
    snapshot: ArcSwap<Catalog>,
}

impl CatalogManager {
    pub async fn load(db: Arc<dyn Database>) -> Result<Self, NimbusError> {
        let catalog = Catalog::new(db.list_service_types().await?);
        info!(service_types = catalog.len(), "Catalog loaded");
        Ok(Self {
            db,
            snapshot: ArcSwap::new(Arc::new(catalog)),
        })
    }

    pub fn snapshot(&self) -> Arc<Catalog> {
        self.snapshot.load_full()
    }

    /// Rebuild the snapshot from the store.
    pub async fn reload(&self) -> Result<Arc<Catalog>, NimbusError> {
        let catalog = Arc::new(Catalog::new(self.db.list_service_types().await?));
        self.snapshot.store(Arc::clone(&catalog));
        debug!(service_types = catalog.len(), "Catalog snapshot swapped");
        Ok(catalog)
    }

    pub fn list_service_types(&self) -> Vec<ServiceType> {
        self.snapshot().iter().cloned().collect()
    }

    pub async fn service_type(&self, name: &str) -> Result<ServiceType, NimbusError> {
        self.db
            .read_service_type(name)
            .await?
            .ok_or_else(|| NimbusError::not_found("service type", name))
    }

    pub async fn create_service_type(&self, mut st: ServiceType) -> Result<ServiceType, NimbusError> {
        let catalog = self.reload().await?;
        prepare_service_type(&catalog, &mut st)?;
        self.db.write_service_type(&st).await?;
        self.reload().await?;
        info!(service_type = %st.service_type, versions = st.versions.len(), "Service type created");
        Ok(st)
    }

    pub async fn update_service_type(
        &self,
        name: &str,
        patch: ServiceTypePatch,
    ) -> Result<ServiceType, NimbusError> {
        let mut st = self.service_type(name).await?;
        patch.apply(&mut st)?;
        self.db.update_service_type(&st).await?;
        self.reload().await?;
        info!(service_type = %name, "Service type updated");
        Ok(st)
    }

    pub async fn delete_service_type(&self, name: &str) -> Result<(), NimbusError> {
        let catalog = self.reload().await?;
        let clusters = self.db.list_clusters().await?;
        check_type_deletable(&catalog, name, &clusters)?;
        self.db.delete_service_type(name).await?;
        self.reload().await?;
        info!(service_type = %name, "Service type deleted");
        Ok(())
    }

    pub async fn add_version(
        &self,
        service_type: &str,
        mut version: ServiceVersion,
    ) -> Result<ServiceVersion, NimbusError> {
        let catalog = self.reload().await?;
        let mut st = self.service_type(service_type).await?;
        prepare_version(&catalog, service_type, &st.versions, &mut version)?;
        st.versions.push(version.clone());
        self.db.update_service_type(&st).await?;
        self.reload().await?;
        info!(service_type = %service_type, version = %version.version, "Service version added");
        Ok(version)
    }

    pub async fn update_version(
        &self,
        service_type: &str,
        version: &str,
        patch: ServiceVersionPatch,
    ) -> Result<ServiceVersion, NimbusError> {
        let mut st = self.service_type(service_type).await?;
        let target = version_mut(&mut st, version)?;
        patch.apply(target);
        let updated = target.clone();
        self.db.update_service_type(&st).await?;
        self.reload().await?;
        Ok(updated)
    }

    pub async fn delete_version(&self, service_type: &str, version: &str) -> Result<(), NimbusError> {
        let catalog = self.reload().await?;
        let clusters = self.db.list_clusters().await?;
        check_version_deletable(&catalog, service_type, version, &clusters)?;

        let mut st = self.service_type(service_type).await?;
        st.versions.retain(|v| v.version != version);
        self.db.update_service_type(&st).await?;
        self.reload().await?;
        info!(service_type = %service_type, version = %version, "Service version deleted");
        Ok(())
    }

    pub async fn add_config(
        &self,
        service_type: &str,
        version: &str,
        config: ServiceConfig,
    ) -> Result<ServiceConfig, NimbusError> {
        let mut st = self.service_type(service_type).await?;
        let parameter = config.parameter_name.clone();
        let target = version_mut(&mut st, version)?;
        add_config(service_type, target, config)?;
        let added = target
            .config(&parameter)
            .cloned()
            .ok_or_else(|| NimbusError::Internal(format!("config {} vanished after insert", parameter)))?;
        self.db.update_service_type(&st).await?;
        self.reload().await?;
        info!(service_type = %service_type, version = %version, parameter = %parameter, "Config added");
        Ok(added)
    }

    pub async fn update_config(
        &self,
        service_type: &str,
        version: &str,
        parameter: &str,
        patch: ServiceConfigPatch,
    ) -> Result<ServiceConfig, NimbusError> {
        let mut st = self.service_type(service_type).await?;
        let target = version_mut(&mut st, version)?;
        let config = target
            .configs
            .iter_mut()
            .find(|c| c.parameter_name == parameter)
            .ok_or_else(|| CatalogError::ParameterNotFound(parameter.to_string()))?;
        patch.apply(service_type, config)?;
        let updated = config.clone();
        self.db.update_service_type(&st).await?;
        self.reload().await?;
        Ok(updated)
    }
}

fn version_mut<'a>(st: &'a mut ServiceType, version: &str) -> Result<&'a mut ServiceVersion, CatalogError> {
    let service_type = st.service_type.clone();
    st.version_mut(version).ok_or(CatalogError::VersionNotFound {
        service_type,
        version: version.to_string(),
    })
}
