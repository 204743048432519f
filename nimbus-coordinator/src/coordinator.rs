use crate::catalog::CatalogManager;
use crate::dispatcher::{Dispatcher, Reservation};
use crate::request::{ClusterPatch, ClusterRequest, Placement};
use nimbus_core::config::ClusterLogsConfig;
use nimbus_core::validate::{check_topology, require_health_checks, validate_cluster_name, validate_services};
use nimbus_core::{
    Action, Catalog, Cluster, EntityStatus, NimbusConfig, NimbusError, Project, RemoteExecutor, Resolver,
    Service, ServiceClass, ValidationError,
};
use nimbus_observability::{LogError, cluster_logger};
use nimbus_store::Database;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// API boundary for cluster operations.
///
/// Validates synchronously, persists the intended state, then hands the run
/// to the [`Dispatcher`]. Requests return as soon as the cluster is INITED
/// or STOPPING.
pub struct Coordinator {
    db: Arc<dyn Database>,
    catalog: Arc<CatalogManager>,
    dispatcher: Arc<Dispatcher>,
    logs: ClusterLogsConfig,
    max_dependency_passes: usize,
}

impl Coordinator {
    pub async fn new(
        config: &NimbusConfig,
        db: Arc<dyn Database>,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Result<Self, NimbusError> {
        let catalog = Arc::new(CatalogManager::load(Arc::clone(&db)).await?);
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&db),
            executor,
            config.effective_workers(),
            Duration::from_secs(config.coordinator.launch_timeout_secs),
        ));
        Ok(Self {
            db,
            catalog,
            dispatcher,
            logs: config.logs.clone(),
            max_dependency_passes: config.coordinator.max_dependency_passes,
        })
    }

    pub fn catalog(&self) -> &CatalogManager {
        &self.catalog
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub(crate) fn db(&self) -> &dyn Database {
        self.db.as_ref()
    }

    fn resolver<'a>(&self, catalog: &'a Catalog) -> Resolver<'a> {
        let resolver = Resolver::new(catalog);
        if self.max_dependency_passes > 0 {
            resolver.with_max_passes(self.max_dependency_passes)
        } else {
            resolver
        }
    }

    async fn project(&self, id_or_name: &str) -> Result<Project, NimbusError> {
        self.db
            .read_project(id_or_name)
            .await?
            .ok_or_else(|| NimbusError::not_found("project", id_or_name))
    }

    pub async fn get_cluster(&self, project: &str, id_or_name: &str) -> Result<Cluster, NimbusError> {
        let project = self.project(project).await?;
        self.db
            .read_cluster(&project.id, id_or_name)
            .await?
            .ok_or_else(|| NimbusError::not_found("cluster", id_or_name))
    }

    pub async fn list_clusters(&self, project: &str) -> Result<Vec<Cluster>, NimbusError> {
        let project = self.project(project).await?;
        let mut clusters = self.db.list_project_clusters(&project.id).await?;
        clusters.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(clusters)
    }

    async fn check_placement(&self, placement: &Placement) -> Result<(), NimbusError> {
        if self.db.read_image(&placement.image).await?.is_none() {
            return Err(ValidationError::ImageNotFound(placement.image.clone()).into());
        }
        let flavors = [
            ("master flavor", &placement.master_flavor),
            ("slaves flavor", &placement.slaves_flavor),
            ("storage flavor", &placement.storage_flavor),
            ("monitoring flavor", &placement.monitoring_flavor),
        ];
        for (field, name) in flavors {
            if self.db.read_flavor(name).await?.is_none() {
                return Err(ValidationError::FlavorNotFound {
                    field,
                    name: name.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Validate, expand dependencies, persist as INITED, dispatch the run.
    ///
    /// A same-named FAILED cluster is retried in place under its old id.
    pub async fn create_cluster(&self, project: &str, request: ClusterRequest) -> Result<Cluster, NimbusError> {
        let project = self.project(project).await?;
        validate_cluster_name(&request.display_name)?;
        let placement = request.placement(&project);
        self.check_placement(&placement).await?;

        let name = Cluster::full_name(&request.display_name, &project.name);
        let existing = self.db.read_cluster(&project.id, &name).await?;
        if let Some(existing) = &existing
            && existing.entity_status != EntityStatus::Failed
        {
            return Err(ValidationError::ClusterExists(name).into());
        }

        let catalog = self.catalog.snapshot();
        let mut services = request.services;
        for service in services.iter_mut() {
            assign_id(service);
        }
        validate_services(&catalog, &mut services)?;
        let services = self.resolver(&catalog).resolve(&services, 0)?;
        require_health_checks(&catalog, &services)?;
        check_topology(&catalog, &services, request.n_hosts)?;

        let cluster = Cluster {
            id: existing
                .as_ref()
                .map(|c| c.id.clone())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            name,
            display_name: request.display_name,
            description: request.description,
            project_id: project.id.clone(),
            n_hosts: request.n_hosts,
            image: placement.image,
            master_flavor: placement.master_flavor,
            slaves_flavor: placement.slaves_flavor,
            storage_flavor: placement.storage_flavor,
            monitoring_flavor: placement.monitoring_flavor,
            services,
            entity_status: EntityStatus::Inited,
            monitoring: request.monitoring,
            keys: request.keys,
            ..Default::default()
        };

        let (reservation, stored) = match existing {
            Some(previous) => {
                let reservation = self.reserve_settled(&previous)?;
                info!(cluster_id = %previous.id, cluster = %cluster.name, "Retrying failed cluster");
                let retry = Cluster {
                    revision: previous.revision,
                    created_at: previous.created_at,
                    ..cluster
                };
                (reservation, self.db.update_cluster(&retry).await?)
            }
            None => {
                let reservation = self
                    .dispatcher
                    .reserve(&cluster.id)
                    .ok_or_else(|| NimbusError::Conflict(cluster.id.clone()))?;
                (reservation, self.db.write_cluster(&cluster).await?)
            }
        };
        info!(
            cluster_id = %stored.id,
            cluster = %stored.name,
            services = stored.services.len(),
            n_hosts = stored.n_hosts,
            "Cluster accepted"
        );
        self.dispatcher.submit(reservation, stored.clone(), Action::Create);
        Ok(stored)
    }

    /// Append services and/or resize, persist as INITED, dispatch the run.
    ///
    /// New hosts (an added storage service or a host count change) need a
    /// full provisioning run; otherwise only the existing nodes are modified.
    pub async fn update_cluster(
        &self,
        project: &str,
        id_or_name: &str,
        patch: ClusterPatch,
    ) -> Result<Cluster, NimbusError> {
        let project = self.project(project).await?;
        let old = self
            .db
            .read_cluster(&project.id, id_or_name)
            .await?
            .ok_or_else(|| NimbusError::not_found("cluster", id_or_name))?;
        let reservation = self.reserve_settled(&old)?;

        let catalog = self.catalog.snapshot();
        let mut next = old.clone();
        if let Some(display_name) = patch.display_name {
            validate_cluster_name(&display_name)?;
            next.display_name = display_name;
        }
        if let Some(description) = patch.description {
            next.description = description;
        }
        let resized = patch.n_hosts.is_some_and(|n| n != old.n_hosts);
        if let Some(n_hosts) = patch.n_hosts {
            next.n_hosts = n_hosts;
        }

        let mut appended: Vec<Service> = Vec::new();
        for mut service in patch.services {
            if old.service_of_type(&service.service_type).is_some() {
                debug!(cluster_id = %old.id, service_type = %service.service_type, "Service already deployed, skipped");
                continue;
            }
            service.id = uuid::Uuid::new_v4().to_string();
            appended.push(service);
        }
        validate_services(&catalog, &mut appended)?;

        let start = old.services.len();
        let mut combined = old.services.clone();
        combined.extend(appended);
        let services = self.resolver(&catalog).resolve(&combined, start)?;
        let new_hosts = resized
            || services[start..]
                .iter()
                .any(|s| catalog.class_of(&s.service_type) == Some(ServiceClass::Storage));
        check_topology(&catalog, &services, next.n_hosts)?;

        next.services = services;
        next.entity_status = EntityStatus::Inited;
        let stored = self.db.update_cluster(&next).await?;

        let action = if new_hosts { Action::Create } else { Action::Update };
        info!(
            cluster_id = %stored.id,
            added = stored.services.len() - start,
            new_hosts,
            action = %action,
            "Cluster update accepted"
        );
        self.dispatcher.submit(reservation, stored.clone(), action);
        Ok(stored)
    }

    /// Persist STOPPING and dispatch the destroy run.
    pub async fn delete_cluster(&self, project: &str, id_or_name: &str) -> Result<Cluster, NimbusError> {
        let project = self.project(project).await?;
        let mut cluster = self
            .db
            .read_cluster(&project.id, id_or_name)
            .await?
            .ok_or_else(|| NimbusError::not_found("cluster", id_or_name))?;
        let reservation = self.reserve_settled(&cluster)?;

        cluster.entity_status = EntityStatus::Stopping;
        let stored = self.db.update_cluster(&cluster).await?;
        info!(cluster_id = %stored.id, cluster = %stored.name, "Cluster deletion accepted");
        self.dispatcher.submit(reservation, stored.clone(), Action::Delete);
        Ok(stored)
    }

    /// Output of the cluster's most recent run, or of `action`'s run.
    pub async fn cluster_logs(
        &self,
        project: &str,
        id_or_name: &str,
        action: Option<Action>,
    ) -> Result<String, NimbusError> {
        let cluster = self.get_cluster(project, id_or_name).await?;
        let actions = match action {
            Some(action) => vec![action],
            None => vec![Action::Delete, Action::Update, Action::Create],
        };
        for action in actions {
            let logger = cluster_logger(&self.logs, &cluster.id, &cluster.name, action);
            match logger.read_logs().await {
                Ok(logs) => return Ok(logs),
                Err(LogError::Missing(_)) => continue,
                Err(e) => return Err(NimbusError::Internal(format!("reading cluster logs: {}", e))),
            }
        }
        Err(NimbusError::not_found("logs of cluster", cluster.name))
    }

    /// Only ACTIVE or FAILED clusters with no run in flight accept Update or
    /// Delete. The reservation is taken before the transient status is written.
    fn reserve_settled(&self, cluster: &Cluster) -> Result<Reservation, NimbusError> {
        let invalid = || NimbusError::InvalidState {
            id: cluster.id.clone(),
            status: cluster.entity_status,
        };
        if !cluster.entity_status.accepts_modification() {
            return Err(invalid());
        }
        self.dispatcher.reserve(&cluster.id).ok_or_else(invalid)
    }

    /// Mark FAILED every INITED or STOPPING cluster with no run in flight.
    ///
    /// Returns the number of clusters marked.
    pub async fn reconcile(&self) -> Result<usize, NimbusError> {
        self.catalog.reload().await?;
        let mut marked = 0;
        for mut cluster in self.db.list_clusters().await? {
            if !cluster.entity_status.is_transient() || self.dispatcher.is_in_flight(&cluster.id) {
                continue;
            }
            let previous = cluster.entity_status;
            cluster.entity_status = EntityStatus::Failed;
            match self.db.update_cluster(&cluster).await {
                Ok(_) => {
                    warn!(cluster_id = %cluster.id, previous = %previous, "Orphaned cluster marked FAILED");
                    marked += 1;
                }
                Err(e) => warn!(cluster_id = %cluster.id, error = %e, "Orphaned cluster not marked"),
            }
        }
        Ok(marked)
    }
}

fn assign_id(service: &mut Service) {
    if service.id.is_empty() {
        service.id = uuid::Uuid::new_v4().to_string();
    }
}
