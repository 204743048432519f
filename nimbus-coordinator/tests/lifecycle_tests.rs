use async_trait::async_trait;
use nimbus_coordinator::{ClusterPatch, ClusterRequest, Coordinator};
use nimbus_core::{
    Action, CatalogError, Cluster, EntityStatus, Flavor, HealthCheck, Image, NimbusConfig, NimbusError,
    Project, RemoteExecutor, Service, ServiceClass, ServiceDependency, ServiceType, ServiceVersion,
    TaskOutcome, TaskStatus, ValidationError,
};
use nimbus_store::{Database, MemoryDatabase};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Records runs. Runs wait on `gate` when set; actions in `failing` fail.
#[derive(Default)]
struct FakeExecutor {
    calls: Mutex<Vec<Action>>,
    failing: Vec<Action>,
    gate: Option<Arc<Semaphore>>,
    delay: Option<Duration>,
}

impl FakeExecutor {
    fn actions(&self) -> Vec<Action> {
        self.calls.lock().unwrap().clone()
    }

    async fn run(&self, mut cluster: Cluster, action: Action) -> TaskOutcome {
        self.calls.lock().unwrap().push(action);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(&action) {
            return TaskOutcome::failed(TaskStatus::RunFail, cluster);
        }
        cluster.master_ip = "10.0.0.5".into();
        TaskOutcome::ok(cluster)
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn create(&self, cluster: Cluster) -> TaskOutcome {
        self.run(cluster, Action::Create).await
    }

    async fn update(&self, cluster: Cluster) -> TaskOutcome {
        self.run(cluster, Action::Update).await
    }

    async fn delete(&self, cluster: Cluster) -> TaskOutcome {
        self.run(cluster, Action::Delete).await
    }
}

fn version(v: &str, dependencies: Vec<ServiceDependency>) -> ServiceVersion {
    ServiceVersion {
        id: String::new(),
        version: v.into(),
        description: String::new(),
        download_url: String::new(),
        configs: vec![],
        dependencies,
    }
}

fn service_type(name: &str, class: ServiceClass, versions: Vec<ServiceVersion>, checked: bool) -> ServiceType {
    ServiceType {
        id: String::new(),
        service_type: name.into(),
        description: String::new(),
        default_version: versions[0].version.clone(),
        class,
        access_port: None,
        ports: vec![],
        versions,
        health_check: checked.then(|| HealthCheck {
            check_type: "script".into(),
            configs: vec![],
        }),
    }
}

async fn setup(dir: &Path, executor: Arc<FakeExecutor>) -> (Coordinator, Arc<MemoryDatabase>) {
    let db = Arc::new(MemoryDatabase::new());
    db.write_project(&Project {
        id: "p1".into(),
        name: "research".into(),
        default_image: "ubuntu".into(),
        default_master_flavor: "m1.small".into(),
        default_slaves_flavor: "m1.small".into(),
        default_storage_flavor: "m1.small".into(),
        default_monitoring_flavor: "m1.small".into(),
        ..Default::default()
    })
    .await
    .unwrap();
    db.write_image(&Image {
        name: "ubuntu".into(),
        ansible_user: "ubuntu".into(),
        cloud_image_id: "img-1".into(),
        ..Default::default()
    })
    .await
    .unwrap();
    db.write_flavor(&Flavor {
        name: "m1.small".into(),
        vcpus: 1,
        ram: 2048,
        disk: 20,
        ..Default::default()
    })
    .await
    .unwrap();

    let mut config = NimbusConfig::default();
    config.logs.file_path = dir.join("logs");
    config.coordinator.launch_timeout_secs = 1;
    let coordinator = Coordinator::new(&config, db.clone(), executor).await.unwrap();

    let catalog = coordinator.catalog();
    catalog
        .create_service_type(service_type(
            "spark",
            ServiceClass::MasterSlave,
            vec![version("2.4", vec![]), version("3.0", vec![])],
            true,
        ))
        .await
        .unwrap();
    let on_spark = ServiceDependency {
        service_type: "spark".into(),
        service_versions: vec!["2.4".into(), "3.0".into()],
        default_service_version: "2.4".into(),
        description: String::new(),
    };
    catalog
        .create_service_type(service_type(
            "jupyterhub",
            ServiceClass::StandAlone,
            vec![version("v1", vec![on_spark])],
            true,
        ))
        .await
        .unwrap();
    catalog
        .create_service_type(service_type("nfs", ServiceClass::Storage, vec![version("4", vec![])], true))
        .await
        .unwrap();
    catalog
        .create_service_type(service_type("grafana", ServiceClass::StandAlone, vec![version("7", vec![])], false))
        .await
        .unwrap();

    (coordinator, db)
}

fn request(display_name: &str, n_hosts: u32, services: &[(&str, &str)]) -> ClusterRequest {
    ClusterRequest {
        display_name: display_name.into(),
        n_hosts,
        services: services
            .iter()
            .map(|(ty, v)| Service {
                service_type: ty.to_string(),
                version: v.to_string(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

async fn create_active(coordinator: &Coordinator, services: &[(&str, &str)]) -> Cluster {
    let cluster = coordinator
        .create_cluster("research", request("demo", 2, services))
        .await
        .unwrap();
    coordinator.dispatcher().wait_for(&cluster.id).await;
    let cluster = coordinator.get_cluster("research", &cluster.id).await.unwrap();
    assert_eq!(cluster.entity_status, EntityStatus::Active);
    cluster
}

#[tokio::test]
async fn test_create_is_inited_until_run_completes() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let executor = Arc::new(FakeExecutor {
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let (coordinator, _db) = setup(dir.path(), executor.clone()).await;

    let cluster = coordinator
        .create_cluster("research", request("demo", 3, &[("spark", "2.4")]))
        .await
        .unwrap();
    assert_eq!(cluster.entity_status, EntityStatus::Inited);
    assert_eq!(cluster.name, "demo-research");
    assert_eq!(cluster.image, "ubuntu");
    assert_eq!(cluster.slaves_flavor, "m1.small");

    // Delete guard: a running cluster accepts no modification.
    let err = coordinator.delete_cluster("research", "demo-research").await.unwrap_err();
    assert!(matches!(err, NimbusError::InvalidState { status: EntityStatus::Inited, .. }));
    let err = coordinator
        .update_cluster("research", "demo-research", ClusterPatch::default())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 409);

    gate.add_permits(1);
    coordinator.dispatcher().wait_for(&cluster.id).await;

    let cluster = coordinator.get_cluster("research", "demo-research").await.unwrap();
    assert_eq!(cluster.entity_status, EntityStatus::Active);
    assert_eq!(cluster.master_ip, "10.0.0.5");
    assert_eq!(executor.actions(), vec![Action::Create]);
}

#[tokio::test]
async fn test_failed_cluster_is_retried_under_same_id() {
    let dir = tempfile::tempdir().unwrap();
    let executor = Arc::new(FakeExecutor {
        failing: vec![Action::Create],
        ..Default::default()
    });
    let (coordinator, db) = setup(dir.path(), executor.clone()).await;

    let first = coordinator
        .create_cluster("research", request("demo", 2, &[("spark", "")]))
        .await
        .unwrap();
    assert_eq!(first.services[0].version, "2.4");
    coordinator.dispatcher().wait_for(&first.id).await;
    let failed = coordinator.get_cluster("research", &first.id).await.unwrap();
    assert_eq!(failed.entity_status, EntityStatus::Failed);

    let retry = coordinator
        .create_cluster("research", request("demo", 4, &[("spark", "3.0")]))
        .await
        .unwrap();
    assert_eq!(retry.id, first.id);
    assert_eq!(retry.entity_status, EntityStatus::Inited);
    assert_eq!(retry.n_hosts, 4);
    coordinator.dispatcher().wait_for(&retry.id).await;

    assert_eq!(db.list_clusters().await.unwrap().len(), 1);
    assert_eq!(executor.actions(), vec![Action::Create, Action::Create]);
}

#[tokio::test]
async fn test_same_name_rejected_unless_failed() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, _db) = setup(dir.path(), Arc::new(FakeExecutor::default())).await;
    create_active(&coordinator, &[("spark", "2.4")]).await;

    let err = coordinator
        .create_cluster("research", request("demo", 2, &[("spark", "2.4")]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        NimbusError::Validation(ValidationError::ClusterExists(ref name)) if name == "demo-research"
    ));
}

async fn reject(coordinator: &Coordinator, req: ClusterRequest) -> ValidationError {
    match coordinator.create_cluster("research", req).await.unwrap_err() {
        NimbusError::Validation(e) => e,
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_create_rejections_persist_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let executor = Arc::new(FakeExecutor::default());
    let (coordinator, db) = setup(dir.path(), executor.clone()).await;

    assert_eq!(reject(&coordinator, request("1demo", 2, &[])).await, ValidationError::ClusterBadName);
    assert!(matches!(
        reject(&coordinator, request("demo", 0, &[("spark", "2.4")])).await,
        ValidationError::MasterSlaveWithoutHosts(_)
    ));
    assert!(matches!(
        reject(&coordinator, request("demo", 2, &[("grafana", "7")])).await,
        ValidationError::ServiceHealthCheckMissing(_)
    ));
    assert!(matches!(
        reject(&coordinator, request("demo", 2, &[("spark", "2.4"), ("spark", "3.0")])).await,
        ValidationError::DuplicateServiceType(_)
    ));
    assert!(matches!(
        reject(&coordinator, request("demo", 2, &[("hive", "1")])).await,
        ValidationError::ServiceTypeNotSupported(_)
    ));
    let centos = ClusterRequest {
        image: Some("centos".into()),
        ..request("demo", 2, &[])
    };
    assert_eq!(reject(&coordinator, centos).await, ValidationError::ImageNotFound("centos".into()));
    let huge = ClusterRequest {
        storage_flavor: Some("m1.huge".into()),
        ..request("demo", 2, &[])
    };
    assert_eq!(
        reject(&coordinator, huge).await,
        ValidationError::FlavorNotFound {
            field: "storage flavor",
            name: "m1.huge".into()
        }
    );

    let err = coordinator
        .create_cluster("nobody", request("demo", 2, &[]))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);

    assert!(db.list_clusters().await.unwrap().is_empty());
    assert!(executor.actions().is_empty());
}

#[tokio::test]
async fn test_dependencies_are_expanded_on_create() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, _db) = setup(dir.path(), Arc::new(FakeExecutor::default())).await;

    let cluster = coordinator
        .create_cluster("research", request("hub", 1, &[("jupyterhub", "v1")]))
        .await
        .unwrap();
    let types: Vec<(&str, &str)> = cluster
        .services
        .iter()
        .map(|s| (s.service_type.as_str(), s.version.as_str()))
        .collect();
    assert_eq!(types, vec![("jupyterhub", "v1"), ("spark", "2.4")]);
    assert!(cluster.services.iter().all(|s| !s.id.is_empty()));
    coordinator.dispatcher().drain().await;
}

#[tokio::test]
async fn test_update_routes_by_new_hosts() {
    let dir = tempfile::tempdir().unwrap();
    let executor = Arc::new(FakeExecutor::default());
    let (coordinator, _db) = setup(dir.path(), executor.clone()).await;
    let cluster = create_active(&coordinator, &[("spark", "3.0")]).await;

    // Stand-alone service on existing nodes; the repeated spark is skipped.
    let patch: ClusterPatch = serde_json::from_str(
        r#"{"description": "with hub", "services": [{"type": "jupyterhub"}, {"type": "spark", "version": "2.4"}]}"#,
    )
    .unwrap();
    let updated = coordinator.update_cluster("research", &cluster.id, patch).await.unwrap();
    assert_eq!(updated.entity_status, EntityStatus::Inited);
    assert_eq!(updated.services.len(), 2);
    assert_eq!(updated.services[0].version, "3.0");
    assert_eq!(updated.description, "with hub");
    coordinator.dispatcher().wait_for(&cluster.id).await;

    // A storage service needs a new host.
    let patch = ClusterPatch {
        services: vec![Service {
            service_type: "nfs".into(),
            ..Default::default()
        }],
        ..Default::default()
    };
    coordinator.update_cluster("research", &cluster.id, patch).await.unwrap();
    coordinator.dispatcher().wait_for(&cluster.id).await;

    // So does a host count change.
    let patch = ClusterPatch {
        n_hosts: Some(5),
        ..Default::default()
    };
    coordinator.update_cluster("research", &cluster.id, patch).await.unwrap();
    coordinator.dispatcher().wait_for(&cluster.id).await;

    assert_eq!(
        executor.actions(),
        vec![Action::Create, Action::Update, Action::Create, Action::Create]
    );
    let cluster = coordinator.get_cluster("research", &cluster.id).await.unwrap();
    assert_eq!(cluster.entity_status, EntityStatus::Active);
    assert_eq!(cluster.n_hosts, 5);
    assert_eq!(cluster.services.len(), 3);
}

#[tokio::test]
async fn test_update_incompatible_dependency_leaves_cluster_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, db) = setup(dir.path(), Arc::new(FakeExecutor::default())).await;
    let strict = ServiceDependency {
        service_type: "spark".into(),
        service_versions: vec!["2.4".into()],
        default_service_version: "2.4".into(),
        description: String::new(),
    };
    coordinator
        .catalog()
        .create_service_type(service_type("zeppelin", ServiceClass::StandAlone, vec![version("0.9", vec![strict])], true))
        .await
        .unwrap();
    let cluster = create_active(&coordinator, &[("spark", "3.0")]).await;

    let patch = ClusterPatch {
        services: vec![Service {
            service_type: "zeppelin".into(),
            ..Default::default()
        }],
        ..Default::default()
    };
    let err = coordinator.update_cluster("research", &cluster.id, patch).await.unwrap_err();
    assert!(matches!(
        err,
        NimbusError::Validation(ValidationError::IncompatibleDependencyVersion { .. })
    ));
    let after = db.read_cluster("p1", &cluster.id).await.unwrap().unwrap();
    assert_eq!(after, cluster);
}

#[tokio::test]
async fn test_delete_removes_cluster_on_success() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, _db) = setup(dir.path(), Arc::new(FakeExecutor::default())).await;
    let cluster = create_active(&coordinator, &[("spark", "2.4")]).await;

    let stopping = coordinator.delete_cluster("research", "demo-research").await.unwrap();
    assert_eq!(stopping.entity_status, EntityStatus::Stopping);
    coordinator.dispatcher().wait_for(&cluster.id).await;

    let err = coordinator.get_cluster("research", &cluster.id).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_failed_delete_keeps_cluster() {
    let dir = tempfile::tempdir().unwrap();
    let executor = Arc::new(FakeExecutor {
        failing: vec![Action::Delete],
        ..Default::default()
    });
    let (coordinator, _db) = setup(dir.path(), executor).await;
    let cluster = create_active(&coordinator, &[("spark", "2.4")]).await;

    coordinator.delete_cluster("research", &cluster.id).await.unwrap();
    coordinator.dispatcher().wait_for(&cluster.id).await;

    let after = coordinator.get_cluster("research", &cluster.id).await.unwrap();
    assert_eq!(after.entity_status, EntityStatus::Failed);
    assert_eq!(after.master_ip, "10.0.0.5");
}

#[tokio::test]
async fn test_run_past_deadline_is_failed() {
    let dir = tempfile::tempdir().unwrap();
    let executor = Arc::new(FakeExecutor {
        delay: Some(Duration::from_secs(30)),
        ..Default::default()
    });
    let (coordinator, _db) = setup(dir.path(), executor).await;

    let cluster = coordinator
        .create_cluster("research", request("slow", 1, &[("spark", "2.4")]))
        .await
        .unwrap();
    coordinator.dispatcher().wait_for(&cluster.id).await;

    let after = coordinator.get_cluster("research", &cluster.id).await.unwrap();
    assert_eq!(after.entity_status, EntityStatus::Failed);
    assert!(!coordinator.dispatcher().is_in_flight(&cluster.id));
}

#[tokio::test]
async fn test_reconcile_fails_orphaned_clusters() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, db) = setup(dir.path(), Arc::new(FakeExecutor::default())).await;
    let active = create_active(&coordinator, &[("spark", "2.4")]).await;

    for (id, status) in [("orphan-1", EntityStatus::Inited), ("orphan-2", EntityStatus::Stopping)] {
        db.write_cluster(&Cluster {
            id: id.into(),
            name: format!("{}-research", id),
            display_name: id.into(),
            project_id: "p1".into(),
            entity_status: status,
            ..Default::default()
        })
        .await
        .unwrap();
    }

    assert_eq!(coordinator.reconcile().await.unwrap(), 2);
    for id in ["orphan-1", "orphan-2"] {
        let cluster = db.read_cluster("p1", id).await.unwrap().unwrap();
        assert_eq!(cluster.entity_status, EntityStatus::Failed);
    }
    let untouched = db.read_cluster("p1", &active.id).await.unwrap().unwrap();
    assert_eq!(untouched.entity_status, EntityStatus::Active);
    assert_eq!(coordinator.reconcile().await.unwrap(), 0);
}

#[tokio::test]
async fn test_reconcile_skips_reserved_clusters() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, db) = setup(dir.path(), Arc::new(FakeExecutor::default())).await;

    // Reserved and persisted, not yet handed to a worker.
    let reservation = coordinator.dispatcher().reserve("pending").unwrap();
    db.write_cluster(&Cluster {
        id: "pending".into(),
        name: "pending-research".into(),
        display_name: "pending".into(),
        project_id: "p1".into(),
        entity_status: EntityStatus::Inited,
        ..Default::default()
    })
    .await
    .unwrap();

    assert_eq!(coordinator.reconcile().await.unwrap(), 0);
    let err = coordinator
        .delete_cluster("research", "pending")
        .await
        .unwrap_err();
    assert!(matches!(err, NimbusError::InvalidState { .. }));

    drop(reservation);
    assert_eq!(coordinator.reconcile().await.unwrap(), 1);
}

#[tokio::test]
async fn test_rejected_update_releases_the_cluster() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, _db) = setup(dir.path(), Arc::new(FakeExecutor::default())).await;
    let cluster = create_active(&coordinator, &[("spark", "2.4")]).await;

    let patch = ClusterPatch {
        display_name: Some("9bad".into()),
        ..Default::default()
    };
    assert!(coordinator.update_cluster("research", &cluster.id, patch).await.is_err());
    assert!(!coordinator.dispatcher().is_in_flight(&cluster.id));

    let deleting = coordinator.delete_cluster("research", &cluster.id).await.unwrap();
    assert_eq!(deleting.entity_status, EntityStatus::Stopping);
    coordinator.dispatcher().wait_for(&cluster.id).await;
}

#[tokio::test]
async fn test_catalog_guards_and_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, _db) = setup(dir.path(), Arc::new(FakeExecutor::default())).await;
    create_active(&coordinator, &[("spark", "2.4"), ("nfs", "4")]).await;
    let catalog = coordinator.catalog();

    let err = catalog.delete_service_type("spark").await.unwrap_err();
    assert!(matches!(err, NimbusError::Catalog(CatalogError::TypeReferenced { .. })));
    let err = catalog.delete_service_type("nfs").await.unwrap_err();
    assert!(matches!(err, NimbusError::Catalog(CatalogError::TypeInUse { .. })));
    let err = catalog.delete_version("spark", "2.4").await.unwrap_err();
    assert!(matches!(err, NimbusError::Catalog(CatalogError::DefaultVersionDelete(_))));
    let err = catalog.delete_version("spark", "3.0").await.unwrap_err();
    assert!(matches!(err, NimbusError::Catalog(CatalogError::VersionReferenced { .. })));

    catalog.delete_service_type("grafana").await.unwrap();
    assert!(!catalog.snapshot().contains("grafana"));

    catalog.add_version("nfs", version("3", vec![])).await.unwrap();
    assert!(catalog.snapshot().version("nfs", "3").is_some());
    catalog.delete_version("nfs", "3").await.unwrap();
    assert!(catalog.snapshot().version("nfs", "3").is_none());
}

#[tokio::test]
async fn test_logs_of_latest_run() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, _db) = setup(dir.path(), Arc::new(FakeExecutor::default())).await;
    let cluster = create_active(&coordinator, &[("spark", "2.4")]).await;

    let err = coordinator.cluster_logs("research", &cluster.id, None).await.unwrap_err();
    assert_eq!(err.status_code(), 404);

    let logs = dir.path().join("logs");
    std::fs::create_dir_all(&logs).unwrap();
    std::fs::write(logs.join(format!("create_{}.log", cluster.id)), "PLAY [instances]\n").unwrap();
    std::fs::write(logs.join(format!("update_{}.log", cluster.id)), "PLAY [services]\n").unwrap();

    let latest = coordinator.cluster_logs("research", "demo-research", None).await.unwrap();
    assert_eq!(latest, "PLAY [services]\n");
    let create = coordinator
        .cluster_logs("research", "demo-research", Some(Action::Create))
        .await
        .unwrap();
    assert_eq!(create, "PLAY [instances]\n");
}
