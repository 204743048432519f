use nimbus_core::authoring::prepare_service_type;
use nimbus_core::validate::{validate_service, validate_services};
use nimbus_core::{Catalog, Resolver, Service, ServiceType, ValidationError};

const CATALOG_YAML: &str = r#"
- type: spark
  class: master-slave
  default_version: "2.4"
  access_port: 8080
  versions:
    - version: "2.4"
      configs:
        - parameter_name: executor_memory
          type: string
          default_value: 1g
          required: true
        - parameter_name: workers
          type: int
    - version: "3.0"
  health_check:
    check_type: http
- type: jupyterhub
  class: stand-alone
  default_version: v1
  versions:
    - version: v1
      dependencies:
        - service_type: spark
          service_versions: ["2.4", "3.0"]
          default_service_version: "2.4"
  health_check:
    check_type: http
"#;

fn catalog() -> Catalog {
    let raw: Vec<ServiceType> = serde_yaml::from_str(CATALOG_YAML).unwrap();
    let mut prepared = Vec::new();
    for mut st in raw {
        let snapshot = Catalog::new(prepared.clone());
        prepare_service_type(&snapshot, &mut st).unwrap();
        prepared.push(st);
    }
    Catalog::new(prepared)
}

// =============================================================================
// Dependency resolution
// =============================================================================

#[test]
fn test_dependency_expansion_scenario() {
    let catalog = catalog();
    let mut services = vec![Service::new("hub", "jupyterhub", "")];
    validate_services(&catalog, &mut services).unwrap();
    assert_eq!(services[0].version, "v1");

    let resolved = Resolver::new(&catalog).resolve(&services, 0).unwrap();
    let spark = resolved
        .iter()
        .find(|s| s.service_type == "spark")
        .expect("spark added");
    assert_eq!(spark.version, "2.4");
}

#[test]
fn test_fixpoint_idempotence() {
    let catalog = catalog();
    let services = vec![
        Service::new("hub", "jupyterhub", "v1"),
        Service::new("sp", "spark", "3.0"),
    ];
    let resolved = Resolver::new(&catalog).resolve(&services, 0).unwrap();
    assert_eq!(resolved, services);

    // Resolving an already resolved list again adds nothing.
    let again = Resolver::new(&catalog).resolve(&resolved, 0).unwrap();
    assert_eq!(again, resolved);
}

// =============================================================================
// Config validation
// =============================================================================

#[test]
fn test_config_round_trip_int() {
    let catalog = catalog();
    let mut ok = Service::new("sp", "spark", "2.4");
    ok.config.insert("workers".into(), "12".into());
    assert!(validate_service(&catalog, &mut ok).is_ok());

    let mut bad = Service::new("sp", "spark", "2.4");
    bad.config.insert("workers".into(), "12.5".into());
    assert!(matches!(
        validate_service(&catalog, &mut bad),
        Err(ValidationError::ServiceConfigIncorrectType { .. })
    ));
}

#[test]
fn test_derived_var_names() {
    let catalog = catalog();
    let version = catalog.version("spark", "2.4").unwrap();
    assert_eq!(
        version.config("executor_memory").unwrap().ansible_var_name,
        "spark_executor_memory"
    );
}
