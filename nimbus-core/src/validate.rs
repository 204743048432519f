use crate::catalog::Catalog;
use crate::error::ValidationError;
use crate::service::{Service, ServiceClass, ServiceConfig};
use crate::value::ParamValue;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static CLUSTER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9-]+$").expect("cluster name pattern is valid")
});

pub fn validate_cluster_name(name: &str) -> Result<(), ValidationError> {
    if CLUSTER_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::ClusterBadName)
    }
}

/// Resolve a service against the catalog and check its config values.
///
/// An empty version is replaced by the type's default version.
pub fn validate_service(catalog: &Catalog, service: &mut Service) -> Result<(), ValidationError> {
    if service.service_type.is_empty() {
        return Err(ValidationError::ServiceTypeEmpty);
    }
    let service_type = catalog
        .service_type(&service.service_type)
        .ok_or_else(|| ValidationError::ServiceTypeNotSupported(service.service_type.clone()))?;

    if service.version.is_empty() {
        if service_type.default_version.is_empty() {
            return Err(ValidationError::ServiceVersionsEmpty(service.service_type.clone()));
        }
        service.version = service_type.default_version.clone();
    }

    let version = service_type.version(&service.version).ok_or_else(|| {
        ValidationError::ServiceVersionNotSupported {
            service_type: service.service_type.clone(),
            version: service.version.clone(),
        }
    })?;

    validate_config(service, &version.configs)
}

/// Check every user-supplied value against the version's parameter schema.
pub fn validate_config(service: &Service, configs: &[ServiceConfig]) -> Result<(), ValidationError> {
    for (name, raw) in &service.config {
        let config = configs
            .iter()
            .find(|c| c.parameter_name == *name)
            .ok_or_else(|| ValidationError::ServiceConfigNotSupported {
                service_type: service.service_type.clone(),
                parameter: name.clone(),
            })?;

        ParamValue::parse_for(raw, config).map_err(|_| ValidationError::ServiceConfigIncorrectType {
            service_type: service.service_type.clone(),
            parameter: name.clone(),
        })?;

        if !config.possible_values.is_empty()
            && !value_allowed(raw, &config.possible_values, config.is_list)
        {
            return Err(ValidationError::ServiceConfigNotPossibleValue {
                service_type: service.service_type.clone(),
                parameter: name.clone(),
            });
        }
    }
    Ok(())
}

/// Whether `raw` matches an allow-list entry. Scalars are compared trimmed,
/// lists with all whitespace removed.
pub fn value_allowed(raw: &str, possible_values: &[String], is_list: bool) -> bool {
    if is_list {
        let wanted = strip_whitespace(raw);
        possible_values.iter().any(|p| strip_whitespace(p) == wanted)
    } else {
        let wanted = raw.trim();
        possible_values.iter().any(|p| p.trim() == wanted)
    }
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Validate every requested service and reject repeated service types.
pub fn validate_services(catalog: &Catalog, services: &mut [Service]) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for service in services.iter_mut() {
        validate_service(catalog, service)?;
        if !seen.insert(service.service_type.clone()) {
            return Err(ValidationError::DuplicateServiceType(service.service_type.clone()));
        }
    }
    Ok(())
}

/// Every service deployed on create must carry a supported health check.
pub fn require_health_checks(catalog: &Catalog, services: &[Service]) -> Result<(), ValidationError> {
    for service in services {
        let supported = catalog
            .service_type(&service.service_type)
            .and_then(|t| t.supported_health_check())
            .is_some();
        if !supported {
            return Err(ValidationError::ServiceHealthCheckMissing(service.service_type.clone()));
        }
    }
    Ok(())
}

/// Master-slave services need slave hosts.
pub fn check_topology(catalog: &Catalog, services: &[Service], n_hosts: u32) -> Result<(), ValidationError> {
    if n_hosts > 0 {
        return Ok(());
    }
    match services
        .iter()
        .find(|s| catalog.class_of(&s.service_type) == Some(ServiceClass::MasterSlave))
    {
        Some(s) => Err(ValidationError::MasterSlaveWithoutHosts(s.service_type.clone())),
        None => Ok(()),
    }
}
