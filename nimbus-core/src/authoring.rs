//! Catalog-authoring checks.
//!
//! Applied when service types, versions, and configs are defined or changed,
//! never on the cluster path. Deletion guards consult both the catalog's own
//! dependency graph and the clusters that currently reference it.

use crate::catalog::Catalog;
use crate::cluster::Cluster;
use crate::error::CatalogError;
use crate::service::{
    HealthCheck, ParamType, ServiceClass, ServiceConfig, ServiceDependency, ServicePort,
    ServiceType, ServiceVersion,
};
use crate::validate::value_allowed;
use crate::value::ParamValue;
use serde::Deserialize;
use std::collections::HashSet;

/// Validate a new service type and fill in derived fields.
pub fn prepare_service_type(catalog: &Catalog, st: &mut ServiceType) -> Result<(), CatalogError> {
    if st.service_type.is_empty() {
        return Err(CatalogError::TypeEmpty);
    }
    if catalog.contains(&st.service_type) {
        return Err(CatalogError::TypeExists(st.service_type.clone()));
    }
    if st.id.is_empty() {
        st.id = uuid::Uuid::new_v4().to_string();
    }
    check_ports(st)?;

    let versions = std::mem::take(&mut st.versions);
    let mut prepared: Vec<ServiceVersion> = Vec::with_capacity(versions.len());
    for mut version in versions {
        prepare_version(catalog, &st.service_type, &prepared, &mut version)?;
        prepared.push(version);
    }
    st.versions = prepared;

    check_default_version(st)?;
    if let Some(hc) = st.health_check.as_mut() {
        prepare_configs(&st.service_type, &mut hc.configs)?;
    }
    Ok(())
}

/// Validate a version about to join `existing` under `service_type`.
pub fn prepare_version(
    catalog: &Catalog,
    service_type: &str,
    existing: &[ServiceVersion],
    version: &mut ServiceVersion,
) -> Result<(), CatalogError> {
    if version.version.is_empty() {
        return Err(CatalogError::VersionEmpty);
    }
    if existing.iter().any(|v| v.version == version.version) {
        return Err(CatalogError::VersionNotUnique(version.version.clone()));
    }
    version.id = uuid::Uuid::new_v4().to_string();
    prepare_configs(service_type, &mut version.configs)?;
    for dep in &version.dependencies {
        check_dependency(catalog, dep)?;
    }
    Ok(())
}

/// Validate a config list: unique names, each entry well formed.
pub fn prepare_configs(service_type: &str, configs: &mut [ServiceConfig]) -> Result<(), CatalogError> {
    let mut names = HashSet::new();
    for config in configs.iter_mut() {
        prepare_config(service_type, config)?;
        if !names.insert(config.parameter_name.clone()) {
            return Err(CatalogError::ParameterNotUnique(config.parameter_name.clone()));
        }
    }
    Ok(())
}

/// Add a config to an existing version.
pub fn add_config(
    service_type: &str,
    version: &mut ServiceVersion,
    mut config: ServiceConfig,
) -> Result<(), CatalogError> {
    if version.config(&config.parameter_name).is_some() {
        return Err(CatalogError::ParameterNotUnique(config.parameter_name));
    }
    prepare_config(service_type, &mut config)?;
    version.configs.push(config);
    Ok(())
}

/// Validate one parameter schema entry and derive its automation variable name.
pub fn prepare_config(service_type: &str, config: &mut ServiceConfig) -> Result<(), CatalogError> {
    if config.parameter_name.is_empty() {
        return Err(CatalogError::ParameterNameEmpty);
    }
    let name = config.parameter_name.clone();

    // Stored trimmed: the compiler parses defaults exactly as kept here.
    config.default_value = config.default_value.trim().to_string();
    for value in &mut config.possible_values {
        *value = value.trim().to_string();
    }

    let mut seen = HashSet::new();
    for value in &config.possible_values {
        if value.is_empty() {
            return Err(CatalogError::PossibleValueEmpty(name));
        }
        if ParamValue::parse(value, config.param_type, config.is_list).is_err() {
            return Err(CatalogError::PossibleValueIncorrectType {
                parameter: name,
                value: value.clone(),
            });
        }
        if !seen.insert(normalize(value, config.is_list)) {
            return Err(CatalogError::PossibleValueNotUnique {
                parameter: name,
                value: value.clone(),
            });
        }
    }

    if !config.possible_values.is_empty() {
        if config.default_value.is_empty() {
            return Err(CatalogError::DefaultValueEmpty(name));
        }
        if !value_allowed(&config.default_value, &config.possible_values, config.is_list) {
            return Err(CatalogError::DefaultValueNotPossible(name));
        }
    }
    if !config.default_value.is_empty()
        && ParamValue::parse(&config.default_value, config.param_type, config.is_list).is_err()
    {
        return Err(CatalogError::DefaultValueIncorrectType(name));
    }

    config.ansible_var_name = ServiceConfig::var_name(service_type, &config.parameter_name);
    Ok(())
}

fn normalize(value: &str, is_list: bool) -> String {
    if is_list {
        value.chars().filter(|c| !c.is_whitespace()).collect()
    } else {
        value.trim().to_string()
    }
}

/// A dependency must point at an existing type and a consistent version set.
pub fn check_dependency(catalog: &Catalog, dep: &ServiceDependency) -> Result<(), CatalogError> {
    let target = catalog
        .service_type(&dep.service_type)
        .ok_or_else(|| CatalogError::DependencyTypeNotFound(dep.service_type.clone()))?;
    if dep.service_versions.is_empty() {
        return Err(CatalogError::DependencyVersionsEmpty(dep.service_type.clone()));
    }
    if dep.default_service_version.is_empty() {
        return Err(CatalogError::DependencyDefaultEmpty(dep.service_type.clone()));
    }
    for version in &dep.service_versions {
        if target.version(version).is_none() {
            return Err(CatalogError::DependencyVersionNotFound {
                service_type: dep.service_type.clone(),
                version: version.clone(),
            });
        }
    }
    if !dep.service_versions.contains(&dep.default_service_version) {
        return Err(CatalogError::DependencyDefaultNotListed {
            service_type: dep.service_type.clone(),
            version: dep.default_service_version.clone(),
        });
    }
    Ok(())
}

fn check_ports(st: &ServiceType) -> Result<(), CatalogError> {
    if st.access_port == Some(0) || st.ports.iter().any(|p| p.port == 0) {
        return Err(CatalogError::InvalidPort);
    }
    Ok(())
}

fn check_default_version(st: &ServiceType) -> Result<(), CatalogError> {
    if !st.default_version.is_empty() && st.version(&st.default_version).is_none() {
        return Err(CatalogError::DefaultVersionNotFound(st.default_version.clone()));
    }
    Ok(())
}

/// A type can go only when no other type depends on it and no cluster runs it.
pub fn check_type_deletable(
    catalog: &Catalog,
    service_type: &str,
    clusters: &[Cluster],
) -> Result<(), CatalogError> {
    if !catalog.contains(service_type) {
        return Err(CatalogError::TypeNotFound(service_type.to_string()));
    }
    if let Some(referenced_by) = foreign_dependents(catalog, service_type, None).into_iter().next() {
        return Err(CatalogError::TypeReferenced {
            service_type: service_type.to_string(),
            referenced_by,
        });
    }
    if let Some(cluster) = clusters.iter().find(|c| c.service_of_type(service_type).is_some()) {
        return Err(CatalogError::TypeInUse {
            service_type: service_type.to_string(),
            cluster: cluster.name.clone(),
        });
    }
    Ok(())
}

/// A version can go unless it is the default, another type's dependency
/// allows it, or a cluster runs it.
pub fn check_version_deletable(
    catalog: &Catalog,
    service_type: &str,
    version: &str,
    clusters: &[Cluster],
) -> Result<(), CatalogError> {
    let st = catalog
        .service_type(service_type)
        .ok_or_else(|| CatalogError::TypeNotFound(service_type.to_string()))?;
    if st.version(version).is_none() {
        return Err(CatalogError::VersionNotFound {
            service_type: service_type.to_string(),
            version: version.to_string(),
        });
    }
    if st.default_version == version {
        return Err(CatalogError::DefaultVersionDelete(version.to_string()));
    }
    if let Some(referenced_by) = foreign_dependents(catalog, service_type, Some(version))
        .into_iter()
        .next()
    {
        return Err(CatalogError::VersionReferenced {
            service_type: service_type.to_string(),
            version: version.to_string(),
            referenced_by,
        });
    }
    if let Some(cluster) = clusters.iter().find(|c| c.uses_version(service_type, version)) {
        return Err(CatalogError::VersionInUse {
            service_type: service_type.to_string(),
            version: version.to_string(),
            cluster: cluster.name.clone(),
        });
    }
    Ok(())
}

fn foreign_dependents(catalog: &Catalog, service_type: &str, version: Option<&str>) -> Vec<String> {
    let own_prefix = format!("{}:", service_type);
    catalog
        .dependents_of(service_type, version)
        .into_iter()
        .filter(|d| !d.starts_with(&own_prefix))
        .collect()
}

/// Mutable fields of a service type. Type, id, and versions are fixed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceTypePatch {
    pub description: Option<String>,
    pub default_version: Option<String>,
    pub class: Option<ServiceClass>,
    pub access_port: Option<u16>,
    pub ports: Option<Vec<ServicePort>>,
    pub health_check: Option<HealthCheck>,
}

impl ServiceTypePatch {
    pub fn apply(self, st: &mut ServiceType) -> Result<(), CatalogError> {
        let mut next = st.clone();
        if let Some(description) = self.description {
            next.description = description;
        }
        if let Some(default_version) = self.default_version {
            next.default_version = default_version;
        }
        if let Some(class) = self.class {
            next.class = class;
        }
        if let Some(port) = self.access_port {
            next.access_port = Some(port);
        }
        if let Some(ports) = self.ports {
            next.ports = ports;
        }
        if let Some(mut hc) = self.health_check {
            prepare_configs(&next.service_type, &mut hc.configs)?;
            next.health_check = Some(hc);
        }
        check_ports(&next)?;
        check_default_version(&next)?;
        *st = next;
        Ok(())
    }
}

/// Mutable fields of a service version.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceVersionPatch {
    pub description: Option<String>,
    pub download_url: Option<String>,
}

impl ServiceVersionPatch {
    pub fn apply(self, version: &mut ServiceVersion) {
        if let Some(description) = self.description {
            version.description = description;
        }
        if let Some(url) = self.download_url {
            version.download_url = url;
        }
    }
}

/// Mutable fields of a config entry. Parameter name and variable name are fixed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfigPatch {
    #[serde(rename = "type")]
    pub param_type: Option<ParamType>,
    pub description: Option<String>,
    pub required: Option<bool>,
    pub is_list: Option<bool>,
    pub default_value: Option<String>,
    pub possible_values: Option<Vec<String>>,
}

impl ServiceConfigPatch {
    pub fn apply(self, service_type: &str, config: &mut ServiceConfig) -> Result<(), CatalogError> {
        let mut next = config.clone();
        if let Some(ty) = self.param_type {
            next.param_type = ty;
        }
        if let Some(description) = self.description {
            next.description = description;
        }
        if let Some(required) = self.required {
            next.required = required;
        }
        if let Some(is_list) = self.is_list {
            next.is_list = is_list;
        }
        if let Some(default_value) = self.default_value {
            next.default_value = default_value;
        }
        if let Some(possible) = self.possible_values {
            next.possible_values = possible;
        }
        prepare_config(service_type, &mut next)?;
        *config = next;
        Ok(())
    }
}
