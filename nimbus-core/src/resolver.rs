use crate::catalog::Catalog;
use crate::error::ValidationError;
use crate::service::Service;
use tracing::debug;

/// Expands a cluster's service list with the services its dependencies require.
pub struct Resolver<'a> {
    catalog: &'a Catalog,
    max_passes: usize,
}

impl<'a> Resolver<'a> {
    /// The pass bound defaults to one more than the catalog size: every pass
    /// that makes progress adds at least one new service type.
    pub fn new(catalog: &'a Catalog) -> Self {
        Self {
            catalog,
            max_passes: catalog.len() + 1,
        }
    }

    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes;
        self
    }

    /// Services required by `new_service` that `services` does not already hold.
    pub fn expand(
        &self,
        services: &[Service],
        new_service: &Service,
    ) -> Result<Vec<Service>, ValidationError> {
        let service_type = self
            .catalog
            .service_type(&new_service.service_type)
            .ok_or_else(|| ValidationError::ServiceTypeNotSupported(new_service.service_type.clone()))?;
        let version_name = service_type.effective_version(&new_service.version);
        let version = service_type.version(version_name).ok_or_else(|| {
            ValidationError::ServiceVersionNotSupported {
                service_type: new_service.service_type.clone(),
                version: version_name.to_string(),
            }
        })?;

        let mut added: Vec<Service> = Vec::new();
        for dep in &version.dependencies {
            let existing = services
                .iter()
                .chain(added.iter())
                .find(|s| s.service_type == dep.service_type);
            match existing {
                Some(existing) => {
                    if !dep.service_versions.iter().any(|v| *v == existing.version) {
                        return Err(ValidationError::IncompatibleDependencyVersion {
                            existing: display_name(existing),
                            requested_by: display_name(new_service),
                        });
                    }
                }
                None => {
                    let dependent = Service::new(
                        format!("{}-dependent", new_service.name),
                        dep.service_type.clone(),
                        dep.default_service_version.clone(),
                    );
                    debug!(
                        service = %new_service.service_type,
                        dependency = %dependent.service_type,
                        version = %dependent.version,
                        "Adding dependent service"
                    );
                    added.push(dependent);
                }
            }
        }
        Ok(added)
    }

    /// Run `expand` over `services[start..]` until a pass adds nothing.
    ///
    /// Returns the full expanded list; `services` is left untouched so a
    /// failed resolution never changes the cluster.
    pub fn resolve(&self, services: &[Service], start: usize) -> Result<Vec<Service>, ValidationError> {
        let mut resolved = services.to_vec();
        let mut from = start.min(resolved.len());
        let mut passes = 0;

        while from < resolved.len() {
            passes += 1;
            if passes > self.max_passes {
                return Err(ValidationError::DependencyExpansionLimit(self.max_passes));
            }
            let end = resolved.len();
            for i in from..end {
                let added = self.expand(&resolved, &resolved[i])?;
                resolved.extend(added);
            }
            from = end;
        }
        Ok(resolved)
    }
}

fn display_name(service: &Service) -> String {
    if service.name.is_empty() {
        format!("{}:{}", service.service_type, service.version)
    } else {
        service.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{ServiceClass, ServiceDependency, ServiceType, ServiceVersion};

    fn dep(ty: &str, versions: &[&str], default: &str) -> ServiceDependency {
        ServiceDependency {
            service_type: ty.into(),
            service_versions: versions.iter().map(|v| v.to_string()).collect(),
            default_service_version: default.into(),
            description: String::new(),
        }
    }

    fn st(name: &str, versions: Vec<(&str, Vec<ServiceDependency>)>) -> ServiceType {
        ServiceType {
            id: String::new(),
            service_type: name.into(),
            description: String::new(),
            default_version: versions[0].0.into(),
            class: ServiceClass::MasterSlave,
            access_port: None,
            ports: vec![],
            versions: versions
                .into_iter()
                .map(|(v, deps)| ServiceVersion {
                    id: String::new(),
                    version: v.into(),
                    description: String::new(),
                    download_url: String::new(),
                    configs: vec![],
                    dependencies: deps,
                })
                .collect(),
            health_check: None,
        }
    }

    fn svc(name: &str, ty: &str, version: &str) -> Service {
        Service::new(name, ty, version)
    }

    #[test]
    fn test_expand_adds_default_version() {
        let catalog = Catalog::new(vec![
            st("spark", vec![("2.4", vec![]), ("3.0", vec![])]),
            st("jupyterhub", vec![("v1", vec![dep("spark", &["2.4", "3.0"], "2.4")])]),
        ]);
        let services = vec![svc("hub", "jupyterhub", "v1")];
        let resolved = Resolver::new(&catalog).resolve(&services, 0).unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[1].service_type, "spark");
        assert_eq!(resolved[1].version, "2.4");
        assert_eq!(resolved[1].name, "hub-dependent");
        assert!(resolved[1].config.is_empty());
    }

    #[test]
    fn test_incompatible_version_leaves_input_unchanged() {
        let catalog = Catalog::new(vec![
            st("spark", vec![("2.4", vec![]), ("1.6", vec![])]),
            st("jupyterhub", vec![("v1", vec![dep("spark", &["2.4", "3.0"], "2.4")])]),
        ]);
        let services = vec![svc("sp", "spark", "1.6"), svc("hub", "jupyterhub", "v1")];
        let err = Resolver::new(&catalog).resolve(&services, 0).unwrap_err();
        assert_eq!(
            err,
            ValidationError::IncompatibleDependencyVersion {
                existing: "sp".into(),
                requested_by: "hub".into()
            }
        );
        assert_eq!(services.len(), 2);
    }

    #[test]
    fn test_transitive_chain() {
        let catalog = Catalog::new(vec![
            st("hdfs", vec![("3.1", vec![])]),
            st("spark", vec![("2.4", vec![dep("hdfs", &["3.1"], "3.1")])]),
            st("jupyterhub", vec![("v1", vec![dep("spark", &["2.4"], "2.4")])]),
        ]);
        let resolved = Resolver::new(&catalog)
            .resolve(&[svc("hub", "jupyterhub", "v1")], 0)
            .unwrap();
        let types: Vec<_> = resolved.iter().map(|s| s.service_type.as_str()).collect();
        assert_eq!(types, ["jupyterhub", "spark", "hdfs"]);
    }

    #[test]
    fn test_start_index_skips_resolved_prefix() {
        let catalog = Catalog::new(vec![
            st("spark", vec![("2.4", vec![])]),
            st("jupyterhub", vec![("v1", vec![dep("spark", &["2.4"], "2.4")])]),
        ]);
        // The first service is treated as already resolved.
        let services = vec![svc("hub", "jupyterhub", "v1"), svc("sp", "spark", "2.4")];
        let resolved = Resolver::new(&catalog).resolve(&services, 1).unwrap();
        assert_eq!(resolved, services);
    }

    #[test]
    fn test_compatible_cycle_converges() {
        let catalog = Catalog::new(vec![
            st("a", vec![("1", vec![dep("b", &["1"], "1")])]),
            st("b", vec![("1", vec![dep("a", &["1"], "1")])]),
        ]);
        let resolved = Resolver::new(&catalog).resolve(&[svc("x", "a", "1")], 0).unwrap();
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn test_incompatible_cycle_fails_closed() {
        // a:1 needs b:1, whose default needs a:2.
        let catalog = Catalog::new(vec![
            st("a", vec![("1", vec![dep("b", &["1"], "1")]), ("2", vec![])]),
            st("b", vec![("1", vec![dep("a", &["2"], "2")])]),
        ]);
        let err = Resolver::new(&catalog)
            .resolve(&[svc("x", "a", "1")], 0)
            .unwrap_err();
        assert!(matches!(err, ValidationError::IncompatibleDependencyVersion { .. }));
    }

    #[test]
    fn test_pass_limit() {
        let catalog = Catalog::new(vec![
            st("c", vec![("1", vec![])]),
            st("b", vec![("1", vec![dep("c", &["1"], "1")])]),
            st("a", vec![("1", vec![dep("b", &["1"], "1")])]),
        ]);
        let err = Resolver::new(&catalog)
            .with_max_passes(1)
            .resolve(&[svc("x", "a", "1")], 0)
            .unwrap_err();
        assert_eq!(err, ValidationError::DependencyExpansionLimit(1));
    }

    #[test]
    fn test_unknown_type() {
        let catalog = Catalog::new(vec![]);
        let err = Resolver::new(&catalog)
            .resolve(&[svc("x", "nope", "1")], 0)
            .unwrap_err();
        assert_eq!(err, ValidationError::ServiceTypeNotSupported("nope".into()));
    }
}
