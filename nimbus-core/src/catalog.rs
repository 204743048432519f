use crate::service::{ServiceClass, ServiceType, ServiceVersion};
use std::collections::HashMap;

/// Immutable snapshot of the service catalog.
///
/// Built once per request from the store. Clusters only hold type and
/// version strings, so catalog edits never reach into a running cluster.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    types: Vec<ServiceType>,
    index: HashMap<String, usize>,
}

impl Catalog {
    pub fn new(types: Vec<ServiceType>) -> Self {
        let index = types
            .iter()
            .enumerate()
            .map(|(i, t)| (t.service_type.clone(), i))
            .collect();
        Self { types, index }
    }

    pub fn service_type(&self, name: &str) -> Option<&ServiceType> {
        self.index.get(name).map(|&i| &self.types[i])
    }

    pub fn version(&self, service_type: &str, version: &str) -> Option<&ServiceVersion> {
        self.service_type(service_type)?.version(version)
    }

    pub fn class_of(&self, service_type: &str) -> Option<ServiceClass> {
        self.service_type(service_type).map(|t| t.class)
    }

    /// Service types in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ServiceType> {
        self.types.iter()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Service types whose versions declare a dependency on `service_type`,
    /// optionally restricted to dependencies allowing `version`.
    pub fn dependents_of(&self, service_type: &str, version: Option<&str>) -> Vec<String> {
        let mut dependents = Vec::new();
        for t in &self.types {
            for v in &t.versions {
                let hit = v.dependencies.iter().any(|d| {
                    d.service_type == service_type
                        && version.is_none_or(|ver| {
                            d.service_versions.iter().any(|sv| sv == ver)
                                || d.default_service_version == ver
                        })
                });
                if hit {
                    dependents.push(format!("{}:{}", t.service_type, v.version));
                }
            }
        }
        dependents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceDependency;

    fn version(v: &str, deps: Vec<ServiceDependency>) -> ServiceVersion {
        ServiceVersion {
            id: String::new(),
            version: v.into(),
            description: String::new(),
            download_url: String::new(),
            configs: vec![],
            dependencies: deps,
        }
    }

    fn service_type(name: &str, class: ServiceClass, versions: Vec<ServiceVersion>) -> ServiceType {
        ServiceType {
            id: String::new(),
            service_type: name.into(),
            description: String::new(),
            default_version: versions.first().map(|v| v.version.clone()).unwrap_or_default(),
            class,
            access_port: None,
            ports: vec![],
            versions,
            health_check: None,
        }
    }

    #[test]
    fn test_lookup() {
        let catalog = Catalog::new(vec![
            service_type("spark", ServiceClass::MasterSlave, vec![version("2.4", vec![])]),
            service_type("ignite", ServiceClass::StandAlone, vec![version("2.8", vec![])]),
        ]);
        assert_eq!(catalog.len(), 2);
        assert!(catalog.version("spark", "2.4").is_some());
        assert!(catalog.version("spark", "9.9").is_none());
        assert_eq!(catalog.class_of("ignite"), Some(ServiceClass::StandAlone));
        let names: Vec<_> = catalog.iter().map(|t| t.service_type.as_str()).collect();
        assert_eq!(names, ["spark", "ignite"]);
    }

    #[test]
    fn test_dependents_of() {
        let dep = ServiceDependency {
            service_type: "spark".into(),
            service_versions: vec!["2.4".into(), "3.0".into()],
            default_service_version: "2.4".into(),
            description: String::new(),
        };
        let catalog = Catalog::new(vec![
            service_type(
                "spark",
                ServiceClass::MasterSlave,
                vec![version("2.4", vec![]), version("3.0", vec![]), version("3.1", vec![])],
            ),
            service_type("jupyterhub", ServiceClass::StandAlone, vec![version("v1", vec![dep])]),
        ]);
        assert_eq!(catalog.dependents_of("spark", None), ["jupyterhub:v1"]);
        assert_eq!(catalog.dependents_of("spark", Some("3.0")), ["jupyterhub:v1"]);
        assert!(catalog.dependents_of("spark", Some("3.1")).is_empty());
        assert!(catalog.dependents_of("jupyterhub", None).is_empty());
    }
}
