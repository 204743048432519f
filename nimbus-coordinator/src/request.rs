use nimbus_core::{Project, Service};
use serde::Deserialize;

/// Body of a cluster Create request.
///
/// Image and flavors fall back to the project's defaults when omitted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterRequest {
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub n_hosts: u32,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub master_flavor: Option<String>,
    #[serde(default)]
    pub slaves_flavor: Option<String>,
    #[serde(default)]
    pub storage_flavor: Option<String>,
    #[serde(default)]
    pub monitoring_flavor: Option<String>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub monitoring: bool,
    #[serde(default)]
    pub keys: Vec<String>,
}

/// Image and flavors after applying project defaults.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Placement {
    pub image: String,
    pub master_flavor: String,
    pub slaves_flavor: String,
    pub storage_flavor: String,
    pub monitoring_flavor: String,
}

impl ClusterRequest {
    pub(crate) fn placement(&self, project: &Project) -> Placement {
        fn pick(requested: &Option<String>, default: &str) -> String {
            match requested.as_deref() {
                Some(value) if !value.is_empty() => value.to_string(),
                _ => default.to_string(),
            }
        }
        Placement {
            image: pick(&self.image, &project.default_image),
            master_flavor: pick(&self.master_flavor, &project.default_master_flavor),
            slaves_flavor: pick(&self.slaves_flavor, &project.default_slaves_flavor),
            storage_flavor: pick(&self.storage_flavor, &project.default_storage_flavor),
            monitoring_flavor: pick(&self.monitoring_flavor, &project.default_monitoring_flavor),
        }
    }
}

/// Body of a cluster Update request. Anything else is rejected on parse.
///
/// `services` are appended; types the cluster already runs are skipped.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterPatch {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub n_hosts: Option<u32>,
    #[serde(default)]
    pub services: Vec<Service>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_defaults_fill_gaps() {
        let project = Project {
            id: "p1".into(),
            name: "research".into(),
            default_image: "ubuntu".into(),
            default_master_flavor: "m1.large".into(),
            default_slaves_flavor: "m1.medium".into(),
            ..Default::default()
        };
        let request = ClusterRequest {
            display_name: "demo".into(),
            image: Some(String::new()),
            slaves_flavor: Some("m1.xlarge".into()),
            ..Default::default()
        };
        let placement = request.placement(&project);
        assert_eq!(placement.image, "ubuntu");
        assert_eq!(placement.master_flavor, "m1.large");
        assert_eq!(placement.slaves_flavor, "m1.xlarge");
        assert_eq!(placement.storage_flavor, "");
    }

    #[test]
    fn test_patch_rejects_unknown_fields() {
        let patch: ClusterPatch = serde_json::from_str(r#"{"n_hosts": 4}"#).unwrap();
        assert_eq!(patch.n_hosts, Some(4));
        assert!(patch.services.is_empty());

        let err = serde_json::from_str::<ClusterPatch>(r#"{"image": "centos"}"#).unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn test_request_services_use_type_key() {
        let request: ClusterRequest = serde_json::from_str(
            r#"{"display_name": "demo", "n_hosts": 2, "services": [{"type": "spark", "version": "2.4"}]}"#,
        )
        .unwrap();
        assert_eq!(request.services[0].service_type, "spark");
        assert_eq!(request.image, None);
    }
}
