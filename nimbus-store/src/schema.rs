/// etcd key schema for Nimbus.
///
/// All keys are prefixed with the configured prefix (default: `/nimbus`).
///
/// Schema:
/// ```text
/// /nimbus/service_types/{type}
/// /nimbus/clusters/{cluster_id}
/// /nimbus/cluster_names/{project_id}/{cluster_name}   -> cluster_id
/// /nimbus/projects/{project_id}
/// /nimbus/images/{image_name}
/// /nimbus/flavors/{flavor_name}
/// ```
pub struct KeySchema {
    prefix: String,
}

impl KeySchema {
    pub fn new(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/').to_string();
        Self { prefix }
    }

    pub fn service_types_prefix(&self) -> String {
        format!("{}/service_types/", self.prefix)
    }

    pub fn service_type_key(&self, name: &str) -> String {
        format!("{}/service_types/{}", self.prefix, name)
    }

    pub fn clusters_prefix(&self) -> String {
        format!("{}/clusters/", self.prefix)
    }

    pub fn cluster_key(&self, id: &str) -> String {
        format!("{}/clusters/{}", self.prefix, id)
    }

    pub fn cluster_name_key(&self, project_id: &str, name: &str) -> String {
        format!("{}/cluster_names/{}/{}", self.prefix, project_id, name)
    }

    pub fn projects_prefix(&self) -> String {
        format!("{}/projects/", self.prefix)
    }

    pub fn project_key(&self, id: &str) -> String {
        format!("{}/projects/{}", self.prefix, id)
    }

    pub fn images_prefix(&self) -> String {
        format!("{}/images/", self.prefix)
    }

    pub fn image_key(&self, name: &str) -> String {
        format!("{}/images/{}", self.prefix, name)
    }

    pub fn flavors_prefix(&self) -> String {
        format!("{}/flavors/", self.prefix)
    }

    pub fn flavor_key(&self, name: &str) -> String {
        format!("{}/flavors/{}", self.prefix, name)
    }

    /// Extract the resource type and ID from a key.
    pub fn parse_key(&self, key: &str) -> Option<(String, String)> {
        let suffix = key.strip_prefix(&format!("{}/", self.prefix))?;
        let mut parts = suffix.splitn(2, '/');
        let resource_type = parts.next()?.to_string();
        let id = parts.next()?.to_string();
        Some((resource_type, id))
    }
}
