use serde::{Deserialize, Serialize};

/// Owns clusters and supplies their default image and flavors.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default_image: String,
    #[serde(default)]
    pub default_master_flavor: String,
    #[serde(default)]
    pub default_slaves_flavor: String,
    #[serde(default)]
    pub default_storage_flavor: String,
    #[serde(default)]
    pub default_monitoring_flavor: String,
}

/// Cloud image cluster nodes boot from.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Image {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Login user the automation connects as.
    pub ansible_user: String,
    /// Image ID in the cloud.
    pub cloud_image_id: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Flavor {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub vcpus: u32,
    /// MiB
    #[serde(default)]
    pub ram: u64,
    /// GiB
    #[serde(default)]
    pub disk: u64,
}
