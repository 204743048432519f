use crate::error::CatalogError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Catalog entry describing a deployable cluster component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceType {
    #[serde(default)]
    pub id: String,

    /// Unique key, e.g. `spark`.
    #[serde(rename = "type")]
    pub service_type: String,

    #[serde(default)]
    pub description: String,

    /// Version used when a cluster service omits one.
    #[serde(default)]
    pub default_version: String,

    /// Topology role used for node provisioning and endpoint placement.
    pub class: ServiceClass,

    /// Port appended to the discovered host to form the service URL.
    #[serde(default)]
    pub access_port: Option<u16>,

    #[serde(default)]
    pub ports: Vec<ServicePort>,

    #[serde(default)]
    pub versions: Vec<ServiceVersion>,

    #[serde(default)]
    pub health_check: Option<HealthCheck>,
}

impl ServiceType {
    pub fn version(&self, version: &str) -> Option<&ServiceVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    pub fn version_mut(&mut self, version: &str) -> Option<&mut ServiceVersion> {
        self.versions.iter_mut().find(|v| v.version == version)
    }

    /// The requested version, or the default version when none was requested.
    pub fn effective_version<'a>(&'a self, requested: &'a str) -> &'a str {
        if requested.is_empty() {
            &self.default_version
        } else {
            requested
        }
    }

    /// Health check configs, when the check kind is supported.
    pub fn supported_health_check(&self) -> Option<&HealthCheck> {
        self.health_check.as_ref().filter(|hc| hc.is_supported())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ServiceClass {
    Storage,
    MasterSlave,
    StandAlone,
}

impl ServiceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceClass::Storage => "storage",
            ServiceClass::MasterSlave => "master-slave",
            ServiceClass::StandAlone => "stand-alone",
        }
    }
}

impl FromStr for ServiceClass {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "storage" => Ok(ServiceClass::Storage),
            "master-slave" => Ok(ServiceClass::MasterSlave),
            "stand-alone" => Ok(ServiceClass::StandAlone),
            other => Err(CatalogError::UnsupportedClass(other.to_string())),
        }
    }
}

impl TryFrom<String> for ServiceClass {
    type Error = CatalogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ServiceClass> for String {
    fn from(class: ServiceClass) -> Self {
        class.as_str().to_string()
    }
}

impl fmt::Display for ServiceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePort {
    pub port: u16,
    #[serde(default)]
    pub description: String,
}

/// A releasable version of a service type with its own config schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceVersion {
    #[serde(default)]
    pub id: String,

    /// Unique within the owning service type.
    pub version: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub download_url: String,

    #[serde(default)]
    pub configs: Vec<ServiceConfig>,

    #[serde(default)]
    pub dependencies: Vec<ServiceDependency>,
}

impl ServiceVersion {
    pub fn config(&self, parameter: &str) -> Option<&ServiceConfig> {
        self.configs.iter().find(|c| c.parameter_name == parameter)
    }
}

/// Declared type of a config parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ParamType {
    Int,
    Float,
    Bool,
    String,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Bool => "bool",
            ParamType::String => "string",
        }
    }
}

impl FromStr for ParamType {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int" => Ok(ParamType::Int),
            "float" => Ok(ParamType::Float),
            "bool" => Ok(ParamType::Bool),
            "string" => Ok(ParamType::String),
            other => Err(CatalogError::UnsupportedParamType(other.to_string())),
        }
    }
}

impl TryFrom<String> for ParamType {
    type Error = CatalogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ParamType> for String {
    fn from(ty: ParamType) -> Self {
        ty.as_str().to_string()
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed parameter schema entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub parameter_name: String,

    #[serde(rename = "type")]
    pub param_type: ParamType,

    #[serde(default)]
    pub description: String,

    /// Value is a JSON array of `param_type` elements.
    #[serde(default)]
    pub is_list: bool,

    /// Default value is emitted when the user leaves the parameter unset.
    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub default_value: String,

    #[serde(default)]
    pub possible_values: Vec<String>,

    /// Derived as `<service_type>_<parameter_name>`.
    #[serde(default)]
    pub ansible_var_name: String,
}

impl ServiceConfig {
    pub fn var_name(service_type: &str, parameter: &str) -> String {
        format!("{}_{}", service_type, parameter)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDependency {
    pub service_type: String,

    /// Allowed versions of `service_type`.
    #[serde(default)]
    pub service_versions: Vec<String>,

    /// Version synthesized when the cluster lacks `service_type`.
    #[serde(default)]
    pub default_service_version: String,

    #[serde(default)]
    pub description: String,
}

pub const HEALTH_CHECK_NOT_SUPPORTED: &str = "NotSupported";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub check_type: String,
    #[serde(default)]
    pub configs: Vec<ServiceConfig>,
}

impl HealthCheck {
    pub fn is_supported(&self) -> bool {
        !self.check_type.is_empty() && self.check_type != HEALTH_CHECK_NOT_SUPPORTED
    }
}

/// A service placed into one cluster.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Service {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "type")]
    pub service_type: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub description: String,

    /// Parameter name to raw user value.
    #[serde(default)]
    pub config: BTreeMap<String, String>,

    /// Endpoint assigned after deployment.
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub service_state: String,
}

impl Service {
    pub fn new(name: impl Into<String>, service_type: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            service_type: service_type.into(),
            version: version.into(),
            ..Default::default()
        }
    }
}
