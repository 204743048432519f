use crate::cluster::EntityStatus;
use thiserror::Error;

/// Rejected catalog mutation (service type, version, config, dependency).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("service type must not be empty")]
    TypeEmpty,

    #[error("service type {0} already exists")]
    TypeExists(String),

    #[error("service type {0} not found")]
    TypeNotFound(String),

    #[error("unsupported service class {0}: must be storage, master-slave or stand-alone")]
    UnsupportedClass(String),

    #[error("unsupported parameter type {0}: must be int, float, bool or string")]
    UnsupportedParamType(String),

    #[error("port must be greater than zero")]
    InvalidPort,

    #[error("service version must not be empty")]
    VersionEmpty,

    #[error("service version {0} is not unique")]
    VersionNotUnique(String),

    #[error("service version {version} not found for {service_type}")]
    VersionNotFound {
        service_type: String,
        version: String,
    },

    #[error("default version {0} is not among the service versions")]
    DefaultVersionNotFound(String),

    #[error("default version {0} can not be deleted")]
    DefaultVersionDelete(String),

    #[error("parameter name must not be empty")]
    ParameterNameEmpty,

    #[error("parameter name {0} is not unique")]
    ParameterNotUnique(String),

    #[error("parameter {0} not found")]
    ParameterNotFound(String),

    #[error("possible value {value} of {parameter} has incorrect type")]
    PossibleValueIncorrectType { parameter: String, value: String },

    #[error("possible values of {0} must not be empty strings")]
    PossibleValueEmpty(String),

    #[error("possible value {value} of {parameter} is not unique")]
    PossibleValueNotUnique { parameter: String, value: String },

    #[error("default value of {0} is required when possible values are set")]
    DefaultValueEmpty(String),

    #[error("default value of {0} has incorrect type")]
    DefaultValueIncorrectType(String),

    #[error("default value of {0} is not among its possible values")]
    DefaultValueNotPossible(String),

    #[error("dependency service type {0} does not exist")]
    DependencyTypeNotFound(String),

    #[error("dependency on {0} must list at least one version")]
    DependencyVersionsEmpty(String),

    #[error("dependency on {0} must name a default version")]
    DependencyDefaultEmpty(String),

    #[error("dependency version {version} does not exist for {service_type}")]
    DependencyVersionNotFound {
        service_type: String,
        version: String,
    },

    #[error("dependency default version {version} of {service_type} is not among its versions")]
    DependencyDefaultNotListed {
        service_type: String,
        version: String,
    },

    #[error("service type {service_type} is referenced by a dependency of {referenced_by}")]
    TypeReferenced {
        service_type: String,
        referenced_by: String,
    },

    #[error("version {version} of {service_type} is referenced by a dependency of {referenced_by}")]
    VersionReferenced {
        service_type: String,
        version: String,
        referenced_by: String,
    },

    #[error("service type {service_type} is used by cluster {cluster}")]
    TypeInUse {
        service_type: String,
        cluster: String,
    },

    #[error("version {version} of {service_type} is used by cluster {cluster}")]
    VersionInUse {
        service_type: String,
        version: String,
        cluster: String,
    },
}

/// Rejected cluster specification. The cluster is never persisted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("service type must not be empty")]
    ServiceTypeEmpty,

    #[error("service type {0} is not supported")]
    ServiceTypeNotSupported(String),

    #[error("service {0} has no version and its type has no default version")]
    ServiceVersionsEmpty(String),

    #[error("version {version} is not supported for service {service_type}")]
    ServiceVersionNotSupported {
        service_type: String,
        version: String,
    },

    #[error("parameter {parameter} is not supported by service {service_type}")]
    ServiceConfigNotSupported {
        service_type: String,
        parameter: String,
    },

    #[error("parameter {parameter} of service {service_type} has incorrect type")]
    ServiceConfigIncorrectType {
        service_type: String,
        parameter: String,
    },

    #[error("parameter {parameter} of service {service_type} is not one of its possible values")]
    ServiceConfigNotPossibleValue {
        service_type: String,
        parameter: String,
    },

    #[error("service {existing} has incompatible version for service {requested_by}")]
    IncompatibleDependencyVersion {
        existing: String,
        requested_by: String,
    },

    #[error("dependency resolution did not converge after {0} passes")]
    DependencyExpansionLimit(usize),

    #[error("service type {0} is requested more than once")]
    DuplicateServiceType(String),

    #[error("service type {0} has no supported health check")]
    ServiceHealthCheckMissing(String),

    #[error("cluster name must start with a letter and contain only letters, digits and '-'")]
    ClusterBadName,

    #[error("master-slave service {0} requires at least one host")]
    MasterSlaveWithoutHosts(String),

    #[error("image {0} not found")]
    ImageNotFound(String),

    #[error("{field} {name} not found")]
    FlavorNotFound { field: &'static str, name: String },

    #[error("cluster {0} already exists")]
    ClusterExists(String),
}

/// Unified error type at the cluster/catalog API boundary.
#[derive(Error, Debug)]
pub enum NimbusError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} {id} is used by {used_by}")]
    InUse {
        kind: &'static str,
        id: String,
        used_by: String,
    },

    #[error("cluster {id} is {status}: only ACTIVE or FAILED clusters can be updated or deleted")]
    InvalidState { id: String, status: EntityStatus },

    #[error("concurrent modification of {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Internal: {0}")]
    Internal(String),
}

impl NimbusError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        NimbusError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Short machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            NimbusError::Catalog(_) => "catalog",
            NimbusError::Validation(_) => "validation",
            NimbusError::InvalidRequest(_) => "invalid_request",
            NimbusError::NotFound { .. } => "not_found",
            NimbusError::InUse { .. } => "in_use",
            NimbusError::InvalidState { .. } => "invalid_state",
            NimbusError::Conflict(_) => "conflict",
            NimbusError::Store(_) => "store",
            NimbusError::Config(_) => "config",
            NimbusError::Io(_) | NimbusError::Serde(_) | NimbusError::Internal(_) => "internal",
        }
    }

    /// Map to a caller-facing status code.
    pub fn status_code(&self) -> u16 {
        match self {
            NimbusError::Catalog(_) | NimbusError::Validation(_) | NimbusError::InvalidRequest(_) => 400,
            NimbusError::NotFound { .. } => 404,
            NimbusError::InUse { .. } | NimbusError::InvalidState { .. } | NimbusError::Conflict(_) => 409,
            _ => 500,
        }
    }

    /// JSON error body.
    pub fn to_json_body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "status": self.status_code(),
        })
    }
}
