pub mod authoring;
pub mod catalog;
pub mod cluster;
pub mod config;
pub mod error;
pub mod project;
pub mod remote;
pub mod resolver;
pub mod service;
pub mod validate;
pub mod value;

pub use catalog::Catalog;
pub use cluster::{Cluster, EntityStatus};
pub use config::NimbusConfig;
pub use error::{CatalogError, NimbusError, ValidationError};
pub use project::{Flavor, Image, Project};
pub use remote::{Action, RemoteExecutor, TaskOutcome, TaskStatus};
pub use resolver::Resolver;
pub use service::{
    HealthCheck, ParamType, Service, ServiceClass, ServiceConfig, ServiceDependency, ServicePort,
    ServiceType, ServiceVersion,
};
pub use value::ParamValue;
