use nimbus_core::value::ParseValueError;
use nimbus_observability::LogError;
use nimbus_store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Failure turning a cluster into the automation variable map.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("service type {0} is not in the catalog")]
    TypeNotFound(String),

    #[error("service type {service_type} has no version {version}")]
    VersionNotFound { service_type: String, version: String },

    #[error("invalid value for {variable}: {source}")]
    Value {
        variable: String,
        #[source]
        source: ParseValueError,
    },

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("download failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("extraction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("{} missing after extraction", .0.display())]
    Missing(PathBuf),
}

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("secret store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("secrets file is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("secret {0} not found")]
    NotFound(String),

    #[error("secret {key} has no field {field}")]
    MissingField { key: String, field: String },
}

/// Anything that aborts a provisioning run before the automation verdict.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("cluster log: {0}")]
    Log(#[from] LogError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("image {0} not found")]
    ImageNotFound(String),

    #[error("no {0} address in discovery output")]
    Discovery(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::ParamType;

    #[test]
    fn test_value_error_names_variable() {
        let err = CompileError::Value {
            variable: "spark_worker_cores".into(),
            source: ParseValueError::Scalar {
                value: "many".into(),
                expected: ParamType::Int,
            },
        };
        assert_eq!(
            err.to_string(),
            "invalid value for spark_worker_cores: \"many\" is not a valid int"
        );
    }
}
