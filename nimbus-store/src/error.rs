use nimbus_core::NimbusError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("revision conflict on cluster {id}: expected {expected}, found {found}")]
    Conflict { id: String, expected: u64, found: u64 },

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn exists(kind: &'static str, id: impl Into<String>) -> Self {
        StoreError::AlreadyExists { kind, id: id.into() }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound { kind, id: id.into() }
    }
}

#[cfg(feature = "etcd")]
impl From<etcd_client::Error> for StoreError {
    fn from(e: etcd_client::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<StoreError> for NimbusError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { kind, id } => NimbusError::NotFound { kind, id },
            StoreError::Conflict { id, .. } => NimbusError::Conflict(id),
            StoreError::AlreadyExists { kind, id } => {
                NimbusError::Conflict(format!("{kind} {id} already exists"))
            }
            other => NimbusError::Store(other.to_string()),
        }
    }
}
