//! Credentials fetched per provisioning run.
//!
//! Secrets are never cached: every run reads the OpenStack credentials and,
//! when the key file is absent, the cluster SSH key.

use crate::error::SecretError;
use async_trait::async_trait;
use nimbus_core::config::{OsVersion, SecretsBackend, SecretsConfig};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Flat string fields of one secret.
pub type SecretData = BTreeMap<String, String>;

/// Field of the SSH secret holding the private key.
pub const SSH_KEY_FIELD: &str = "key_bgt";

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<SecretData, SecretError>;
}

/// Build the store selected by `config.backend`.
pub fn secret_store(config: &SecretsConfig) -> Arc<dyn SecretStore> {
    match config.backend {
        SecretsBackend::Vault => Arc::new(VaultSecretStore::new(&config.vault_addr, &config.token)),
        SecretsBackend::File => Arc::new(FileSecretStore::new(config.file_path.clone())),
    }
}

/// Reads `GET {addr}/v1/{key}` from a Vault server.
pub struct VaultSecretStore {
    client: reqwest::Client,
    addr: String,
    token: String,
}

impl VaultSecretStore {
    pub fn new(addr: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            addr: addr.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }
}

#[async_trait]
impl SecretStore for VaultSecretStore {
    async fn read(&self, key: &str) -> Result<SecretData, SecretError> {
        let url = format!("{}/v1/{}", self.addr, key.trim_start_matches('/'));
        let resp = self
            .client
            .get(url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SecretError::NotFound(key.to_string()));
        }
        let body: serde_json::Value = resp.error_for_status()?.json().await?;
        debug!(key, "Secret read from vault");
        Ok(flatten_vault_data(&body))
    }
}

/// KV v1 keeps fields under `data`, KV v2 under `data.data`.
fn flatten_vault_data(body: &serde_json::Value) -> SecretData {
    let data = &body["data"];
    let fields = match data.get("data") {
        Some(inner) if inner.is_object() && data.get("metadata").is_some() => inner,
        _ => data,
    };
    let Some(fields) = fields.as_object() else {
        return SecretData::new();
    };
    fields
        .iter()
        .map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

/// Secrets kept in a local YAML file: `{ <key>: { <field>: <value> } }`.
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn read(&self, key: &str) -> Result<SecretData, SecretError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let mut all: BTreeMap<String, SecretData> = serde_yaml::from_str(&raw)?;
        all.remove(key).ok_or_else(|| SecretError::NotFound(key.to_string()))
    }
}

/// Environment names of the credential fields for each OpenStack release.
pub fn credential_fields(version: OsVersion) -> &'static [&'static str] {
    match version {
        OsVersion::Ussuri => &[
            "OS_AUTH_URL",
            "OS_PROJECT_NAME",
            "OS_PROJECT_ID",
            "OS_INTERFACE",
            "OS_PASSWORD",
            "OS_REGION_NAME",
            "OS_USERNAME",
            "OS_USER_DOMAIN_NAME",
            "OS_PROJECT_DOMAIN_ID",
            "OS_IDENTITY_API_VERSION",
        ],
        OsVersion::Stein => &[
            "OS_AUTH_URL",
            "OS_PASSWORD",
            "OS_PROJECT_NAME",
            "OS_REGION_NAME",
            "OS_USERNAME",
            "COMPUTE_API_VERSION",
            "NOVA_VERSION",
            "OS_AUTH_TYPE",
            "OS_CLOUDNAME",
            "OS_IDENTITY_API_VERSION",
            "OS_IMAGE_API_VERSION",
            "OS_NO_CACHE",
            "OS_PROJECT_DOMAIN_NAME",
            "OS_USER_DOMAIN_NAME",
            "OS_VOLUME_API_VERSION",
            "PYTHONWARNINGS",
            "no_proxy",
        ],
        OsVersion::Liberty => &[
            "OS_AUTH_URL",
            "OS_PASSWORD",
            "OS_PROJECT_NAME",
            "OS_REGION_NAME",
            "OS_TENANT_ID",
            "OS_TENANT_NAME",
            "OS_USERNAME",
            "OS_SWIFT_USERNAME",
            "OS_SWIFT_PASSWORD",
        ],
    }
}

/// OpenStack credentials keyed by environment variable name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OsCredentials {
    values: BTreeMap<String, String>,
}

impl OsCredentials {
    /// Pick the release's credential fields out of a secret. Absent fields are empty.
    pub fn from_secret(version: OsVersion, secret: &SecretData) -> Self {
        let values = credential_fields(version)
            .iter()
            .map(|field| {
                let value = secret.get(*field).cloned().unwrap_or_default();
                (field.to_string(), value)
            })
            .collect();
        Self { values }
    }

    pub async fn fetch(
        store: &dyn SecretStore,
        key: &str,
        version: OsVersion,
    ) -> Result<Self, SecretError> {
        let secret = store.read(key).await?;
        Ok(Self::from_secret(version, &secret))
    }

    pub fn get(&self, field: &str) -> &str {
        self.values.get(field).map(String::as_str).unwrap_or("")
    }

    pub fn auth_url(&self) -> &str {
        self.get("OS_AUTH_URL")
    }

    pub fn project_name(&self) -> &str {
        self.get("OS_PROJECT_NAME")
    }

    pub fn swift_user_name(&self) -> &str {
        self.get("OS_SWIFT_USERNAME")
    }

    pub fn swift_password(&self) -> &str {
        self.get("OS_SWIFT_PASSWORD")
    }

    /// Non-empty fields, exported to the automation process environment.
    pub fn env(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Write the cluster SSH key to `path` unless it is already there.
pub async fn ensure_ssh_key(store: &dyn SecretStore, key: &str, path: &Path) -> Result<(), SecretError> {
    if tokio::fs::try_exists(path).await? {
        return Ok(());
    }
    let secret = store.read(key).await?;
    let private_key = secret.get(SSH_KEY_FIELD).ok_or_else(|| SecretError::MissingField {
        key: key.to_string(),
        field: SSH_KEY_FIELD.to_string(),
    })?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, private_key).await?;
    set_read_only(path).await?;
    info!(path = %path.display(), "SSH key written");
    Ok(())
}

#[cfg(unix)]
async fn set_read_only(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o400)).await
}

#[cfg(not(unix))]
async fn set_read_only(path: &Path) -> std::io::Result<()> {
    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_readonly(true);
    tokio::fs::set_permissions(path, perms).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_kv_versions() {
        let v1 = json!({ "data": { "OS_AUTH_URL": "http://keystone", "port": 5000 } });
        let fields = flatten_vault_data(&v1);
        assert_eq!(fields["OS_AUTH_URL"], "http://keystone");
        assert_eq!(fields["port"], "5000");

        let v2 = json!({ "data": { "data": { "key_bgt": "PRIVATE" }, "metadata": {} } });
        assert_eq!(flatten_vault_data(&v2)["key_bgt"], "PRIVATE");
    }

    #[test]
    fn test_credentials_per_release() {
        let mut secret = SecretData::new();
        secret.insert("OS_AUTH_URL".into(), "http://keystone:5000/v3".into());
        secret.insert("OS_PROJECT_NAME".into(), "research".into());
        secret.insert("OS_SWIFT_USERNAME".into(), "swift".into());

        let ussuri = OsCredentials::from_secret(OsVersion::Ussuri, &secret);
        assert_eq!(ussuri.auth_url(), "http://keystone:5000/v3");
        assert_eq!(ussuri.project_name(), "research");
        // Swift credentials exist only for liberty.
        assert_eq!(ussuri.swift_user_name(), "");
        assert_eq!(ussuri.env().count(), 2);

        let liberty = OsCredentials::from_secret(OsVersion::Liberty, &secret);
        assert_eq!(liberty.swift_user_name(), "swift");
    }

    #[tokio::test]
    async fn test_file_store_and_ssh_key() {
        let dir = tempfile::tempdir().unwrap();
        let secrets = dir.path().join("secrets.yaml");
        std::fs::write(
            &secrets,
            "secret/ssh:\n  key_bgt: PRIVATE KEY\nsecret/openstack:\n  OS_AUTH_URL: http://keystone\n",
        )
        .unwrap();
        let store = FileSecretStore::new(secrets);

        let creds = OsCredentials::fetch(&store, "secret/openstack", OsVersion::Stein).await.unwrap();
        assert_eq!(creds.auth_url(), "http://keystone");
        assert!(matches!(store.read("secret/none").await, Err(SecretError::NotFound(_))));

        let key_path = dir.path().join("files").join("ssh_key");
        ensure_ssh_key(&store, "secret/ssh", &key_path).await.unwrap();
        assert_eq!(std::fs::read_to_string(&key_path).unwrap(), "PRIVATE KEY");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&key_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o400);
        }

        // Existing key is left alone even when the secret is gone.
        ensure_ssh_key(&store, "secret/missing", &key_path).await.unwrap();
    }
}
