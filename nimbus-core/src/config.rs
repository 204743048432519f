use figment::{Figment, providers::{Env, Format, Yaml}};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NimbusConfig {
    #[serde(default)]
    pub openstack: OpenStackConfig,
    #[serde(default)]
    pub mirrors: MirrorConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub launcher: LauncherConfig,
    #[serde(default)]
    pub logs: ClusterLogsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
}

/// Cloud placement settings passed through to the automation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenStackConfig {
    #[serde(default)]
    pub key_name: String,
    #[serde(default)]
    pub virtual_network: String,
    #[serde(default)]
    pub floating_ip_pool: String,
    #[serde(default)]
    pub os_version: OsVersion,
}

/// OpenStack release; selects the credential field names in the secret store.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OsVersion {
    #[default]
    Ussuri,
    Stein,
    Liberty,
}

/// Package mirrors used while installing services.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(default)]
    pub use_package_mirror: bool,
    #[serde(default)]
    pub use_pip_mirror: bool,
    #[serde(default)]
    pub apt_mirror_address: String,
    #[serde(default)]
    pub pip_mirror_address: String,
    #[serde(default)]
    pub pip_trusted_host: String,
    #[serde(default)]
    pub yum_mirror_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    #[serde(default)]
    pub backend: SecretsBackend,
    #[serde(default = "default_vault_addr")]
    pub vault_addr: String,
    #[serde(default)]
    pub token: String,
    /// Path of the OpenStack credentials secret.
    #[serde(default = "default_os_key")]
    pub os_key: String,
    /// Path of the cluster SSH key secret.
    #[serde(default = "default_ssh_key")]
    pub ssh_key: String,
    /// YAML file holding secrets when `backend` is `file`.
    #[serde(default = "default_secrets_file")]
    pub file_path: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SecretsBackend {
    #[default]
    Vault,
    File,
}

/// External automation process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherConfig {
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default = "default_ansible_config")]
    pub ansible_config: PathBuf,
    #[serde(default = "default_instances_playbook")]
    pub instances_playbook: PathBuf,
    #[serde(default = "default_services_playbook")]
    pub services_playbook: PathBuf,
    #[serde(default = "default_ip_playbook")]
    pub ip_playbook: PathBuf,
    #[serde(default = "default_ssh_key_path")]
    pub ssh_key_path: PathBuf,
    /// Where auxiliary artifacts are downloaded.
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
    /// Number of `v` in the `-v` flag of provisioning runs.
    #[serde(default = "default_verbosity")]
    pub verbosity: u8,
}

/// Where per-run cluster logs go.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterLogsConfig {
    #[serde(default)]
    pub output: LogsOutput,
    #[serde(default = "default_logs_path")]
    pub file_path: PathBuf,
    #[serde(default = "default_logstash_addr")]
    pub logstash_addr: String,
    #[serde(default = "default_elastic_addr")]
    pub elastic_addr: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogsOutput {
    #[default]
    File,
    Logstash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub mode: StoreMode,
    /// JSON state file for `file` mode.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default)]
    pub etcd: Option<EtcdConfig>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    #[default]
    File,
    Etcd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    #[serde(default = "default_etcd_prefix")]
    pub prefix: String,
    #[serde(default = "default_etcd_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Concurrent provisioning runs.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Deadline of one provisioning run.
    #[serde(default = "default_launch_timeout")]
    pub launch_timeout_secs: u64,
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
    /// Dependency resolution pass bound. 0 = derive from the catalog size.
    #[serde(default)]
    pub max_dependency_passes: usize,
}

// ── Defaults ──────────────────────────────────────────────────

fn default_vault_addr() -> String { "http://127.0.0.1:8200".into() }
fn default_os_key() -> String { "secret/openstack".into() }
fn default_ssh_key() -> String { "secret/ssh".into() }
fn default_secrets_file() -> PathBuf { "secrets.yaml".into() }
fn default_command() -> String { "ansible-playbook".into() }
fn default_ansible_config() -> PathBuf { "ansible/ansible.cfg".into() }
fn default_instances_playbook() -> PathBuf { "ansible/instances.yml".into() }
fn default_services_playbook() -> PathBuf { "ansible/services.yml".into() }
fn default_ip_playbook() -> PathBuf { "ansible/get_ip.yml".into() }
fn default_ssh_key_path() -> PathBuf { "ansible/files/ssh_key".into() }
fn default_artifacts_dir() -> PathBuf { "/tmp".into() }
fn default_verbosity() -> u8 { 3 }
fn default_logs_path() -> PathBuf { "logs".into() }
fn default_logstash_addr() -> String { "http://127.0.0.1:5000".into() }
fn default_elastic_addr() -> String { "http://127.0.0.1:9200".into() }
fn default_state_file() -> PathBuf { "data/nimbus-state.json".into() }
fn default_etcd_prefix() -> String { "/nimbus".into() }
fn default_etcd_timeout() -> u64 { 30 }
fn default_workers() -> usize { 4 }
fn default_launch_timeout() -> u64 { 6000 }
fn default_reconcile_interval() -> u64 { 60 }

// ── Impls ─────────────────────────────────────────────────────

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            backend: SecretsBackend::Vault,
            vault_addr: default_vault_addr(),
            token: String::new(),
            os_key: default_os_key(),
            ssh_key: default_ssh_key(),
            file_path: default_secrets_file(),
        }
    }
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            ansible_config: default_ansible_config(),
            instances_playbook: default_instances_playbook(),
            services_playbook: default_services_playbook(),
            ip_playbook: default_ip_playbook(),
            ssh_key_path: default_ssh_key_path(),
            artifacts_dir: default_artifacts_dir(),
            verbosity: default_verbosity(),
        }
    }
}

impl Default for ClusterLogsConfig {
    fn default() -> Self {
        Self {
            output: LogsOutput::File,
            file_path: default_logs_path(),
            logstash_addr: default_logstash_addr(),
            elastic_addr: default_elastic_addr(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            mode: StoreMode::File,
            state_file: default_state_file(),
            etcd: None,
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            launch_timeout_secs: default_launch_timeout(),
            reconcile_interval_secs: default_reconcile_interval(),
            max_dependency_passes: 0,
        }
    }
}

impl NimbusConfig {
    /// Load config from a YAML file, overridden by `NIMBUS_` environment
    /// variables (`NIMBUS_LAUNCHER__COMMAND=...`).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config: NimbusConfig = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("NIMBUS_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Effective worker count.
    pub fn effective_workers(&self) -> usize {
        self.coordinator.workers.max(1)
    }
}
