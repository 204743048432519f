use crate::artifacts::ArtifactRegistry;
use crate::compiler::{CompileInput, Topology, compile, topology};
use crate::discovery::{NodeRole, assign_service_urls, find_ipv4};
use crate::error::LaunchError;
use crate::process::{AnsiblePlaybook, AutomationProcess, Invocation};
use crate::secrets::{OsCredentials, SecretStore, ensure_ssh_key, secret_store};
use async_trait::async_trait;
use nimbus_core::{Action, Catalog, Cluster, NimbusConfig, RemoteExecutor, TaskOutcome, TaskStatus};
use nimbus_observability::cluster_log::LogWriter;
use nimbus_observability::cluster_logger;
use nimbus_store::Database;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Orchestration tier: turns a cluster record into automation runs.
pub struct Launcher {
    config: Arc<NimbusConfig>,
    db: Arc<dyn Database>,
    secrets: Arc<dyn SecretStore>,
    process: Arc<dyn AutomationProcess>,
    artifacts: Arc<ArtifactRegistry>,
}

/// Per-run state shared by the playbook steps.
struct RunContext<'a> {
    catalog: &'a Catalog,
    credentials: &'a OsCredentials,
    topology: Topology,
    extra_vars: String,
}

impl Launcher {
    /// Launcher wired from configuration: configured secret backend,
    /// `ansible-playbook` process, built-in artifact resolvers.
    pub fn new(config: Arc<NimbusConfig>, db: Arc<dyn Database>) -> Self {
        let secrets = secret_store(&config.secrets);
        let process = Arc::new(AnsiblePlaybook::new(
            config.launcher.command.clone(),
            config.launcher.ansible_config.clone(),
        ));
        Self::with_parts(config, db, secrets, process, Arc::new(ArtifactRegistry::with_builtins()))
    }

    pub fn with_parts(
        config: Arc<NimbusConfig>,
        db: Arc<dyn Database>,
        secrets: Arc<dyn SecretStore>,
        process: Arc<dyn AutomationProcess>,
        artifacts: Arc<ArtifactRegistry>,
    ) -> Self {
        Self {
            config,
            db,
            secrets,
            process,
            artifacts,
        }
    }

    async fn run(&self, mut cluster: Cluster, action: Action) -> TaskOutcome {
        info!(cluster_id = %cluster.id, cluster = %cluster.name, action = %action, "Provisioning run started");
        match self.try_run(&mut cluster, action).await {
            Ok(true) => {
                info!(cluster_id = %cluster.id, action = %action, "Provisioning run OK");
                TaskOutcome::ok(cluster)
            }
            Ok(false) => {
                warn!(cluster_id = %cluster.id, action = %action, "Automation failed, see cluster logs");
                TaskOutcome::failed(TaskStatus::RunFail, cluster)
            }
            Err(e) => {
                error!(cluster_id = %cluster.id, action = %action, error = %e, "Provisioning run aborted");
                TaskOutcome::failed(TaskStatus::Fail, cluster)
            }
        }
    }

    async fn try_run(&self, cluster: &mut Cluster, action: Action) -> Result<bool, LaunchError> {
        let secrets = &self.config.secrets;
        let credentials =
            OsCredentials::fetch(self.secrets.as_ref(), &secrets.os_key, self.config.openstack.os_version).await?;
        let ssh_key_path = std::path::absolute(&self.config.launcher.ssh_key_path)?;
        ensure_ssh_key(self.secrets.as_ref(), &secrets.ssh_key, &ssh_key_path).await?;

        let catalog = Catalog::new(self.db.list_service_types().await?);
        let image = self
            .db
            .read_image(&cluster.image)
            .await?
            .ok_or_else(|| LaunchError::ImageNotFound(cluster.image.clone()))?;

        let input = CompileInput {
            cluster,
            catalog: &catalog,
            image: &image,
            credentials: &credentials,
            openstack: &self.config.openstack,
            mirrors: &self.config.mirrors,
            ssh_key_path: &ssh_key_path,
            action,
        };
        let vars = compile(&input, &self.artifacts, &self.config.launcher.artifacts_dir).await?;
        let ctx = RunContext {
            catalog: &catalog,
            credentials: &credentials,
            topology: topology(&catalog, cluster),
            extra_vars: serde_json::to_string(&vars)?,
        };

        let mut logger = cluster_logger(&self.config.logs, &cluster.id, &cluster.name, action);
        let result = match logger.prep_writer().await {
            Ok(sink) => self.provision(cluster, action, &ctx, sink).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = logger.finalize().await {
            warn!(cluster_id = %cluster.id, error = %e, "Cluster log not persisted");
        }
        result
    }

    async fn provision(
        &self,
        cluster: &mut Cluster,
        action: Action,
        ctx: &RunContext<'_>,
        sink: &mut LogWriter,
    ) -> Result<bool, LaunchError> {
        let launcher = &self.config.launcher;
        match action {
            Action::Delete => self.run_playbook(&launcher.instances_playbook, ctx, sink).await,
            Action::Create | Action::Update => {
                if action == Action::Create && !self.run_playbook(&launcher.instances_playbook, ctx, sink).await? {
                    return Ok(false);
                }
                // Update refreshes the master address as well.
                if ctx.topology.create_master || ctx.topology.create_master_slave {
                    cluster.master_ip = self.discover(&cluster.name, NodeRole::Master, ctx).await?;
                    info!(cluster_id = %cluster.id, master_ip = %cluster.master_ip, "Master discovered");
                }
                if !self.run_playbook(&launcher.services_playbook, ctx, sink).await? {
                    return Ok(false);
                }

                let storage_ip = if ctx.topology.create_storage {
                    self.discover(&cluster.name, NodeRole::Storage, ctx).await?
                } else {
                    String::new()
                };
                if cluster.monitoring {
                    let monitoring_ip = self.discover(&cluster.name, NodeRole::Monitoring, ctx).await?;
                    info!(cluster_id = %cluster.id, monitoring_ip = %monitoring_ip, "Monitoring discovered");
                }
                assign_service_urls(ctx.catalog, &mut cluster.services, &cluster.master_ip, &storage_ip);
                Ok(true)
            }
        }
    }

    async fn run_playbook(&self, playbook: &Path, ctx: &RunContext<'_>, sink: &mut LogWriter) -> Result<bool, LaunchError> {
        let invocation = Invocation::new(playbook, self.config.launcher.verbosity, ctx.extra_vars.clone())
            .with_env(ctx.credentials.env());
        info!(playbook = %playbook.display(), "Running automation");
        Ok(self.process.run(&invocation, sink).await?)
    }

    /// Address of one node group, read from the discovery playbook's output.
    async fn discover(&self, cluster_name: &str, role: NodeRole, ctx: &RunContext<'_>) -> Result<String, LaunchError> {
        let vars = json!({ "cluster_name": cluster_name, "extended_role": role.as_str() });
        let invocation = Invocation::new(&self.config.launcher.ip_playbook, 1, vars.to_string())
            .with_env(ctx.credentials.env());
        let mut output: Vec<u8> = Vec::new();
        if !self.process.run(&invocation, &mut output).await? {
            return Err(LaunchError::Discovery(role.as_str()));
        }
        let text = String::from_utf8_lossy(&output);
        find_ipv4(&text)
            .map(str::to_string)
            .ok_or(LaunchError::Discovery(role.as_str()))
    }
}

#[async_trait]
impl RemoteExecutor for Launcher {
    async fn create(&self, cluster: Cluster) -> TaskOutcome {
        self.run(cluster, Action::Create).await
    }

    async fn update(&self, cluster: Cluster) -> TaskOutcome {
        self.run(cluster, Action::Update).await
    }

    async fn delete(&self, cluster: Cluster) -> TaskOutcome {
        self.run(cluster, Action::Delete).await
    }
}
