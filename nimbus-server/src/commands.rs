use anyhow::Context;
use clap::{Args, Subcommand, ValueEnum};
use nimbus_coordinator::{ClusterPatch, ClusterRequest, Coordinator, FlavorPatch, ImagePatch, ProjectPatch};
use nimbus_core::{Action, Cluster, Flavor, Image, NimbusConfig, Project, ServiceType};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage the service catalog
    Catalog {
        #[command(subcommand)]
        command: CatalogCommand,
    },
    /// Manage projects
    Project {
        #[command(subcommand)]
        command: ResourceCommand,
    },
    /// Manage images
    Image {
        #[command(subcommand)]
        command: ResourceCommand,
    },
    /// Manage flavors
    Flavor {
        #[command(subcommand)]
        command: ResourceCommand,
    },
    /// Create, change, inspect and delete clusters
    Cluster {
        #[command(subcommand)]
        command: ClusterCommand,
    },
    /// Mark clusters stuck in INITED or STOPPING as FAILED
    Reconcile,
    /// Run the reconciliation loop until interrupted
    Serve,
}

#[derive(Subcommand, Debug)]
pub enum CatalogCommand {
    /// Create service types from a YAML or JSON file (one or a list)
    Import { file: PathBuf },
    /// Print all service types
    List,
    /// Delete a service type no cluster or dependency references
    DeleteType { service_type: String },
    /// Delete a non-default, unreferenced version
    DeleteVersion { service_type: String, version: String },
}

/// Projects are addressed by id or name, images and flavors by name.
#[derive(Subcommand, Debug)]
pub enum ResourceCommand {
    /// Register from a YAML or JSON file (one or a list)
    Add { file: PathBuf },
    /// Print all entries
    List,
    /// Print one entry
    Show { name: String },
    /// Apply the fields set in a YAML or JSON file
    Update { name: String, file: PathBuf },
    /// Remove an entry nothing references
    Delete { name: String },
}

#[derive(Args, Debug)]
pub struct Scope {
    /// Project id or name
    #[arg(short, long)]
    project: String,
}

#[derive(Subcommand, Debug)]
pub enum ClusterCommand {
    /// Validate and provision a new cluster
    Create {
        #[command(flatten)]
        scope: Scope,
        file: PathBuf,
        /// Print the cluster after its run completes
        #[arg(long)]
        wait: bool,
    },
    /// Append services, resize, or rename a cluster
    Update {
        #[command(flatten)]
        scope: Scope,
        cluster: String,
        file: PathBuf,
        #[arg(long)]
        wait: bool,
    },
    /// Destroy a cluster's resources and remove it
    Delete {
        #[command(flatten)]
        scope: Scope,
        cluster: String,
        #[arg(long)]
        wait: bool,
    },
    /// Print one cluster, or every cluster of the project
    Show {
        #[command(flatten)]
        scope: Scope,
        cluster: Option<String>,
    },
    /// Print the output of the cluster's last provisioning run
    Logs {
        #[command(flatten)]
        scope: Scope,
        cluster: String,
        #[arg(long, value_enum)]
        action: Option<RunAction>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum RunAction {
    Create,
    Update,
    Delete,
}

impl From<RunAction> for Action {
    fn from(action: RunAction) -> Self {
        match action {
            RunAction::Create => Action::Create,
            RunAction::Update => Action::Update,
            RunAction::Delete => Action::Delete,
        }
    }
}

/// A document holding one item or a list of items.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

fn read_document<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let data = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn execute(command: Command, coordinator: &Coordinator, config: &NimbusConfig) -> anyhow::Result<()> {
    match command {
        Command::Catalog { command } => catalog(command, coordinator).await,
        Command::Project { command } => project(command, coordinator).await,
        Command::Image { command } => image(command, coordinator).await,
        Command::Flavor { command } => flavor(command, coordinator).await,
        Command::Cluster { command } => cluster(command, coordinator).await,
        Command::Reconcile => {
            let marked = coordinator.reconcile().await?;
            info!(marked, "Reconciliation finished");
            Ok(())
        }
        Command::Serve => serve(coordinator, config).await,
    }
}

async fn project(command: ResourceCommand, coordinator: &Coordinator) -> anyhow::Result<()> {
    match command {
        ResourceCommand::Add { file } => {
            let projects: OneOrMany<Project> = read_document(&file)?;
            for project in projects.into_vec() {
                print(&coordinator.add_project(project).await?)?;
            }
            Ok(())
        }
        ResourceCommand::List => print(&coordinator.list_projects().await?),
        ResourceCommand::Show { name } => print(&coordinator.get_project(&name).await?),
        ResourceCommand::Update { name, file } => {
            let patch: ProjectPatch = read_document(&file)?;
            print(&coordinator.update_project(&name, patch).await?)
        }
        ResourceCommand::Delete { name } => Ok(coordinator.delete_project(&name).await?),
    }
}

async fn image(command: ResourceCommand, coordinator: &Coordinator) -> anyhow::Result<()> {
    match command {
        ResourceCommand::Add { file } => {
            let images: OneOrMany<Image> = read_document(&file)?;
            for image in images.into_vec() {
                print(&coordinator.add_image(image).await?)?;
            }
            Ok(())
        }
        ResourceCommand::List => print(&coordinator.list_images().await?),
        ResourceCommand::Show { name } => print(&coordinator.get_image(&name).await?),
        ResourceCommand::Update { name, file } => {
            let patch: ImagePatch = read_document(&file)?;
            print(&coordinator.update_image(&name, patch).await?)
        }
        ResourceCommand::Delete { name } => Ok(coordinator.delete_image(&name).await?),
    }
}

async fn flavor(command: ResourceCommand, coordinator: &Coordinator) -> anyhow::Result<()> {
    match command {
        ResourceCommand::Add { file } => {
            let flavors: OneOrMany<Flavor> = read_document(&file)?;
            for flavor in flavors.into_vec() {
                print(&coordinator.add_flavor(flavor).await?)?;
            }
            Ok(())
        }
        ResourceCommand::List => print(&coordinator.list_flavors().await?),
        ResourceCommand::Show { name } => print(&coordinator.get_flavor(&name).await?),
        ResourceCommand::Update { name, file } => {
            let patch: FlavorPatch = read_document(&file)?;
            print(&coordinator.update_flavor(&name, patch).await?)
        }
        ResourceCommand::Delete { name } => Ok(coordinator.delete_flavor(&name).await?),
    }
}

async fn catalog(command: CatalogCommand, coordinator: &Coordinator) -> anyhow::Result<()> {
    let catalog = coordinator.catalog();
    match command {
        CatalogCommand::Import { file } => {
            let types: OneOrMany<ServiceType> = read_document(&file)?;
            for st in types.into_vec() {
                let name = st.service_type.clone();
                catalog
                    .create_service_type(st)
                    .await
                    .with_context(|| format!("importing service type {}", name))?;
            }
            print(&catalog.list_service_types())
        }
        CatalogCommand::List => print(&catalog.list_service_types()),
        CatalogCommand::DeleteType { service_type } => Ok(catalog.delete_service_type(&service_type).await?),
        CatalogCommand::DeleteVersion { service_type, version } => {
            Ok(catalog.delete_version(&service_type, &version).await?)
        }
    }
}

async fn cluster(command: ClusterCommand, coordinator: &Coordinator) -> anyhow::Result<()> {
    match command {
        ClusterCommand::Create { scope, file, wait } => {
            let request: ClusterRequest = read_document(&file)?;
            let cluster = coordinator.create_cluster(&scope.project, request).await?;
            settle(coordinator, &scope, cluster, wait).await
        }
        ClusterCommand::Update {
            scope,
            cluster,
            file,
            wait,
        } => {
            let patch: ClusterPatch = read_document(&file)?;
            let cluster = coordinator.update_cluster(&scope.project, &cluster, patch).await?;
            settle(coordinator, &scope, cluster, wait).await
        }
        ClusterCommand::Delete { scope, cluster, wait } => {
            let cluster = coordinator.delete_cluster(&scope.project, &cluster).await?;
            let id = cluster.id.clone();
            print(&cluster)?;
            if wait {
                coordinator.dispatcher().wait_for(&id).await;
                match coordinator.get_cluster(&scope.project, &id).await {
                    Ok(cluster) => print(&cluster)?,
                    Err(e) if e.status_code() == 404 => info!(cluster_id = %id, "Cluster deleted"),
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(())
        }
        ClusterCommand::Show { scope, cluster } => match cluster {
            Some(cluster) => print(&coordinator.get_cluster(&scope.project, &cluster).await?),
            None => print(&coordinator.list_clusters(&scope.project).await?),
        },
        ClusterCommand::Logs { scope, cluster, action } => {
            let logs = coordinator
                .cluster_logs(&scope.project, &cluster, action.map(Action::from))
                .await?;
            print!("{}", logs);
            Ok(())
        }
    }
}

/// Print the accepted cluster, and with `wait` its state after the run.
async fn settle(coordinator: &Coordinator, scope: &Scope, cluster: Cluster, wait: bool) -> anyhow::Result<()> {
    print(&cluster)?;
    if wait {
        coordinator.dispatcher().wait_for(&cluster.id).await;
        print(&coordinator.get_cluster(&scope.project, &cluster.id).await?)?;
    }
    Ok(())
}

async fn serve(coordinator: &Coordinator, config: &NimbusConfig) -> anyhow::Result<()> {
    let period = Duration::from_secs(config.coordinator.reconcile_interval_secs.max(1));
    let mut ticker = tokio::time::interval(period);
    info!(interval_secs = period.as_secs(), "Reconciliation loop started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match coordinator.reconcile().await {
                    Ok(0) => {}
                    Ok(marked) => info!(marked, "Orphaned clusters marked FAILED"),
                    Err(e) => warn!(error = %e, "Reconciliation failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, stopping...");
                return Ok(());
            }
        }
    }
}
