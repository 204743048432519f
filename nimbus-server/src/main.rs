// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Nimbus: OpenStack analytics cluster provisioning
//
//  Coordinator:  validation, persistence, bounded run dispatch
//  Launcher:     variable compilation + ansible-playbook runs
//  Store:        JSON state file / etcd
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

mod commands;

use clap::Parser;
use commands::Command;
use nimbus_coordinator::Coordinator;
use nimbus_core::NimbusConfig;
use nimbus_core::config::{StoreConfig, StoreMode};
use nimbus_launcher::Launcher;
use nimbus_store::{Database, MemoryDatabase};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "nimbus", version, about = "Nimbus: OpenStack analytics cluster provisioning")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/nimbus/nimbus.yaml", global = true)]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    if let Err(e) = run(cli).await {
        match e.downcast_ref::<nimbus_core::NimbusError>() {
            Some(err) => eprintln!("{}", err.to_json_body()),
            None => eprintln!("error: {:#}", e),
        }
        std::process::exit(1);
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // ── Config ──
    let config = if cli.config.exists() {
        info!(path = %cli.config.display(), "Loading config file");
        NimbusConfig::load(&cli.config)?
    } else {
        info!("No config file found, using defaults");
        NimbusConfig::default()
    };
    let config = Arc::new(config);

    // ── Store ──
    let db = open_store(&config.store).await?;

    // ── Orchestration tier + coordinator ──
    let launcher = Arc::new(Launcher::new(Arc::clone(&config), Arc::clone(&db)));
    let coordinator = Coordinator::new(&config, db, launcher).await?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        workers = config.effective_workers(),
        store = ?config.store.mode,
        "Nimbus ready"
    );

    commands::execute(cli.command, &coordinator, &config).await?;

    // Runs live in this process: let queued ones finish before exiting.
    if coordinator.dispatcher().in_flight_count() > 0 {
        info!(in_flight = coordinator.dispatcher().in_flight_count(), "Waiting for provisioning runs");
        coordinator.dispatcher().drain().await;
    }
    Ok(())
}

async fn open_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn Database>> {
    match config.mode {
        StoreMode::File => {
            info!(path = %config.state_file.display(), "Using file store");
            Ok(Arc::new(MemoryDatabase::with_state_file(&config.state_file)))
        }
        StoreMode::Etcd => open_etcd(config).await,
    }
}

#[cfg(feature = "etcd")]
async fn open_etcd(config: &StoreConfig) -> anyhow::Result<Arc<dyn Database>> {
    use anyhow::Context;

    let etcd = config.etcd.as_ref().context("store.etcd section is required in etcd mode")?;
    let db = nimbus_store::etcd::EtcdDatabase::connect(
        &etcd.endpoints,
        &etcd.prefix,
        std::time::Duration::from_secs(etcd.timeout_secs),
    )
    .await?;
    Ok(Arc::new(db))
}

#[cfg(not(feature = "etcd"))]
async fn open_etcd(_config: &StoreConfig) -> anyhow::Result<Arc<dyn Database>> {
    anyhow::bail!("etcd store requested but nimbus was built without the `etcd` feature")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_cluster_create() {
        let cli = Cli::try_parse_from([
            "nimbus",
            "--log-json",
            "cluster",
            "create",
            "--project",
            "research",
            "cluster.yaml",
            "--wait",
        ])
        .unwrap();
        assert!(cli.log_json);
        assert!(matches!(cli.command, Command::Cluster { .. }));
    }

    #[test]
    fn test_cli_parses_resource_commands() {
        let cli = Cli::try_parse_from(["nimbus", "flavor", "update", "m1.small", "flavor.yaml"]).unwrap();
        match cli.command {
            Command::Flavor {
                command: commands::ResourceCommand::Update { name, file },
            } => {
                assert_eq!(name, "m1.small");
                assert_eq!(file, PathBuf::from("flavor.yaml"));
            }
            other => panic!("unexpected command {:?}", other),
        }

        let cli = Cli::try_parse_from(["nimbus", "project", "delete", "research"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Project {
                command: commands::ResourceCommand::Delete { .. }
            }
        ));
    }

    #[test]
    fn test_cli_rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["nimbus", "launch"]).is_err());
    }
}
