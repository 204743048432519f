//! Cluster to automation variable map.
//!
//! [`compile_vars`] is pure. [`compile`] adds the `spark_extra_jars` list,
//! which may download connector artifacts the first time they are needed.

use crate::artifacts::ArtifactRegistry;
use crate::error::CompileError;
use crate::secrets::OsCredentials;
use nimbus_core::config::{MirrorConfig, OpenStackConfig};
use nimbus_core::{Action, Catalog, Cluster, Image, ParamValue, Service, ServiceClass, ServiceConfig};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::path::Path;

pub type ExtraVars = Map<String, Value>;

/// Everything a compilation reads.
pub struct CompileInput<'a> {
    pub cluster: &'a Cluster,
    pub catalog: &'a Catalog,
    pub image: &'a Image,
    pub credentials: &'a OsCredentials,
    pub openstack: &'a OpenStackConfig,
    pub mirrors: &'a MirrorConfig,
    pub ssh_key_path: &'a Path,
    pub action: Action,
}

/// Node groups the instances playbook creates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Topology {
    pub create_storage: bool,
    pub create_master: bool,
    pub create_master_slave: bool,
}

/// Derive node groups from the classes of the cluster's services.
pub fn topology(catalog: &Catalog, cluster: &Cluster) -> Topology {
    let mut topo = Topology::default();
    for service in &cluster.services {
        match catalog.class_of(&service.service_type) {
            Some(ServiceClass::Storage) => topo.create_storage = true,
            Some(ServiceClass::StandAlone) => topo.create_master = true,
            Some(ServiceClass::MasterSlave) => topo.create_master_slave = true,
            None => {}
        }
    }

    if cluster.services.is_empty() {
        if cluster.n_hosts > 0 {
            topo.create_master_slave = true;
        } else {
            topo.create_master = true;
            topo.create_master_slave = false;
        }
    }
    // Slaves always accompany a master when hosts are requested.
    if topo.create_master && cluster.n_hosts > 0 {
        topo.create_master_slave = true;
    }
    topo
}

fn convert(config: &ServiceConfig, raw: &str) -> Result<Value, CompileError> {
    ParamValue::parse_for(raw, config)
        .map(|v| v.to_json())
        .map_err(|source| CompileError::Value {
            variable: config.ansible_var_name.clone(),
            source,
        })
}

/// Emit user values, falling back to defaults for required parameters.
fn emit_configs(vars: &mut ExtraVars, service: &Service, configs: &[ServiceConfig]) -> Result<(), CompileError> {
    for config in configs {
        let raw = match service.config.get(&config.parameter_name) {
            Some(value) => value.as_str(),
            None if config.required => config.default_value.as_str(),
            None => continue,
        };
        vars.insert(config.ansible_var_name.clone(), convert(config, raw)?);
    }
    Ok(())
}

/// Build the variable map without touching the network or filesystem.
///
/// `spark_extra_jars` is emitted empty; see [`compile`].
pub fn compile_vars(input: &CompileInput<'_>) -> Result<ExtraVars, CompileError> {
    let cluster = input.cluster;
    let present: HashMap<&str, &Service> = cluster
        .services
        .iter()
        .map(|s| (s.service_type.as_str(), s))
        .collect();
    if let Some(unknown) = present.keys().copied().find(|t| !input.catalog.contains(t)) {
        return Err(CompileError::TypeNotFound(unknown.to_string()));
    }

    let mut vars = ExtraVars::new();
    for st in input.catalog.iter() {
        let Some(service) = present.get(st.service_type.as_str()) else {
            vars.insert(format!("deploy_{}", st.service_type), json!(false));
            continue;
        };
        let version = st.effective_version(&service.version);
        vars.insert(format!("deploy_{}", st.service_type), json!(true));
        vars.insert(format!("{}_version", st.service_type), json!(version));

        let sv = st.version(version).ok_or_else(|| CompileError::VersionNotFound {
            service_type: st.service_type.clone(),
            version: version.to_string(),
        })?;
        emit_configs(&mut vars, service, &sv.configs)?;
        if let Some(hc) = st.supported_health_check() {
            emit_configs(&mut vars, service, &hc.configs)?;
        }
    }

    let topo = topology(input.catalog, cluster);
    vars.insert("create_storage".into(), json!(topo.create_storage));
    vars.insert("create_master".into(), json!(topo.create_master));
    vars.insert("create_master_slave".into(), json!(topo.create_master_slave));

    vars.insert("sync".into(), json!("async"));
    vars.insert("create_cluster".into(), json!(input.action == Action::Create));
    vars.insert("n_slaves".into(), json!(cluster.n_hosts));
    vars.insert("cluster_name".into(), json!(cluster.name));
    vars.insert("create_monitoring".into(), json!(cluster.monitoring));
    if cluster.monitoring {
        vars.insert("deploy_consul".into(), json!(true));
    }
    vars.insert("mountnfs".into(), json!(false));
    vars.insert("master_flavor".into(), json!(cluster.master_flavor));
    vars.insert("slaves_flavor".into(), json!(cluster.slaves_flavor));
    vars.insert("storage_flavor".into(), json!(cluster.storage_flavor));
    vars.insert("monitoring_flavor".into(), json!(cluster.monitoring_flavor));
    vars.insert("boot_from_volume".into(), json!(false));

    vars.insert("ansible_user".into(), json!(input.image.ansible_user));
    vars.insert("hadoop_user".into(), json!(input.image.ansible_user));
    vars.insert("os_image".into(), json!(input.image.cloud_image_id));
    vars.insert("skip_packages".into(), json!(false));

    let creds = input.credentials;
    vars.insert("os_project_name".into(), json!(creds.project_name()));
    vars.insert("floating_ip_pool".into(), json!(input.openstack.floating_ip_pool));
    vars.insert("os_auth_url".into(), json!(creds.auth_url()));
    vars.insert("use_oracle_java".into(), json!(false));
    vars.insert(
        "ansible_ssh_private_key_file".into(),
        json!(input.ssh_key_path.to_string_lossy()),
    );
    vars.insert("act".into(), json!(input.action.act()));
    vars.insert("virtual_network".into(), json!(input.openstack.virtual_network));
    vars.insert("os_key_name".into(), json!(input.openstack.key_name));
    vars.insert("os_swift_user_name".into(), json!(creds.swift_user_name()));
    vars.insert("os_swift_password".into(), json!(creds.swift_password()));
    vars.insert("spark_extra_jars".into(), json!([]));

    let mirrors = input.mirrors;
    vars.insert("use_package_mirror".into(), json!(mirrors.use_package_mirror));
    vars.insert("use_pip_mirror".into(), json!(mirrors.use_pip_mirror));
    vars.insert("apt_mirror_address".into(), json!(mirrors.apt_mirror_address));
    vars.insert("pip_mirror_address".into(), json!(mirrors.pip_mirror_address));
    vars.insert("pip_trusted_host".into(), json!(mirrors.pip_trusted_host));
    vars.insert("yum_mirror_address".into(), json!(mirrors.yum_mirror_address));

    if !cluster.keys.is_empty() {
        vars.insert("public_keys".into(), json!(cluster.keys));
    }
    Ok(vars)
}

/// Full compilation: variables plus the artifacts deployed services need.
pub async fn compile(
    input: &CompileInput<'_>,
    artifacts: &ArtifactRegistry,
    artifacts_dir: &Path,
) -> Result<ExtraVars, CompileError> {
    let mut vars = compile_vars(input)?;
    let jars = artifacts.resolve_deployed(&vars, artifacts_dir).await?;
    vars.insert("spark_extra_jars".into(), json!(jars));
    Ok(vars)
}
