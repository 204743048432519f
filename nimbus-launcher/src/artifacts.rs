//! Auxiliary downloads some service types need on the master node.
//!
//! Each resolver is keyed by the service type that triggers it. A resolver
//! runs only when the compiled variables deploy its type, and skips the
//! download when its target already exists locally.

use crate::error::ArtifactError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Entry of the `spark_extra_jars` variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub name: String,
    pub path: String,
}

impl Artifact {
    pub fn from_path(path: &Path) -> Result<Self, ArtifactError> {
        let absolute = std::path::absolute(path)?;
        let name = absolute
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            name,
            path: absolute.to_string_lossy().into_owned(),
        })
    }
}

#[async_trait]
pub trait ArtifactResolver: Send + Sync {
    /// Service type whose deployment requires this artifact.
    fn service_type(&self) -> &str;

    /// Make the artifact available under `dir` and return its location.
    async fn resolve(&self, vars: &Map<String, Value>, dir: &Path) -> Result<Artifact, ArtifactError>;
}

/// Resolvers keyed by service type.
pub struct ArtifactRegistry {
    resolvers: HashMap<String, Arc<dyn ArtifactResolver>>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self {
            resolvers: HashMap::new(),
        }
    }

    /// Registry with the cassandra and elastic connectors.
    pub fn with_builtins() -> Self {
        let downloader = Downloader::new();
        let mut registry = Self::new();
        registry.register(Arc::new(CassandraConnector::new(downloader.clone())));
        registry.register(Arc::new(ElasticHadoopConnector::new(downloader)));
        registry
    }

    pub fn register(&mut self, resolver: Arc<dyn ArtifactResolver>) {
        let name = resolver.service_type().to_string();
        tracing::debug!(service_type = %name, "Registered artifact resolver");
        self.resolvers.insert(name, resolver);
    }

    pub fn get(&self, service_type: &str) -> Option<&Arc<dyn ArtifactResolver>> {
        self.resolvers.get(service_type)
    }

    /// Registered service types, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.resolvers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Resolve the artifacts of every deployed service type, in type order.
    pub async fn resolve_deployed(
        &self,
        vars: &Map<String, Value>,
        dir: &Path,
    ) -> Result<Vec<Artifact>, ArtifactError> {
        let mut artifacts = Vec::new();
        for name in self.list() {
            let deployed = vars
                .get(&format!("deploy_{}", name))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if !deployed {
                continue;
            }
            if let Some(resolver) = self.get(name) {
                artifacts.push(resolver.resolve(vars, dir).await?);
            }
        }
        Ok(artifacts)
    }
}

impl Default for ArtifactRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Downloads files that are not yet present.
#[derive(Clone)]
pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Download `url` to `dest` unless `dest` exists.
    pub async fn fetch_once(&self, url: &str, dest: &Path) -> Result<(), ArtifactError> {
        if tokio::fs::try_exists(dest).await? {
            return Ok(());
        }
        info!(url, dest = %dest.display(), "Downloading artifact");
        let bytes = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = dest.with_extension("part");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, dest).await?;
        Ok(())
    }
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract a zip archive into `dir` on the blocking pool.
pub async fn extract_zip(archive: PathBuf, dir: PathBuf) -> Result<(), ArtifactError> {
    tokio::task::spawn_blocking(move || -> Result<(), ArtifactError> {
        let file = std::fs::File::open(&archive)?;
        let mut zip = zip::ZipArchive::new(file)?;
        std::fs::create_dir_all(&dir)?;
        zip.extract(&dir)?;
        Ok(())
    })
    .await?
}

const CASSANDRA_CONNECTOR_BASE: &str =
    "http://dl.bintray.com/spark-packages/maven/datastax/spark-cassandra-connector";

/// spark-cassandra-connector matching the deployed spark line.
pub struct CassandraConnector {
    downloader: Downloader,
}

impl CassandraConnector {
    pub fn new(downloader: Downloader) -> Self {
        Self { downloader }
    }

    pub fn url_for(spark_version: &str) -> String {
        let release = if spark_version.starts_with("1.6") {
            "1.6.8-s_2.10"
        } else {
            "2.0.3-s_2.11"
        };
        format!(
            "{}/{}/spark-cassandra-connector-{}.jar",
            CASSANDRA_CONNECTOR_BASE, release, release
        )
    }
}

#[async_trait]
impl ArtifactResolver for CassandraConnector {
    fn service_type(&self) -> &str {
        "cassandra"
    }

    async fn resolve(&self, vars: &Map<String, Value>, dir: &Path) -> Result<Artifact, ArtifactError> {
        let spark_version = vars.get("spark_version").and_then(Value::as_str).unwrap_or("");
        let url = Self::url_for(spark_version);
        let file_name = url.rsplit('/').next().unwrap_or_default();
        let dest = dir.join(file_name);
        self.downloader.fetch_once(&url, &dest).await?;
        Artifact::from_path(&dest)
    }
}

const ELASTIC_HADOOP_URL: &str = "http://download.elastic.co/hadoop/elasticsearch-hadoop-5.5.0.zip";
const ELASTIC_HADOOP_JAR: &str = "elasticsearch-hadoop-5.5.0/dist/elasticsearch-hadoop-5.5.0.jar";

/// elasticsearch-hadoop integration jar, shipped inside a zip bundle.
pub struct ElasticHadoopConnector {
    downloader: Downloader,
}

impl ElasticHadoopConnector {
    pub fn new(downloader: Downloader) -> Self {
        Self { downloader }
    }

    pub fn jar_path(dir: &Path) -> PathBuf {
        dir.join("elasticsearch-hadoop").join(ELASTIC_HADOOP_JAR)
    }
}

#[async_trait]
impl ArtifactResolver for ElasticHadoopConnector {
    fn service_type(&self) -> &str {
        "elastic"
    }

    async fn resolve(&self, _vars: &Map<String, Value>, dir: &Path) -> Result<Artifact, ArtifactError> {
        let jar = Self::jar_path(dir);
        if !tokio::fs::try_exists(&jar).await? {
            let archive = dir.join("elasticsearch-hadoop-5.5.0.zip");
            self.downloader.fetch_once(ELASTIC_HADOOP_URL, &archive).await?;
            extract_zip(archive, dir.join("elasticsearch-hadoop")).await?;
            if !tokio::fs::try_exists(&jar).await? {
                return Err(ArtifactError::Missing(jar));
            }
        }
        Artifact::from_path(&jar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn vars(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_cassandra_url_follows_spark_line() {
        assert!(CassandraConnector::url_for("1.6.3").ends_with("1.6.8-s_2.10/spark-cassandra-connector-1.6.8-s_2.10.jar"));
        assert!(CassandraConnector::url_for("2.4").ends_with("2.0.3-s_2.11/spark-cassandra-connector-2.0.3-s_2.11.jar"));
        assert!(CassandraConnector::url_for("").contains("2.0.3-s_2.11"));
    }

    #[test]
    fn test_registry_builtins() {
        let registry = ArtifactRegistry::with_builtins();
        assert_eq!(registry.list(), vec!["cassandra", "elastic"]);
        assert_eq!(registry.len(), 2);
        assert!(registry.get("spark").is_none());
        assert!(ArtifactRegistry::default().is_empty());
    }

    #[tokio::test]
    async fn test_existing_files_skip_download() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("spark-cassandra-connector-1.6.8-s_2.10.jar"), b"jar").unwrap();
        let jar = ElasticHadoopConnector::jar_path(dir.path());
        std::fs::create_dir_all(jar.parent().unwrap()).unwrap();
        std::fs::write(&jar, b"jar").unwrap();

        let registry = ArtifactRegistry::with_builtins();
        let vars = vars(json!({
            "deploy_cassandra": true,
            "deploy_elastic": true,
            "deploy_spark": true,
            "spark_version": "1.6.0",
        }));
        let artifacts = registry.resolve_deployed(&vars, dir.path()).await.unwrap();

        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].name, "spark-cassandra-connector-1.6.8-s_2.10.jar");
        assert_eq!(artifacts[1].name, "elasticsearch-hadoop-5.5.0.jar");
        assert!(Path::new(&artifacts[1].path).is_absolute());
    }

    #[tokio::test]
    async fn test_undeployed_types_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ArtifactRegistry::with_builtins();
        let vars = vars(json!({ "deploy_cassandra": false, "deploy_spark": true }));
        assert!(registry.resolve_deployed(&vars, dir.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extract_zip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.zip");
        {
            let file = std::fs::File::create(&archive).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            writer.start_file("bundle/dist/connector.jar", options).unwrap();
            writer.write_all(b"classes").unwrap();
            writer.finish().unwrap();
        }

        let out = dir.path().join("out");
        extract_zip(archive, out.clone()).await.unwrap();
        assert_eq!(
            std::fs::read(out.join("bundle/dist/connector.jar")).unwrap(),
            b"classes"
        );
    }
}
