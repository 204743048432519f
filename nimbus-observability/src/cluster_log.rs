use crate::logstash::LogstashClusterLogger;
use async_trait::async_trait;
use nimbus_core::Action;
use nimbus_core::config::{ClusterLogsConfig, LogsOutput};
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

#[derive(Error, Debug)]
pub enum LogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("log shipping failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("no logs for {0}")]
    Missing(String),
}

pub type LogWriter = dyn AsyncWrite + Send + Unpin;

/// Persistence of one provisioning run's output.
#[async_trait]
pub trait ClusterLogger: Send + Sync {
    /// Sink the run's combined stdout/stderr is written to.
    async fn prep_writer(&mut self) -> Result<&mut LogWriter, LogError>;

    /// Flush and hand off whatever was written.
    async fn finalize(&mut self) -> Result<(), LogError>;

    async fn read_logs(&self) -> Result<String, LogError>;
}

/// Logger for one run of `action` against `cluster_id`.
pub fn cluster_logger(
    config: &ClusterLogsConfig,
    cluster_id: &str,
    cluster_name: &str,
    action: Action,
) -> Box<dyn ClusterLogger> {
    match config.output {
        LogsOutput::File => Box::new(FileClusterLogger::new(config.file_path.clone(), cluster_id, action)),
        LogsOutput::Logstash => Box::new(LogstashClusterLogger::new(
            config.logstash_addr.clone(),
            config.elastic_addr.clone(),
            cluster_name,
        )),
    }
}

/// Appends run output to `<dir>/<action>_<cluster_id>.log`.
pub struct FileClusterLogger {
    path: PathBuf,
    file: Option<tokio::fs::File>,
}

impl FileClusterLogger {
    pub fn new(dir: PathBuf, cluster_id: &str, action: Action) -> Self {
        Self {
            path: dir.join(format!("{}_{}.log", action.as_str(), cluster_id)),
            file: None,
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl ClusterLogger for FileClusterLogger {
    async fn prep_writer(&mut self) -> Result<&mut LogWriter, LogError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        Ok(self.file.insert(file) as &mut LogWriter)
    }

    async fn finalize(&mut self) -> Result<(), LogError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        tracing::debug!(path = %self.path.display(), "Cluster log finalized");
        Ok(())
    }

    async fn read_logs(&self) -> Result<String, LogError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(logs) => Ok(logs),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(LogError::Missing(self.path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
