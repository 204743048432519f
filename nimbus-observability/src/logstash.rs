use crate::cluster_log::{ClusterLogger, LogError, LogWriter};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error};

/// Buffers a run's output and ships it to logstash on finalize.
/// Logs are read back through elasticsearch's SQL endpoint.
pub struct LogstashClusterLogger {
    client: reqwest::Client,
    logstash_addr: String,
    elastic_addr: String,
    cluster_name: String,
    buffer: Vec<u8>,
}

impl LogstashClusterLogger {
    pub fn new(logstash_addr: String, elastic_addr: String, cluster_name: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            logstash_addr,
            elastic_addr,
            cluster_name: cluster_name.to_string(),
            buffer: Vec::new(),
        }
    }

    fn payload(&self) -> serde_json::Value {
        json!({
            "Cluster_name": self.cluster_name,
            "Data": String::from_utf8_lossy(&self.buffer),
        })
    }

    fn query(&self) -> serde_json::Value {
        json!({ "query": format!("SELECT * FROM \"{}\"", self.cluster_name) })
    }
}

#[async_trait]
impl ClusterLogger for LogstashClusterLogger {
    async fn prep_writer(&mut self) -> Result<&mut LogWriter, LogError> {
        self.buffer.clear();
        Ok(&mut self.buffer as &mut LogWriter)
    }

    async fn finalize(&mut self) -> Result<(), LogError> {
        let resp = self
            .client
            .put(&self.logstash_addr)
            .json(&self.payload())
            .send()
            .await;
        match resp.and_then(|r| r.error_for_status()) {
            Ok(_) => {
                debug!(cluster = %self.cluster_name, bytes = self.buffer.len(), "Cluster logs shipped");
                self.buffer.clear();
                Ok(())
            }
            Err(e) => {
                error!(error = %e, cluster = %self.cluster_name, "Cluster log shipping failed");
                Err(e.into())
            }
        }
    }

    async fn read_logs(&self) -> Result<String, LogError> {
        let url = format!("{}/_sql?format=txt", self.elastic_addr.trim_end_matches('/'));
        let text = self
            .client
            .post(url)
            .json(&self.query())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(text)
    }
}
