pub mod cluster_log;
pub mod logstash;

pub use cluster_log::{ClusterLogger, FileClusterLogger, LogError, cluster_logger};
pub use logstash::LogstashClusterLogger;
