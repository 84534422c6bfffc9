pub mod command;
pub mod parser;

pub use command::ConsumerGroupsCommandClient;

use crate::error::Result;
use tokio::time::Instant;

/// Lag state of one partition consumed by a consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionInfo {
    pub topic: String,
    pub partition_id: String,
    /// Committed offset, 0 when the tool reports it as unknown.
    pub current_offset: i64,
    /// High watermark, `None` when the tool reports it as unknown.
    pub log_end_offset: Option<i64>,
    /// Offset lag, 0 when the tool reports it as unknown.
    pub lag: i64,
    pub client_id: String,
    pub consumer_address: String,
}

/// Source of consumer group information for the collection loop.
#[async_trait::async_trait]
pub trait ConsumerGroupInfoClient: Send + Sync {
    /// List the names of all consumer groups known to the cluster.
    async fn groups(&self, deadline: Instant) -> Result<Vec<String>>;

    /// Describe the per-partition lag state of a single consumer group.
    async fn describe_group(&self, group: &str, deadline: Instant) -> Result<Vec<PartitionInfo>>;
}
