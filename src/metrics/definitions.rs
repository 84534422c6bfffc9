pub const METRIC_GROUP_CURRENT_OFFSET: &str = "kafka_consumergroup_current_offset";
pub const METRIC_GROUP_LOG_END_OFFSET: &str = "kafka_consumergroup_log_end_offset";
pub const METRIC_GROUP_LAG: &str = "kafka_consumergroup_lag";

pub const METRIC_GROUP_MAX_LAG: &str = "kafka_consumergroup_group_max_lag";
pub const METRIC_GROUP_SUM_LAG: &str = "kafka_consumergroup_group_sum_lag";
pub const METRIC_GROUP_PARTITIONS: &str = "kafka_consumergroup_group_partitions";

pub const METRIC_POLL_TIME_MS: &str = "kafka_consumergroup_poll_time_ms";
pub const METRIC_FAILED_GROUPS: &str = "kafka_lag_exporter_failed_groups";
pub const METRIC_SCRAPE_DURATION_SECONDS: &str = "kafka_lag_exporter_scrape_duration_seconds";
pub const METRIC_UP: &str = "kafka_lag_exporter_up";
pub const METRIC_LAST_UPDATE_TIMESTAMP: &str = "kafka_lag_exporter_last_update_timestamp_seconds";

pub const LABEL_CLUSTER_NAME: &str = "cluster_name";
pub const LABEL_GROUP: &str = "group";
pub const LABEL_TOPIC: &str = "topic";
pub const LABEL_PARTITION: &str = "partition";
pub const LABEL_CLIENT_ID: &str = "client_id";
pub const LABEL_CONSUMER_ADDRESS: &str = "consumer_address";

pub const HELP_GROUP_CURRENT_OFFSET: &str =
    "Last committed offset for a consumer group partition (0 when unknown)";
pub const HELP_GROUP_LOG_END_OFFSET: &str =
    "Log end offset (high watermark) of a partition consumed by a consumer group";
pub const HELP_GROUP_LAG: &str = "Offset lag for a consumer group partition (0 when unknown)";
pub const HELP_GROUP_MAX_LAG: &str =
    "Maximum offset lag across all partitions for a consumer group";
pub const HELP_GROUP_SUM_LAG: &str = "Sum of offset lag across all partitions for a consumer group";
pub const HELP_GROUP_PARTITIONS: &str = "Number of assigned partitions reported for a consumer group";
pub const HELP_POLL_TIME_MS: &str = "Time taken to poll all consumer groups in milliseconds";
pub const HELP_FAILED_GROUPS: &str =
    "Number of consumer groups that could not be described in the last collection";
pub const HELP_SCRAPE_DURATION_SECONDS: &str = "Duration of metrics collection in seconds";
pub const HELP_UP: &str = "1 if the exporter is healthy, 0 otherwise";
pub const HELP_LAST_UPDATE_TIMESTAMP: &str = "Unix timestamp of last successful metrics collection";
