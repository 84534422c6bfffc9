use crate::config::{ClusterConfig, CompiledFilters, ExporterConfig};
use crate::error::Result;
use crate::kafka::{ConsumerGroupInfoClient, ConsumerGroupsCommandClient, PartitionInfo};
use crate::metrics::registry::{
    MetricsRegistry, build_cluster_summary_points, build_group_metric_points,
};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Headroom left between a cycle's timeout and the next poll.
const COLLECTION_HEADROOM: Duration = Duration::from_secs(5);

/// Consecutive failed cycles before the exporter reports itself unhealthy.
const UNHEALTHY_AFTER_ERRORS: u32 = 3;

pub struct ClusterManager<C = ConsumerGroupsCommandClient> {
    cluster_name: String,
    cluster_labels: HashMap<String, String>,
    client: Arc<C>,
    filters: CompiledFilters,
    registry: Arc<MetricsRegistry>,
    poll_interval: Duration,
    max_backoff: Duration,
    command_timeout: Duration,
    max_concurrent_groups: usize,
    collection_timeout: Duration,
}

/// Outcome of one successful collection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub groups: usize,
    pub failed_groups: u64,
    pub partitions: usize,
}

/// Upper bound for one collection cycle.
///
/// Never longer than `poll_interval`, so cycles do not overlap, and never shorter than
/// `command_timeout`, so the group listing can finish.
fn collection_timeout(poll_interval: Duration, command_timeout: Duration) -> Duration {
    poll_interval
        .saturating_sub(COLLECTION_HEADROOM)
        .max(command_timeout + COLLECTION_HEADROOM)
        .min(poll_interval)
        .max(command_timeout)
}

impl ClusterManager<ConsumerGroupsCommandClient> {
    pub fn new(
        config: &ClusterConfig,
        registry: Arc<MetricsRegistry>,
        exporter_config: &ExporterConfig,
    ) -> Result<Self> {
        let client = ConsumerGroupsCommandClient::from_config(config);
        Self::with_client(config, client, registry, exporter_config)
    }
}

impl<C: ConsumerGroupInfoClient> ClusterManager<C> {
    pub fn with_client(
        config: &ClusterConfig,
        client: C,
        registry: Arc<MetricsRegistry>,
        exporter_config: &ExporterConfig,
    ) -> Result<Self> {
        let cluster_name = config.name.clone();
        let cluster_labels = config.labels.clone();
        let filters = config.compile_filters()?;
        let command_timeout = exporter_config.command_timeout;

        info!(
            cluster = cluster_name,
            command = config.command_path,
            poll_interval = ?exporter_config.poll_interval,
            command_timeout = ?command_timeout,
            max_concurrent_groups = exporter_config.max_concurrent_groups,
            custom_labels = ?cluster_labels,
            "Created cluster manager"
        );

        let collection_timeout =
            collection_timeout(exporter_config.poll_interval, command_timeout);

        Ok(Self {
            cluster_name,
            cluster_labels,
            client: Arc::new(client),
            filters,
            registry,
            poll_interval: exporter_config.poll_interval,
            max_backoff: Duration::from_secs(300),
            command_timeout,
            max_concurrent_groups: exporter_config.max_concurrent_groups,
            collection_timeout,
        })
    }

    #[instrument(skip(self, shutdown), fields(cluster = %self.cluster_name))]
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!("Starting collection loop");

        let mut interval = tokio::time::interval(self.poll_interval);
        let mut consecutive_errors = 0u32;
        let mut current_backoff = Duration::from_secs(1);

        self.registry.set_healthy(true);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // Dropping a timed-out cycle kills any tool process still running
                    let collection_result = tokio::time::timeout(
                        self.collection_timeout,
                        self.collect_once()
                    ).await;

                    match collection_result {
                        Ok(Ok(_stats)) => {
                            consecutive_errors = 0;
                            current_backoff = Duration::from_secs(1);
                            self.registry.set_healthy(true);
                        }
                        Ok(Err(e)) => {
                            consecutive_errors += 1;
                            error!(
                                error = %e,
                                consecutive_errors = consecutive_errors,
                                "Collection failed"
                            );

                            if consecutive_errors >= UNHEALTHY_AFTER_ERRORS {
                                self.registry.set_healthy(false);

                                let backoff = current_backoff.min(self.max_backoff);
                                warn!(
                                    backoff_secs = backoff.as_secs(),
                                    "Applying backoff due to consecutive errors"
                                );

                                tokio::select! {
                                    () = tokio::time::sleep(backoff) => {}
                                    _ = shutdown.recv() => {
                                        info!("Received shutdown signal");
                                        break;
                                    }
                                }
                                current_backoff = (current_backoff * 2).min(self.max_backoff);
                            }
                        }
                        Err(_timeout) => {
                            self.registry.remove_cluster(&self.cluster_name);
                            consecutive_errors += 1;
                            error!(
                                timeout_secs = self.collection_timeout.as_secs(),
                                consecutive_errors = consecutive_errors,
                                "Collection timed out"
                            );

                            if consecutive_errors >= UNHEALTHY_AFTER_ERRORS {
                                self.registry.set_healthy(false);
                            }
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        // Cleanup
        self.registry.remove_cluster(&self.cluster_name);
        info!("Collection loop stopped");
    }

    /// List, filter and describe all groups, then replace this cluster's metrics.
    ///
    /// A failed listing fails the cycle and withdraws the cluster's metrics. A group that cannot
    /// be described is left out and counted.
    #[instrument(skip(self))]
    pub async fn collect_once(&self) -> Result<CycleStats> {
        let start = Instant::now();

        // 1. List and filter consumer groups
        let all_groups = match self.client.groups(Instant::now() + self.command_timeout).await {
            Ok(groups) => groups,
            Err(e) => {
                // Lag from an earlier cycle must not be served as current
                self.registry.remove_cluster(&self.cluster_name);
                return Err(e);
            }
        };
        let list_ms = start.elapsed().as_millis();
        debug!(total_groups = all_groups.len(), "Listed consumer groups");

        let mut unique = HashSet::new();
        let group_ids: Vec<String> = all_groups
            .into_iter()
            .filter(|g| self.filters.matches_group(g))
            .filter(|g| unique.insert(g.clone()))
            .collect();
        debug!(filtered_groups = group_ids.len(), "Filtered consumer groups");

        // 2. Describe groups concurrently, one tool invocation each
        let step = Instant::now();
        let group_count = group_ids.len();
        let mut descriptions = futures::stream::iter(group_ids)
            .map(|group| async move {
                let deadline = Instant::now() + self.command_timeout;
                let result = self.client.describe_group(&group, deadline).await;
                (group, result)
            })
            .buffer_unordered(self.max_concurrent_groups);

        // 3. Build metric points
        let mut points = Vec::new();
        let mut failed_groups = 0u64;
        let mut partition_count = 0usize;

        while let Some((group, result)) = descriptions.next().await {
            match result {
                Ok(partitions) => {
                    let partitions: Vec<PartitionInfo> = partitions
                        .into_iter()
                        .filter(|p| self.filters.matches_topic(&p.topic))
                        .collect();
                    partition_count += partitions.len();
                    points.extend(build_group_metric_points(
                        &self.cluster_name,
                        &group,
                        &partitions,
                        &self.cluster_labels,
                    ));
                }
                Err(e) => {
                    failed_groups += 1;
                    warn!(group = %group, error = %e, "Failed to describe consumer group");
                }
            }
        }
        let describe_ms = step.elapsed().as_millis();

        // 4. Emit cluster summary points and publish the cycle
        #[allow(clippy::cast_possible_truncation)]
        let poll_time_ms = start.elapsed().as_millis() as u64;
        points.extend(build_cluster_summary_points(
            &self.cluster_name,
            poll_time_ms,
            failed_groups,
            &self.cluster_labels,
        ));

        self.registry.update(&self.cluster_name, points);
        self.registry.set_scrape_duration_ms(poll_time_ms);

        info!(
            list_groups_ms = %list_ms,
            describe_groups_ms = %describe_ms,
            groups = group_count,
            failed_groups,
            partitions = partition_count,
            "Collection cycle completed"
        );

        Ok(CycleStats {
            groups: group_count,
            failed_groups,
            partitions: partition_count,
        })
    }
}

impl<C> std::fmt::Debug for ClusterManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterManager")
            .field("cluster_name", &self.cluster_name)
            .field("poll_interval", &self.poll_interval)
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::ExporterError;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory stand-in for the command tool.
    #[derive(Default)]
    struct FakeClient {
        groups: Vec<String>,
        descriptions: HashMap<String, Vec<PartitionInfo>>,
        broken_groups: HashSet<String>,
        list_fails: AtomicBool,
        described: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ConsumerGroupInfoClient for FakeClient {
        async fn groups(&self, _deadline: Instant) -> Result<Vec<String>> {
            if self.list_fails.load(Ordering::SeqCst) {
                return Err(ExporterError::ToolInternal(
                    "Error while executing consumer group command".to_string(),
                ));
            }
            Ok(self.groups.clone())
        }

        async fn describe_group(
            &self,
            group: &str,
            _deadline: Instant,
        ) -> Result<Vec<PartitionInfo>> {
            self.described.lock().unwrap().push(group.to_string());
            if self.broken_groups.contains(group) {
                return Err(ExporterError::Execution(format!("{group} timed out")));
            }
            Ok(self.descriptions.get(group).cloned().unwrap_or_default())
        }
    }

    fn partition(topic: &str, partition_id: &str, lag: i64) -> PartitionInfo {
        PartitionInfo {
            topic: topic.to_string(),
            partition_id: partition_id.to_string(),
            current_offset: 10,
            log_end_offset: Some(10 + lag),
            lag,
            client_id: "consumer-1".to_string(),
            consumer_address: "/10.0.0.1".to_string(),
        }
    }

    fn test_config() -> Config {
        Config::from_toml(
            r#"
[exporter]
poll_interval = "1h"
command_timeout = "5s"
max_concurrent_groups = 2

[[clusters]]
name = "test"
bootstrap_servers = "localhost:9092"
group_blacklist = ["^internal-"]

[clusters.labels]
env = "ci"
"#,
        )
        .unwrap()
    }

    fn fake_client() -> FakeClient {
        FakeClient {
            groups: vec![
                "orders-app".to_string(),
                "internal-audit".to_string(),
                "orders-app".to_string(),
                "broken".to_string(),
            ],
            descriptions: HashMap::from([(
                "orders-app".to_string(),
                vec![
                    partition("orders", "0", 5),
                    partition("__consumer_offsets", "3", 1),
                ],
            )]),
            broken_groups: HashSet::from(["broken".to_string()]),
            ..FakeClient::default()
        }
    }

    fn manager(client: FakeClient, registry: Arc<MetricsRegistry>) -> ClusterManager<FakeClient> {
        let config = test_config();
        ClusterManager::with_client(&config.clusters[0], client, registry, &config.exporter)
            .unwrap()
    }

    #[tokio::test]
    async fn test_collect_once_publishes_group_metrics() {
        let registry = Arc::new(MetricsRegistry::new());
        let manager = manager(fake_client(), Arc::clone(&registry));

        let stats = manager.collect_once().await.unwrap();
        assert_eq!(
            stats,
            CycleStats {
                groups: 2,
                failed_groups: 1,
                partitions: 1,
            }
        );

        let output = registry.render_prometheus();
        assert!(output.contains("kafka_consumergroup_lag{client_id=\"consumer-1\",cluster_name=\"test\",consumer_address=\"/10.0.0.1\",env=\"ci\",group=\"orders-app\",partition=\"0\",topic=\"orders\"} 5"));
        assert!(output.contains("kafka_lag_exporter_failed_groups{cluster_name=\"test\",env=\"ci\"} 1"));
        assert!(!output.contains("internal-audit"));
        assert!(!output.contains("__consumer_offsets"));
    }

    #[tokio::test]
    async fn test_collect_once_describes_each_group_once() {
        let registry = Arc::new(MetricsRegistry::new());
        let manager = manager(fake_client(), registry);

        manager.collect_once().await.unwrap();

        let mut described = manager.client.described.lock().unwrap().clone();
        described.sort();
        assert_eq!(described, vec!["broken", "orders-app"]);
    }

    #[tokio::test]
    async fn test_failed_listing_fails_cycle() {
        let registry = Arc::new(MetricsRegistry::new());
        let client = FakeClient {
            list_fails: AtomicBool::new(true),
            ..FakeClient::default()
        };
        let manager = manager(client, Arc::clone(&registry));

        let result = manager.collect_once().await;
        assert!(matches!(result, Err(ExporterError::ToolInternal(_))));
        assert_eq!(registry.cluster_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_listing_withdraws_previous_metrics() {
        let registry = Arc::new(MetricsRegistry::new());
        let manager = manager(fake_client(), Arc::clone(&registry));

        manager.collect_once().await.unwrap();
        assert!(registry.render_prometheus().contains("kafka_consumergroup_lag{"));

        manager.client.list_fails.store(true, Ordering::SeqCst);
        let result = manager.collect_once().await;

        assert!(matches!(result, Err(ExporterError::ToolInternal(_))));
        assert_eq!(registry.cluster_count(), 0);
        let output = registry.render_prometheus();
        assert!(!output.contains("kafka_consumergroup_lag{"));
        assert!(!output.contains("orders-app"));
    }

    #[test]
    fn test_default_collection_timeout_fits_poll_interval() {
        let config = Config::from_toml(
            r#"
[exporter]

[[clusters]]
name = "test"
bootstrap_servers = "localhost:9092"
"#,
        )
        .unwrap();
        let exporter = &config.exporter;

        let timeout = collection_timeout(exporter.poll_interval, exporter.command_timeout);

        assert!(timeout <= exporter.poll_interval);
        assert!(timeout >= exporter.command_timeout);
    }

    #[test]
    fn test_collection_timeout_bounds() {
        let secs = Duration::from_secs;
        assert_eq!(collection_timeout(secs(30), secs(20)), secs(25));
        assert_eq!(collection_timeout(secs(60), secs(10)), secs(55));
        assert_eq!(collection_timeout(secs(10), secs(8)), secs(10));
        assert_eq!(collection_timeout(secs(5), secs(1)), secs(5));
    }

    #[tokio::test]
    async fn test_run_collects_and_cleans_up_on_shutdown() {
        let registry = Arc::new(MetricsRegistry::new());
        let manager = manager(fake_client(), Arc::clone(&registry));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(manager.run(shutdown_rx));

        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.cluster_count() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(registry.is_healthy());

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(registry.cluster_count(), 0);
    }
}
