use crate::kafka::PartitionInfo;
use crate::metrics::definitions::{
    HELP_FAILED_GROUPS, HELP_GROUP_CURRENT_OFFSET, HELP_GROUP_LAG, HELP_GROUP_LOG_END_OFFSET,
    HELP_GROUP_MAX_LAG, HELP_GROUP_PARTITIONS, HELP_GROUP_SUM_LAG, HELP_LAST_UPDATE_TIMESTAMP,
    HELP_POLL_TIME_MS, HELP_SCRAPE_DURATION_SECONDS, HELP_UP, LABEL_CLIENT_ID, LABEL_CLUSTER_NAME,
    LABEL_CONSUMER_ADDRESS, LABEL_GROUP, LABEL_PARTITION, LABEL_TOPIC, METRIC_FAILED_GROUPS,
    METRIC_GROUP_CURRENT_OFFSET, METRIC_GROUP_LAG, METRIC_GROUP_LOG_END_OFFSET,
    METRIC_GROUP_MAX_LAG, METRIC_GROUP_PARTITIONS, METRIC_GROUP_SUM_LAG,
    METRIC_LAST_UPDATE_TIMESTAMP, METRIC_POLL_TIME_MS, METRIC_SCRAPE_DURATION_SECONDS, METRIC_UP,
};
use crate::metrics::types::{Labels, MetricPoint};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Default staleness threshold: 3x the typical poll interval
const DEFAULT_STALENESS_THRESHOLD: Duration = Duration::from_secs(90);

pub struct MetricsRegistry {
    metrics: DashMap<String, Vec<MetricPoint>>,
    last_update: DashMap<String, Instant>,
    last_update_timestamp: DashMap<String, u64>, // Unix timestamp in seconds
    healthy: AtomicBool,
    last_scrape_duration_ms: AtomicU64,
    staleness_threshold: Duration,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_staleness_threshold(DEFAULT_STALENESS_THRESHOLD)
    }

    pub fn with_staleness_threshold(staleness_threshold: Duration) -> Self {
        Self {
            metrics: DashMap::new(),
            last_update: DashMap::new(),
            last_update_timestamp: DashMap::new(),
            healthy: AtomicBool::new(true),
            last_scrape_duration_ms: AtomicU64::new(0),
            staleness_threshold,
        }
    }

    /// Replace all points of a cluster with the result of one collection cycle.
    pub fn update(&self, cluster: &str, points: Vec<MetricPoint>) {
        let unix_timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());

        self.metrics.insert(cluster.to_string(), points);
        self.last_update.insert(cluster.to_string(), Instant::now());
        self.last_update_timestamp
            .insert(cluster.to_string(), unix_timestamp);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub fn set_scrape_duration_ms(&self, duration_ms: u64) {
        self.last_scrape_duration_ms
            .store(duration_ms, Ordering::SeqCst);
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn get_scrape_duration_seconds(&self) -> f64 {
        self.last_scrape_duration_ms.load(Ordering::SeqCst) as f64 / 1000.0
    }

    pub fn render_prometheus(&self) -> String {
        self.render_prometheus_with_staleness_check(true)
    }

    fn is_fresh(&self, cluster: &str, now: Instant) -> bool {
        self.last_update
            .get(cluster)
            .is_some_and(|last_update| now.duration_since(*last_update) <= self.staleness_threshold)
    }

    /// Render Prometheus metrics, optionally filtering out stale clusters
    pub fn render_prometheus_with_staleness_check(&self, filter_stale: bool) -> String {
        let mut output = String::new();
        let now = Instant::now();

        // Collect DashMap guards to keep them alive while we borrow their contents
        let guards: Vec<_> = self
            .metrics
            .iter()
            .filter(|entry| !filter_stale || self.is_fresh(entry.key(), now))
            .collect();

        // Group points by metric name, sorted for consistent output
        let mut by_name: BTreeMap<&str, Vec<&MetricPoint>> = BTreeMap::new();
        for guard in &guards {
            for point in guard.value() {
                by_name.entry(point.name).or_default().push(point);
            }
        }

        for (name, points) in &by_name {
            let first = points[0];
            let _ = writeln!(output, "# HELP {name} {}", first.help);
            let _ = writeln!(output, "# TYPE {name} {}", first.type_name());

            for point in points {
                let labels_str = render_labels(&point.labels);
                let _ = writeln!(output, "{name}{labels_str} {}", point.value.as_f64());
            }
        }

        let scrape_duration = self.get_scrape_duration_seconds();
        let _ = writeln!(
            output,
            "# HELP {METRIC_SCRAPE_DURATION_SECONDS} {HELP_SCRAPE_DURATION_SECONDS}"
        );
        let _ = writeln!(output, "# TYPE {METRIC_SCRAPE_DURATION_SECONDS} gauge");
        let _ = writeln!(output, "{METRIC_SCRAPE_DURATION_SECONDS} {scrape_duration:.6}");

        let _ = writeln!(output, "# HELP {METRIC_UP} {HELP_UP}");
        let _ = writeln!(output, "# TYPE {METRIC_UP} gauge");
        let _ = writeln!(output, "{METRIC_UP} {}", i32::from(self.is_healthy()));

        let mut timestamps: Vec<(String, u64)> = self
            .last_update_timestamp
            .iter()
            .filter(|entry| !filter_stale || self.is_fresh(entry.key(), now))
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        timestamps.sort_unstable();

        if !timestamps.is_empty() {
            let _ = writeln!(
                output,
                "# HELP {METRIC_LAST_UPDATE_TIMESTAMP} {HELP_LAST_UPDATE_TIMESTAMP}"
            );
            let _ = writeln!(output, "# TYPE {METRIC_LAST_UPDATE_TIMESTAMP} gauge");
            for (cluster, timestamp) in timestamps {
                let _ = writeln!(
                    output,
                    "{METRIC_LAST_UPDATE_TIMESTAMP}{{{LABEL_CLUSTER_NAME}=\"{}\"}} {timestamp}",
                    escape_label_value(&cluster)
                );
            }
        }

        output
    }

    pub fn remove_cluster(&self, cluster: &str) {
        self.metrics.remove(cluster);
        self.last_update.remove(cluster);
        self.last_update_timestamp.remove(cluster);
    }

    pub fn cluster_count(&self) -> usize {
        self.metrics.len()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn render_labels(labels: &Labels) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let mut pairs: Vec<_> = labels.iter().collect();
    pairs.sort_by_key(|(k, _)| *k);

    let label_str = pairs
        .into_iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect::<Vec<_>>()
        .join(",");

    format!("{{{label_str}}}")
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn add_custom_labels(labels: &mut Labels, custom_labels: &HashMap<String, String>) {
    for (k, v) in custom_labels {
        labels.insert(k.clone(), v.clone());
    }
}

/// Build per-partition and per-group metric points for one described consumer group.
#[allow(clippy::cast_precision_loss)]
pub fn build_group_metric_points(
    cluster: &str,
    group: &str,
    partitions: &[PartitionInfo],
    custom_labels: &HashMap<String, String>,
) -> Vec<MetricPoint> {
    let mut points = Vec::with_capacity(partitions.len() * 3 + 3);

    let mut group_labels = Labels::new();
    group_labels.insert(LABEL_CLUSTER_NAME.to_string(), cluster.to_string());
    group_labels.insert(LABEL_GROUP.to_string(), group.to_string());
    add_custom_labels(&mut group_labels, custom_labels);

    for p in partitions {
        let mut labels = group_labels.clone();
        labels.insert(LABEL_TOPIC.to_string(), p.topic.clone());
        labels.insert(LABEL_PARTITION.to_string(), p.partition_id.clone());
        labels.insert(LABEL_CLIENT_ID.to_string(), p.client_id.clone());
        labels.insert(LABEL_CONSUMER_ADDRESS.to_string(), p.consumer_address.clone());

        points.push(MetricPoint::gauge(
            METRIC_GROUP_CURRENT_OFFSET,
            labels.clone(),
            p.current_offset as f64,
            HELP_GROUP_CURRENT_OFFSET,
        ));

        if let Some(log_end_offset) = p.log_end_offset {
            points.push(MetricPoint::gauge(
                METRIC_GROUP_LOG_END_OFFSET,
                labels.clone(),
                log_end_offset as f64,
                HELP_GROUP_LOG_END_OFFSET,
            ));
        }

        points.push(MetricPoint::gauge(
            METRIC_GROUP_LAG,
            labels,
            p.lag as f64,
            HELP_GROUP_LAG,
        ));
    }

    let sum_lag: i64 = partitions.iter().map(|p| p.lag).sum();
    let max_lag = partitions.iter().map(|p| p.lag).max().unwrap_or(0);

    points.push(MetricPoint::gauge(
        METRIC_GROUP_SUM_LAG,
        group_labels.clone(),
        sum_lag as f64,
        HELP_GROUP_SUM_LAG,
    ));
    points.push(MetricPoint::gauge(
        METRIC_GROUP_MAX_LAG,
        group_labels.clone(),
        max_lag as f64,
        HELP_GROUP_MAX_LAG,
    ));
    points.push(MetricPoint::gauge(
        METRIC_GROUP_PARTITIONS,
        group_labels,
        partitions.len() as f64,
        HELP_GROUP_PARTITIONS,
    ));

    points
}

/// Build cluster-level summary metric points (poll time, failed group count).
#[allow(clippy::cast_precision_loss)]
pub fn build_cluster_summary_points(
    cluster: &str,
    poll_time_ms: u64,
    failed_groups: u64,
    custom_labels: &HashMap<String, String>,
) -> Vec<MetricPoint> {
    let mut labels = Labels::new();
    labels.insert(LABEL_CLUSTER_NAME.to_string(), cluster.to_string());
    add_custom_labels(&mut labels, custom_labels);

    vec![
        MetricPoint::gauge(
            METRIC_POLL_TIME_MS,
            labels.clone(),
            poll_time_ms as f64,
            HELP_POLL_TIME_MS,
        ),
        MetricPoint::gauge(
            METRIC_FAILED_GROUPS,
            labels,
            failed_groups as f64,
            HELP_FAILED_GROUPS,
        ),
    ]
}
