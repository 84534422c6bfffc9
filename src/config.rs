use crate::error::{ExporterError, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\??([^}:-]+)(?::-([^}]*))?\}").expect("env var pattern is valid")
});

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub exporter: ExporterConfig,
    pub clusters: Vec<ClusterConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExporterConfig {
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_http_host")]
    pub http_host: String,
    /// Upper bound for a single invocation of the consumer groups tool.
    #[serde(with = "humantime_serde", default = "default_command_timeout")]
    pub command_timeout: Duration,
    /// Number of groups described concurrently per cluster.
    #[serde(default = "default_max_concurrent_groups")]
    pub max_concurrent_groups: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusterConfig {
    pub name: String,
    pub bootstrap_servers: String,
    /// Path to `kafka-consumer-groups.sh`, or its name when it is on `PATH`.
    #[serde(default = "default_command_path")]
    pub command_path: String,
    /// Client properties file handed to the tool with `--command-config`.
    #[serde(default)]
    pub command_config: Option<String>,
    /// Pass `--new-consumer`, required by 0.10.x tools.
    #[serde(default)]
    pub new_consumer: bool,
    #[serde(default = "default_whitelist")]
    pub group_whitelist: Vec<String>,
    #[serde(default)]
    pub group_blacklist: Vec<String>,
    #[serde(default = "default_whitelist")]
    pub topic_whitelist: Vec<String>,
    #[serde(default = "default_topic_blacklist")]
    pub topic_blacklist: Vec<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_http_port() -> u16 {
    8000
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_max_concurrent_groups() -> usize {
    4
}

fn default_command_path() -> String {
    "kafka-consumer-groups.sh".to_string()
}

fn default_whitelist() -> Vec<String> {
    vec![".*".to_string()]
}

fn default_topic_blacklist() -> Vec<String> {
    vec!["__.*".to_string()]
}

impl Config {
    pub fn load(path: Option<&str>) -> Result<Config> {
        let config_path = path.unwrap_or("config.toml");

        if !Path::new(config_path).exists() {
            return Err(ExporterError::Config(format!(
                "Configuration file not found: {config_path}"
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Config> {
        let content = Self::substitute_env_vars(content);

        let config: Config = toml::from_str(&content)
            .map_err(|e| ExporterError::Config(format!("TOML parse error: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    fn substitute_env_vars(content: &str) -> String {
        // Supports:
        // - ${VAR} - replaced with env var value, empty string if not set
        // - ${VAR:-default} - replaced with env var value, or "default" if not set
        // - ${?VAR} - same as ${VAR}
        ENV_VAR_PATTERN
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default_value = caps.get(2).map_or("", |m| m.as_str());
                std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
            })
            .into_owned()
    }

    pub fn validate(&self) -> Result<()> {
        self.exporter.validate()?;

        if self.clusters.is_empty() {
            return Err(ExporterError::Config(
                "At least one cluster must be configured".to_string(),
            ));
        }

        for cluster in &self.clusters {
            cluster.validate()?;
        }

        Ok(())
    }
}

impl ExporterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(ExporterError::Config(
                "poll_interval must be greater than zero".to_string(),
            ));
        }

        if self.command_timeout.is_zero() {
            return Err(ExporterError::Config(
                "command_timeout must be greater than zero".to_string(),
            ));
        }

        if self.command_timeout >= self.poll_interval {
            return Err(ExporterError::Config(format!(
                "command_timeout ({:?}) must be less than poll_interval ({:?})",
                self.command_timeout, self.poll_interval
            )));
        }

        if self.max_concurrent_groups == 0 {
            return Err(ExporterError::Config(
                "max_concurrent_groups must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ExporterError::Config(
                "Cluster name cannot be empty".to_string(),
            ));
        }

        if self.bootstrap_servers.is_empty() {
            return Err(ExporterError::Config(format!(
                "Cluster '{}': bootstrap_servers cannot be empty",
                self.name
            )));
        }

        if self.command_path.is_empty() {
            return Err(ExporterError::Config(format!(
                "Cluster '{}': command_path cannot be empty",
                self.name
            )));
        }

        self.compile_filters()?;
        Ok(())
    }

    pub fn compile_filters(&self) -> Result<CompiledFilters> {
        let compile = |patterns: &[String]| {
            patterns
                .iter()
                .map(|p| Regex::new(p))
                .collect::<std::result::Result<Vec<_>, _>>()
        };

        Ok(CompiledFilters {
            group_whitelist: compile(&self.group_whitelist)?,
            group_blacklist: compile(&self.group_blacklist)?,
            topic_whitelist: compile(&self.topic_whitelist)?,
            topic_blacklist: compile(&self.topic_blacklist)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CompiledFilters {
    pub group_whitelist: Vec<Regex>,
    pub group_blacklist: Vec<Regex>,
    pub topic_whitelist: Vec<Regex>,
    pub topic_blacklist: Vec<Regex>,
}

impl CompiledFilters {
    pub fn matches_group(&self, group: &str) -> bool {
        let matches_whitelist = self.group_whitelist.iter().any(|r| r.is_match(group));
        let matches_blacklist = self.group_blacklist.iter().any(|r| r.is_match(group));
        matches_whitelist && !matches_blacklist
    }

    pub fn matches_topic(&self, topic: &str) -> bool {
        let matches_whitelist = self.topic_whitelist.iter().any(|r| r.is_match(topic));
        let matches_blacklist = self.topic_blacklist.iter().any(|r| r.is_match(topic));
        matches_whitelist && !matches_blacklist
    }
}
