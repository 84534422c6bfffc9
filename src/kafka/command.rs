use crate::config::ClusterConfig;
use crate::error::{ExporterError, Result};
use crate::kafka::parser::{detect_tool_error, parse_groups, parse_partition_output};
use crate::kafka::{ConsumerGroupInfoClient, PartitionInfo};
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Runs `kafka-consumer-groups` against one cluster, one process per call.
#[derive(Debug, Clone)]
pub struct ConsumerGroupsCommandClient {
    bootstrap_server: String,
    command_path: String,
    command_config: Option<String>,
    new_consumer: bool,
}

impl ConsumerGroupsCommandClient {
    pub fn new(bootstrap_server: impl Into<String>, command_path: impl Into<String>) -> Self {
        Self {
            bootstrap_server: bootstrap_server.into(),
            command_path: command_path.into(),
            command_config: None,
            new_consumer: false,
        }
    }

    pub fn from_config(config: &ClusterConfig) -> Self {
        let client = Self::new(&config.bootstrap_servers, &config.command_path)
            .with_new_consumer(config.new_consumer);
        match &config.command_config {
            Some(path) => client.with_command_config(path.clone()),
            None => client,
        }
    }

    /// Pass a client properties file to the tool with `--command-config`.
    pub fn with_command_config(mut self, path: impl Into<String>) -> Self {
        self.command_config = Some(path.into());
        self
    }

    /// 0.10.x tools need `--new-consumer` to talk to the brokers instead of ZooKeeper.
    pub const fn with_new_consumer(mut self, new_consumer: bool) -> Self {
        self.new_consumer = new_consumer;
        self
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(6);
        if self.new_consumer {
            args.push("--new-consumer".to_string());
        }
        args.push("--bootstrap-server".to_string());
        args.push(self.bootstrap_server.clone());
        if let Some(path) = &self.command_config {
            args.push("--command-config".to_string());
            args.push(path.clone());
        }
        args
    }

    pub fn list_args(&self) -> Vec<String> {
        let mut args = self.base_args();
        args.push("--list".to_string());
        args
    }

    pub fn describe_args(&self, group: &str) -> Vec<String> {
        let mut args = self.base_args();
        args.push("--describe".to_string());
        args.push("--group".to_string());
        args.push(group.to_string());
        args
    }

    /// Run the tool and return stdout followed by stderr.
    ///
    /// The child is killed when the deadline passes or the returned future is dropped.
    async fn run(&self, args: &[String], deadline: Instant) -> Result<String> {
        if Instant::now() >= deadline {
            return Err(ExporterError::Execution(format!(
                "deadline expired before running {}",
                self.command_path
            )));
        }

        let mut command = Command::new(&self.command_path);
        command.args(args).stdin(Stdio::null()).kill_on_drop(true);

        let output = match tokio::time::timeout_at(deadline, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ExporterError::Execution(format!(
                    "failed to run {}: {e}",
                    self.command_path
                )));
            }
            Err(_elapsed) => {
                warn!(command = %self.command_path, "Command killed at deadline");
                return Err(ExporterError::Execution(format!(
                    "{} did not finish before the deadline",
                    self.command_path
                )));
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            if let Some(message) = detect_tool_error(&text) {
                return Err(ExporterError::ToolInternal(message));
            }
            let first_line = text.lines().map(str::trim).find(|l| !l.is_empty());
            return Err(ExporterError::Execution(format!(
                "{} exited with {}: {}",
                self.command_path,
                output.status,
                first_line.unwrap_or("no output")
            )));
        }

        debug!(bytes = text.len(), "Command finished");
        Ok(text)
    }
}

#[async_trait::async_trait]
impl ConsumerGroupInfoClient for ConsumerGroupsCommandClient {
    #[instrument(skip(self, deadline), fields(bootstrap_server = %self.bootstrap_server))]
    async fn groups(&self, deadline: Instant) -> Result<Vec<String>> {
        let output = self.run(&self.list_args(), deadline).await?;
        parse_groups(&output)
    }

    #[instrument(skip(self, deadline), fields(bootstrap_server = %self.bootstrap_server))]
    async fn describe_group(&self, group: &str, deadline: Instant) -> Result<Vec<PartitionInfo>> {
        let output = self.run(&self.describe_args(group), deadline).await?;
        parse_partition_output(&output)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::sync::LazyLock;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Fake tools, all written before any test spawns a process.
    struct FakeTools {
        dir: TempDir,
    }

    impl FakeTools {
        fn path(&self, name: &str) -> String {
            self.dir.path().join(name).to_string_lossy().into_owned()
        }
    }

    static FAKE_TOOLS: LazyLock<FakeTools> = LazyLock::new(|| {
        let dir = TempDir::new().unwrap();
        let scripts: &[(&str, &str)] = &[
            ("echo_args.sh", "#!/bin/sh\necho \"$@\"\n"),
            (
                "list.sh",
                "#!/bin/sh\nprintf 'note: only Java consumer API groups are shown.\\n\\ngroup-a\\ngroup-b\\n'\n",
            ),
            (
                "describe.sh",
                "#!/bin/sh\ncat <<'EOF'\n\nGROUP TOPIC PARTITION CURRENT-OFFSET LOG-END-OFFSET LAG CONSUMER-ID HOST CLIENT-ID\ngroup-a orders 0 120 125 5 consumer-1-0c6a5b1e-4f9e-4a53-9d39-2b0b5f6a1c7e /10.0.0.12 consumer-1\nEOF\necho 'Warning: Consumer group is rebalancing.' >&2\n",
            ),
            ("hang.sh", "#!/bin/sh\nexec sleep 30\n"),
            (
                "fail.sh",
                "#!/bin/sh\necho 'Connection to node -1 could not be established.' >&2\nexit 3\n",
            ),
            (
                "tool_error.sh",
                "#!/bin/sh\necho 'Error while executing consumer group command Request METADATA failed on brokers List(localhost:9042 (id: -1 rack: null))'\necho 'java.lang.RuntimeException: Request METADATA failed'\nprintf '\\tat kafka.admin.AdminClient.sendAnyNode(AdminClient.scala:67)\\n'\nexit 1\n",
            ),
        ];

        for (name, body) in scripts {
            let path: PathBuf = dir.path().join(name);
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        FakeTools { dir }
    });

    fn client(script: &str) -> ConsumerGroupsCommandClient {
        ConsumerGroupsCommandClient::new("localhost:9092", FAKE_TOOLS.path(script))
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(10)
    }

    #[test]
    fn test_list_args() {
        let client = ConsumerGroupsCommandClient::new("kafka:9092", "kafka-consumer-groups.sh");
        assert_eq!(
            client.list_args(),
            vec!["--bootstrap-server", "kafka:9092", "--list"]
        );
    }

    #[test]
    fn test_describe_args_with_options() {
        let client = ConsumerGroupsCommandClient::new("kafka:9092", "kafka-consumer-groups.sh")
            .with_new_consumer(true)
            .with_command_config("/etc/kafka/client.properties");
        assert_eq!(
            client.describe_args("orders-app"),
            vec![
                "--new-consumer",
                "--bootstrap-server",
                "kafka:9092",
                "--command-config",
                "/etc/kafka/client.properties",
                "--describe",
                "--group",
                "orders-app",
            ]
        );
    }

    #[tokio::test]
    async fn test_groups_passes_list_arguments() {
        let groups = client("echo_args.sh").groups(deadline()).await.unwrap();
        assert_eq!(groups, vec!["--bootstrap-server localhost:9092 --list"]);
    }

    #[tokio::test]
    async fn test_groups_parses_output() {
        let groups = client("list.sh").groups(deadline()).await.unwrap();
        assert_eq!(groups, vec!["group-a", "group-b"]);
    }

    #[tokio::test]
    async fn test_describe_group_parses_combined_output() {
        let partitions = client("describe.sh")
            .describe_group("group-a", deadline())
            .await
            .unwrap();

        assert_eq!(
            partitions,
            vec![PartitionInfo {
                topic: "orders".to_string(),
                partition_id: "0".to_string(),
                current_offset: 120,
                log_end_offset: Some(125),
                lag: 5,
                client_id: "consumer-1".to_string(),
                consumer_address: "/10.0.0.12".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_expired_deadline_returns_promptly() {
        let start = std::time::Instant::now();
        let result = client("hang.sh")
            .describe_group("group-a", Instant::now())
            .await;

        assert!(matches!(result, Err(ExporterError::Execution(_))));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_hanging_tool_is_killed_at_deadline() {
        let start = std::time::Instant::now();
        let result = client("hang.sh")
            .describe_group("group-a", Instant::now() + Duration::from_millis(200))
            .await;

        assert!(matches!(result, Err(ExporterError::Execution(_))));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_execution_error() {
        let result = client("fail.sh").groups(deadline()).await;
        let Err(ExporterError::Execution(message)) = result else {
            panic!("expected an execution error, got {result:?}");
        };
        assert!(message.contains("could not be established"));
    }

    #[tokio::test]
    async fn test_tool_error_transcript_with_non_zero_exit() {
        let result = client("tool_error.sh").groups(deadline()).await;
        assert!(matches!(result, Err(ExporterError::ToolInternal(_))));
    }

    #[tokio::test]
    async fn test_missing_tool_is_execution_error() {
        // Scripts must be in place before forking, or a concurrent exec can see ETXTBSY
        LazyLock::force(&FAKE_TOOLS);
        let client =
            ConsumerGroupsCommandClient::new("localhost:9092", "/nonexistent/kafka-consumer-groups.sh");
        let result = client.groups(deadline()).await;
        assert!(matches!(result, Err(ExporterError::Execution(_))));
    }
}
