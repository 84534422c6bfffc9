#[cfg(test)]
pub mod strategies {
    use proptest::prelude::*;

    /// Arbitrary non-empty cluster name (valid Prometheus label chars)
    pub fn arb_cluster_name() -> impl Strategy<Value = String> {
        "[a-zA-Z][a-zA-Z0-9_-]{0,30}"
    }

    /// Arbitrary non-empty group ID
    pub fn arb_group_id() -> impl Strategy<Value = String> {
        "[a-zA-Z][a-zA-Z0-9._-]{0,48}"
    }

    /// One data row of a `CONSUMER-ID HOST CLIENT-ID` partition table, without the group column.
    #[derive(Debug, Clone)]
    pub struct TableRow {
        pub topic: String,
        pub partition: u32,
        pub current_offset: Option<i64>,
        pub log_end_offset: Option<i64>,
        pub lag: Option<i64>,
        /// `(client_id, host)`, `None` for an unassigned partition
        pub owner: Option<(String, String)>,
    }

    impl TableRow {
        pub fn render(&self) -> String {
            let offset = |v: Option<i64>| v.map_or_else(|| "-".to_string(), |v| v.to_string());
            let owner = match &self.owner {
                Some((client_id, host)) => format!(
                    "{client_id}-0c6a5b1e-4f9e-4a53-9d39-2b0b5f6a1c7e {host} {client_id}"
                ),
                None => "- - -".to_string(),
            };
            format!(
                "{} {} {} {} {} {owner}",
                self.topic,
                self.partition,
                offset(self.current_offset),
                offset(self.log_end_offset),
                offset(self.lag),
            )
        }
    }

    fn arb_offset() -> impl Strategy<Value = Option<i64>> {
        proptest::option::of(0i64..10_000_000)
    }

    fn arb_owner() -> impl Strategy<Value = Option<(String, String)>> {
        proptest::option::of((
            "[a-z][a-z0-9-]{0,15}",
            (0u8..=255, 0u8..=255).prop_map(|(a, b)| format!("/10.0.{a}.{b}")),
        ))
    }

    /// A single data row; topics and partitions drawn from a small space so duplicates occur
    pub fn arb_table_row() -> impl Strategy<Value = TableRow> {
        (
            "[a-z][a-z0-9._-]{0,3}",
            0u32..4,
            arb_offset(),
            arb_offset(),
            arb_offset(),
            arb_owner(),
        )
            .prop_map(
                |(topic, partition, current_offset, log_end_offset, lag, owner)| TableRow {
                    topic,
                    partition,
                    current_offset,
                    log_end_offset,
                    lag,
                    owner,
                },
            )
    }

    /// Rows in arbitrary order
    pub fn arb_table_rows() -> impl Strategy<Value = Vec<TableRow>> {
        proptest::collection::vec(arb_table_row(), 0..20)
    }
}
