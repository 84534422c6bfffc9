//! Parsing of `kafka-consumer-groups` text output.
//!
//! The tool prints column-aligned tables meant for humans, and the trailing columns have changed
//! between Kafka releases. Rows are aligned against the header where possible and validated
//! positionally otherwise.

use crate::error::{ExporterError, Result};
use crate::kafka::PartitionInfo;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, trace};

const TOOL_ERROR_PREFIXES: &[&str] = &[
    "Error while executing consumer group command",
    "Error: Executing consumer group command",
];

const INFORMATIONAL_PREFIXES: &[&str] = &["note:", "warning:"];

/// Notices such as "Consumer group 'x' does not exist." or "... has no active members.",
/// optionally prefixed with `Error: ` by 2.x tools.
const GROUP_NOTICE_PREFIX: &str = "consumer group ";

/// Placeholder the tool prints for unknown offsets and unassigned owners.
const UNKNOWN: &str = "-";

const LABEL_TOPIC: &str = "TOPIC";
const LABEL_GROUP: &str = "GROUP";
const LABEL_LAG: &str = "LAG";
const LABEL_CONSUMER_ID: &str = "CONSUMER-ID";
const LABEL_HOST: &str = "HOST";
const LABEL_CLIENT_ID: &str = "CLIENT-ID";

/// Columns from TOPIC through LAG.
const CORE_COLUMNS: usize = 5;

static CONSUMER_ID_UUID_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("consumer id suffix pattern is valid")
});

/// Decomposed owner columns of a partition row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub consumer_id: String,
    pub client_id: String,
    pub host: String,
}

/// Parse the output of `--list` into group names, in the order printed.
pub fn parse_groups(output: &str) -> Result<Vec<String>> {
    if let Some(message) = detect_tool_error(output) {
        return Err(ExporterError::ToolInternal(message));
    }

    let groups: Vec<String> = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !is_informational(line))
        .map(str::to_string)
        .collect();

    debug!(count = groups.len(), "Parsed consumer group list");
    Ok(groups)
}

/// Parse the output of `--describe --group <name>` into partition records.
///
/// Rows that cannot be aligned with the table, rows of unassigned partitions and repeated
/// `(topic, partition)` rows are skipped; the first occurrence of a partition wins.
pub fn parse_partition_output(output: &str) -> Result<Vec<PartitionInfo>> {
    if let Some(message) = detect_tool_error(output) {
        return Err(ExporterError::ToolInternal(message));
    }

    let mut layout: Option<TableLayout> = None;
    let mut unexpected_line: Option<&str> = None;
    let mut table_group: Option<&str> = None;
    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    let mut partitions = Vec::new();
    let mut skipped = 0usize;
    let mut unaligned = 0usize;
    let mut unassigned = 0usize;
    let mut duplicates = 0usize;

    for line in output.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }

        if let Some(header) = TableLayout::from_header(&tokens) {
            layout.get_or_insert(header);
            continue;
        }

        let trimmed = line.trim();
        let Some(layout) = &layout else {
            if !is_informational(trimmed) && !is_group_notice(trimmed) {
                unexpected_line.get_or_insert(trimmed);
            }
            continue;
        };

        let Some(row) = layout.align(&tokens) else {
            trace!(line = trimmed, "Skipping unrecognized row");
            if !is_informational(trimmed) && !is_group_notice(trimmed) && !is_separator(trimmed) {
                unaligned += 1;
            }
            continue;
        };

        if let Some(group) = row.group {
            match table_group {
                None => table_group = Some(group),
                Some(expected) if expected != group => {
                    trace!(expected, group, "Skipping row of another group");
                    skipped += 1;
                    continue;
                }
                Some(_) => {}
            }
        }

        let Some(owner) = decompose_owner(row.owner, &layout.owner_columns) else {
            unassigned += 1;
            continue;
        };

        if !seen.insert((row.topic, row.partition)) {
            duplicates += 1;
            continue;
        }

        partitions.push(PartitionInfo {
            topic: row.topic.to_string(),
            partition_id: row.partition.to_string(),
            current_offset: row.current_offset.known().unwrap_or(0),
            log_end_offset: row.log_end_offset.known(),
            lag: row.lag.known().unwrap_or(0),
            client_id: owner.client_id,
            consumer_address: owner.host,
        });
    }

    if layout.is_none()
        && let Some(line) = unexpected_line
    {
        return Err(ExporterError::MalformedOutput(format!(
            "no consumer group table header found, unexpected line: {line}"
        )));
    }

    // A table whose every row is unrecognizable is a format change, not an empty group
    if unaligned > 0 && partitions.is_empty() && unassigned == 0 && duplicates == 0 {
        return Err(ExporterError::MalformedOutput(format!(
            "none of the {unaligned} consumer group table rows could be parsed"
        )));
    }

    debug!(
        partitions = partitions.len(),
        skipped, unaligned, unassigned, duplicates, "Parsed consumer group description"
    );
    Ok(partitions)
}

/// Returns the first line of the output when it is an error transcript of the tool itself.
///
/// Leading `note:` and `warning:` lines are not part of the transcript.
pub fn detect_tool_error(output: &str) -> Option<String> {
    let first = output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !is_informational(line))?;

    if TOOL_ERROR_PREFIXES
        .iter()
        .any(|prefix| first.starts_with(prefix))
        || has_stack_trace(output)
    {
        return Some(first.to_string());
    }

    None
}

/// An exception line followed, at some point, by an indented `at ...(...)` frame.
fn has_stack_trace(output: &str) -> bool {
    let mut saw_exception = false;
    for line in output.lines() {
        if saw_exception && is_stack_frame(line) {
            return true;
        }
        if line.contains("Exception") || line.contains("Error") {
            saw_exception = true;
        }
    }
    false
}

fn is_stack_frame(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.len() < line.len() && trimmed.starts_with("at ") && trimmed.trim_end().ends_with(')')
}

fn is_informational(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    INFORMATIONAL_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

fn is_group_notice(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower
        .strip_prefix("error: ")
        .unwrap_or(&lower)
        .starts_with(GROUP_NOTICE_PREFIX)
}

fn is_separator(line: &str) -> bool {
    line.bytes().all(|b| b == b'-')
}

/// Layout of a partition table as declared by its header row.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TableLayout {
    has_group_column: bool,
    /// Labels after LAG, e.g. `OWNER` or `CONSUMER-ID HOST CLIENT-ID`.
    owner_columns: Vec<String>,
}

impl TableLayout {
    fn from_header(tokens: &[&str]) -> Option<Self> {
        let first = *tokens.first()?;
        if first != LABEL_GROUP && first != LABEL_TOPIC {
            return None;
        }

        let topic = tokens.iter().position(|t| *t == LABEL_TOPIC)?;
        let lag = tokens.iter().position(|t| *t == LABEL_LAG)?;
        if lag <= topic {
            return None;
        }

        Some(Self {
            has_group_column: tokens[..topic].contains(&LABEL_GROUP),
            owner_columns: tokens[lag + 1..].iter().map(ToString::to_string).collect(),
        })
    }

    /// Header-declared alignment first. 0.10.0 tools print a GROUP header but leave the group
    /// out of the rows, so the other alignment is tried second.
    fn align<'t, 's>(&self, tokens: &'t [&'s str]) -> Option<RowCore<'t, 's>> {
        align_row(tokens, self.has_group_column)
            .or_else(|| align_row(tokens, !self.has_group_column))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OffsetCell {
    Known(i64),
    Unknown,
}

impl OffsetCell {
    fn parse(token: &str) -> Option<Self> {
        if token == UNKNOWN {
            return Some(Self::Unknown);
        }
        if !token.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        token.parse().ok().map(Self::Known)
    }

    const fn known(self) -> Option<i64> {
        match self {
            Self::Known(value) => Some(value),
            Self::Unknown => None,
        }
    }
}

#[derive(Debug)]
struct RowCore<'t, 's> {
    group: Option<&'s str>,
    topic: &'s str,
    partition: &'s str,
    current_offset: OffsetCell,
    log_end_offset: OffsetCell,
    lag: OffsetCell,
    owner: &'t [&'s str],
}

fn align_row<'t, 's>(tokens: &'t [&'s str], with_group: bool) -> Option<RowCore<'t, 's>> {
    let start = usize::from(with_group);
    let core = tokens.get(start..start + CORE_COLUMNS)?;

    let (topic, partition) = (core[0], core[1]);
    if topic == UNKNOWN || !partition.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    Some(RowCore {
        group: with_group.then(|| tokens[0]),
        topic,
        partition,
        current_offset: OffsetCell::parse(core[2])?,
        log_end_offset: OffsetCell::parse(core[3])?,
        lag: OffsetCell::parse(core[4])?,
        owner: &tokens[start + CORE_COLUMNS..],
    })
}

/// Decompose the owner columns of a row.
///
/// `labels` are the header labels after LAG. Returns `None` for unassigned partitions and for
/// owners missing a consumer id, client id or address.
pub fn decompose_owner(tokens: &[&str], labels: &[String]) -> Option<Owner> {
    if tokens.iter().all(|t| *t == UNKNOWN) {
        return None;
    }

    let named = if tokens.len() == labels.len() {
        labelled(tokens, labels, LABEL_CONSUMER_ID)
            .zip(labelled(tokens, labels, LABEL_HOST))
            .zip(labelled(tokens, labels, LABEL_CLIENT_ID))
    } else {
        None
    };

    let (consumer_id, host, client_id) = match (named, tokens) {
        (Some(((consumer_id, host), client_id)), _) => {
            (consumer_id, host, client_id.to_string())
        }
        (None, [consumer_id, host, client_id, ..]) => {
            (*consumer_id, *host, (*client_id).to_string())
        }
        (None, [consumer_id, host]) => (*consumer_id, *host, client_id_from(consumer_id)),
        (None, [composite]) => {
            let composite: &str = composite;
            let slash = composite.find('/')?;
            let consumer_id = &composite[..slash];
            (consumer_id, &composite[slash..], client_id_from(consumer_id))
        }
        (None, []) => return None,
    };

    let usable = |value: &str| !value.is_empty() && value != UNKNOWN;
    if !usable(consumer_id) || !usable(&client_id) || !usable(host.trim_start_matches('/')) {
        return None;
    }

    Some(Owner {
        consumer_id: consumer_id.to_string(),
        client_id,
        host: host.to_string(),
    })
}

fn labelled<'s>(tokens: &[&'s str], labels: &[String], name: &str) -> Option<&'s str> {
    labels
        .iter()
        .position(|label| label == name)
        .and_then(|i| tokens.get(i).copied())
}

/// Consumer ids are `<client-id>-<uuid>`.
fn client_id_from(consumer_id: &str) -> String {
    CONSUMER_ID_UUID_SUFFIX.replace(consumer_id, "").into_owned()
}
