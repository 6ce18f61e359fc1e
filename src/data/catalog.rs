//! Catalog of the metrics simulated nodes report.
//!
//! Unknown keys are still charted; they just fall into [`MetricGroup::Others`]
//! with the raw key as their label.

use std::collections::BTreeMap;
use std::fmt;

/// Section a metric is listed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricGroup {
    Communication,
    ModelExchange,
    Mixnet,
    Miscellaneous,
    Learning,
    Others,
}

impl MetricGroup {
    pub fn label(&self) -> &'static str {
        match self {
            MetricGroup::Communication => "Communication",
            MetricGroup::ModelExchange => "Model Exchange",
            MetricGroup::Mixnet => "Mixnet",
            MetricGroup::Miscellaneous => "Miscellaneous",
            MetricGroup::Learning => "Learning",
            MetricGroup::Others => "Others",
        }
    }
}

impl fmt::Display for MetricGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Static description of one metric key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricInfo {
    pub key: &'static str,
    pub label: &'static str,
    pub unit: &'static str,
    pub group: MetricGroup,
}

const fn info(
    key: &'static str,
    label: &'static str,
    unit: &'static str,
    group: MetricGroup,
) -> MetricInfo {
    MetricInfo {
        key,
        label,
        unit,
        group,
    }
}

use MetricGroup::*;

pub const CATALOG: &[MetricInfo] = &[
    info("total_sent", "Msgs Sent", "msgs", Communication),
    info("total_received", "Msgs Received", "msgs", Communication),
    info("total_mbytes_sent", "MB Sent", "MB", Communication),
    info("total_mbytes_received", "MB Received", "MB", Communication),
    info("unacked_msg", "Unacked Frags", "frags", Communication),
    info("resent", "Frags Resent", "frags", Communication),
    info("received_duplicate_msg", "Dup Msgs", "msgs", Communication),
    info("avg_rtt", "Avg RTT", "ms", Communication),
    info("last_rtt", "Last RTT", "ms", Communication),
    info("avg_msg_per_second", "Msg/sec", "msgs/s", Communication),
    info("msg_sent", "Messages Sent", "msgs", Communication),
    info("bytes_sent", "Bytes Sent", "bytes", Communication),
    info("bytes_received", "Bytes Received", "bytes", Communication),
    info("fragments_sent", "Frags Sent", "frags", ModelExchange),
    info("fragments_received", "Frags Received", "frags", ModelExchange),
    info("active_peers", "Peers", "prs", ModelExchange),
    info("forwarded", "Msgs Fwd", "msgs", Mixnet),
    info("surb_replied", "SURBs Replied", "SURBs", Mixnet),
    info("surb_received", "SURBs Received", "SURBs", Mixnet),
    info("covers_sent", "Covers Sent", "covs", Mixnet),
    info("covers_received", "Covers Received", "covs", Mixnet),
    info("sending_covers", "Sending Covers", "covs", Mixnet),
    info("sending_messages", "Sending Msgs", "msgs", Mixnet),
    info("queued_packages", "Queued Pkgs", "pkgs", Mixnet),
    info("out_interval", "Queue Intvl", "s", Mixnet),
    info("errors", "Errors", "errs", Miscellaneous),
    info("deleted_cache_for_inactive", "Cache Deleted", "items", Miscellaneous),
    info("cpu_total_ns", "CPU (ns)", "ns", Miscellaneous),
    info("memory_mb", "Mem (MB)", "MB", Miscellaneous),
    info("accuracy", "Accuracy", "%", Learning),
    info("aggregated_accuracy", "Agg Accuracy", "%", Learning),
    info("current_round", "Round", "rnds", Learning),
    info("round_time", "Round Time", "s", Learning),
    info("stage", "Stage", "stgs", Learning),
];

/// Metrics selected when nothing else is configured.
pub const ALWAYS_ACTIVE: &[&str] = &[
    "total_sent",
    "current_round",
    "active_peers",
    "received_duplicate_msg",
    "unacked_msg",
    "resent",
];

/// Metric whose latest value is a node's current round.
pub const CURRENT_ROUND: &str = "current_round";

pub fn lookup(key: &str) -> Option<&'static MetricInfo> {
    CATALOG.iter().find(|m| m.key == key)
}

/// Human label for a key; the key itself when it is not catalogued.
pub fn display_name(key: &str) -> &str {
    lookup(key).map_or(key, |m| m.label)
}

/// Unit suffix; empty for unknown keys.
pub fn unit(key: &str) -> &'static str {
    lookup(key).map_or("", |m| m.unit)
}

pub fn group(key: &str) -> MetricGroup {
    lookup(key).map_or(MetricGroup::Others, |m| m.group)
}

/// Bucket keys by group, preserving the input order inside each group.
pub fn grouped<'a, I>(keys: I) -> BTreeMap<MetricGroup, Vec<&'a str>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut groups: BTreeMap<MetricGroup, Vec<&'a str>> = BTreeMap::new();
    for key in keys {
        groups.entry(group(key)).or_default().push(key);
    }
    groups
}

/// Default selection as owned strings.
pub fn default_selection() -> Vec<String> {
    ALWAYS_ACTIVE.iter().map(|s| s.to_string()).collect()
}
