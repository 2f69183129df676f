use crate::propagation::{NodePropagation, PropagationRecord};
use crate::{ANALYSIS_FILE, REPORT_FILE, RUN_DETAILS_FILE};
use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Aggregate propagation statistics for one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStats {
    pub node: String,
    pub blocks: usize,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
}

impl NodeStats {
    /// `None` when there are no records: an empty node renders as "no data",
    /// it never divides by zero.
    pub fn from_records(node: &str, records: &[PropagationRecord]) -> Option<Self> {
        if records.is_empty() {
            return None;
        }
        let mut deltas: Vec<u64> = records.iter().map(|record| record.delta_ms).collect();
        deltas.sort_unstable();
        let blocks = deltas.len();
        let sum: u64 = deltas.iter().sum();
        let median_ms = if blocks % 2 == 1 {
            deltas[blocks / 2] as f64
        } else {
            (deltas[blocks / 2 - 1] + deltas[blocks / 2]) as f64 / 2.0
        };
        Some(NodeStats {
            node: node.to_string(),
            blocks,
            mean_ms: sum as f64 / blocks as f64,
            median_ms,
            min_ms: deltas[0],
            max_ms: deltas[blocks - 1],
        })
    }
}

impl fmt::Display for NodeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  blocks: {}", self.blocks)?;
        writeln!(f, "  mean:   {:.2} ms", self.mean_ms)?;
        writeln!(f, "  median: {:.2} ms", self.median_ms)?;
        writeln!(f, "  min:    {} ms", self.min_ms)?;
        writeln!(f, "  max:    {} ms", self.max_ms)
    }
}

/// Exact parameters of a download run, written next to the logs so a later
/// `--skip-download` pass can reproduce the node list. Auth header values
/// are never recorded here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDetails {
    pub url: String,
    pub from_time: DateTime<Utc>,
    pub to_time: DateTime<Utc>,
    pub nodes: Vec<String>,
    #[serde(default)]
    pub failed_nodes: Vec<String>,
    pub seal_pattern: String,
    pub import_pattern: String,
    pub downloaded_at: DateTime<Utc>,
}

/// One line per node/height/delta, ascending height per node, with
/// missing-marker notes after each node's section.
pub fn render_report(results: &[NodePropagation]) -> String {
    let mut out = String::new();
    for node_result in results {
        out.push_str(&format!("==== {} ====\n", node_result.node));
        if node_result.records.is_empty() && node_result.missing.is_empty() {
            out.push_str("no block markers found\n\n");
            continue;
        }
        for record in &node_result.records {
            let tag = if record.anomalous {
                " (anomalous: import precedes seal)"
            } else {
                ""
            };
            out.push_str(&format!(
                "#{:<8} sealed={} imported={} delta={}ms{}\n",
                record.height,
                record.sealed_at.format(TIMESTAMP_FORMAT),
                record.imported_at.format(TIMESTAMP_FORMAT),
                record.delta_ms,
                tag,
            ));
        }
        for missing in &node_result.missing {
            out.push_str(&format!(
                "#{:<8} missing {} marker\n",
                missing.height, missing.missing
            ));
        }
        out.push('\n');
    }
    out
}

pub fn render_analysis(results: &[NodePropagation]) -> String {
    let mut out = String::new();
    out.push_str("===== Block propagation analysis =====\n\n");
    for node_result in results {
        out.push_str(&format!("node: {}\n", node_result.node));
        match NodeStats::from_records(&node_result.node, &node_result.records) {
            Some(stats) => out.push_str(&stats.to_string()),
            None => out.push_str("  no data\n"),
        }
        out.push('\n');
    }

    let all: Vec<PropagationRecord> = results
        .iter()
        .flat_map(|node_result| node_result.records.iter().cloned())
        .collect();
    if let Some(stats) = NodeStats::from_records("overall", &all) {
        out.push_str("===== Overall =====\n");
        out.push_str(&format!("nodes: {}\n", results.len()));
        out.push_str(&stats.to_string());
    }
    out
}

pub async fn write_report(dir: &Path, results: &[NodePropagation]) -> anyhow::Result<PathBuf> {
    let path = dir.join(REPORT_FILE);
    tokio::fs::write(&path, render_report(results)).await?;
    Ok(path)
}

pub async fn write_analysis(dir: &Path, results: &[NodePropagation]) -> anyhow::Result<PathBuf> {
    let path = dir.join(ANALYSIS_FILE);
    tokio::fs::write(&path, render_analysis(results)).await?;
    Ok(path)
}

pub async fn write_run_details(dir: &Path, details: &RunDetails) -> anyhow::Result<PathBuf> {
    let path = dir.join(RUN_DETAILS_FILE);
    tokio::fs::write(&path, serde_json::to_vec_pretty(details)?).await?;
    Ok(path)
}

/// Best effort: a missing or corrupt details file falls back to filename
/// inference rather than failing the run.
pub async fn read_run_details(dir: &Path) -> Option<RunDetails> {
    let path = dir.join(RUN_DETAILS_FILE);
    let bytes = tokio::fs::read(&path).await.ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(details) => Some(details),
        Err(err) => {
            warn!("ignoring unreadable {}: {err}", path.display());
            None
        }
    }
}
