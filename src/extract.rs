use crate::config::MarkerPatterns;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Captures;
use serde_derive::Deserialize;
use std::collections::HashSet;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    Seal,
    Import,
}

impl std::fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarkerKind::Seal => write!(f, "seal"),
            MarkerKind::Import => write!(f, "import"),
        }
    }
}

/// One recognized marker line from a node's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEvent {
    pub node: String,
    pub height: u64,
    pub kind: MarkerKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unparseable timestamp {0:?}")]
    Timestamp(String),
    #[error("unparseable block height {0:?}")]
    Height(String),
}

/// Timestamps as they appear in node logs: RFC 3339, a full date-time, or a
/// bare time of day (anchored to the epoch date, which keeps deltas within
/// one window consistent).
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ParseError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.3f") {
        return Ok(Utc.from_utc_datetime(&parsed));
    }
    if let Ok(parsed) = NaiveTime::parse_from_str(raw, "%H:%M:%S%.3f") {
        let anchored = NaiveDate::from_ymd_opt(1970, 1, 1)
            .expect("epoch date is valid")
            .and_time(parsed);
        return Ok(Utc.from_utc_datetime(&anchored));
    }
    Err(ParseError::Timestamp(raw.to_string()))
}

/// Classify one log line as a seal marker, an import marker, or neither.
pub fn parse_line(
    node: &str,
    line: &str,
    patterns: &MarkerPatterns,
) -> Result<Option<BlockEvent>, ParseError> {
    if let Some(captures) = patterns.seal.captures(line) {
        return capture_event(node, MarkerKind::Seal, &captures).map(Some);
    }
    if let Some(captures) = patterns.import.captures(line) {
        return capture_event(node, MarkerKind::Import, &captures).map(Some);
    }
    Ok(None)
}

fn capture_event(
    node: &str,
    kind: MarkerKind,
    captures: &Captures<'_>,
) -> Result<BlockEvent, ParseError> {
    let height_raw = captures
        .name("height")
        .map(|group| group.as_str())
        .unwrap_or_default();
    let height = height_raw
        .parse::<u64>()
        .map_err(|_| ParseError::Height(height_raw.to_string()))?;
    let ts_raw = captures
        .name("ts")
        .map(|group| group.as_str())
        .unwrap_or_default();
    Ok(BlockEvent {
        node: node.to_string(),
        height,
        kind,
        timestamp: parse_timestamp(ts_raw)?,
    })
}

/// Scan one node's log body, keeping the first marker of each kind per
/// height (re-proposals log later duplicates, which are ignored). Lines that
/// match a pattern but fail to parse are logged and skipped.
pub fn extract_events(node: &str, contents: &str, patterns: &MarkerPatterns) -> Vec<BlockEvent> {
    let mut seen: HashSet<(u64, MarkerKind)> = HashSet::new();
    let mut events = Vec::new();
    for line in log_lines(contents) {
        match parse_line(node, &line, patterns) {
            Ok(Some(event)) => {
                if seen.insert((event.height, event.kind)) {
                    events.push(event);
                }
            }
            Ok(None) => {}
            Err(err) => warn!("skipping line from {node}: {err}"),
        }
    }
    events
}

// A stored body is either plain text or a verbatim Loki query_range response.
fn log_lines(contents: &str) -> Vec<String> {
    if let Some(lines) = flatten_loki_body(contents) {
        return lines;
    }
    contents.lines().map(str::to_string).collect()
}

#[derive(Deserialize)]
struct LokiResponse {
    data: LokiData,
}

#[derive(Deserialize)]
struct LokiData {
    result: Vec<LokiStream>,
}

#[derive(Deserialize)]
struct LokiStream {
    values: Vec<(String, String)>,
}

/// Flatten a Loki JSON body into its log lines, ordered by entry timestamp
/// so the first-occurrence rule still means earliest.
fn flatten_loki_body(contents: &str) -> Option<Vec<String>> {
    let trimmed = contents.trim_start();
    if !trimmed.starts_with('{') {
        return None;
    }
    let response: LokiResponse = serde_json::from_str(trimmed).ok()?;
    let mut entries: Vec<(u128, String)> = response
        .data
        .result
        .into_iter()
        .flat_map(|stream| stream.values)
        .filter_map(|(ts, line)| ts.parse::<u128>().ok().map(|ts| (ts, line)))
        .collect();
    entries.sort_by_key(|(ts, _)| *ts);
    Some(entries.into_iter().map(|(_, line)| line).collect())
}

#[cfg(test)]
mod tests {
    use super::{extract_events, parse_line, parse_timestamp, BlockEvent, MarkerKind};
    use crate::config::MarkerPatterns;
    use crate::{DEFAULT_IMPORT_PATTERN, DEFAULT_SEAL_PATTERN};

    fn default_patterns() -> MarkerPatterns {
        MarkerPatterns::new(DEFAULT_SEAL_PATTERN, DEFAULT_IMPORT_PATTERN)
            .expect("default patterns compile")
    }

    const UNRECOGNIZED_LINES: [&str; 4] = [
        "",
        "2026-08-06 10:00:00.000 node started",
        "Finalized #42 at 10:00:00.700",
        "Pre-sealed block without any height or time",
    ];

    #[test]
    fn unrecognized_lines_are_ignored() {
        let patterns = default_patterns();
        for line in UNRECOGNIZED_LINES {
            assert_eq!(
                parse_line("alice", line, &patterns).expect("no parse error"),
                None,
                "line should be unrecognized: {line:?}"
            );
        }
    }

    #[test]
    fn seal_and_import_markers_are_classified() {
        let patterns = default_patterns();
        let seal = parse_line(
            "alice",
            "Pre-sealed block for proposal #42 at 10:00:00.000",
            &patterns,
        )
        .expect("line parses")
        .expect("line is a marker");
        assert_eq!(seal.kind, MarkerKind::Seal);
        assert_eq!(seal.height, 42);

        let import = parse_line("alice", "Imported #42 at 10:00:00.350", &patterns)
            .expect("line parses")
            .expect("line is a marker");
        assert_eq!(import.kind, MarkerKind::Import);
        assert_eq!(import.height, 42);
        assert_eq!(
            (import.timestamp - seal.timestamp).num_milliseconds(),
            350,
            "scenario from the log layout: #42 sealed at 10:00:00.000, imported at 10:00:00.350"
        );
    }

    #[test]
    fn matched_line_with_bad_height_is_a_parse_error() {
        let patterns = MarkerPatterns::new(
            r"sealed height=(?P<height>\S+) at (?P<ts>\S+)",
            DEFAULT_IMPORT_PATTERN,
        )
        .expect("patterns compile");
        assert!(parse_line("alice", "sealed height=abc at 10:00:00.000", &patterns).is_err());
    }

    #[test]
    fn timestamps_parse_in_all_supported_formats() {
        let rfc3339 = parse_timestamp("2026-08-06T10:00:00.350Z").expect("rfc3339 parses");
        let datetime = parse_timestamp("2026-08-06 10:00:00.350").expect("date-time parses");
        assert_eq!(rfc3339, datetime);

        let time_only = parse_timestamp("10:00:00.350").expect("time of day parses");
        let midnight = parse_timestamp("00:00:00.000").expect("midnight parses");
        assert_eq!((time_only - midnight).num_milliseconds(), 36_000_350);

        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn first_marker_of_each_kind_wins_per_height() {
        let contents = "\
Imported #42 at 10:00:00.350
Imported #42 at 10:00:00.900
Pre-sealed block for proposal #42 at 10:00:00.000
Pre-sealed block for proposal #42 at 10:00:05.000
";
        let events = extract_events("alice", contents, &default_patterns());
        assert_eq!(events.len(), 2);
        let import = events
            .iter()
            .find(|event| event.kind == MarkerKind::Import)
            .expect("one import survives");
        assert_eq!(
            import.timestamp,
            parse_timestamp("10:00:00.350").unwrap(),
            "the earlier of two import lines is used"
        );
        let seal = events
            .iter()
            .find(|event| event.kind == MarkerKind::Seal)
            .expect("one seal survives");
        assert_eq!(seal.timestamp, parse_timestamp("10:00:00.000").unwrap());
    }

    #[test]
    fn bad_lines_are_skipped_without_dropping_the_rest() {
        let contents = "\
Imported #not-a-height at 10:00:00.100
Imported #43 at nonsense
Imported #43 at 10:00:00.200
";
        let events = extract_events("alice", contents, &default_patterns());
        assert_eq!(
            events,
            vec![BlockEvent {
                node: "alice".to_string(),
                height: 43,
                kind: MarkerKind::Import,
                timestamp: parse_timestamp("10:00:00.200").unwrap(),
            }]
        );
    }

    #[test]
    fn loki_json_bodies_are_flattened_in_timestamp_order() {
        let contents = r#"{"status":"success","data":{"resultType":"streams","result":[
            {"stream":{"host":"carol"},"values":[
                ["1754474400400000000","Imported #42 at 10:00:00.400"]]},
            {"stream":{"host":"carol","level":"info"},"values":[
                ["1754474400000000000","Pre-sealed block for proposal #42 at 10:00:00.000"]]}
        ]}}"#;
        let events = extract_events("carol", contents, &default_patterns());
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].kind,
            MarkerKind::Seal,
            "entries are reordered by their Loki timestamps"
        );
        assert_eq!(
            (events[1].timestamp - events[0].timestamp).num_milliseconds(),
            400
        );
    }
}
