use crate::extract::{BlockEvent, MarkerKind};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Seal-to-import latency for one block on one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationRecord {
    pub node: String,
    pub height: u64,
    pub sealed_at: DateTime<Utc>,
    pub imported_at: DateTime<Utc>,
    pub delta_ms: u64,
    /// Import preceded seal (clock skew or log disorder); delta is zeroed.
    pub anomalous: bool,
}

/// A height observed with only one of its two markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingMarker {
    pub node: String,
    pub height: u64,
    pub missing: MarkerKind,
}

#[derive(Debug, Default)]
pub struct NodePropagation {
    pub node: String,
    /// Ascending height order.
    pub records: Vec<PropagationRecord>,
    pub missing: Vec<MissingMarker>,
}

/// Pair seal and import events by height for one node.
///
/// A height contributes a record only when both markers are present;
/// otherwise it becomes a note, never a failure.
pub fn propagation_for_node(node: &str, events: &[BlockEvent]) -> NodePropagation {
    let mut heights: BTreeMap<u64, (Option<DateTime<Utc>>, Option<DateTime<Utc>>)> =
        BTreeMap::new();
    for event in events {
        let entry = heights.entry(event.height).or_default();
        let slot = match event.kind {
            MarkerKind::Seal => &mut entry.0,
            MarkerKind::Import => &mut entry.1,
        };
        if slot.is_none() {
            *slot = Some(event.timestamp);
        }
    }

    let mut result = NodePropagation {
        node: node.to_string(),
        ..Default::default()
    };
    for (height, markers) in heights {
        match markers {
            (Some(sealed_at), Some(imported_at)) => {
                let signed_ms = (imported_at - sealed_at).num_milliseconds();
                result.records.push(PropagationRecord {
                    node: node.to_string(),
                    height,
                    sealed_at,
                    imported_at,
                    delta_ms: signed_ms.max(0) as u64,
                    anomalous: signed_ms < 0,
                });
            }
            (Some(_), None) => result.missing.push(MissingMarker {
                node: node.to_string(),
                height,
                missing: MarkerKind::Import,
            }),
            (None, Some(_)) => result.missing.push(MissingMarker {
                node: node.to_string(),
                height,
                missing: MarkerKind::Seal,
            }),
            (None, None) => {}
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::{propagation_for_node, MissingMarker};
    use crate::extract::{parse_timestamp, BlockEvent, MarkerKind};

    fn event(height: u64, kind: MarkerKind, ts: &str) -> BlockEvent {
        BlockEvent {
            node: "alice".to_string(),
            height,
            kind,
            timestamp: parse_timestamp(ts).expect("test timestamp parses"),
        }
    }

    #[test]
    fn delta_is_exact_when_import_follows_seal() {
        let events = [
            event(42, MarkerKind::Seal, "10:00:00.000"),
            event(42, MarkerKind::Import, "10:00:00.350"),
        ];
        let result = propagation_for_node("alice", &events);
        assert_eq!(result.records.len(), 1);
        let record = &result.records[0];
        assert_eq!(record.height, 42);
        assert_eq!(record.delta_ms, 350);
        assert!(!record.anomalous);
        assert!(result.missing.is_empty());
    }

    #[test]
    fn negative_delta_is_zeroed_and_flagged() {
        let events = [
            event(7, MarkerKind::Seal, "10:00:01.000"),
            event(7, MarkerKind::Import, "10:00:00.600"),
        ];
        let result = propagation_for_node("alice", &events);
        let record = &result.records[0];
        assert_eq!(record.delta_ms, 0);
        assert!(record.anomalous);
    }

    #[test]
    fn lone_markers_become_notes_not_records() {
        let events = [
            event(42, MarkerKind::Seal, "10:00:00.000"),
            event(43, MarkerKind::Import, "10:00:06.120"),
        ];
        let result = propagation_for_node("alice", &events);
        assert!(result.records.is_empty());
        assert_eq!(
            result.missing,
            vec![
                MissingMarker {
                    node: "alice".to_string(),
                    height: 42,
                    missing: MarkerKind::Import,
                },
                MissingMarker {
                    node: "alice".to_string(),
                    height: 43,
                    missing: MarkerKind::Seal,
                },
            ]
        );
    }

    #[test]
    fn records_are_ordered_by_ascending_height() {
        let events = [
            event(44, MarkerKind::Seal, "10:00:12.000"),
            event(44, MarkerKind::Import, "10:00:12.200"),
            event(42, MarkerKind::Seal, "10:00:00.000"),
            event(42, MarkerKind::Import, "10:00:00.350"),
        ];
        let result = propagation_for_node("alice", &events);
        let heights: Vec<u64> = result.records.iter().map(|record| record.height).collect();
        assert_eq!(heights, vec![42, 44]);
    }

    #[test]
    fn no_events_yield_empty_propagation() {
        let result = propagation_for_node("alice", &[]);
        assert!(result.records.is_empty());
        assert!(result.missing.is_empty());
    }
}
