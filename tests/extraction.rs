use propagation_bench::config::MarkerPatterns;
use propagation_bench::extract::{extract_events, MarkerKind};
use propagation_bench::propagation::propagation_for_node;
use propagation_bench::{DEFAULT_IMPORT_PATTERN, DEFAULT_SEAL_PATTERN};

fn default_patterns() -> MarkerPatterns {
    MarkerPatterns::new(DEFAULT_SEAL_PATTERN, DEFAULT_IMPORT_PATTERN)
        .expect("default patterns compile")
}

#[tokio::test]
async fn extracts_markers_from_a_plain_text_log() {
    let contents = tokio::fs::read_to_string("./tests/data/logs/plain_run/alice.txt")
        .await
        .expect("fixture log exists");
    let events = extract_events("alice", &contents, &default_patterns());

    // #42 seal+import, #43 seal+first import, #44 seal only
    assert_eq!(events.len(), 5);
    assert!(events
        .iter()
        .all(|event| [42, 43, 44].contains(&event.height)));

    let result = propagation_for_node("alice", &events);
    assert_eq!(result.records.len(), 2);
    assert_eq!(result.records[0].height, 42);
    assert_eq!(result.records[0].delta_ms, 350);
    assert_eq!(result.records[1].height, 43);
    assert_eq!(
        result.records[1].delta_ms, 120,
        "the earlier of the duplicate import lines decides the delta"
    );
    assert_eq!(result.missing.len(), 1);
    assert_eq!(result.missing[0].height, 44);
    assert_eq!(result.missing[0].missing, MarkerKind::Import);
}

#[tokio::test]
async fn flags_an_import_that_precedes_its_seal() {
    let contents = tokio::fs::read_to_string("./tests/data/logs/plain_run/bob.txt")
        .await
        .expect("fixture log exists");
    let events = extract_events("bob", &contents, &default_patterns());
    let result = propagation_for_node("bob", &events);

    assert_eq!(result.records.len(), 1);
    let record = &result.records[0];
    assert_eq!(record.height, 45);
    assert_eq!(record.delta_ms, 0);
    assert!(record.anomalous);

    assert_eq!(result.missing.len(), 1);
    assert_eq!(result.missing[0].height, 42);
    assert_eq!(result.missing[0].missing, MarkerKind::Seal);
}

#[tokio::test]
async fn extracts_markers_from_a_verbatim_loki_body() {
    let contents = tokio::fs::read_to_string("./tests/data/logs/json_run/carol.txt")
        .await
        .expect("fixture log exists");
    let events = extract_events("carol", &contents, &default_patterns());
    let result = propagation_for_node("carol", &events);

    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].height, 42);
    assert_eq!(result.records[0].delta_ms, 400);
    assert!(result.missing.is_empty());
}
