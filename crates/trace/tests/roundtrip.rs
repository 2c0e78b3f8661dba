//! End-to-end trace integration: everything written through the writer
//! must come back out of the replay reader, in append order, with the
//! step counter increasing by exactly 1 per record.

use axle_core::types::Params;
use axle_core::{AttemptRecord, AttemptSink, ConditionKind, ConditionProbe, FailureKind, Layer};
use axle_trace::{TraceReplay, TraceWriter};

fn sample_attempt(attempt: u32, success: bool) -> AttemptRecord {
    let mut params = Params::new();
    params.insert("text".to_string(), serde_json::json!("hello"));
    AttemptRecord {
        action_kind: "click".to_string(),
        description: "press the buy button".to_string(),
        params,
        screen_key: "checkout".to_string(),
        layer: Some(Layer::Dom),
        locator: Some("css:#buy".to_string()),
        attempt,
        success,
        fail_kind: if success { None } else { Some(FailureKind::Network) },
        fail_message: if success { None } else { Some("ECONNRESET".to_string()) },
        elapsed_ms: 42,
        snapshot: vec![ConditionProbe {
            name: "on checkout page".to_string(),
            kind: ConditionKind::UrlMatch,
            ok: true,
        }],
    }
}

#[test]
fn written_events_replay_in_order_with_contiguous_steps() {
    let dir = tempfile::tempdir().unwrap();
    let writer = TraceWriter::create(dir.path(), "run-rt").unwrap();

    writer.record_attempt(&sample_attempt(0, false));
    writer.record_attempt(&sample_attempt(1, true));
    writer.log_screenshot("checkout", b"png-bytes").unwrap();
    writer
        .log_state("checkout", serde_json::json!({"cart_items": 2}))
        .unwrap();
    writer
        .log_decision(
            "route_selected",
            Some("dom"),
            Some(2.43),
            serde_json::json!({"candidates": 3}),
        )
        .unwrap();
    writer.log_error("session expired", Some("WRONG_STATE")).unwrap();

    let replay = TraceReplay::load(writer.path()).unwrap();
    assert_eq!(replay.skipped, 0);
    assert_eq!(replay.events.len(), 6);

    for (i, event) in replay.events.iter().enumerate() {
        assert_eq!(event["run_id"], "run-rt");
        assert_eq!(event["step"], (i as u64) + 1);
        assert!(event["ts"].as_str().is_some());
    }

    let kinds: Vec<&str> = replay
        .events
        .iter()
        .map(|e| e["type"].as_str().unwrap())
        .collect();
    assert_eq!(
        kinds,
        ["action", "action", "screenshot", "state", "decision", "error"]
    );
}

#[test]
fn attempt_fields_survive_the_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let writer = TraceWriter::create(dir.path(), "run-fields").unwrap();
    writer.record_attempt(&sample_attempt(2, false));

    let replay = TraceReplay::load(writer.path()).unwrap();
    let event = &replay.events[0];

    assert_eq!(event["action"], "click");
    assert_eq!(event["screen_key"], "checkout");
    assert_eq!(event["layer"], "dom");
    assert_eq!(event["locator"], "css:#buy");
    assert_eq!(event["attempt"], 2);
    assert_eq!(event["success"], false);
    assert_eq!(event["fail_type"], "NETWORK");
    assert_eq!(event["fail_message"], "ECONNRESET");
    assert_eq!(event["elapsed_ms"], 42);
    assert_eq!(event["params"]["text"], "hello");
    assert_eq!(event["snapshot"][0]["name"], "on checkout page");
    assert_eq!(event["snapshot"][0]["ok"], true);
}

#[test]
fn summary_reflects_logged_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let writer = TraceWriter::create(dir.path(), "run-sum").unwrap();
    writer.record_attempt(&sample_attempt(0, false));
    writer.record_attempt(&sample_attempt(1, true));
    writer.log_state("checkout", serde_json::json!({})).unwrap();

    let summary = TraceReplay::load(writer.path()).unwrap().summary();
    assert_eq!(summary.total_actions, 2);
    assert_eq!(summary.failures_by_kind["NETWORK"], 1);
    assert!((summary.success_rate - 0.5).abs() < 1e-9);
}
