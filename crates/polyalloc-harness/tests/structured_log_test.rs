use polyalloc_harness::structured_log::{
    LogEmitter, LogEntry, LogLevel, Outcome, validate_log_file, validate_log_line,
};
use std::path::PathBuf;

fn scratch_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("polyalloc-{}-{name}", std::process::id()))
}

#[test]
fn file_emitter_output_validates() {
    let path = scratch_path("emit.jsonl");
    {
        let mut emitter = LogEmitter::to_file(&path, "stress", "seed-7").unwrap();
        emitter.emit(LogLevel::Info, "stress_start").unwrap();
        emitter
            .emit_entry(
                LogEntry::new("", LogLevel::Debug, "stress_thread")
                    .with_thread(1)
                    .with_details(serde_json::json!({ "allocs": 10 })),
            )
            .unwrap();
        emitter
            .emit_entry(
                LogEntry::new("", LogLevel::Info, "stress_done")
                    .with_outcome(Outcome::Pass)
                    .with_duration_ms(12),
            )
            .unwrap();
        emitter.flush().unwrap();
    }

    let (lines, errors) = validate_log_file(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(lines, 3);
    assert!(errors.is_empty(), "{errors:?}");
}

#[test]
fn file_validation_collects_errors_per_line() {
    let path = scratch_path("bad.jsonl");
    let good = LogEntry::new("stress::r::001", LogLevel::Info, "ok")
        .to_jsonl()
        .unwrap();
    let content = format!("{good}\n\nnot json\n{{\"level\":\"info\"}}\n");
    std::fs::write(&path, content).unwrap();

    let (lines, errors) = validate_log_file(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(lines, 3);
    assert!(errors.iter().any(|e| e.line_number == 3 && e.field == "<json>"));
    assert!(errors.iter().any(|e| e.line_number == 4 && e.field == "trace_id"));
    assert!(errors.iter().all(|e| e.line_number != 1));
}

#[test]
fn parsed_entry_keeps_optional_fields() {
    let line = LogEntry::new("classify::r::009", LogLevel::Warn, "table")
        .with_scenario("classify")
        .with_outcome(Outcome::Error)
        .to_jsonl()
        .unwrap();
    let entry = validate_log_line(&line, 1).unwrap();
    assert_eq!(entry.level, LogLevel::Warn);
    assert_eq!(entry.outcome, Some(Outcome::Error));
    assert_eq!(entry.scenario.as_deref(), Some("classify"));
    assert!(entry.thread.is_none());
}
