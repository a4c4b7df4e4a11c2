//! End-to-end collector tests: reporters on one side of a real pipe, the
//! collector loop on the other, assertions through the query engine.

use auditlog_collector::{audit_channel, AuditReporter, Collector, PIPE_MAX_PAYLOAD};
use auditlog_core::{AuditConfig, AuditKind, AuditResult, ManualClock};
use auditlog_storage::{audit_file_path, query, AuditIndexTable};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn test_config(dir: &Path) -> AuditConfig {
    AuditConfig {
        directory: dir.to_path_buf(),
        rotation_age_minutes: 0,
        remain_threshold: 8,
        remain_age_days: 0,
        dml: true,
        ..Default::default()
    }
}

/// Give the collector loop a moment to drain the pipe.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_single_record_end_to_end() {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(dir.path());
    let clock = Arc::new(ManualClock::new(1000));

    let (sender, receiver) = audit_channel().unwrap();
    let (collector, _handle) = Collector::new(cfg.clone(), receiver, clock.clone())
        .await
        .unwrap();
    let task = tokio::spawn(collector.run());

    let reporter = AuditReporter::new(sender.clone(), 7, Arc::new(cfg));
    reporter
        .report(AuditKind::DmlAction, AuditResult::Ok, Some("t"), Some("hello"))
        .await
        .unwrap();

    drop(reporter);
    drop(sender);
    task.await.unwrap().unwrap();

    let rows = query(dir.path(), 0, 2000).await.unwrap();
    let row = rows
        .iter()
        .find(|r| r.fields[5] == "hello")
        .expect("record did not reach the audit file");
    assert_eq!(row.time, 1000);
    assert_eq!(row.kind, "dml_action");
    assert_eq!(row.result, "ok");
    assert_eq!(row.fields[4], "t");
}

#[tokio::test]
async fn test_chunked_record_survives_reassembly() {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(dir.path());
    let clock = Arc::new(ManualClock::new(1000));

    let (sender, receiver) = audit_channel().unwrap();
    let (collector, _handle) = Collector::new(cfg.clone(), receiver, clock.clone())
        .await
        .unwrap();
    let task = tokio::spawn(collector.run());

    // Spans four chunks on the pipe.
    let big_detail = "d".repeat(3 * PIPE_MAX_PAYLOAD + 5);
    let reporter = AuditReporter::new(sender.clone(), 7, Arc::new(cfg));
    reporter
        .report(
            AuditKind::DmlAction,
            AuditResult::Ok,
            None,
            Some(&big_detail),
        )
        .await
        .unwrap();

    drop(reporter);
    drop(sender);
    task.await.unwrap().unwrap();

    let rows = query(dir.path(), 0, 2000).await.unwrap();
    let matching: Vec<_> = rows.iter().filter(|r| r.fields[5].starts_with('d')).collect();
    assert_eq!(matching.len(), 1, "expected exactly one reassembled record");
    assert_eq!(matching[0].fields[5], big_detail);
}

#[tokio::test]
async fn test_two_producers_interleaved() {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(dir.path());
    let clock = Arc::new(ManualClock::new(1000));

    let (sender, receiver) = audit_channel().unwrap();
    let (collector, _handle) = Collector::new(cfg.clone(), receiver, clock.clone())
        .await
        .unwrap();
    let task = tokio::spawn(collector.run());

    let cfg = Arc::new(cfg);
    let detail_a = format!("A{}", "a".repeat(PIPE_MAX_PAYLOAD + 100));
    let detail_b = format!("B{}", "b".repeat(PIPE_MAX_PAYLOAD + 200));
    let rep_a = AuditReporter::new(sender.clone(), 11, cfg.clone());
    let rep_b = AuditReporter::new(sender.clone(), 12, cfg.clone());

    let (ra, rb) = tokio::join!(
        rep_a.report(AuditKind::DmlAction, AuditResult::Ok, None, Some(&detail_a)),
        rep_b.report(AuditKind::DmlAction, AuditResult::Ok, None, Some(&detail_b)),
    );
    ra.unwrap();
    rb.unwrap();

    drop(rep_a);
    drop(rep_b);
    drop(sender);
    task.await.unwrap().unwrap();

    let rows = query(dir.path(), 0, 2000).await.unwrap();
    assert_eq!(rows.iter().filter(|r| r.fields[5] == detail_a).count(), 1);
    assert_eq!(rows.iter().filter(|r| r.fields[5] == detail_b).count(), 1);
}

#[tokio::test]
async fn test_category_mask_filters_on_producer_side() {
    let dir = TempDir::new().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.dml = false;
    let clock = Arc::new(ManualClock::new(1000));

    let (sender, receiver) = audit_channel().unwrap();
    let (collector, _handle) = Collector::new(cfg.clone(), receiver, clock.clone())
        .await
        .unwrap();
    let task = tokio::spawn(collector.run());

    let reporter = AuditReporter::new(sender.clone(), 7, Arc::new(cfg));
    reporter
        .report(AuditKind::DmlAction, AuditResult::Ok, None, Some("filtered"))
        .await
        .unwrap();
    reporter
        .report(
            AuditKind::LoginSuccess,
            AuditResult::Ok,
            None,
            Some("logged in"),
        )
        .await
        .unwrap();

    drop(reporter);
    drop(sender);
    task.await.unwrap().unwrap();

    let rows = query(dir.path(), 0, 2000).await.unwrap();
    assert!(rows.iter().all(|r| r.fields[5] != "filtered"));
    assert_eq!(rows.iter().filter(|r| r.fields[5] == "logged in").count(), 1);
}

#[tokio::test]
async fn test_terminate_drains_pending_data() {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(dir.path());
    let clock = Arc::new(ManualClock::new(1000));

    let (sender, receiver) = audit_channel().unwrap();
    let (collector, handle) = Collector::new(cfg.clone(), receiver, clock.clone())
        .await
        .unwrap();
    let task = tokio::spawn(collector.run());

    let reporter = AuditReporter::new(sender.clone(), 7, Arc::new(cfg));
    reporter
        .report(AuditKind::DmlAction, AuditResult::Ok, None, Some("last words"))
        .await
        .unwrap();

    // The write end stays open; terminate must still bring the loop down.
    handle.terminate();
    task.await.unwrap().unwrap();

    let rows = query(dir.path(), 0, 2000).await.unwrap();
    assert_eq!(rows.iter().filter(|r| r.fields[5] == "last words").count(), 1);
}

#[tokio::test]
async fn test_rotate_request_creates_new_file() {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(dir.path());
    let clock = Arc::new(ManualClock::new(1000));

    let (sender, receiver) = audit_channel().unwrap();
    let (collector, handle) = Collector::new(cfg.clone(), receiver, clock.clone())
        .await
        .unwrap();
    let task = tokio::spawn(collector.run());

    let reporter = AuditReporter::new(sender.clone(), 7, Arc::new(cfg));
    reporter
        .report(AuditKind::DmlAction, AuditResult::Ok, None, Some("first"))
        .await
        .unwrap();
    settle().await;

    handle.rotate();
    settle().await;

    reporter
        .report(AuditKind::DmlAction, AuditResult::Ok, None, Some("second"))
        .await
        .unwrap();

    drop(reporter);
    drop(sender);
    task.await.unwrap().unwrap();

    let index = AuditIndexTable::load(dir.path()).await.unwrap().unwrap();
    assert_eq!(index.count, 2);
    assert!(audit_file_path(dir.path(), 1).exists());

    let rows = query(dir.path(), 0, 2000).await.unwrap();
    assert_eq!(rows.iter().filter(|r| r.fields[5] == "first").count(), 1);
    assert_eq!(rows.iter().filter(|r| r.fields[5] == "second").count(), 1);
}

#[tokio::test]
async fn test_reload_applies_new_threshold() {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(dir.path());
    let clock = Arc::new(ManualClock::new(1000));

    let (sender, receiver) = audit_channel().unwrap();
    let (collector, handle) = Collector::new(cfg.clone(), receiver, clock.clone())
        .await
        .unwrap();
    let task = tokio::spawn(collector.run());
    settle().await;

    let mut smaller = cfg.clone();
    smaller.remain_threshold = 2;
    handle.reload(smaller);
    settle().await;

    handle.terminate();
    task.await.unwrap().unwrap();
    drop(sender);

    let index = AuditIndexTable::load(dir.path()).await.unwrap().unwrap();
    assert_eq!(index.maxnum, 3);
}

#[tokio::test]
async fn test_clock_rewind_through_the_pipe() {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(dir.path());
    let clock = Arc::new(ManualClock::new(1000));

    let (sender, receiver) = audit_channel().unwrap();
    let (collector, _handle) = Collector::new(cfg.clone(), receiver, clock.clone())
        .await
        .unwrap();
    let task = tokio::spawn(collector.run());

    let reporter = AuditReporter::new(sender.clone(), 7, Arc::new(cfg));
    reporter
        .report(AuditKind::DmlAction, AuditResult::Ok, None, Some("before"))
        .await
        .unwrap();
    settle().await;

    clock.set(500);
    reporter
        .report(AuditKind::DmlAction, AuditResult::Ok, None, Some("after"))
        .await
        .unwrap();

    drop(reporter);
    drop(sender);
    task.await.unwrap().unwrap();

    let index = AuditIndexTable::load(dir.path()).await.unwrap().unwrap();
    assert!(index.current().ctime < 0, "slot not marked for the rewind");

    let rows = query(dir.path(), 400, 2000).await.unwrap();
    assert_eq!(rows.iter().filter(|r| r.fields[5] == "before").count(), 1);
    assert_eq!(rows.iter().filter(|r| r.fields[5] == "after").count(), 1);
    assert!(rows
        .iter()
        .any(|r| r.kind == "internal_event" && r.fields[5] == "system time changed."));
}

#[tokio::test]
async fn test_stray_bytes_pass_through_verbatim() {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(dir.path());
    let clock = Arc::new(ManualClock::new(1000));

    let (sender, receiver) = audit_channel().unwrap();
    let (collector, _handle) = Collector::new(cfg.clone(), receiver, clock.clone())
        .await
        .unwrap();
    let task = tokio::spawn(collector.run());

    let reporter = AuditReporter::new(sender.clone(), 7, Arc::new(cfg));
    reporter
        .report(AuditKind::DmlAction, AuditResult::Ok, None, Some("real record"))
        .await
        .unwrap();
    settle().await;

    // Third-party code writing to the shared fd, no protocol framing.
    sender.writable().await.unwrap();
    sender.try_write(b"stderr from some library\n").unwrap();

    drop(reporter);
    drop(sender);
    task.await.unwrap().unwrap();

    let bytes = std::fs::read(audit_file_path(dir.path(), 0)).unwrap();
    let needle = b"stderr from some library\n";
    assert!(
        bytes.windows(needle.len()).any(|w| w == needle),
        "stray bytes not copied verbatim"
    );

    // The record written before the stray bytes still scans out.
    let rows = query(dir.path(), 0, 2000).await.unwrap();
    assert_eq!(rows.iter().filter(|r| r.fields[5] == "real record").count(), 1);
}
