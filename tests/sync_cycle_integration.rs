//! End-to-end tests for the startup import and shutdown export cycle.
//!
//! These run the lifecycle controller against version records in a temporary
//! service root, using `MockRunner` for the property checks and real `sh`
//! scripts through `ScriptRunner` for the full cycle.

use std::fs;
use std::path::Path;

use serde_json::{json, Value};
use tempfile::TempDir;

use stats_service::lifecycle::{
    FixedAnswer, ImportOutcome, LifecycleController, LifecyclePhase, ShutdownReport,
};
use stats_service::meta::{self, MetaPaths};
use stats_service::sync::mock::{MockOutcome, MockRunner};
use stats_service::sync::{ScriptRunner, SyncAction};

fn meta_paths(root: &Path) -> MetaPaths {
    MetaPaths::new(
        root.join("config").join("dbmeta.json"),
        root.join("config").join("dbmeta_local.json"),
    )
}

fn write_json(path: &Path, value: Value) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, serde_json::to_string_pretty(&value).unwrap()).unwrap();
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

// ============================================================================
// Startup import decision
// ============================================================================

#[tokio::test]
async fn test_import_runs_only_when_local_is_behind() {
    for shared in 0..4u64 {
        for local in 0..=shared {
            let dir = TempDir::new().unwrap();
            let paths = meta_paths(dir.path());
            write_json(&paths.shared, json!({ "dbVersion": shared }));
            write_json(&paths.local, json!({ "dbVersion": local }));

            let runner = MockRunner::new();
            let controller = LifecycleController::new(paths, runner.clone(), FixedAnswer::no());
            controller.startup().await;

            let expected = usize::from(local < shared);
            assert_eq!(
                runner.count(SyncAction::Import),
                expected,
                "local={local} shared={shared}"
            );
            assert_eq!(controller.phase(), LifecyclePhase::Serving);
        }
    }
}

#[tokio::test]
async fn test_successful_import_mirrors_shared_record() {
    let dir = TempDir::new().unwrap();
    let paths = meta_paths(dir.path());
    write_json(
        &paths.shared,
        json!({ "dbVersion": 3, "colecciones": ["events"] }),
    );
    write_json(&paths.local, json!({ "dbVersion": 1 }));

    let controller = LifecycleController::new(paths.clone(), MockRunner::new(), FixedAnswer::no());
    let report = controller.startup().await;

    assert_eq!(report.local_version, 1);
    assert_eq!(report.shared_version, 3);
    assert!(matches!(
        report.import,
        ImportOutcome::Imported {
            record_updated: true
        }
    ));

    let local = meta::read_record(&paths.local);
    assert_eq!(local.version, 3);
    assert_eq!(local.collections, vec!["events"]);
    assert_eq!(
        fs::read(&paths.shared).unwrap(),
        fs::read(&paths.local).unwrap()
    );
}

#[tokio::test]
async fn test_failed_import_keeps_local_record() {
    let dir = TempDir::new().unwrap();
    let paths = meta_paths(dir.path());
    write_json(&paths.shared, json!({ "dbVersion": 3 }));
    write_json(&paths.local, json!({ "dbVersion": 1 }));
    let before = fs::read(&paths.local).unwrap();

    let runner = MockRunner::new().with_import(MockOutcome::Exit(1));
    let controller = LifecycleController::new(paths.clone(), runner, FixedAnswer::no());
    let report = controller.startup().await;

    assert!(matches!(report.import, ImportOutcome::Failed(_)));
    assert_eq!(fs::read(&paths.local).unwrap(), before);
    assert_eq!(controller.phase(), LifecyclePhase::Serving);
}

// ============================================================================
// Shutdown export
// ============================================================================

#[tokio::test]
async fn test_export_advances_both_records() {
    let dir = TempDir::new().unwrap();
    let paths = meta_paths(dir.path());
    write_json(
        &paths.shared,
        json!({ "dbVersion": 5, "colecciones": ["events", "artist_kpis"], "exportedBy": "ci" }),
    );
    write_json(&paths.local, json!({ "dbVersion": 5 }));

    let controller = LifecycleController::new(paths.clone(), MockRunner::new(), FixedAnswer::yes());
    controller.startup().await;
    let report = controller.interrupt().await;

    match report {
        ShutdownReport::Exported {
            version,
            collections,
            records_written,
        } => {
            assert_eq!(version, 6);
            assert_eq!(collections, vec!["events", "artist_kpis"]);
            assert!(records_written);
        }
        other => panic!("unexpected report: {other:?}"),
    }

    let shared = meta::read_record(&paths.shared);
    let local = meta::read_record(&paths.local);
    assert_eq!(shared.version, 6);
    assert_eq!(shared, local);
    // Unrelated keys survive the update.
    assert_eq!(read_json(&paths.shared)["exportedBy"], "ci");
    assert_eq!(controller.phase(), LifecyclePhase::Terminated);
}

#[tokio::test]
async fn test_export_without_records_starts_at_one() {
    let dir = TempDir::new().unwrap();
    let paths = meta_paths(dir.path());

    let controller = LifecycleController::new(paths.clone(), MockRunner::new(), FixedAnswer::yes());
    controller.interrupt().await;

    assert_eq!(
        read_json(&paths.shared),
        json!({ "dbVersion": 1, "colecciones": [] })
    );
    assert_eq!(read_json(&paths.local), read_json(&paths.shared));
}

#[tokio::test]
async fn test_failed_export_leaves_records_unchanged() {
    let dir = TempDir::new().unwrap();
    let paths = meta_paths(dir.path());
    write_json(
        &paths.shared,
        json!({ "dbVersion": 5, "colecciones": ["events"] }),
    );
    write_json(&paths.local, json!({ "dbVersion": 4 }));
    let shared_before = fs::read(&paths.shared).unwrap();
    let local_before = fs::read(&paths.local).unwrap();

    for outcome in [MockOutcome::Exit(2), MockOutcome::ScriptNotFound] {
        let runner = MockRunner::new().with_export(outcome);
        let controller = LifecycleController::new(paths.clone(), runner, FixedAnswer::yes());

        let report = controller.interrupt().await;

        assert!(matches!(report, ShutdownReport::ExportFailed(_)));
        assert_eq!(fs::read(&paths.shared).unwrap(), shared_before);
        assert_eq!(fs::read(&paths.local).unwrap(), local_before);
    }
}

#[tokio::test]
async fn test_repeated_interrupts_prompt_once() {
    let dir = TempDir::new().unwrap();
    let runner = MockRunner::new();
    let controller = std::sync::Arc::new(LifecycleController::new(
        meta_paths(dir.path()),
        runner.clone(),
        FixedAnswer::yes(),
    ));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let controller = std::sync::Arc::clone(&controller);
            tokio::spawn(async move { controller.interrupt().await })
        })
        .collect();

    let mut handled = 0;
    for handle in handles {
        if !matches!(handle.await.unwrap(), ShutdownReport::AlreadyHandled) {
            handled += 1;
        }
    }

    assert_eq!(handled, 1);
    assert_eq!(controller.prompt().times_asked(), 1);
    assert_eq!(runner.count(SyncAction::Export), 1);
}

// ============================================================================
// Full cycle with real scripts
// ============================================================================

#[cfg(unix)]
#[tokio::test]
async fn test_full_cycle_with_scripts() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let paths = meta_paths(root);
    write_json(
        &paths.shared,
        json!({ "dbVersion": 2, "colecciones": ["events"] }),
    );

    // Each script leaves a marker in the service root it runs in.
    fs::write(root.join("import-db.sh"), "echo import > imported.txt\n").unwrap();
    fs::write(root.join("export-db.sh"), "echo export > exported.txt\n").unwrap();
    let runner = ScriptRunner::new(root, root.join("import-db.sh"), root.join("export-db.sh"))
        .with_interpreter(Some("sh".to_string()));

    let controller = LifecycleController::new(paths.clone(), runner, FixedAnswer::yes());

    let startup = controller.startup().await;
    assert!(matches!(startup.import, ImportOutcome::Imported { .. }));
    assert!(root.join("imported.txt").exists());
    assert_eq!(meta::read_version(&paths.local), 2);

    let shutdown = controller.interrupt().await;
    assert!(matches!(shutdown, ShutdownReport::Exported { version: 3, .. }));
    assert!(root.join("exported.txt").exists());
    assert_eq!(meta::read_version(&paths.shared), 3);
    assert_eq!(meta::read_version(&paths.local), 3);

    // A fresh process over the same records sees local as current.
    let runner = ScriptRunner::new(root, root.join("import-db.sh"), root.join("export-db.sh"))
        .with_interpreter(Some("sh".to_string()));
    let next = LifecycleController::new(paths, runner, FixedAnswer::no());
    let report = next.startup().await;
    assert!(matches!(report.import, ImportOutcome::UpToDate));
}

#[tokio::test]
async fn test_missing_scripts_do_not_block_startup() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let paths = meta_paths(root);
    write_json(&paths.shared, json!({ "dbVersion": 1 }));

    let runner = ScriptRunner::new(root, root.join("import-db.js"), root.join("export-db.js"));
    let controller = LifecycleController::new(paths.clone(), runner, FixedAnswer::no());

    let report = controller.startup().await;

    assert!(matches!(report.import, ImportOutcome::Failed(_)));
    assert!(!paths.local.exists());
    assert_eq!(controller.phase(), LifecyclePhase::Serving);
}
