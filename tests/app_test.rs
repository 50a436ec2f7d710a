use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use taskd::{Application, ShutdownManager};
use taskd_core::{AppConfig, BuiltinIsolation, SchedulerError};
use tempfile::TempDir;

fn write_task(root: &Path, category: &str, name: &str) {
    let dir = root.join("tasks").join(category);
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join(format!("{name}.toml")),
        format!(
            r#"
            name = "{name}"
            schedule = "0 * * * *"

            [execute]
            kind = "builtin"
            entry = "echo"
            "#
        ),
    )
    .unwrap();
}

fn config(root: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.engine.builtin_isolation = BuiltinIsolation::Thread;
    config.engine.check_interval_seconds = 1;
    config.engine.shutdown_grace_seconds = 1;
    config.paths.tasks_dir = root.join("tasks");
    config.paths.schedules_file = root.join("config/schedules.toml");
    config.paths.state_file = root.join("config/scheduler_state.json");
    config.paths.history_file = root.join("config/execution_history.jsonl");
    config
}

#[tokio::test]
async fn test_rediscover_updates_store() {
    let dir = TempDir::new().unwrap();
    write_task(dir.path(), "ops", "first");

    let app = Application::new(config(dir.path())).await.unwrap();
    assert_eq!(app.store().snapshot().await.len(), 1);

    write_task(dir.path(), "ops", "second");
    fs::remove_file(dir.path().join("tasks/ops/first.toml")).unwrap();
    app.rediscover().await.unwrap();

    let snapshot = app.store().snapshot().await;
    assert_eq!(snapshot.generation().id, 2);
    assert!(snapshot.get("ops/second").unwrap().enabled);
    assert!(snapshot.get("ops/first").is_none());
}

#[tokio::test]
async fn test_corrupt_schedule_file_is_fatal() {
    let dir = TempDir::new().unwrap();
    write_task(dir.path(), "ops", "first");
    fs::create_dir_all(dir.path().join("config")).unwrap();
    fs::write(
        dir.path().join("config/schedules.toml"),
        "[schedules.\"ops/first\"]\ncron = \"every tuesday\"\n",
    )
    .unwrap();

    let err = Application::new(config(dir.path())).await.err().unwrap();
    assert!(matches!(err, SchedulerError::InvalidCron { .. }));
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn test_daemon_stops_on_shutdown() {
    let dir = TempDir::new().unwrap();
    write_task(dir.path(), "ops", "first");

    let app = Arc::new(Application::new(config(dir.path())).await.unwrap());
    let manager = ShutdownManager::new();
    let shutdown_rx = manager.subscribe();

    let handle = {
        let app = Arc::clone(&app);
        tokio::spawn(async move { app.run(shutdown_rx).await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    manager.shutdown("test");

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
