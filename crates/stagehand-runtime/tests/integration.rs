use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use stagehand_core::config::DeploymentConfig;
use stagehand_core::deployment::{Deployment, ResolveContext};
use stagehand_core::health::HealthStatus;
use stagehand_core::marker::{FileMarkerStore, MarkerStore, MemoryMarkerStore};
use stagehand_core::restart::Backoff;
use stagehand_core::unit::UnitPhase;
use stagehand_runtime::{Orchestrator, OrchestratorHandle};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse `yaml` with `@DIR@` replaced by the scratch directory.
fn deployment(yaml: &str, dir: &Path) -> Deployment {
    let yaml = yaml.replace("@DIR@", &dir.display().to_string());
    let config = DeploymentConfig::from_yaml(&yaml).unwrap();
    Deployment::resolve(config, &ResolveContext::default()).unwrap()
}

fn start(deployment: Deployment, store: Arc<dyn MarkerStore>) -> OrchestratorHandle {
    Orchestrator::new(deployment, store)
        .with_backoff(Backoff {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
        })
        .with_init_poll(Duration::from_millis(20))
        .start()
}

fn starts(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("starts.log"))
        .unwrap_or_default()
        .lines()
        .map(|l| l.to_string())
        .collect()
}

fn touch(dir: &Path, name: &str) {
    std::fs::write(dir.join(name), b"").unwrap();
}

/// Poll `cond` for up to ten seconds.
async fn eventually<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn phase(handle: &OrchestratorHandle, unit: &str) -> UnitPhase {
    handle.board().unit_snapshot(unit).unwrap().phase
}

/// A unit that logs its start and sleeps, healthy once `<name>.ready` exists.
fn gated_unit(name: &str, deps: &[&str]) -> String {
    format!(
        r#"
  - name: {name}
    command: echo {name} >> "$STAGE_DIR/starts.log"; exec sleep 30
    depends_on: [{deps}]
    depends_timeout: 30s
    stop_grace: 2s
    healthcheck:
      probe:
        type: exec
        command: test -f "$STAGE_DIR/{name}.ready"
      interval: 50ms
      timeout: 2s
      retries: 1
"#,
        deps = deps.join(", ")
    )
}

const HEADER: &str = r#"
deployment:
  name: test-stack
env:
  STAGE_DIR: "@DIR@"
units:
"#;

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chain_starts_each_unit_only_after_its_dependency_is_healthy() {
    let dir = TempDir::new().unwrap();
    let yaml = format!(
        "{HEADER}{}{}{}",
        gated_unit("c", &["b"]),
        gated_unit("a", &[]),
        gated_unit("b", &["a"]),
    );
    let handle = start(deployment(&yaml, dir.path()), Arc::new(MemoryMarkerStore::new()));
    let d = dir.path();

    eventually("a to start", || starts(d) == ["a"]).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(starts(d), ["a"]);
    assert_eq!(phase(&handle, "b"), UnitPhase::Waiting);
    assert_eq!(phase(&handle, "c"), UnitPhase::Waiting);

    touch(d, "a.ready");
    eventually("b to start", || starts(d) == ["a", "b"]).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(starts(d), ["a", "b"]);

    touch(d, "b.ready");
    eventually("c to start", || starts(d) == ["a", "b", "c"]).await;

    touch(d, "c.ready");
    eventually("every unit healthy", || handle.board().all_settled_ok()).await;

    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_every_unit() {
    let dir = TempDir::new().unwrap();
    let yaml = format!(
        "{HEADER}{}{}",
        gated_unit("a", &[]),
        gated_unit("b", &["a"]),
    );
    let handle = start(deployment(&yaml, dir.path()), Arc::new(MemoryMarkerStore::new()));
    touch(dir.path(), "a.ready");
    eventually("b to start", || starts(dir.path()).len() == 2).await;

    let board = handle.board().clone();
    handle.shutdown().await;
    for snap in board.snapshot() {
        assert_eq!(snap.phase, UnitPhase::Stopped, "{}", snap.name);
        assert_eq!(snap.pid, None);
    }
}

#[tokio::test]
async fn shutdown_while_waiting_starts_nothing_more() {
    let dir = TempDir::new().unwrap();
    let yaml = format!(
        "{HEADER}{}{}",
        gated_unit("a", &[]),
        gated_unit("b", &["a"]),
    );
    let handle = start(deployment(&yaml, dir.path()), Arc::new(MemoryMarkerStore::new()));
    eventually("a to start", || starts(dir.path()) == ["a"]).await;

    let board = handle.board().clone();
    handle.shutdown().await;
    touch(dir.path(), "a.ready");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(starts(dir.path()), ["a"]);
    let b = board.unit_snapshot("b").unwrap();
    assert_eq!(b.phase, UnitPhase::Stopped);
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

#[tokio::test]
async fn independent_subtrees_start_without_waiting_for_each_other() {
    let dir = TempDir::new().unwrap();
    let yaml = format!(
        "{HEADER}{}{}{}{}",
        gated_unit("a", &[]),
        gated_unit("a2", &["a"]),
        gated_unit("x", &[]),
        gated_unit("y", &["x"]),
    );
    touch(dir.path(), "x.ready");
    let handle = start(deployment(&yaml, dir.path()), Arc::new(MemoryMarkerStore::new()));
    let d = dir.path();

    // a never becomes healthy; the x subtree must not care.
    eventually("x subtree to start", || sorted(starts(d)) == ["a", "x", "y"]).await;
    assert_eq!(phase(&handle, "y"), UnitPhase::Running);
    assert_eq!(phase(&handle, "a2"), UnitPhase::Waiting);

    handle.shutdown().await;
}

#[tokio::test]
async fn fan_in_waits_for_every_dependency() {
    let dir = TempDir::new().unwrap();
    let yaml = format!(
        "{HEADER}{}{}{}",
        gated_unit("c", &["a", "b"]),
        gated_unit("a", &[]),
        gated_unit("b", &[]),
    );
    let handle = start(deployment(&yaml, dir.path()), Arc::new(MemoryMarkerStore::new()));
    let d = dir.path();

    eventually("a and b to start", || sorted(starts(d)) == ["a", "b"]).await;
    touch(d, "a.ready");
    eventually("a healthy", || {
        handle.board().unit_snapshot("a").unwrap().health == HealthStatus::Healthy
    })
    .await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(starts(d).len(), 2);
    assert_eq!(phase(&handle, "c"), UnitPhase::Waiting);

    touch(d, "b.ready");
    eventually("c to start", || starts(d).len() == 3).await;
    assert_eq!(starts(d)[2], "c");

    handle.shutdown().await;
}

#[tokio::test]
async fn restarted_unit_waits_again_for_unhealthy_dependency() {
    let dir = TempDir::new().unwrap();
    let yaml = format!(
        r#"{HEADER}{}
  - name: b
    command: echo b >> "$STAGE_DIR/starts.log"; while [ ! -f "$STAGE_DIR/b.crash" ]; do sleep 0.05; done; rm "$STAGE_DIR/b.crash"; exit 1
    depends_on: [a]
    depends_timeout: 30s
    stop_grace: 2s
    restart: on-failure
    max_restarts: 5
"#,
        gated_unit("a", &[]),
    );
    touch(dir.path(), "a.ready");
    let handle = start(deployment(&yaml, dir.path()), Arc::new(MemoryMarkerStore::new()));
    let d = dir.path();

    eventually("b to start", || starts(d) == ["a", "b"]).await;
    std::fs::remove_file(d.join("a.ready")).unwrap();
    eventually("a unhealthy", || {
        handle.board().unit_snapshot("a").unwrap().health == HealthStatus::Unhealthy
    })
    .await;

    touch(d, "b.crash");
    eventually("b back at the gate", || {
        let b = handle.board().unit_snapshot("b").unwrap();
        b.restarts == 1 && b.phase == UnitPhase::Waiting
    })
    .await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(starts(d), ["a", "b"]);
    assert_eq!(phase(&handle, "b"), UnitPhase::Waiting);

    touch(d, "a.ready");
    eventually("b to restart", || starts(d) == ["a", "b", "b"]).await;
    eventually("b running", || phase(&handle, "b") == UnitPhase::Running).await;

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// Failure propagation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dependency_timeout_fails_unit_and_skips_descendants() {
    let dir = TempDir::new().unwrap();
    let yaml = format!(
        r#"{HEADER}{}
  - name: api
    command: echo api >> "$STAGE_DIR/starts.log"; exec sleep 30
    depends_on: [db]
    depends_timeout: 300ms
  - name: web
    command: echo web >> "$STAGE_DIR/starts.log"; exec sleep 30
    depends_on: [api]
  - name: worker
    command: echo worker >> "$STAGE_DIR/starts.log"; exec sleep 30
    depends_on: [web, db]
"#,
        gated_unit("db", &[]),
    );
    let handle = start(deployment(&yaml, dir.path()), Arc::new(MemoryMarkerStore::new()));

    eventually("api to fail", || phase(&handle, "api") == UnitPhase::Failed).await;
    eventually("web to be skipped", || phase(&handle, "web") == UnitPhase::Skipped).await;

    let api = handle.board().unit_snapshot("api").unwrap();
    assert!(api.detail.unwrap().contains("db"));
    let web = handle.board().unit_snapshot("web").unwrap();
    assert!(web.detail.unwrap().contains("api"));

    // worker still waits on db, which is running but never healthy; it is
    // skipped through web, never started.
    eventually("worker to be skipped", || phase(&handle, "worker") == UnitPhase::Skipped).await;
    assert_eq!(starts(dir.path()), ["db"]);
    assert_eq!(phase(&handle, "db"), UnitPhase::Running);

    handle.shutdown().await;
}

#[tokio::test]
async fn failed_service_is_restarted_until_limit() {
    let dir = TempDir::new().unwrap();
    let yaml = format!(
        r#"{HEADER}
  - name: flaky
    command: echo flaky >> "$STAGE_DIR/starts.log"; exit 1
    restart: on-failure
    max_restarts: 2
  - name: api
    command: [sleep, "30"]
    depends_on: [flaky]
"#
    );
    let handle = start(deployment(&yaml, dir.path()), Arc::new(MemoryMarkerStore::new()));
    handle.finished().await;

    let flaky = handle.board().unit_snapshot("flaky").unwrap();
    assert_eq!(flaky.phase, UnitPhase::Failed);
    assert_eq!(flaky.restarts, 2);
    assert_eq!(starts(dir.path()).len(), 3);
    assert_eq!(phase(&handle, "api"), UnitPhase::Skipped);
    handle.shutdown().await;
}

#[tokio::test]
async fn clean_exit_without_restart_completes_and_unblocks_dependents() {
    let dir = TempDir::new().unwrap();
    let yaml = format!(
        r#"{HEADER}
  - name: seed
    command: echo seed >> "$STAGE_DIR/starts.log"
  - name: consumer
    command: echo consumer >> "$STAGE_DIR/starts.log"
    depends_on: [seed]
"#
    );
    let handle = start(deployment(&yaml, dir.path()), Arc::new(MemoryMarkerStore::new()));
    handle.finished().await;
    assert_eq!(starts(dir.path()), ["seed", "consumer"]);
    assert_eq!(phase(&handle, "consumer"), UnitPhase::Completed);
    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// One-time initialization
// ---------------------------------------------------------------------------

const INIT_STACK: &str = r#"
  - name: bootstrap
    kind: init
    steps:
      - name: migrate
        command: echo migrate >> "$STAGE_DIR/steps.log"
      - name: create-admin
        command: echo create-admin >> "$STAGE_DIR/steps.log"; test ! -f "$STAGE_DIR/admin.fail"
  - name: webserver
    command: echo webserver >> "$STAGE_DIR/starts.log"; exec sleep 30
    depends_on: [bootstrap]
"#;

fn steps_log(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("steps.log"))
        .unwrap_or_default()
        .lines()
        .map(|l| l.to_string())
        .collect()
}

#[tokio::test]
async fn bootstrap_runs_once_across_restarts() {
    let dir = TempDir::new().unwrap();
    let markers = dir.path().join("markers");
    let yaml = format!("{HEADER}{INIT_STACK}");

    for round in 1..=2 {
        let store: Arc<dyn MarkerStore> = Arc::new(FileMarkerStore::open(&markers).unwrap());
        let handle = start(deployment(&yaml, dir.path()), store);
        eventually("webserver to start", || starts(dir.path()).len() == round).await;
        eventually("webserver healthy", || {
            handle.board().unit_snapshot("webserver").unwrap().health == HealthStatus::Healthy
        })
        .await;
        assert_eq!(phase(&handle, "bootstrap"), UnitPhase::Completed);
        handle.shutdown().await;
    }

    assert_eq!(steps_log(dir.path()), ["migrate", "create-admin"]);
    assert!(markers.join("default.bootstrap.done").exists());
}

#[tokio::test]
async fn failed_bootstrap_leaves_marker_unset_and_reruns_all_steps() {
    let dir = TempDir::new().unwrap();
    let yaml = format!("{HEADER}{INIT_STACK}");
    let store: Arc<dyn MarkerStore> = Arc::new(MemoryMarkerStore::new());

    touch(dir.path(), "admin.fail");
    let handle = start(deployment(&yaml, dir.path()), Arc::clone(&store));
    handle.finished().await;
    assert_eq!(phase(&handle, "bootstrap"), UnitPhase::Failed);
    assert_eq!(phase(&handle, "webserver"), UnitPhase::Skipped);
    assert!(starts(dir.path()).is_empty());
    assert!(!store.is_set("default.bootstrap").unwrap());
    handle.shutdown().await;

    std::fs::remove_file(dir.path().join("admin.fail")).unwrap();
    let handle = start(deployment(&yaml, dir.path()), Arc::clone(&store));
    eventually("webserver to start", || starts(dir.path()) == ["webserver"]).await;
    handle.shutdown().await;

    assert_eq!(
        steps_log(dir.path()),
        ["migrate", "create-admin", "migrate", "create-admin"]
    );
    assert!(store.is_set("default.bootstrap").unwrap());
}

#[tokio::test]
async fn toggles_reach_unit_environment() {
    let dir = TempDir::new().unwrap();
    let yaml = format!(
        r#"
deployment:
  name: test-stack
env:
  STAGE_DIR: "@DIR@"
toggles:
  SKIP_GRAPH: true
units:
  - name: pipeline
    command: echo "graph=$SKIP_GRAPH search=$SKIP_SEARCH" > "$STAGE_DIR/toggles.txt"
"#
    );
    let handle = start(deployment(&yaml, dir.path()), Arc::new(MemoryMarkerStore::new()));
    handle.finished().await;
    let out = std::fs::read_to_string(dir.path().join("toggles.txt")).unwrap();
    assert_eq!(out.trim(), "graph=true search=false");
    handle.shutdown().await;
}
