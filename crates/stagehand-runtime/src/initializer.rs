//! Bootstrap procedure that runs at most once per deployment instance.
//!
//! ```text
//! marker set? ── yes ──► Skipped
//!     │ no
//!     ▼
//! acquire lease (bounded wait; marker re-checked while polling)
//!     │
//!     ▼
//! marker set? ── yes ──► Skipped          (another holder finished first)
//!     │ no
//!     ▼
//! run steps in order, renewing the lease ──► step fails ──► Failed(step, reason)
//!     │ all ok
//!     ▼
//! write marker ──► Succeeded
//! ```
//!
//! The lease is released on every path, including panics, by [`LeaseGuard`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use stagehand_core::config::{InitStepConfig, MarkerConfig};
use stagehand_core::marker::{MarkerRecord, MarkerStore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::process::{describe_exit, LaunchSpec, UnitProcess};
use crate::{Result, RuntimeError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InitOutcome {
    /// The marker was already present; nothing ran.
    Skipped,
    /// Every step succeeded and the marker is now set.
    Succeeded,
    /// `step` failed; the marker is still unset.
    Failed { step: String, reason: String },
}

/// One step of a bootstrap procedure. Steps must be idempotent: a failure
/// anywhere re-runs every step next time.
pub trait InitStep: Send + Sync {
    fn name(&self) -> &str;

    fn run<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, std::result::Result<(), String>>;
}

// ─── CommandStep ──────────────────────────────────────────────────────────

/// A step that runs a command and succeeds on exit code 0.
pub struct CommandStep {
    unit: String,
    name: String,
    argv: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandStep {
    /// Build from config. `unit_env` is the unit's resolved environment;
    /// the step's own `env` is layered on top.
    pub fn from_config(
        unit: &str,
        config: &InitStepConfig,
        unit_env: &BTreeMap<String, String>,
        working_dir: Option<PathBuf>,
    ) -> Self {
        let mut env = unit_env.clone();
        env.extend(config.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self {
            unit: unit.to_string(),
            name: config.name.clone(),
            argv: config.command.clone(),
            env,
            working_dir,
            timeout: config.timeout,
        }
    }

    async fn execute(&self, cancel: &CancellationToken) -> std::result::Result<(), String> {
        let label = format!("{}/{}", self.unit, self.name);
        let mut process = UnitProcess::spawn(LaunchSpec {
            unit: &label,
            argv: &self.argv,
            env: &self.env,
            working_dir: self.working_dir.as_deref(),
        })
        .map_err(|e| e.to_string())?;

        let wait = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, process.wait())
                    .await
                    .map_err(|_| format!("timed out after {limit:?}"))?
                    .map_err(|e| e.to_string()),
                None => process.wait().await.map_err(|e| e.to_string()),
            }
        };

        let status = tokio::select! {
            status = wait => status,
            _ = cancel.cancelled() => Err("interrupted".to_string()),
        }?;

        if status.success() {
            Ok(())
        } else {
            Err(describe_exit(&status))
        }
    }
}

impl InitStep for CommandStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, std::result::Result<(), String>> {
        Box::pin(self.execute(cancel))
    }
}

// ─── LeaseGuard ───────────────────────────────────────────────────────────

struct LeaseGuard {
    store: Arc<dyn MarkerStore>,
    instance: String,
    holder: String,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        match self.store.release_lease(&self.instance, &self.holder) {
            Ok(()) => debug!(instance = %self.instance, holder = %self.holder, "init lease released"),
            Err(e) => warn!(instance = %self.instance, error = %e, "failed to release init lease"),
        }
    }
}

// ─── OnceInitializer ──────────────────────────────────────────────────────

pub struct OnceInitializer {
    store: Arc<dyn MarkerStore>,
    instance: String,
    holder: String,
    lease_ttl: Duration,
    lock_timeout: Duration,
    poll_interval: Duration,
}

impl OnceInitializer {
    pub fn new(store: Arc<dyn MarkerStore>, instance: impl Into<String>, marker: &MarkerConfig) -> Self {
        Self {
            store,
            instance: instance.into(),
            holder: Uuid::new_v4().to_string(),
            lease_ttl: marker.lease_ttl,
            lock_timeout: marker.lock_timeout,
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub async fn run_if_needed(
        &self,
        steps: &[Arc<dyn InitStep>],
        cancel: &CancellationToken,
    ) -> Result<InitOutcome> {
        if self.store.is_set(&self.instance)? {
            info!(instance = %self.instance, "initialization marker present; skipping bootstrap");
            return Ok(InitOutcome::Skipped);
        }

        let Some(_guard) = self.acquire(cancel).await? else {
            info!(instance = %self.instance, "bootstrap completed by another initializer");
            return Ok(InitOutcome::Skipped);
        };

        if self.store.is_set(&self.instance)? {
            info!(instance = %self.instance, "bootstrap completed while waiting for the lease");
            return Ok(InitOutcome::Skipped);
        }

        let steps_done = self.run_steps(steps, cancel);
        tokio::pin!(steps_done);
        let period = (self.lease_ttl / 3).max(Duration::from_millis(100));
        let mut renew = tokio::time::interval_at(Instant::now() + period, period);
        let mut renewed_at = Instant::now();

        let outcome = loop {
            tokio::select! {
                outcome = &mut steps_done => break outcome,
                _ = renew.tick() => {
                    match self.store.renew_lease(&self.instance, &self.holder, self.lease_ttl) {
                        Ok(true) => renewed_at = Instant::now(),
                        Ok(false) => return Err(RuntimeError::LeaseLost(self.instance.clone())),
                        // Past the ttl another initializer may already hold the lease.
                        Err(e) if renewed_at.elapsed() >= self.lease_ttl => {
                            warn!(instance = %self.instance, error = %e, "lease not renewed within its ttl");
                            return Err(RuntimeError::LeaseLost(self.instance.clone()));
                        }
                        Err(e) => warn!(instance = %self.instance, error = %e, "lease renewal failed"),
                    }
                }
            }
        };

        if outcome == InitOutcome::Succeeded {
            self.store
                .set(&MarkerRecord::new(&self.instance, &self.holder))?;
            info!(instance = %self.instance, "initialization marker written");
        }
        Ok(outcome)
    }

    /// Wait for the lease. `None` means the marker appeared while waiting.
    async fn acquire(&self, cancel: &CancellationToken) -> Result<Option<LeaseGuard>> {
        let started = Instant::now();
        let deadline = started + self.lock_timeout;
        loop {
            if self
                .store
                .try_acquire_lease(&self.instance, &self.holder, self.lease_ttl)?
            {
                debug!(instance = %self.instance, holder = %self.holder, "init lease acquired");
                return Ok(Some(LeaseGuard {
                    store: Arc::clone(&self.store),
                    instance: self.instance.clone(),
                    holder: self.holder.clone(),
                }));
            }
            if self.store.is_set(&self.instance)? {
                return Ok(None);
            }
            if Instant::now() >= deadline {
                return Err(RuntimeError::LeaseTimeout {
                    instance: self.instance.clone(),
                    waited: started.elapsed(),
                });
            }
            let holder = self.store.lease(&self.instance)?.map(|l| l.holder);
            debug!(instance = %self.instance, holder = ?holder, "init lease busy; waiting");
            tokio::select! {
                _ = cancel.cancelled() => return Err(RuntimeError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval.min(deadline.saturating_duration_since(Instant::now()))) => {}
            }
        }
    }

    async fn run_steps(
        &self,
        steps: &[Arc<dyn InitStep>],
        cancel: &CancellationToken,
    ) -> InitOutcome {
        for step in steps {
            if cancel.is_cancelled() {
                return InitOutcome::Failed {
                    step: step.name().to_string(),
                    reason: "interrupted".into(),
                };
            }
            info!(instance = %self.instance, step = step.name(), "running bootstrap step");
            if let Err(reason) = step.run(cancel).await {
                warn!(instance = %self.instance, step = step.name(), reason = %reason, "bootstrap step failed");
                return InitOutcome::Failed {
                    step: step.name().to_string(),
                    reason,
                };
            }
        }
        InitOutcome::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_core::marker::{Lease, MemoryMarkerStore};
    use stagehand_core::StagehandError;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Counts invocations; fails while `fail` is set.
    struct CountingStep {
        name: &'static str,
        runs: AtomicU32,
        fail: std::sync::atomic::AtomicBool,
    }

    impl CountingStep {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                runs: AtomicU32::new(0),
                fail: false.into(),
            })
        }

        fn runs(&self) -> u32 {
            self.runs.load(Ordering::SeqCst)
        }
    }

    impl InitStep for CountingStep {
        fn name(&self) -> &str {
            self.name
        }

        fn run<'a>(
            &'a self,
            _cancel: &'a CancellationToken,
        ) -> BoxFuture<'a, std::result::Result<(), String>> {
            Box::pin(async move {
                self.runs.fetch_add(1, Ordering::SeqCst);
                if self.fail.load(Ordering::SeqCst) {
                    Err("connection reset".into())
                } else {
                    Ok(())
                }
            })
        }
    }

    fn initializer(store: Arc<dyn MarkerStore>) -> OnceInitializer {
        OnceInitializer::new(store, "prod", &MarkerConfig::default())
            .with_poll_interval(Duration::from_millis(10))
    }

    fn as_steps(steps: &[Arc<CountingStep>]) -> Vec<Arc<dyn InitStep>> {
        steps
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn InitStep>)
            .collect()
    }

    #[tokio::test]
    async fn second_run_is_skipped() {
        let store: Arc<dyn MarkerStore> = Arc::new(MemoryMarkerStore::new());
        let migrate = CountingStep::new("migrate");
        let admin = CountingStep::new("create-admin");
        let steps = as_steps(&[migrate.clone(), admin.clone()]);
        let cancel = CancellationToken::new();

        let init = initializer(store.clone());
        assert_eq!(init.run_if_needed(&steps, &cancel).await.unwrap(), InitOutcome::Succeeded);
        assert_eq!(init.run_if_needed(&steps, &cancel).await.unwrap(), InitOutcome::Skipped);

        assert_eq!((migrate.runs(), admin.runs()), (1, 1));
        assert!(store.is_set("prod").unwrap());
        assert!(store.lease("prod").unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_step_leaves_marker_unset_and_reruns_everything() {
        let store: Arc<dyn MarkerStore> = Arc::new(MemoryMarkerStore::new());
        let migrate = CountingStep::new("migrate");
        let admin = CountingStep::new("create-admin");
        admin.fail.store(true, Ordering::SeqCst);
        let steps = as_steps(&[migrate.clone(), admin.clone()]);
        let cancel = CancellationToken::new();
        let init = initializer(store.clone());

        let out = init.run_if_needed(&steps, &cancel).await.unwrap();
        assert_eq!(
            out,
            InitOutcome::Failed {
                step: "create-admin".into(),
                reason: "connection reset".into()
            }
        );
        assert!(!store.is_set("prod").unwrap());
        assert!(store.lease("prod").unwrap().is_none());

        admin.fail.store(false, Ordering::SeqCst);
        let out = init.run_if_needed(&steps, &cancel).await.unwrap();
        assert_eq!(out, InitOutcome::Succeeded);
        assert_eq!((migrate.runs(), admin.runs()), (2, 2));
    }

    #[tokio::test]
    async fn first_step_failure_stops_the_procedure() {
        let store: Arc<dyn MarkerStore> = Arc::new(MemoryMarkerStore::new());
        let migrate = CountingStep::new("migrate");
        migrate.fail.store(true, Ordering::SeqCst);
        let admin = CountingStep::new("create-admin");
        let steps = as_steps(&[migrate.clone(), admin.clone()]);

        let out = initializer(store)
            .run_if_needed(&steps, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(out, InitOutcome::Failed { ref step, .. } if step == "migrate"));
        assert_eq!(admin.runs(), 0);
    }

    #[tokio::test]
    async fn cancelled_before_steps_is_interrupted() {
        let store: Arc<dyn MarkerStore> = Arc::new(MemoryMarkerStore::new());
        let migrate = CountingStep::new("migrate");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = initializer(store.clone())
            .run_if_needed(&as_steps(&[migrate.clone()]), &cancel)
            .await
            .unwrap();
        assert_eq!(
            out,
            InitOutcome::Failed {
                step: "migrate".into(),
                reason: "interrupted".into()
            }
        );
        assert_eq!(migrate.runs(), 0);
        assert!(!store.is_set("prod").unwrap());
    }

    #[tokio::test]
    async fn busy_lease_times_out() {
        let store: Arc<dyn MarkerStore> = Arc::new(MemoryMarkerStore::new());
        store
            .try_acquire_lease("prod", "someone-else", Duration::from_secs(600))
            .unwrap();
        let marker = MarkerConfig {
            lock_timeout: Duration::from_millis(50),
            ..MarkerConfig::default()
        };
        let init = OnceInitializer::new(store, "prod", &marker)
            .with_poll_interval(Duration::from_millis(10));
        let err = init
            .run_if_needed(&[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::LeaseTimeout { .. }));
    }

    #[tokio::test]
    async fn marker_written_by_lease_holder_is_honoured() {
        let store: Arc<dyn MarkerStore> = Arc::new(MemoryMarkerStore::new());
        store
            .try_acquire_lease("prod", "other", Duration::from_secs(600))
            .unwrap();
        let migrate = CountingStep::new("migrate");
        let steps = as_steps(&[migrate.clone()]);
        let init = initializer(store.clone());

        let finisher = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                store.set(&MarkerRecord::new("prod", "other")).unwrap();
                store.release_lease("prod", "other").unwrap();
            })
        };
        let out = init
            .run_if_needed(&steps, &CancellationToken::new())
            .await
            .unwrap();
        finisher.await.unwrap();
        assert_eq!(out, InitOutcome::Skipped);
        assert_eq!(migrate.runs(), 0);
    }

    #[tokio::test]
    async fn expired_lease_of_crashed_holder_is_taken_over() {
        let store: Arc<dyn MarkerStore> = Arc::new(MemoryMarkerStore::new());
        store
            .try_acquire_lease("prod", "crashed", Duration::ZERO)
            .unwrap();
        let migrate = CountingStep::new("migrate");
        let out = initializer(store)
            .run_if_needed(&as_steps(&[migrate.clone()]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, InitOutcome::Succeeded);
    }

    #[tokio::test]
    async fn command_steps_run_in_order_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("steps.log");
        let env = BTreeMap::from([("STEP_LOG".to_string(), log.display().to_string())]);
        let cfg = |name: &str| InitStepConfig {
            name: name.to_string(),
            command: vec![
                "sh".into(),
                "-c".into(),
                format!("echo {name} >> \"$STEP_LOG\""),
            ],
            env: BTreeMap::new(),
            timeout: Some(Duration::from_secs(10)),
        };
        let steps: Vec<Arc<dyn InitStep>> = ["migrate", "create-admin"]
            .iter()
            .map(|n| {
                Arc::new(CommandStep::from_config("airflow-init", &cfg(n), &env, None))
                    as Arc<dyn InitStep>
            })
            .collect();

        let store: Arc<dyn MarkerStore> = Arc::new(MemoryMarkerStore::new());
        let init = initializer(store);
        let cancel = CancellationToken::new();
        assert_eq!(init.run_if_needed(&steps, &cancel).await.unwrap(), InitOutcome::Succeeded);
        assert_eq!(init.run_if_needed(&steps, &cancel).await.unwrap(), InitOutcome::Skipped);

        let contents = std::fs::read_to_string(&log).unwrap();
        assert_eq!(contents.lines().collect::<Vec<_>>(), vec!["migrate", "create-admin"]);
    }

    #[tokio::test]
    async fn command_step_reports_exit_code() {
        let cfg = InitStepConfig {
            name: "migrate".into(),
            command: vec!["sh".into(), "-c".into(), "exit 4".into()],
            env: BTreeMap::new(),
            timeout: None,
        };
        let step = CommandStep::from_config("airflow-init", &cfg, &BTreeMap::new(), None);
        let err = step.run(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(err, "exit code 4");
    }

    /// Memory store whose renewals always fail.
    struct UnreachableOnRenew(MemoryMarkerStore);

    impl MarkerStore for UnreachableOnRenew {
        fn get(&self, instance: &str) -> stagehand_core::Result<Option<MarkerRecord>> {
            self.0.get(instance)
        }

        fn set(&self, record: &MarkerRecord) -> stagehand_core::Result<()> {
            self.0.set(record)
        }

        fn clear(&self, instance: &str) -> stagehand_core::Result<bool> {
            self.0.clear(instance)
        }

        fn try_acquire_lease(
            &self,
            instance: &str,
            holder: &str,
            ttl: Duration,
        ) -> stagehand_core::Result<bool> {
            self.0.try_acquire_lease(instance, holder, ttl)
        }

        fn renew_lease(&self, _: &str, _: &str, _: Duration) -> stagehand_core::Result<bool> {
            Err(StagehandError::Marker("store unreachable".into()))
        }

        fn release_lease(&self, instance: &str, holder: &str) -> stagehand_core::Result<()> {
            self.0.release_lease(instance, holder)
        }

        fn lease(&self, instance: &str) -> stagehand_core::Result<Option<Lease>> {
            self.0.lease(instance)
        }

        fn kind(&self) -> &'static str {
            "memory"
        }
    }

    struct SlowStep;

    impl InitStep for SlowStep {
        fn name(&self) -> &str {
            "migrate"
        }

        fn run<'a>(
            &'a self,
            _cancel: &'a CancellationToken,
        ) -> BoxFuture<'a, std::result::Result<(), String>> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn lease_is_lost_after_ttl_without_renewal() {
        let store: Arc<dyn MarkerStore> = Arc::new(UnreachableOnRenew(MemoryMarkerStore::new()));
        let marker = MarkerConfig {
            lease_ttl: Duration::from_millis(300),
            ..MarkerConfig::default()
        };
        let init = OnceInitializer::new(store.clone(), "prod", &marker);
        let steps: Vec<Arc<dyn InitStep>> = vec![Arc::new(SlowStep)];

        let err = tokio::time::timeout(
            Duration::from_secs(10),
            init.run_if_needed(&steps, &CancellationToken::new()),
        )
        .await
        .expect("initializer kept running without a lease")
        .unwrap_err();
        assert!(matches!(err, RuntimeError::LeaseLost(ref i) if i == "prod"));
        assert!(!store.is_set("prod").unwrap());
    }
}
