//! Health probes: exec, TCP and HTTP checks run on an interval.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use stagehand_core::config::{HealthCheckConfig, ProbeKind};
use stagehand_core::health::{CheckResult, HealthStatus, ProbeTracker};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::debug;

use crate::status::UnitWriter;

pub struct HealthProbe {
    config: HealthCheckConfig,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    client: reqwest::Client,
}

impl HealthProbe {
    pub fn new(config: HealthCheckConfig, env: BTreeMap<String, String>) -> Self {
        Self {
            config,
            env,
            working_dir: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    /// Run one check, bounded by the probe timeout. A timeout is a failure.
    pub async fn check(&self) -> CheckResult {
        match tokio::time::timeout(self.config.timeout, self.check_inner()).await {
            Ok(result) => result,
            Err(_) => CheckResult::Fail(format!(
                "{} check timed out after {:?}",
                self.config.probe.as_str(),
                self.config.timeout
            )),
        }
    }

    async fn check_inner(&self) -> CheckResult {
        match &self.config.probe {
            ProbeKind::Exec { command } => self.exec(command).await,
            ProbeKind::Tcp { address } => match TcpStream::connect(address.as_str()).await {
                Ok(_) => CheckResult::Pass,
                Err(e) => CheckResult::Fail(format!("connect {address}: {e}")),
            },
            ProbeKind::Http { url } => match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => CheckResult::Pass,
                Ok(resp) => CheckResult::Fail(format!("GET {url}: {}", resp.status())),
                Err(e) => CheckResult::Fail(format!("GET {url}: {e}")),
            },
        }
    }

    async fn exec(&self, argv: &[String]) -> CheckResult {
        let Some((program, args)) = argv.split_first() else {
            return CheckResult::Fail("empty probe command".into());
        };
        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        match cmd.status().await {
            Ok(status) if status.success() => CheckResult::Pass,
            Ok(status) => CheckResult::Fail(format!("{program} exited with {status}")),
            Err(e) => CheckResult::Fail(format!("{program}: {e}")),
        }
    }

    /// Check on every interval until dropped, publishing status changes
    /// through `writer`. The first check runs immediately. The end of the
    /// start period is published when it happens, not at the next check.
    pub async fn run(&self, writer: &UnitWriter) {
        let mut tracker = ProbeTracker::new(self.config.retries, self.config.start_period);
        writer.set_health(tracker.begin());
        let started = Instant::now();
        let start_period_ends = started + self.config.start_period;

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            if tracker.status() == HealthStatus::Starting {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = tokio::time::sleep_until(start_period_ends) => {
                        writer.set_health(tracker.tick(started.elapsed()));
                        continue;
                    }
                }
            } else {
                ticker.tick().await;
            }
            let result = self.check().await;
            if let CheckResult::Fail(reason) = &result {
                debug!(unit = writer.name(), reason = %reason, "health check failed");
            }
            writer.set_health(tracker.record(result, started.elapsed()));
        }
    }
}
