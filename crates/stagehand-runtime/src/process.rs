use std::collections::BTreeMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{Result, RuntimeError};

// ─── UnitProcess ──────────────────────────────────────────────────────────

/// A running unit or init-step process. Stdout and stderr are forwarded
/// line by line as tracing events tagged with the unit name.
pub struct UnitProcess {
    unit: String,
    child: Child,
    started: Instant,
    forwarders: Vec<JoinHandle<()>>,
}

/// What to launch, with the environment already merged.
#[derive(Debug, Clone, Copy)]
pub struct LaunchSpec<'a> {
    pub unit: &'a str,
    pub argv: &'a [String],
    pub env: &'a BTreeMap<String, String>,
    pub working_dir: Option<&'a Path>,
}

impl UnitProcess {
    pub fn spawn(spec: LaunchSpec<'_>) -> Result<Self> {
        let (program, args) = spec
            .argv
            .split_first()
            .ok_or_else(|| RuntimeError::EmptyCommand(spec.unit.to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = spec.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| RuntimeError::Spawn {
            unit: spec.unit.to_string(),
            program: program.clone(),
            source,
        })?;
        info!(unit = spec.unit, pid = child.id(), program = %program, "process started");

        let mut forwarders = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            forwarders.push(forward_lines(spec.unit.to_string(), "stdout", out));
        }
        if let Some(err) = child.stderr.take() {
            forwarders.push(forward_lines(spec.unit.to_string(), "stderr", err));
        }

        Ok(Self {
            unit: spec.unit.to_string(),
            child,
            started: Instant::now(),
            forwarders,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Wait for exit, then drain the output forwarders.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.wait().await?;
        for handle in self.forwarders.drain(..) {
            let _ = handle.await;
        }
        Ok(status)
    }

    /// Ask the process to terminate, then kill it if it outlives `grace`.
    pub async fn stop(&mut self, grace: Duration) -> Result<ExitStatus> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(status);
        }
        terminate(&mut self.child);
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(unit = %self.unit, %status, "process exited after terminate");
                Ok(status)
            }
            Err(_) => {
                warn!(unit = %self.unit, grace = ?grace, "process ignored terminate; killing");
                self.child.kill().await?;
                Ok(self.child.wait().await?)
            }
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!(pid, error = %e, "SIGTERM failed");
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

fn forward_lines<R>(unit: String, stream: &'static str, reader: R) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(target: "stagehand::output", unit = %unit, stream, "{line}");
        }
    })
}

/// Render an exit status for events and logs.
pub fn describe_exit(status: &ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {code}"),
        None => format!("terminated ({status})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn spec<'a>(argv: &'a [String], env: &'a BTreeMap<String, String>) -> LaunchSpec<'a> {
        LaunchSpec {
            unit: "test",
            argv,
            env,
            working_dir: None,
        }
    }

    #[tokio::test]
    async fn wait_reports_exit_status() {
        let env = BTreeMap::new();
        let cmd = argv(&["sh", "-c", "echo hello; exit 3"]);
        let mut p = UnitProcess::spawn(spec(&cmd, &env)).unwrap();
        let status = p.wait().await.unwrap();
        assert_eq!(status.code(), Some(3));
        assert_eq!(describe_exit(&status), "exit code 3");
    }

    #[tokio::test]
    async fn env_and_working_dir_are_applied() {
        let dir = tempfile::TempDir::new().unwrap();
        let env = BTreeMap::from([("UNIT_GREETING".to_string(), "hi".to_string())]);
        let cmd = argv(&["sh", "-c", "echo \"$UNIT_GREETING\" > out.txt"]);
        let mut p = UnitProcess::spawn(LaunchSpec {
            working_dir: Some(dir.path()),
            ..spec(&cmd, &env)
        })
        .unwrap();
        assert!(p.wait().await.unwrap().success());
        let out = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(out.trim(), "hi");
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let env = BTreeMap::new();
        let cmd: Vec<String> = vec![];
        assert!(matches!(
            UnitProcess::spawn(spec(&cmd, &env)),
            Err(RuntimeError::EmptyCommand(_))
        ));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let env = BTreeMap::new();
        let cmd = argv(&["definitely-not-a-real-program-7731"]);
        assert!(matches!(
            UnitProcess::spawn(spec(&cmd, &env)),
            Err(RuntimeError::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn stop_terminates_long_running_process() {
        let env = BTreeMap::new();
        let cmd = argv(&["sleep", "30"]);
        let mut p = UnitProcess::spawn(spec(&cmd, &env)).unwrap();
        assert!(p.pid().is_some());
        let status = p.stop(Duration::from_secs(5)).await.unwrap();
        assert!(!status.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_kills_after_grace() {
        let env = BTreeMap::new();
        let cmd = argv(&["sh", "-c", "trap '' TERM; sleep 30"]);
        let mut p = UnitProcess::spawn(spec(&cmd, &env)).unwrap();
        // Give the shell time to install its trap.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let started = std::time::Instant::now();
        let status = p.stop(Duration::from_millis(300)).await.unwrap();
        assert!(!status.success());
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
