//! Server containers managed through `docker compose`

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use rtbench_common::SubjectId;

use super::{ContainerBackend, ServerSpec, ServerSubject};
use crate::error::{HarnessError, HarnessResult};
use crate::monitor::{DockerStatsProbe, UsageProbe};

/// Starts server stacks with `docker compose up` and watches their
/// combined output for the readiness marker
pub struct ComposeBackend {
    docker: String,
    docker_api: String,
    stop_grace: Duration,
    running: Mutex<HashMap<String, Child>>,
}

impl ComposeBackend {
    pub fn new(docker_api: impl Into<String>, stop_grace: Duration) -> Self {
        Self {
            docker: "docker".to_string(),
            docker_api: docker_api.into(),
            stop_grace,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Use a different container CLI (e.g. `podman`)
    pub fn with_cli(mut self, cli: impl Into<String>) -> Self {
        self.docker = cli.into();
        self
    }

    fn compose(&self, project: &str) -> Command {
        let mut cmd = Command::new(&self.docker);
        cmd.args(["compose", "-p", project]);
        cmd
    }

    async fn container_id(&self, project: &str, service: &str) -> String {
        let fallback = format!("{}-{}-1", project, service);
        let output = self
            .compose(project)
            .args(["ps", "-q", service])
            .stderr(Stdio::null())
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => {
                let id = String::from_utf8_lossy(&out.stdout).trim().to_string();
                if id.is_empty() {
                    fallback
                } else {
                    id
                }
            }
            _ => fallback,
        }
    }

    async fn compose_down(&self, project: &str) -> HarnessResult<()> {
        let grace = self.stop_grace.as_secs().max(1).to_string();
        let output = self
            .compose(project)
            .args(["down", "--timeout", &grace])
            .output()
            .await?;
        if !output.status.success() {
            return Err(HarnessError::Supervisor(format!(
                "compose down for {} failed: {}",
                project,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn terminate(&self, mut child: Child) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id() {
                if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                    && tokio::time::timeout(self.stop_grace, child.wait()).await.is_ok()
                {
                    return;
                }
            }
        }

        let _ = child.kill().await;
    }
}

fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
}

#[async_trait]
impl ContainerBackend for ComposeBackend {
    async fn start(&self, spec: &ServerSpec, timeout: Duration) -> HarnessResult<ServerSubject> {
        let mut cmd = Command::new(&self.docker);
        cmd.arg("compose")
            .arg("-f")
            .arg(&spec.compose_file)
            .args(["-p", &spec.project, "up", "--force-recreate"])
            .envs(&spec.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            HarnessError::Supervisor(format!(
                "failed to spawn {} compose for {}: {}",
                self.docker,
                spec.compose_file.display(),
                e
            ))
        })?;

        // Combined output of the stack
        let (tx, mut output) = mpsc::channel::<String>(1024);
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx);
        }

        let marker = spec.readiness_marker.clone();
        let ready = tokio::time::timeout(timeout, async {
            while let Some(line) = output.recv().await {
                trace!(project = %spec.project, "{}", line);
                if line.contains(&marker) {
                    return true;
                }
            }
            false
        })
        .await;

        match ready {
            Ok(true) => {}
            Ok(false) => {
                self.terminate(child).await;
                if let Err(e) = self.compose_down(&spec.project).await {
                    warn!(error = %e, "Cleanup after failed start did not complete");
                }
                return Err(HarnessError::Supervisor(format!(
                    "server stack {} exited before printing '{}'",
                    spec.project, spec.readiness_marker
                )));
            }
            Err(_) => {
                self.terminate(child).await;
                if let Err(e) = self.compose_down(&spec.project).await {
                    warn!(error = %e, "Cleanup after provisioning timeout did not complete");
                }
                return Err(HarnessError::ProvisionTimeout {
                    marker: spec.readiness_marker.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        }

        // Keep the pipes drained for the rest of the run.
        let project = spec.project.clone();
        tokio::spawn(async move {
            while let Some(line) = output.recv().await {
                debug!(project = %project, "{}", line);
            }
        });

        let container = self.container_id(&spec.project, &spec.service).await;
        self.running.lock().insert(spec.project.clone(), child);

        Ok(ServerSubject {
            id: SubjectId::server(),
            protocol: spec.protocol.clone(),
            project: spec.project.clone(),
            container,
            readiness_marker: spec.readiness_marker.clone(),
            endpoint: spec.endpoint.clone(),
        })
    }

    async fn stop(&self, subject: &ServerSubject) -> HarnessResult<()> {
        let child = self.running.lock().remove(&subject.project);
        let Some(child) = child else {
            debug!(project = %subject.project, "Server stack already stopped");
            return Ok(());
        };

        info!(project = %subject.project, "Stopping server stack");
        let down = self.compose_down(&subject.project).await;
        self.terminate(child).await;
        down
    }

    fn probe(&self, subject: &ServerSubject) -> HarnessResult<Box<dyn UsageProbe>> {
        Ok(Box::new(DockerStatsProbe::new(
            &self.docker_api,
            &subject.container,
        )?))
    }
}
