//! Process supervision - lifecycle of server containers and browser clients
//!
//! The supervisor owns every subject it starts for one run and guarantees
//! release: `stop_all` tears each started subject down exactly once, no
//! matter how many times it is called or how many teardowns fail.

mod browser;
mod container;

pub use browser::{build_launcher_script, PlaywrightBackend};
pub use container::ComposeBackend;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{info, warn};

use rtbench_common::{ClientId, SubjectId};

use crate::adapter::ClientScript;
use crate::bridge::BridgeSender;
use crate::error::HarnessResult;
use crate::monitor::UsageProbe;

/// What an adapter asks the supervisor to start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub protocol: String,
    pub compose_file: PathBuf,
    pub project: String,
    pub service: String,
    pub readiness_marker: String,
    pub endpoint: String,
    pub env: BTreeMap<String, String>,
}

/// A running server container group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSubject {
    pub id: SubjectId,
    pub protocol: String,
    pub project: String,
    /// Container name or id, as understood by the stats API
    pub container: String,
    pub readiness_marker: String,
    pub endpoint: String,
}

/// A running browser process hosting up to `per_browser_cap` clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserSubject {
    pub id: SubjectId,
    pub index: usize,
    pub pid: Option<u32>,
    pub clients: Vec<ClientId>,
}

/// One client: a page inside a browser process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSubject {
    pub client_id: ClientId,
    pub browser: SubjectId,
    pub page: usize,
    pub pid: Option<u32>,
}

/// Everything a browser backend needs to host one slice of clients
#[derive(Clone)]
pub struct BrowserLaunch {
    pub index: usize,
    pub clients: Vec<ClientId>,
    pub endpoint: String,
    pub messages: u32,
    pub script: Arc<ClientScript>,
    pub events: BridgeSender,
}

#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Start the stack and resolve once the readiness marker was seen
    async fn start(&self, spec: &ServerSpec, timeout: Duration) -> HarnessResult<ServerSubject>;

    async fn stop(&self, subject: &ServerSubject) -> HarnessResult<()>;

    fn probe(&self, subject: &ServerSubject) -> HarnessResult<Box<dyn UsageProbe>>;
}

#[async_trait]
pub trait BrowserBackend: Send + Sync {
    /// Start one browser process, open one page per client and start
    /// relaying its events into `launch.events`
    async fn launch(&self, launch: BrowserLaunch) -> HarnessResult<BrowserSubject>;

    async fn stop(&self, subject: &BrowserSubject) -> HarnessResult<()>;

    fn probe(&self, subject: &BrowserSubject) -> HarnessResult<Box<dyn UsageProbe>>;
}

/// Split `clients` into `ceil(clients / cap)` groups of at most `cap`
pub fn partition_clients(clients: u32, cap: u32) -> Vec<Vec<ClientId>> {
    let cap = cap.max(1);
    (0..clients)
        .collect::<Vec<_>>()
        .chunks(cap as usize)
        .map(|chunk| chunk.to_vec())
        .collect()
}

#[derive(Debug)]
enum Subject {
    Server(ServerSubject),
    Browser(BrowserSubject),
}

impl Subject {
    fn id(&self) -> &SubjectId {
        match self {
            Subject::Server(s) => &s.id,
            Subject::Browser(b) => &b.id,
        }
    }
}

#[derive(Debug)]
struct Managed {
    subject: Subject,
    released: bool,
}

/// Outcome of a teardown pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub stopped: usize,
    pub failed: usize,
}

/// Owns the subjects of one run
pub struct Supervisor {
    containers: Arc<dyn ContainerBackend>,
    browsers: Arc<dyn BrowserBackend>,
    per_browser_cap: u32,
    subjects: Vec<Managed>,
}

impl Supervisor {
    pub fn new(
        containers: Arc<dyn ContainerBackend>,
        browsers: Arc<dyn BrowserBackend>,
        per_browser_cap: u32,
    ) -> Self {
        Self {
            containers,
            browsers,
            per_browser_cap: per_browser_cap.max(1),
            subjects: Vec::new(),
        }
    }

    /// Start the server stack and block until it reports ready
    pub async fn start_container_subject(
        &mut self,
        spec: &ServerSpec,
        timeout: Duration,
    ) -> HarnessResult<ServerSubject> {
        info!(protocol = %spec.protocol, project = %spec.project, "Starting server subject");
        let server = self.containers.start(spec, timeout).await?;
        info!(container = %server.container, endpoint = %server.endpoint, "Server is ready");

        self.subjects.push(Managed {
            subject: Subject::Server(server.clone()),
            released: false,
        });
        Ok(server)
    }

    /// Start `ceil(clients / cap)` browsers with at most `cap` pages each.
    ///
    /// Browsers that did start are registered even when another launch
    /// fails, so `stop_all` still releases them.
    pub async fn start_browser_subjects(
        &mut self,
        clients: u32,
        endpoint: &str,
        messages: u32,
        script: Arc<ClientScript>,
        events: BridgeSender,
    ) -> HarnessResult<Vec<ClientSubject>> {
        let groups = partition_clients(clients, self.per_browser_cap);
        info!(
            clients,
            browsers = groups.len(),
            cap = self.per_browser_cap,
            "Starting browser subjects"
        );

        let launches = groups.into_iter().enumerate().map(|(index, clients)| {
            let backend = Arc::clone(&self.browsers);
            let launch = BrowserLaunch {
                index,
                clients,
                endpoint: endpoint.to_string(),
                messages,
                script: Arc::clone(&script),
                events: events.clone(),
            };
            async move { backend.launch(launch).await }
        });
        let results = join_all(launches).await;
        drop(events);

        let mut first_error = None;
        let mut client_subjects = Vec::new();
        for result in results {
            match result {
                Ok(browser) => {
                    for (page, client_id) in browser.clients.iter().enumerate() {
                        client_subjects.push(ClientSubject {
                            client_id: *client_id,
                            browser: browser.id.clone(),
                            page,
                            pid: browser.pid,
                        });
                    }
                    self.subjects.push(Managed {
                        subject: Subject::Browser(browser),
                        released: false,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Browser launch failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(client_subjects),
        }
    }

    /// Started browser subjects, in launch order
    pub fn browsers(&self) -> Vec<BrowserSubject> {
        self.subjects
            .iter()
            .filter_map(|m| match &m.subject {
                Subject::Browser(b) => Some(b.clone()),
                Subject::Server(_) => None,
            })
            .collect()
    }

    pub fn container_probe(&self, server: &ServerSubject) -> HarnessResult<Box<dyn UsageProbe>> {
        self.containers.probe(server)
    }

    pub fn browser_probe(&self, browser: &BrowserSubject) -> HarnessResult<Box<dyn UsageProbe>> {
        self.browsers.probe(browser)
    }

    /// Subjects started and not yet released
    pub fn active(&self) -> usize {
        self.subjects.iter().filter(|m| !m.released).count()
    }

    /// Tear down every unreleased subject, browsers before the server.
    /// Failures are logged and do not stop the remaining teardowns.
    pub async fn stop_all(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();

        let mut order: Vec<usize> = (0..self.subjects.len()).collect();
        order.sort_by_key(|i| matches!(self.subjects[*i].subject, Subject::Server(_)));

        for i in order {
            let managed = &mut self.subjects[i];
            if managed.released {
                continue;
            }
            // Released before the attempt: a failed stop is not retried.
            managed.released = true;

            let result = match &managed.subject {
                Subject::Server(server) => self.containers.stop(server).await,
                Subject::Browser(browser) => self.browsers.stop(browser).await,
            };
            match result {
                Ok(()) => {
                    info!(subject = %managed.subject.id(), "Subject stopped");
                    report.stopped += 1;
                }
                Err(e) => {
                    warn!(subject = %managed.subject.id(), error = %e, "Subject teardown failed");
                    report.failed += 1;
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_twelve_by_six() {
        let groups = partition_clients(12, 6);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.len() <= 6));
        assert_eq!(groups[0], vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(groups[1], vec![6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn test_partition_uneven() {
        let groups = partition_clients(100, 6);
        assert_eq!(groups.len(), 17);
        assert_eq!(groups.last().map(Vec::len), Some(4));
        let total: usize = groups.iter().map(Vec::len).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_partition_edge_cases() {
        assert!(partition_clients(0, 6).is_empty());
        assert_eq!(partition_clients(3, 0).len(), 3);
        assert_eq!(partition_clients(1, 6), vec![vec![0]]);
    }
}
