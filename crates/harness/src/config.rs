//! Harness configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rtbench_common::TestConfiguration;

use crate::error::{HarnessError, HarnessResult};

/// Harness-wide settings, shared by every configuration of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Capacity of the client bridge queue
    pub bridge_buffer: usize,

    /// Treat a drain timeout as a failed run instead of an incomplete one
    pub fail_on_incomplete: bool,

    /// Container CLI that provides `compose` (e.g. `podman`)
    pub container_cli: String,

    /// Phase timeouts
    pub timeouts: TimeoutConfig,

    /// Browser client settings
    pub browser: BrowserConfig,

    /// Resource monitor settings
    pub monitor: MonitorConfig,

    /// Per-protocol server settings, keyed by protocol identifier
    pub protocols: BTreeMap<String, ProtocolSettings>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            bridge_buffer: 10_000,
            fail_on_incomplete: false,
            container_cli: "docker".to_string(),
            timeouts: TimeoutConfig::default(),
            browser: BrowserConfig::default(),
            monitor: MonitorConfig::default(),
            protocols: ProtocolSettings::defaults(),
        }
    }
}

/// Phase timeouts in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub provision_ms: u64,
    pub connect_ms: u64,
    pub drain_ms: u64,
    /// Grace period between SIGTERM and a forced kill
    pub stop_grace_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            provision_ms: 60_000,
            connect_ms: 30_000,
            drain_ms: 120_000,
            stop_grace_ms: 2_000,
        }
    }
}

impl TimeoutConfig {
    pub fn provision(&self) -> Duration {
        Duration::from_millis(self.provision_ms)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Chromium => "chromium",
            BrowserKind::Firefox => "firefox",
            BrowserKind::Webkit => "webkit",
        }
    }
}

/// Browser client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Concurrent connections a single browser may hold to one origin
    pub per_browser_cap: u32,

    /// Upper bound on browser processes per run
    pub max_browsers: u32,

    /// Node.js binary used to drive Playwright
    pub node_binary: String,

    pub kind: BrowserKind,

    pub headless: bool,

    /// Directory for generated launcher scripts (temp dir when unset)
    pub work_dir: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            per_browser_cap: 6,
            max_browsers: 64,
            node_binary: "node".to_string(),
            kind: BrowserKind::Chromium,
            headless: true,
            work_dir: None,
        }
    }
}

/// Resource monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub sample_interval_ms: u64,

    /// Base URL of the container runtime API
    pub docker_api: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 500,
            docker_api: "http://127.0.0.1:2375".to_string(),
        }
    }
}

impl MonitorConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// How to start and reach the server of one protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSettings {
    /// docker compose file of the server stack
    pub compose_file: PathBuf,

    /// Compose project name
    pub project: String,

    /// Service whose container is monitored
    pub service: String,

    /// Output substring that signals the server is ready
    pub readiness_marker: String,

    /// Base URL of the server as seen from the host and the browsers
    pub endpoint: String,

    /// Path of the send trigger (or publish API) on `endpoint`
    pub trigger_path: String,

    /// Page the browser clients load before the client script runs
    pub client_page: String,
}

impl ProtocolSettings {
    fn new(protocol: &str, port: u16, trigger_path: &str) -> Self {
        Self {
            compose_file: PathBuf::from(format!("servers/{}/docker-compose.yml", protocol)),
            project: format!("rtbench-{}", protocol),
            service: "server".to_string(),
            readiness_marker: "listening".to_string(),
            endpoint: format!("http://127.0.0.1:{}", port),
            trigger_path: trigger_path.to_string(),
            client_page: "/".to_string(),
        }
    }

    /// Settings for every built-in adapter
    pub fn defaults() -> BTreeMap<String, Self> {
        let mut protocols = BTreeMap::new();
        protocols.insert("polling".to_string(), Self::new("polling", 8001, "/trigger"));
        protocols.insert("sse".to_string(), Self::new("sse", 8002, "/trigger"));
        protocols.insert("websocket".to_string(), Self::new("websocket", 8003, "/trigger"));
        protocols.insert("socketio".to_string(), Self::new("socketio", 8004, "/trigger"));
        protocols.insert("pubsub".to_string(), Self::new("pubsub", 8000, "/api/publish"));
        protocols
    }
}

impl HarnessConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> HarnessResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> HarnessResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| HarnessError::Configuration(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.browser.per_browser_cap == 0 {
            return Err(HarnessError::Configuration(
                "per-browser connection cap must be at least 1".into(),
            ));
        }
        if self.browser.max_browsers == 0 {
            return Err(HarnessError::Configuration(
                "max_browsers must be at least 1".into(),
            ));
        }
        let t = &self.timeouts;
        if t.provision_ms == 0 || t.connect_ms == 0 || t.drain_ms == 0 {
            return Err(HarnessError::Configuration(
                "provision, connect and drain timeouts must be non-zero".into(),
            ));
        }
        if self.monitor.sample_interval_ms == 0 {
            return Err(HarnessError::Configuration(
                "sample interval must be non-zero".into(),
            ));
        }
        if self.container_cli.trim().is_empty() {
            return Err(HarnessError::Configuration(
                "container_cli must not be empty".into(),
            ));
        }
        if self.bridge_buffer == 0 {
            return Err(HarnessError::Configuration(
                "bridge buffer must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Browser processes needed for `clients`
    pub fn browsers_for(&self, clients: u32) -> u32 {
        clients.div_ceil(self.browser.per_browser_cap.max(1))
    }

    /// Validate a test configuration against these harness settings
    pub fn validate_run(&self, config: &TestConfiguration) -> HarnessResult<()> {
        self.validate()?;
        config.validate()?;

        let browsers = self.browsers_for(config.clients);
        if browsers > self.browser.max_browsers {
            return Err(HarnessError::Configuration(format!(
                "{} clients need {} browsers at {} connections each, above the limit of {}",
                config.clients, browsers, self.browser.per_browser_cap, self.browser.max_browsers
            )));
        }
        Ok(())
    }
}
