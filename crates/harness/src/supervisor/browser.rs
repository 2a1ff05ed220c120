//! Browser clients hosted by Playwright
//!
//! Each browser process is driven by a generated Node.js launcher. The
//! launcher opens one page per client, injects the bridge prelude and the
//! adapter's client script, and prints every bridge event as a JSON line on
//! stdout.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use rtbench_common::{ClientId, SubjectId};

use super::{BrowserBackend, BrowserLaunch, BrowserSubject};
use crate::adapter::ClientScript;
use crate::bridge::relay_lines;
use crate::config::BrowserConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::monitor::{ProcessProbe, UsageProbe};

/// Console prefix that marks bridge events inside the page
const BRIDGE_PREFIX: &str = "rtbench:";

struct BrowserProcess {
    child: Child,
    // Keeps the launcher script alive while the process runs
    _script_dir: tempfile::TempDir,
}

/// Launches one Node/Playwright process per browser subject
pub struct PlaywrightBackend {
    config: BrowserConfig,
    stop_grace: Duration,
    running: Mutex<HashMap<SubjectId, BrowserProcess>>,
}

impl PlaywrightBackend {
    pub fn new(config: BrowserConfig, stop_grace: Duration) -> Self {
        Self {
            config,
            stop_grace,
            running: Mutex::new(HashMap::new()),
        }
    }

    fn script_dir(&self) -> HarnessResult<tempfile::TempDir> {
        let dir = match &self.config.work_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                tempfile::Builder::new().prefix("rtbench-").tempdir_in(dir)?
            }
            None => tempfile::Builder::new().prefix("rtbench-").tempdir()?,
        };
        Ok(dir)
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

#[async_trait]
impl BrowserBackend for PlaywrightBackend {
    async fn launch(&self, launch: BrowserLaunch) -> HarnessResult<BrowserSubject> {
        let id = SubjectId::browser(launch.index);
        let script = build_launcher_script(
            &self.config,
            &launch.clients,
            &launch.endpoint,
            launch.messages,
            &launch.script,
        )?;

        let script_dir = self.script_dir()?;
        let script_path: PathBuf = script_dir.path().join(format!("{}.js", id));
        tokio::fs::write(&script_path, script).await?;

        debug!(browser = %id, script = %script_path.display(), "Launching browser");

        let mut child = Command::new(&self.config.node_binary)
            .arg(&script_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                HarnessError::Supervisor(format!(
                    "failed to spawn {} for {}: {}",
                    self.config.node_binary, id, e
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarnessError::Internal("launcher stdout not captured".into()))?;
        tokio::spawn(relay_lines(
            launch.index,
            launch.clients.clone(),
            BufReader::new(stdout),
            launch.events,
        ));

        if let Some(stderr) = child.stderr.take() {
            let browser = id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(browser = %browser, "{}", line);
                }
            });
        }

        let pid = child.id();
        info!(browser = %id, pid = ?pid, clients = launch.clients.len(), "Browser launched");

        self.running.lock().insert(
            id.clone(),
            BrowserProcess {
                child,
                _script_dir: script_dir,
            },
        );

        Ok(BrowserSubject {
            id,
            index: launch.index,
            pid,
            clients: launch.clients,
        })
    }

    async fn stop(&self, subject: &BrowserSubject) -> HarnessResult<()> {
        let process = self.running.lock().remove(&subject.id);
        let Some(process) = process else {
            debug!(browser = %subject.id, "Browser already stopped");
            return Ok(());
        };

        info!(browser = %subject.id, "Stopping browser");
        self.terminate(process.child).await;
        Ok(())
    }

    fn probe(&self, subject: &BrowserSubject) -> HarnessResult<Box<dyn UsageProbe>> {
        let pid = subject.pid.ok_or_else(|| {
            HarnessError::Supervisor(format!("{} has no process id", subject.id))
        })?;
        Ok(Box::new(ProcessProbe::new(pid)))
    }
}

/// Build the Node.js launcher hosting `clients` in one browser
pub fn build_launcher_script(
    config: &BrowserConfig,
    clients: &[ClientId],
    endpoint: &str,
    messages: u32,
    script: &ClientScript,
) -> HarnessResult<String> {
    let page_url = if script.page_url.starts_with("http") {
        script.page_url.clone()
    } else {
        format!("{}{}", endpoint.trim_end_matches('/'), script.page_url)
    };

    Ok(format!(
        r#"
const {{ {browser} }} = require('playwright');

const PREFIX = {prefix};
const clients = {clients};
const pageUrl = {page_url};
const dependencies = {dependencies};
const clientSource = {client_source};
const endpoint = {endpoint};
const messages = {messages};

function emit(event) {{
  process.stdout.write(JSON.stringify(event) + '\n');
}}

function prelude(client) {{
  return `window.rtbench = (() => {{
    const client = ${{client}};
    let done = false;
    const send = (event) => console.log(${{JSON.stringify(PREFIX)}} + JSON.stringify(Object.assign({{ client }}, event)));
    return {{
      clientId: client,
      endpoint: ${{JSON.stringify(endpoint)}},
      messages: ${{messages}},
      get done() {{ return done; }},
      connected: () => send({{ event: 'connected' }}),
      message: (seq) => {{
        send({{ event: 'message', seq, at: Math.round(performance.timeOrigin + performance.now()) }});
        if (seq === ${{messages}} && !done) {{
          done = true;
          send({{ event: 'complete' }});
        }}
      }},
      error: (message) => send({{ event: 'error', message: String(message) }}),
      closed: () => {{ if (!done) send({{ event: 'closed' }}); }},
    }};
  }})();`;
}}

let browser;

async function shutdown() {{
  if (browser) {{
    await browser.close().catch(() => {{}});
  }}
  process.exit(0);
}}

process.on('SIGTERM', shutdown);
process.on('SIGINT', shutdown);

(async () => {{
  browser = await {browser}.launch({{ headless: {headless} }});
  const proc = browser.process ? browser.process() : null;
  emit({{ event: 'launched', pid: proc ? proc.pid : process.pid }});

  const context = await browser.newContext();
  for (const client of clients) {{
    const page = await context.newPage();
    page.on('console', (msg) => {{
      const text = msg.text();
      if (text.startsWith(PREFIX)) {{
        process.stdout.write(text.slice(PREFIX.length) + '\n');
      }}
    }});
    page.on('pageerror', (error) => emit({{ event: 'error', client, message: error.message }}));
    page.on('crash', () => emit({{ event: 'closed', client }}));
    page.on('close', () => emit({{ event: 'closed', client }}));

    await page.goto(pageUrl);
    for (const url of dependencies) {{
      await page.addScriptTag({{ url }});
    }}
    await page.addScriptTag({{ content: prelude(client) }});
    await page.addScriptTag({{ content: clientSource }});
  }}
}})().catch((error) => {{
  emit({{ event: 'fatal', message: error.message }});
  process.exit(1);
}});
"#,
        browser = config.kind.as_str(),
        prefix = serde_json::to_string(BRIDGE_PREFIX)?,
        clients = serde_json::to_string(clients)?,
        page_url = serde_json::to_string(&page_url)?,
        dependencies = serde_json::to_string(&script.dependencies)?,
        client_source = serde_json::to_string(&script.source)?,
        endpoint = serde_json::to_string(endpoint)?,
        messages = messages,
        headless = config.headless,
    ))
}
