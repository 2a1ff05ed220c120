//! Long-polling HTTP adapter

use async_trait::async_trait;

use rtbench_common::TestConfiguration;

use super::{
    server_spec, AdapterError, ClientScript, HttpTrigger, MessageSpec, ProtocolAdapter, SendAck,
    SendMode,
};
use crate::config::ProtocolSettings;
use crate::supervisor::{ServerSpec, ServerSubject};

// The poll request is dispatched before the client announces itself, so
// the server sees every client waiting once all are connected.
const CLIENT_SOURCE: &str = r#"
(async () => {
  const sleep = (ms) => new Promise((resolve) => setTimeout(resolve, ms));
  let after = 0;
  let announced = false;
  while (!rtbench.done) {
    const request = fetch(`${rtbench.endpoint}/poll?client=${rtbench.clientId}&after=${after}`, {
      cache: 'no-store',
    });
    if (!announced) {
      announced = true;
      rtbench.connected();
    }
    let response;
    try {
      response = await request;
    } catch (error) {
      rtbench.error(error);
      rtbench.closed();
      return;
    }
    if (response.status === 204) {
      continue;
    }
    if (!response.ok) {
      rtbench.error(`poll returned ${response.status}`);
      await sleep(100);
      continue;
    }
    const body = await response.json();
    for (const message of body.messages || []) {
      if (message.seq > after) {
        after = message.seq;
        rtbench.message(message.seq);
      }
    }
  }
})();
"#;

pub struct PollingAdapter {
    settings: ProtocolSettings,
    trigger: HttpTrigger,
}

impl PollingAdapter {
    pub fn new(settings: ProtocolSettings) -> Result<Self, AdapterError> {
        let trigger = HttpTrigger::new(settings.trigger_path.clone())?;
        Ok(Self { settings, trigger })
    }
}

#[async_trait]
impl ProtocolAdapter for PollingAdapter {
    fn protocol(&self) -> &str {
        "polling"
    }

    fn send_mode(&self) -> SendMode {
        SendMode::Batched
    }

    fn prepare_server(&self, config: &TestConfiguration) -> Result<ServerSpec, AdapterError> {
        Ok(server_spec(self.protocol(), &self.settings, config))
    }

    fn prepare_client(&self, _server: &ServerSubject) -> Result<ClientScript, AdapterError> {
        Ok(ClientScript {
            page_url: self.settings.client_page.clone(),
            dependencies: Vec::new(),
            source: CLIENT_SOURCE.to_string(),
        })
    }

    async fn trigger_send(
        &self,
        server: &ServerSubject,
        spec: &MessageSpec,
    ) -> Result<SendAck, AdapterError> {
        self.trigger.post(server, spec).await?;
        Ok(SendAck {
            accepted: spec.count,
        })
    }
}
