//! Server-sent events adapter

use async_trait::async_trait;

use rtbench_common::TestConfiguration;

use super::{
    server_spec, AdapterError, ClientScript, HttpTrigger, MessageSpec, ProtocolAdapter, SendAck,
    SendMode,
};
use crate::config::ProtocolSettings;
use crate::supervisor::{ServerSpec, ServerSubject};

const CLIENT_SOURCE: &str = r#"
(() => {
  const source = new EventSource(`${rtbench.endpoint}/events?client=${rtbench.clientId}`);
  source.onopen = () => rtbench.connected();
  source.onmessage = (event) => {
    const message = JSON.parse(event.data);
    rtbench.message(message.seq);
    if (rtbench.done) {
      source.close();
    }
  };
  source.onerror = () => {
    if (source.readyState === EventSource.CLOSED) {
      rtbench.error('event stream closed');
      rtbench.closed();
    }
  };
})();
"#;

pub struct SseAdapter {
    settings: ProtocolSettings,
    trigger: HttpTrigger,
}

impl SseAdapter {
    pub fn new(settings: ProtocolSettings) -> Result<Self, AdapterError> {
        let trigger = HttpTrigger::new(settings.trigger_path.clone())?;
        Ok(Self { settings, trigger })
    }
}

#[async_trait]
impl ProtocolAdapter for SseAdapter {
    fn protocol(&self) -> &str {
        "sse"
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
