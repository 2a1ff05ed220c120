//! Raw WebSocket adapter

use async_trait::async_trait;

use rtbench_common::TestConfiguration;

use super::{
    server_spec, websocket_url, AdapterError, ClientScript, HttpTrigger, MessageSpec,
    ProtocolAdapter, SendAck, SendMode,
};
use crate::config::ProtocolSettings;
use crate::supervisor::{ServerSpec, ServerSubject};

const CLIENT_SOURCE: &str = r#"
(() => {
  const socket = new WebSocket(`${__WS_ENDPOINT__}/ws?client=${rtbench.clientId}`);
  socket.onopen = () => rtbench.connected();
  socket.onmessage = (event) => {
    const message = JSON.parse(event.data);
    rtbench.message(message.seq);
    if (rtbench.done) {
      socket.close();
    }
  };
  socket.onerror = () => rtbench.error('websocket error');
  socket.onclose = () => rtbench.closed();
})();
"#;

pub struct WebSocketAdapter {
    settings: ProtocolSettings,
    trigger: HttpTrigger,
}

impl WebSocketAdapter {
    pub fn new(settings: ProtocolSettings) -> Result<Self, AdapterError> {
        let trigger = HttpTrigger::new(settings.trigger_path.clone())?;
        Ok(Self { settings, trigger })
    }
}

#[async_trait]
impl ProtocolAdapter for WebSocketAdapter {
    fn protocol(&self) -> &str {
        "websocket"
    }

    fn send_mode(&self) -> SendMode {
        SendMode::Batched
    }

    fn prepare_server(&self, config: &TestConfiguration) -> Result<ServerSpec, AdapterError> {
        Ok(server_spec(self.protocol(), &self.settings, config))
    }

    fn prepare_client(&self, server: &ServerSubject) -> Result<ClientScript, AdapterError> {
        let ws_endpoint = serde_json::to_string(&websocket_url(&server.endpoint))
            .map_err(|e| AdapterError::new(e.to_string()))?;
        Ok(ClientScript {
            page_url: self.settings.client_page.clone(),
            dependencies: Vec::new(),
            source: CLIENT_SOURCE.replace("__WS_ENDPOINT__", &ws_endpoint),
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
