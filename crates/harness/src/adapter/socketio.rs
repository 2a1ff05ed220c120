//! Socket.IO adapter

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
  const socket = io(rtbench.endpoint, {
    transports: ['websocket'],
    query: { client: String(rtbench.clientId) },
  });
  socket.on('connect', () => rtbench.connected());
  socket.on('message', (message) => {
    rtbench.message(message.seq);
    if (rtbench.done) {
      socket.close();
    }
  });
  socket.on('connect_error', (error) => rtbench.error(error.message));
  socket.on('disconnect', () => rtbench.closed());
})();
"#;

pub struct SocketIoAdapter {
    settings: ProtocolSettings,
    trigger: HttpTrigger,
}

impl SocketIoAdapter {
    pub fn new(settings: ProtocolSettings) -> Result<Self, AdapterError> {
        let trigger = HttpTrigger::new(settings.trigger_path.clone())?;
        Ok(Self { settings, trigger })
    }
}

#[async_trait]
impl ProtocolAdapter for SocketIoAdapter {
    fn protocol(&self) -> &str {
        "socketio"
    }

    fn send_mode(&self) -> SendMode {
        SendMode::Batched
    }

    fn prepare_server(&self, config: &TestConfiguration) -> Result<ServerSpec, AdapterError> {
        Ok(server_spec(self.protocol(), &self.settings, config))
    }

    fn prepare_client(&self, server: &ServerSubject) -> Result<ClientScript, AdapterError> {
        Ok(ClientScript {
            page_url: self.settings.client_page.clone(),
            dependencies: vec![format!(
                "{}/socket.io/socket.io.js",
                server.endpoint.trim_end_matches('/')
            )],
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
