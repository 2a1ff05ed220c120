//! Pub/sub gateway adapter
//!
//! The gateway has no bulk trigger: every message goes through its publish
//! API, so this adapter sends one request per message.

use async_trait::async_trait;
use serde::Serialize;

use rtbench_common::TestConfiguration;

use super::{
    server_spec, websocket_url, AdapterError, ClientScript, HttpTrigger, MessageSpec,
    ProtocolAdapter, SendAck, SendMode,
};
use crate::config::ProtocolSettings;
use crate::supervisor::{ServerSpec, ServerSubject};

/// Channel every client subscribes to
pub const CHANNEL: &str = "rtbench";

/// Environment variable holding the gateway API key
pub const API_KEY_ENV: &str = "RTBENCH_PUBSUB_API_KEY";

const CLIENT_SOURCE: &str = r#"
(() => {
  const socket = new WebSocket(`${__WS_ENDPOINT__}/connection/websocket`);
  socket.onopen = () => {
    socket.send(JSON.stringify({ id: 1, connect: { name: `rtbench-${rtbench.clientId}` } }));
    socket.send(JSON.stringify({ id: 2, subscribe: { channel: __CHANNEL__ } }));
  };
  socket.onmessage = (event) => {
    // The gateway may batch several replies into one frame.
    for (const line of String(event.data).split('\n')) {
      if (!line.trim()) {
        continue;
      }
      const reply = JSON.parse(line);
      if (Object.keys(reply).length === 0) {
        socket.send('{}');
        continue;
      }
      if (reply.id === 2) {
        if (reply.error) {
          rtbench.error(reply.error.message);
        } else {
          rtbench.connected();
        }
        continue;
      }
      if (reply.push && reply.push.pub) {
        rtbench.message(reply.push.pub.data.seq);
        if (rtbench.done) {
          socket.close();
        }
      }
    }
  };
  socket.onerror = () => rtbench.error('gateway connection error');
  socket.onclose = () => rtbench.closed();
})();
"#;

#[derive(Debug, Serialize)]
struct Publication<'a> {
    channel: &'a str,
    data: PublicationData<'a>,
}

#[derive(Debug, Serialize)]
struct PublicationData<'a> {
    seq: u32,
    payload: &'a str,
}

pub struct PubSubAdapter {
    settings: ProtocolSettings,
    trigger: HttpTrigger,
}

impl PubSubAdapter {
    pub fn new(settings: ProtocolSettings) -> Result<Self, AdapterError> {
        let mut trigger = HttpTrigger::new(settings.trigger_path.clone())?;
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            trigger = trigger.with_authorization(format!("apikey {}", key));
        }
        Ok(Self { settings, trigger })
    }
}

#[async_trait]
impl ProtocolAdapter for PubSubAdapter {
    fn protocol(&self) -> &str {
        "pubsub"
    }

    fn send_mode(&self) -> SendMode {
        SendMode::PerMessage
    }

    fn prepare_server(&self, config: &TestConfiguration) -> Result<ServerSpec, AdapterError> {
        Ok(server_spec(self.protocol(), &self.settings, config))
    }

    fn prepare_client(&self, server: &ServerSubject) -> Result<ClientScript, AdapterError> {
        let ws_endpoint = serde_json::to_string(&websocket_url(&server.endpoint))
            .map_err(|e| AdapterError::new(e.to_string()))?;
        let channel =
            serde_json::to_string(CHANNEL).map_err(|e| AdapterError::new(e.to_string()))?;
        Ok(ClientScript {
            page_url: self.settings.client_page.clone(),
            dependencies: Vec::new(),
            source: CLIENT_SOURCE
                .replace("__WS_ENDPOINT__", &ws_endpoint)
                .replace("__CHANNEL__", &channel),
        })
    }

    async fn trigger_send(
        &self,
        server: &ServerSubject,
        spec: &MessageSpec,
    ) -> Result<SendAck, AdapterError> {
        let payload = "x".repeat(spec.payload_bytes as usize);
        for seq in spec.seqs() {
            let publication = Publication {
                channel: CHANNEL,
                data: PublicationData {
                    seq,
                    payload: &payload,
                },
            };
            self.trigger.post(server, &publication).await?;
        }
        Ok(SendAck {
            accepted: spec.count,
        })
    }
}
