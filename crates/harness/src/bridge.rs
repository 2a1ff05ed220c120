//! Client bridge - relays in-browser events to the orchestrator
//!
//! Every browser launcher writes one JSON object per line to its stdout:
//!
//! ```text
//! {"event":"launched","pid":4242}
//! {"event":"connected","client":3}
//! {"event":"message","client":3,"seq":17,"at":1718000000123}
//! {"event":"complete","client":3}
//! {"event":"error","client":3,"message":"socket closed"}
//! {"event":"closed","client":3}
//! ```
//!
//! One reader task per browser forwards its lines in order into a bounded
//! queue, so events of one client keep their emission order.

use std::collections::BTreeSet;

use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use rtbench_common::{ClientId, MessageEvent};

/// A structured event from a client subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// A browser process is up
    Launched { browser: usize, pid: u32 },
    Connected { client_id: ClientId },
    Message(MessageEvent),
    /// The client has seen its last message
    Complete { client_id: ClientId },
    ClientError { client_id: ClientId, message: String },
    /// The client went away before completing (possibly synthesized)
    Disconnected { client_id: ClientId },
}

impl BridgeEvent {
    pub fn client_id(&self) -> Option<ClientId> {
        match self {
            BridgeEvent::Launched { .. } => None,
            BridgeEvent::Connected { client_id }
            | BridgeEvent::Complete { client_id }
            | BridgeEvent::ClientError { client_id, .. }
            | BridgeEvent::Disconnected { client_id } => Some(*client_id),
            BridgeEvent::Message(event) => Some(event.client_id),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WireEvent {
    Launched { pid: u32 },
    Connected { client: ClientId },
    Message { client: ClientId, seq: u32, at: i64 },
    Complete { client: ClientId },
    Error { client: ClientId, message: String },
    Closed { client: ClientId },
    Fatal { message: String },
}

/// Parse one launcher output line. Anything that is not a bridge event
/// yields `None`.
pub fn parse_line(browser: usize, line: &str) -> Option<BridgeEvent> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }

    let wire: WireEvent = match serde_json::from_str(line) {
        Ok(wire) => wire,
        Err(e) => {
            debug!(browser, error = %e, "Ignoring malformed bridge line");
            return None;
        }
    };

    let event = match wire {
        WireEvent::Launched { pid } => BridgeEvent::Launched { browser, pid },
        WireEvent::Connected { client } => BridgeEvent::Connected { client_id: client },
        WireEvent::Message { client, seq, at } => BridgeEvent::Message(MessageEvent {
            client_id: client,
            seq,
            received_at_ms: at,
        }),
        WireEvent::Complete { client } => BridgeEvent::Complete { client_id: client },
        WireEvent::Error { client, message } => BridgeEvent::ClientError {
            client_id: client,
            message,
        },
        WireEvent::Closed { client } => BridgeEvent::Disconnected { client_id: client },
        WireEvent::Fatal { message } => {
            warn!(browser, "Browser launcher failed: {}", message);
            return None;
        }
    };
    Some(event)
}

/// Sending half, handed to every browser reader
pub type BridgeSender = mpsc::Sender<BridgeEvent>;

/// Receiving half, owned by the orchestrator for one run
pub struct ClientBridge {
    rx: mpsc::Receiver<BridgeEvent>,
}

impl ClientBridge {
    /// Create a bounded bridge
    pub fn channel(capacity: usize) -> (BridgeSender, ClientBridge) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, ClientBridge { rx })
    }

    /// Next event; `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<BridgeEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<BridgeEvent> {
        self.rx.try_recv().ok()
    }
}

/// Forward the event lines of one browser into the bridge.
///
/// When the stream ends, every hosted client that neither completed nor
/// closed gets a synthetic `Disconnected` before this sender is dropped.
pub async fn relay_lines<R>(browser: usize, clients: Vec<ClientId>, reader: R, tx: BridgeSender)
where
    R: AsyncBufRead + Unpin,
{
    let mut open: BTreeSet<ClientId> = clients.into_iter().collect();
    let mut lines = reader.lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(browser, error = %e, "Bridge stream read failed");
                break;
            }
        };

        let Some(event) = parse_line(browser, &line) else {
            if !line.trim().is_empty() {
                debug!(browser, "{}", line);
            }
            continue;
        };

        if let BridgeEvent::Complete { client_id } | BridgeEvent::Disconnected { client_id } =
            &event
        {
            open.remove(client_id);
        }

        if tx.send(event).await.is_err() {
            // Orchestrator is gone; nothing left to relay to.
            return;
        }
    }

    for client_id in open {
        if tx.send(BridgeEvent::Disconnected { client_id }).await.is_err() {
            return;
        }
    }
}
