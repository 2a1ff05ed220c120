//! Per-run reduction of bridge events

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use rtbench_common::{ClientId, ClientLatency, MessageEvent};

use crate::bridge::BridgeEvent;

/// What a single bridge event meant for the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Recorded,
    /// The event was invalid and counted as rejected
    Rejected,
    /// A client that had not finished went away
    Disconnected(ClientId),
    Ignored,
}

/// Collects connection state and first/last receipt for every client
#[derive(Debug)]
pub struct RunCollector {
    clients: u32,
    messages: u32,
    connected: BTreeSet<ClientId>,
    finished: BTreeSet<ClientId>,
    disconnected: BTreeSet<ClientId>,
    latency: BTreeMap<ClientId, ClientLatency>,
    client_errors: u32,
    rejected: u32,
}

impl RunCollector {
    pub fn new(clients: u32, messages: u32) -> Self {
        Self {
            clients,
            messages,
            connected: BTreeSet::new(),
            finished: BTreeSet::new(),
            disconnected: BTreeSet::new(),
            latency: BTreeMap::new(),
            client_errors: 0,
            rejected: 0,
        }
    }

    fn known(&self, client_id: ClientId) -> bool {
        client_id < self.clients
    }

    fn reject(&mut self, event: &BridgeEvent) -> Observation {
        debug!(?event, "Rejected bridge event");
        self.rejected += 1;
        Observation::Rejected
    }

    pub fn observe(&mut self, event: BridgeEvent) -> Observation {
        if let Some(client_id) = event.client_id() {
            if !self.known(client_id) {
                return self.reject(&event);
            }
        }

        match event {
            BridgeEvent::Launched { browser, pid } => {
                debug!(browser, pid, "Browser reported its process");
                Observation::Ignored
            }
            BridgeEvent::Connected { client_id } => {
                self.connected.insert(client_id);
                Observation::Recorded
            }
            BridgeEvent::Message(message) => self.record_message(message),
            BridgeEvent::Complete { client_id } => {
                // Only a client that saw message M is finished.
                let reached_last = self
                    .latency
                    .get(&client_id)
                    .is_some_and(|latency| latency.last_seq == self.messages);
                if !reached_last {
                    return self.reject(&BridgeEvent::Complete { client_id });
                }
                self.finished.insert(client_id);
                Observation::Recorded
            }
            BridgeEvent::ClientError { client_id, message } => {
                warn!(client = client_id, "Client error: {}", message);
                self.client_errors += 1;
                Observation::Recorded
            }
            BridgeEvent::Disconnected { client_id } => {
                if self.finished.contains(&client_id) || !self.disconnected.insert(client_id) {
                    return Observation::Ignored;
                }
                Observation::Disconnected(client_id)
            }
        }
    }

    fn record_message(&mut self, message: MessageEvent) -> Observation {
        if message.seq == 0 || message.seq > self.messages {
            return self.reject(&BridgeEvent::Message(message));
        }

        let accepted = match self.latency.get_mut(&message.client_id) {
            Some(latency) => latency.observe(&message),
            None => {
                self.latency
                    .insert(message.client_id, ClientLatency::new(&message));
                true
            }
        };
        if !accepted {
            return self.reject(&BridgeEvent::Message(message));
        }

        if message.seq == self.messages {
            self.finished.insert(message.client_id);
        }
        Observation::Recorded
    }

    pub fn connected(&self) -> usize {
        self.connected.len()
    }

    pub fn all_connected(&self) -> bool {
        self.connected.len() as u32 >= self.clients
    }

    /// Every client either finished or went away
    pub fn drain_ready(&self) -> bool {
        self.finished.len() + self.disconnected.len() >= self.clients as usize
    }

    /// Clients that did not receive their last message, ascending
    pub fn incomplete_clients(&self) -> Vec<ClientId> {
        (0..self.clients)
            .filter(|c| !self.finished.contains(c))
            .collect()
    }

    pub fn disconnected(&self) -> usize {
        self.disconnected.len()
    }

    pub fn client_errors(&self) -> u32 {
        self.client_errors
    }

    pub fn rejected(&self) -> u32 {
        self.rejected
    }

    pub fn latency(&self) -> &BTreeMap<ClientId, ClientLatency> {
        &self.latency
    }

    pub fn into_latency(self) -> BTreeMap<ClientId, ClientLatency> {
        self.latency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(client_id: ClientId, seq: u32, at: i64) -> BridgeEvent {
        BridgeEvent::Message(MessageEvent {
            client_id,
            seq,
            received_at_ms: at,
        })
    }

    #[test]
    fn test_connect_and_finish() {
        let mut collector = RunCollector::new(2, 3);
        collector.observe(BridgeEvent::Connected { client_id: 0 });
        assert!(!collector.all_connected());
        collector.observe(BridgeEvent::Connected { client_id: 1 });
        assert!(collector.all_connected());

        for seq in 1..=3 {
            collector.observe(message(0, seq, 100 + seq as i64));
        }
        for seq in 1..=3 {
            collector.observe(message(1, seq, 104 + seq as i64));
        }
        assert_eq!(
            collector.observe(BridgeEvent::Complete { client_id: 1 }),
            Observation::Recorded
        );

        assert!(collector.drain_ready());
        assert!(collector.incomplete_clients().is_empty());
        let latency = collector.latency()[&0];
        assert_eq!(latency.first_received_at_ms, 101);
        assert_eq!(latency.last_received_at_ms, 103);
        assert_eq!(latency.received, 3);
    }

    #[test]
    fn test_rejects_out_of_range_and_duplicates() {
        let mut collector = RunCollector::new(1, 5);
        assert_eq!(collector.observe(message(0, 0, 1)), Observation::Rejected);
        assert_eq!(collector.observe(message(0, 6, 1)), Observation::Rejected);
        assert_eq!(collector.observe(message(3, 1, 1)), Observation::Rejected);
        assert_eq!(collector.observe(message(0, 2, 1)), Observation::Recorded);
        assert_eq!(collector.observe(message(0, 2, 2)), Observation::Rejected);
        assert_eq!(collector.observe(message(0, 1, 3)), Observation::Rejected);
        assert_eq!(collector.rejected(), 5);
        assert_eq!(collector.latency()[&0].received, 1);
    }

    #[test]
    fn test_complete_without_last_message_is_rejected() {
        let mut collector = RunCollector::new(2, 3);
        collector.observe(BridgeEvent::Connected { client_id: 0 });
        collector.observe(BridgeEvent::Connected { client_id: 1 });
        collector.observe(message(0, 1, 10));
        assert_eq!(collector.observe(message(0, 4, 11)), Observation::Rejected);
        assert_eq!(
            collector.observe(BridgeEvent::Complete { client_id: 0 }),
            Observation::Rejected
        );
        assert_eq!(
            collector.observe(BridgeEvent::Complete { client_id: 1 }),
            Observation::Rejected
        );

        assert!(!collector.drain_ready());
        assert_eq!(collector.incomplete_clients(), vec![0, 1]);
        assert_eq!(collector.latency()[&0].received, 1);
        assert_eq!(collector.latency()[&0].last_seq, 1);
        assert_eq!(collector.rejected(), 3);
    }

    #[test]
    fn test_disconnect_after_finish_is_ignored() {
        let mut collector = RunCollector::new(1, 1);
        collector.observe(message(0, 1, 10));
        assert_eq!(
            collector.observe(BridgeEvent::Disconnected { client_id: 0 }),
            Observation::Ignored
        );
        assert_eq!(collector.disconnected(), 0);
    }

    #[test]
    fn test_disconnect_marks_client_incomplete() {
        let mut collector = RunCollector::new(3, 2);
        collector.observe(message(0, 2, 10));
        assert_eq!(
            collector.observe(BridgeEvent::Disconnected { client_id: 2 }),
            Observation::Disconnected(2)
        );
        assert_eq!(
            collector.observe(BridgeEvent::Disconnected { client_id: 2 }),
            Observation::Ignored
        );
        assert!(!collector.drain_ready());
        assert_eq!(collector.incomplete_clients(), vec![1, 2]);
    }

    #[test]
    fn test_client_errors_counted() {
        let mut collector = RunCollector::new(1, 1);
        collector.observe(BridgeEvent::ClientError {
            client_id: 0,
            message: "boom".into(),
        });
        assert_eq!(collector.client_errors(), 1);
        assert_eq!(
            collector.observe(BridgeEvent::Launched { browser: 0, pid: 1 }),
            Observation::Ignored
        );
    }
}
