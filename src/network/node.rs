use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::consensus::{Operator, PeerMessage};

use super::transport::Envelope;

/// Glue between a transport inbox and an operator: decodes deliveries into
/// typed messages and drives the maintenance tick.
pub struct Node {
    operator: Arc<Operator>,
    inbox: UnboundedReceiver<Envelope>,
    tick_interval: Duration,
}

impl Node {
    pub fn new(operator: Arc<Operator>, inbox: UnboundedReceiver<Envelope>, tick_interval: Duration) -> Self {
        Node {
            operator,
            inbox,
            tick_interval,
        }
    }

    pub fn operator(&self) -> &Arc<Operator> {
        &self.operator
    }

    /// Runs until the inbox closes.
    pub async fn run(mut self) {
        let peer = self.operator.own_index();
        let mut ticker = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                delivery = self.inbox.recv() => {
                    let Some(envelope) = delivery else {
                        debug!(peer, "inbox closed, stopping node");
                        return;
                    };
                    match PeerMessage::decode(envelope.msg_type, &envelope.payload) {
                        Ok(msg) => self.operator.handle_message(envelope.from, msg),
                        Err(err) => warn!(peer, from = envelope.from, "dropping undecodable message: {}", err),
                    }
                }
                _ = ticker.tick() => self.operator.on_tick(),
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::MessageType;
    use crate::network::transport::{ChannelNetwork, Transport};

    #[tokio::test]
    async fn test_node_stops_when_inbox_closes() {
        let harness = crate::consensus::tests::Committee::new(1, 1, 1_000);
        let (net, mut endpoints) = ChannelNetwork::mesh(2);
        let (sender, _) = endpoints.remove(0);
        let (_, inbox) = endpoints.remove(0);
        let node = Node::new(harness.operators[0].clone(), inbox, Duration::from_millis(10));
        let handle = node.spawn();

        // garbage is dropped, not fatal
        sender.send(1, MessageType::SignedHash, vec![0xff]).unwrap();
        drop(sender);
        drop(net);
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }
}
