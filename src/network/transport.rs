use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::trace;

use crate::common::PeerIndex;
use crate::consensus::MessageType;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("peer #{0} is unknown")]
    UnknownPeer(PeerIndex),
    #[error("peer #{0} is unreachable")]
    Unreachable(PeerIndex),
}

/// Point-to-point delivery of round messages. Retries and peer trust are the
/// implementation's business.
pub trait Transport: Send + Sync {
    fn own_index(&self) -> PeerIndex;

    fn peers(&self) -> Vec<PeerIndex>;

    fn send(&self, peer: PeerIndex, msg_type: MessageType, payload: Vec<u8>) -> Result<(), TransportError>;
}

#[derive(Clone, Debug)]
pub struct Envelope {
    pub from: PeerIndex,
    pub msg_type: MessageType,
    pub payload: Vec<u8>,
}

/// In-process mesh over tokio channels. Peers can be cut off to simulate
/// partitions.
#[derive(Clone, Default)]
pub struct ChannelNetwork {
    inboxes: Arc<RwLock<BTreeMap<PeerIndex, UnboundedSender<Envelope>>>>,
    disconnected: Arc<RwLock<BTreeSet<PeerIndex>>>,
}

impl ChannelNetwork {
    pub fn new() -> Self {
        ChannelNetwork::default()
    }

    /// Full mesh of `n` peers. Element `i` is peer `i`'s endpoint and inbox.
    pub fn mesh(n: u16) -> (Self, Vec<(ChannelTransport, UnboundedReceiver<Envelope>)>) {
        let network = ChannelNetwork::new();
        let endpoints = (0..n).map(|i| network.join(i)).collect();
        (network, endpoints)
    }

    pub fn join(&self, index: PeerIndex) -> (ChannelTransport, UnboundedReceiver<Envelope>) {
        let (tx, rx) = unbounded_channel();
        self.inboxes.write().insert(index, tx);
        let transport = ChannelTransport {
            own_index: index,
            network: self.clone(),
        };
        (transport, rx)
    }

    /// Drops everything sent to or from `index` until reconnected.
    pub fn disconnect(&self, index: PeerIndex) {
        self.disconnected.write().insert(index);
    }

    pub fn reconnect(&self, index: PeerIndex) {
        self.disconnected.write().remove(&index);
    }

    fn deliver(&self, from: PeerIndex, to: PeerIndex, envelope: Envelope) -> Result<(), TransportError> {
        {
            let cut = self.disconnected.read();
            if cut.contains(&from) || cut.contains(&to) {
                return Err(TransportError::Unreachable(to));
            }
        }
        let inboxes = self.inboxes.read();
        let inbox = inboxes.get(&to).ok_or(TransportError::UnknownPeer(to))?;
        inbox
            .send(envelope)
            .map_err(|_| TransportError::Unreachable(to))
    }
}

#[derive(Clone)]
pub struct ChannelTransport {
    own_index: PeerIndex,
    network: ChannelNetwork,
}

impl Transport for ChannelTransport {
    fn own_index(&self) -> PeerIndex {
        self.own_index
    }

    fn peers(&self) -> Vec<PeerIndex> {
        self.network
            .inboxes
            .read()
            .keys()
            .copied()
            .filter(|p| *p != self.own_index)
            .collect()
    }

    fn send(&self, peer: PeerIndex, msg_type: MessageType, payload: Vec<u8>) -> Result<(), TransportError> {
        trace!(from = self.own_index, to = peer, ?msg_type, len = payload.len(), "send");
        self.network.deliver(
            self.own_index,
            peer,
            Envelope {
                from: self.own_index,
                msg_type,
                payload,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mesh_delivery() {
        let (_net, mut endpoints) = ChannelNetwork::mesh(3);
        let (t0, _) = endpoints.remove(0);
        let (_, mut rx1) = endpoints.remove(0);

        assert_eq!(t0.peers(), vec![1, 2]);
        t0.send(1, MessageType::SignedHash, vec![7]).unwrap();
        let env = rx1.recv().await.unwrap();
        assert_eq!(env.from, 0);
        assert_eq!(env.payload, vec![7]);
        assert_eq!(t0.send(9, MessageType::SignedHash, vec![]), Err(TransportError::UnknownPeer(9)));
    }

    #[tokio::test]
    async fn test_disconnect() {
        let (net, mut endpoints) = ChannelNetwork::mesh(2);
        let (t0, _rx0) = endpoints.remove(0);
        let (_t1, mut rx1) = endpoints.remove(0);

        net.disconnect(1);
        assert_eq!(t0.send(1, MessageType::SignedHash, vec![1]), Err(TransportError::Unreachable(1)));
        net.reconnect(1);
        t0.send(1, MessageType::SignedHash, vec![2]).unwrap();
        assert_eq!(rx1.recv().await.unwrap().payload, vec![2]);
    }
}
