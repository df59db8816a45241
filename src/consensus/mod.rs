pub mod backlog;
pub mod committee;
pub mod ledger;
pub mod message;
pub mod operator;
pub mod result;

pub use committee::*;
pub use ledger::*;
pub use message::*;
pub use operator::*;
pub use result::*;

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use tokio::task::JoinHandle;

    use super::*;
    use crate::common::crypto::tests::{committee_keys, signer_for};
    use crate::common::crypto::ThresholdSigner;
    use crate::common::{Hname, PeerIndex};
    use crate::config::NodeConfig;
    use crate::kv::{KvRead, MemStore};
    use crate::network::{ChannelNetwork, Node};
    use crate::state::{StateSync, VirtualState};
    use crate::vm::testing::{chain, counter_registry, inc, inputs_for, sender, Counter, Salted};
    use crate::vm::{ContractRegistry, Request, RoundTask, Runner};

    /// `n` operators on one in-memory mesh, each with its own store.
    pub(crate) struct Committee {
        pub network: ChannelNetwork,
        pub operators: Vec<Arc<Operator>>,
        pub ledgers: Vec<Arc<MemLedger>>,
        nodes: Vec<JoinHandle<()>>,
    }

    impl Committee {
        pub(crate) fn new(n: u16, quorum: usize, timeout_ms: u64) -> Self {
            Committee::with_registries(n, quorum, timeout_ms, |_| counter_registry())
        }

        pub(crate) fn with_registries(
            n: u16,
            quorum: usize,
            timeout_ms: u64,
            registry_for: impl Fn(PeerIndex) -> ContractRegistry,
        ) -> Self {
            let directory = Arc::new(PeerDirectory::from_pubkeys(
                committee_keys(n).iter().map(|k| k.pubkey()).collect(),
            ));
            let mut config = NodeConfig::default();
            config.consensus.quorum = Some(quorum);
            config.consensus.round_timeout_ms = timeout_ms;
            config.consensus.tick_interval_ms = 50;

            let (network, endpoints) = ChannelNetwork::mesh(n);
            let mut operators = Vec::new();
            let mut ledgers = Vec::new();
            let mut nodes = Vec::new();
            for (i, (transport, inbox)) in endpoints.into_iter().enumerate() {
                let index = i as PeerIndex;
                let ledger = Arc::new(MemLedger::new());
                let (state, _) = VirtualState::new_origin(MemStore::new(), chain()).unwrap();
                let operator = Arc::new(
                    Operator::new(
                        index,
                        directory.clone(),
                        Collaborators {
                            signer: Arc::new(signer_for(index, n, quorum)),
                            transport: Arc::new(transport),
                            ledger: ledger.clone(),
                        },
                        Runner::new(Arc::new(registry_for(index))),
                        state,
                        StateSync::new(),
                        &config,
                    )
                    .unwrap(),
                );
                nodes.push(Node::new(operator.clone(), inbox, config.consensus.tick_interval()).spawn());
                operators.push(operator);
                ledgers.push(ledger);
            }
            Committee {
                network,
                operators,
                ledgers,
                nodes,
            }
        }

        fn members(&self) -> Vec<PeerIndex> {
            (0..self.operators.len() as PeerIndex).collect()
        }

        /// First session from `from` whose leader satisfies `pred`.
        pub(crate) fn session_where(&self, from: u64, pred: impl Fn(PeerIndex) -> bool) -> u64 {
            let members = self.members();
            (from..from + 1000)
                .find(|s| select_leader(*s, 0, &members).map_or(false, &pred))
                .unwrap()
        }

        /// Runs the same round on `participants` concurrently.
        pub(crate) async fn run(
            &self,
            session_id: u64,
            requests: Vec<Request>,
            participants: &[PeerIndex],
        ) -> Vec<RoundOutcome> {
            let handles: Vec<_> = participants
                .iter()
                .map(|p| {
                    let op = self.operators[*p as usize].clone();
                    let inputs = inputs_for(session_id, requests.clone(), op.baseline());
                    tokio::spawn(async move { op.run_round(RoundTask::detached(inputs)).await })
                })
                .collect();
            let mut outcomes = Vec::new();
            for handle in handles {
                outcomes.push(handle.await.unwrap());
            }
            outcomes
        }
    }

    impl Drop for Committee {
        fn drop(&mut self) {
            for node in &self.nodes {
                node.abort();
            }
        }
    }

    fn counter_value(op: &Operator) -> Option<u64> {
        let key = [Counter::hname_const().to_bytes().as_slice(), b"n"].concat();
        op.state_snapshot().get_u64(&key).unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end() {
        let committee = Committee::new(4, 3, 2_000);
        let all = [0, 1, 2, 3];

        for session in 1..=3u64 {
            let requests = vec![inc(session * 10), inc(session * 10 + 1)];
            let outcomes = committee.run(session, requests, &all).await;

            let results: Vec<_> = outcomes.into_iter().map(|o| o.unwrap()).collect();
            let leader = results[0].leader;
            for r in &results {
                assert_eq!(r.leader, leader);
                assert_eq!(r.block.index(), session as u32);
                assert_eq!(r.state_commitment, results[0].state_commitment);
                assert_eq!(r.signed_tx, results[0].signed_tx);
                assert_eq!(r.events, vec![format!("n = {}", session * 2 - 1), format!("n = {}", session * 2)]);
            }
            let signer = signer_for(2, 4, 3);
            let essence = results[0].signed_tx.essence_bytes().unwrap();
            assert!(signer.verify_full_signature(&results[0].signed_tx.signature, &essence).is_ok());
        }

        let commitment = committee.operators[0].state_commitment();
        for op in &committee.operators {
            assert_eq!(op.block_index().unwrap(), 3);
            assert_eq!(op.state_commitment(), commitment);
            assert_eq!(op.stage(), RoundStage::Finalized);
            assert_eq!(counter_value(op), Some(6));
        }
        let submitted: usize = committee.ledgers.iter().map(|l| l.len()).sum();
        assert_eq!(submitted, 3);
    }

    #[tokio::test]
    async fn test_two_of_four_times_out() {
        let committee = Committee::new(4, 3, 300);
        let session = committee.session_where(1, |_| true);
        let leader = select_leader(session, 0, &committee.members()).unwrap();
        let other = (leader + 1) % 4;

        let outcomes = committee.run(session, vec![inc(0)], &[leader, other]).await;
        for outcome in outcomes {
            assert!(matches!(outcome, Err(RoundError::Timeout(_))));
        }
        for op in &committee.operators {
            assert_eq!(op.block_index().unwrap(), 0);
            assert_eq!(counter_value(op), None);
        }
        assert!(committee.ledgers.iter().all(|l| l.is_empty()));
        assert_eq!(committee.operators[leader as usize].stage(), RoundStage::Abandoned);
    }

    #[tokio::test]
    async fn test_nondeterministic_member_is_isolated() {
        let odd: PeerIndex = 3;
        let committee = Committee::with_registries(4, 3, 400, |i| {
            let salt = if i == odd { 99 } else { 0 };
            counter_registry().with(Arc::new(Salted(salt)))
        });
        let session = committee.session_where(1, |l| l != odd);
        let request = Request::new(sender(), Hname::from_name("salted"), Hname::from_name("any"));

        let outcomes = committee.run(session, vec![request], &[0, 1, 2, 3]).await;
        for (i, outcome) in outcomes.iter().enumerate() {
            if i as PeerIndex == odd {
                assert!(matches!(outcome, Err(RoundError::Timeout(_))));
            } else {
                assert!(outcome.is_ok());
            }
        }
        assert_eq!(committee.operators[odd as usize].block_index().unwrap(), 0);
        assert_eq!(committee.operators[0].block_index().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_partitioned_member_does_not_block_quorum() {
        let cut: PeerIndex = 2;
        let committee = Committee::new(4, 3, 400);
        let session = committee.session_where(1, |l| l != cut);
        committee.network.disconnect(cut);

        let outcomes = committee.run(session, vec![inc(0)], &[0, 1, 2, 3]).await;
        for (i, outcome) in outcomes.iter().enumerate() {
            if i as PeerIndex == cut {
                assert!(matches!(outcome, Err(RoundError::Timeout(_))));
            } else {
                assert!(outcome.is_ok());
            }
        }
        assert_eq!(committee.operators[cut as usize].stage(), RoundStage::Abandoned);
    }
}
