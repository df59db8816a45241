use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::common::crypto::{FullSignature, SigShare, ThresholdSigner};
use crate::common::hashing::HashValue;
use crate::common::PeerIndex;
use crate::config::{ConfigError, ConsensusConfig, NodeConfig};
use crate::network::Transport;
use crate::state::{StateBaseline, StateError, StateSync, VirtualState};
use crate::vm::{RoundInputs, RoundTask, Runner, SignedTransaction, VmOutput};

use super::backlog::EarlyMessages;
use super::committee::{CommitteeDescriptor, PeerDirectory};
use super::ledger::LedgerSubmitter;
use super::message::{FinalizedResultMsg, PeerMessage, SignedHashMsg};
use super::{RoundError, RoundOutcome, RoundResult, RoundStage};

/// External collaborators of an operator.
pub struct Collaborators {
    pub signer: Arc<dyn ThresholdSigner>,
    pub transport: Arc<dyn Transport>,
    pub ledger: Arc<dyn LedgerSubmitter>,
}

struct PendingEssence {
    hash: HashValue,
    bytes: Vec<u8>,
}

/// Bookkeeping of the round in flight. Lives exactly as long as the round.
struct ActiveRound {
    session_id: u64,
    state_index: u32,
    committee: CommitteeDescriptor,
    leader: PeerIndex,
    /// Unset while the local execution is still running.
    essence: Option<PendingEssence>,
    /// Matching shares by signer. Leader only.
    shares: BTreeMap<PeerIndex, SigShare>,
    rejections: usize,
    determinism_warned: bool,
    completion: Option<oneshot::Sender<FullSignature>>,
}

impl ActiveRound {
    fn is_leader(&self) -> bool {
        self.leader == self.committee.own_index()
    }

    fn complete(&mut self, signature: FullSignature) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(signature);
        }
    }
}

struct RoundSlot {
    active: Option<ActiveRound>,
    stage: RoundStage,
    early: EarlyMessages,
}

/// Drives consensus rounds of one chain on one committee member.
///
/// Every member executes the round locally. Members other than the leader
/// send their share over the essence hash to the leader, which collects
/// `quorum` matching shares and recovers the full signature. The block is
/// applied and persisted on a copy of the state, which replaces the
/// authoritative one only when nothing failed. The leader submits the signed
/// transaction before persisting and broadcasts the signature after it, so an
/// abandoned round leaves the state and the peers untouched.
pub struct Operator {
    own_index: PeerIndex,
    directory: Arc<PeerDirectory>,
    quorum: usize,
    signer: Arc<dyn ThresholdSigner>,
    transport: Arc<dyn Transport>,
    ledger: Arc<dyn LedgerSubmitter>,
    runner: Runner,
    state: Mutex<VirtualState>,
    sync: StateSync,
    config: ConsensusConfig,
    round: Mutex<RoundSlot>,
    determinism_warnings: AtomicU64,
}

impl Operator {
    pub fn new(
        own_index: PeerIndex,
        directory: Arc<PeerDirectory>,
        collaborators: Collaborators,
        runner: Runner,
        state: VirtualState,
        sync: StateSync,
        config: &NodeConfig,
    ) -> Result<Self, ConfigError> {
        config.validate(directory.len())?;
        let quorum = config.consensus.quorum_for(directory.len());
        let consensus = config.consensus.clone();
        Ok(Operator {
            own_index,
            directory,
            quorum,
            signer: collaborators.signer,
            transport: collaborators.transport,
            ledger: collaborators.ledger,
            runner: runner.with_max_call_depth(config.vm.max_call_depth),
            state: Mutex::new(state),
            sync,
            round: Mutex::new(RoundSlot {
                active: None,
                stage: RoundStage::Idle,
                early: EarlyMessages::new(consensus.early_message_limit, consensus.early_message_max_ticks),
            }),
            config: consensus,
            determinism_warnings: AtomicU64::new(0),
        })
    }

    pub fn own_index(&self) -> PeerIndex {
        self.own_index
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn stage(&self) -> RoundStage {
        self.round.lock().stage
    }

    /// Baseline for the inputs of the next round.
    pub fn baseline(&self) -> StateBaseline {
        self.sync.baseline()
    }

    /// Rounds so far that raised a `DeterminismViolation` warning.
    pub fn determinism_warnings(&self) -> u64 {
        self.determinism_warnings.load(Ordering::Relaxed)
    }

    /// Rejected shares or leader results of the round in flight.
    pub fn rejections(&self) -> usize {
        self.round.lock().active.as_ref().map_or(0, |r| r.rejections)
    }

    pub fn sync(&self) -> &StateSync {
        &self.sync
    }

    pub fn state_commitment(&self) -> HashValue {
        self.state.lock().state_commitment()
    }

    pub fn block_index(&self) -> Result<u32, StateError> {
        self.state.lock().block_index()
    }

    /// Independent copy of the authoritative state.
    pub fn state_snapshot(&self) -> VirtualState {
        self.state.lock().copy()
    }

    /// Leader of a round starting now with `session_id`.
    pub fn leader_for(&self, session_id: u64) -> Result<PeerIndex, RoundError> {
        let committee = CommitteeDescriptor::capture(&self.directory, self.own_index, self.quorum)?;
        Ok(committee.leader_for(session_id, self.block_index()?))
    }

    /// Runs `task` to `Finalized` or `Abandoned`. The task's completion
    /// callback observes the outcome before it is returned.
    pub async fn run_round(&self, task: RoundTask) -> RoundOutcome {
        let (inputs, on_finish) = task.into_parts();
        let outcome = self.drive(&inputs).await;
        match &outcome {
            Ok(result) => info!(
                peer = self.own_index,
                session = result.session_id,
                block = result.block.index(),
                commitment = %result.state_commitment.short(),
                "round finalized"
            ),
            Err(err) => warn!(peer = self.own_index, session = inputs.session_id(), "round failed: {}", err),
        }
        on_finish(&outcome);
        outcome
    }

    async fn drive(&self, inputs: &RoundInputs) -> RoundOutcome {
        let session_id = inputs.session_id();
        let (snapshot, state_index) = {
            let state = self.state.lock();
            (state.copy(), state.block_index()?)
        };
        let committee = CommitteeDescriptor::capture(&self.directory, self.own_index, self.quorum)?;
        let leader = committee.leader_for(session_id, state_index);
        let done = self.begin(session_id, state_index, committee, leader)?;
        let guard = RoundGuard {
            operator: self,
            session_id,
            finalized: false,
        };
        debug!(peer = self.own_index, session = session_id, state_index, leader, "round started");

        let output = self.runner.run(inputs, snapshot, leader)?;
        let share = self.signer.sign_share(&output.essence_bytes)?;

        if leader == self.own_index {
            self.arm(session_id, &output, Some(share));
        } else {
            self.arm(session_id, &output, None);
            let msg = PeerMessage::SignedHash(SignedHashMsg {
                session_id,
                state_index,
                request_id: inputs.requests().first().map(|r| r.id()),
                orig_timestamp: inputs.timestamp(),
                essence_hash: output.essence_hash,
                share,
            });
            self.send(leader, &msg);
        }

        let timeout = self.config.round_timeout();
        let signature = match tokio::time::timeout(timeout, done).await {
            Ok(Ok(signature)) => signature,
            Ok(Err(_)) => return Err(RoundError::Cancelled),
            Err(_) => return Err(RoundError::Timeout(timeout)),
        };

        let result = self.finalize(session_id, state_index, output, signature)?;
        guard.finalized();
        Ok(result)
    }

    fn begin(
        &self,
        session_id: u64,
        state_index: u32,
        committee: CommitteeDescriptor,
        leader: PeerIndex,
    ) -> Result<oneshot::Receiver<FullSignature>, RoundError> {
        let mut slot = self.round.lock();
        if let Some(active) = &slot.active {
            return Err(RoundError::Busy(active.session_id));
        }
        let (tx, rx) = oneshot::channel();
        slot.active = Some(ActiveRound {
            session_id,
            state_index,
            committee,
            leader,
            essence: None,
            shares: BTreeMap::new(),
            rejections: 0,
            determinism_warned: false,
            completion: Some(tx),
        });
        slot.stage = RoundStage::Executing;
        Ok(rx)
    }

    /// Publishes the local essence to the message path and replays whatever
    /// arrived early for this round.
    fn arm(&self, session_id: u64, output: &VmOutput, own_share: Option<SigShare>) {
        let mut guard = self.round.lock();
        let slot = &mut *guard;
        let Some(round) = slot.active.as_mut().filter(|r| r.session_id == session_id) else {
            return;
        };
        round.essence = Some(PendingEssence {
            hash: output.essence_hash,
            bytes: output.essence_bytes.clone(),
        });
        if let Some(share) = own_share {
            round.shares.insert(share.peer_index, share);
            slot.stage = RoundStage::AwaitingShares;
            self.try_recover(round);
        } else {
            slot.stage = RoundStage::AwaitingLeaderResult;
        }

        let replay = slot.early.take_session(session_id);
        if !replay.is_empty() {
            debug!(peer = self.own_index, session = session_id, count = replay.len(), "replaying early messages");
        }
        for (from, msg) in replay {
            self.dispatch(round, from, msg);
        }
    }

    /// Entry point of the transport delivery path.
    pub fn handle_message(&self, from: PeerIndex, msg: PeerMessage) {
        let mut guard = self.round.lock();
        let slot = &mut *guard;
        let session_id = msg.session_id();
        match slot.active.as_mut() {
            Some(round) if round.session_id == session_id && round.essence.is_some() => {
                self.dispatch(round, from, msg);
            }
            Some(round) if session_id < round.session_id => {
                debug!(peer = self.own_index, from, session = session_id, "dropping message of a past round");
            }
            _ => {
                trace!(peer = self.own_index, from, session = session_id, "buffering early message");
                if !slot.early.push(from, msg) {
                    debug!(peer = self.own_index, "early message buffer full, evicted oldest");
                }
            }
        }
    }

    pub fn on_tick(&self) {
        let mut slot = self.round.lock();
        let expired = slot.early.tick();
        if expired > 0 {
            debug!(peer = self.own_index, expired, "pruned early messages");
        }
        if let Some(round) = &slot.active {
            trace!(
                peer = self.own_index,
                session = round.session_id,
                stage = ?slot.stage,
                shares = round.shares.len(),
                "round pending"
            );
        }
    }

    fn dispatch(&self, round: &mut ActiveRound, from: PeerIndex, msg: PeerMessage) {
        if msg.state_index() != round.state_index {
            debug!(
                peer = self.own_index,
                from,
                theirs = msg.state_index(),
                ours = round.state_index,
                "state index mismatch, dropping"
            );
            return;
        }
        match msg {
            PeerMessage::SignedHash(m) => self.on_signed_hash(round, from, m),
            PeerMessage::FinalizedResult(m) => self.on_finalized_result(round, from, m),
        }
    }

    fn on_signed_hash(&self, round: &mut ActiveRound, from: PeerIndex, msg: SignedHashMsg) {
        if !round.is_leader() {
            debug!(peer = self.own_index, from, "not the leader, ignoring signature share");
            return;
        }
        if msg.share.peer_index != from || !round.committee.is_member(from) {
            warn!(peer = self.own_index, from, claimed = msg.share.peer_index, "share from a non-member");
            return;
        }
        let Some(essence) = &round.essence else {
            return;
        };
        if msg.essence_hash != essence.hash {
            warn!(
                peer = self.own_index,
                from,
                session = round.session_id,
                theirs = %msg.essence_hash.short(),
                ours = %essence.hash.short(),
                "essence hash mismatch, share dropped"
            );
            self.note_rejection(round);
            return;
        }
        if let Err(err) = self.signer.verify_share(&msg.share, &essence.bytes) {
            warn!(peer = self.own_index, from, "share rejected: {}", err);
            self.note_rejection(round);
            return;
        }
        if round.shares.contains_key(&from) {
            debug!(peer = self.own_index, from, "duplicate share");
            return;
        }
        round.shares.insert(from, msg.share);
        debug!(
            peer = self.own_index,
            from,
            have = round.shares.len(),
            need = round.committee.quorum(),
            "share accepted"
        );
        self.try_recover(round);
    }

    fn on_finalized_result(&self, round: &mut ActiveRound, from: PeerIndex, msg: FinalizedResultMsg) {
        if round.is_leader() {
            return;
        }
        if from != round.leader {
            warn!(peer = self.own_index, from, leader = round.leader, "result not from the round leader");
            return;
        }
        let Some(essence) = &round.essence else {
            return;
        };
        if msg.essence_hash != essence.hash {
            warn!(
                peer = self.own_index,
                leader = from,
                theirs = %msg.essence_hash.short(),
                ours = %essence.hash.short(),
                "leader finalized a different essence"
            );
            self.note_rejection(round);
            return;
        }
        if let Err(err) = self.signer.verify_full_signature(&msg.signature, &essence.bytes) {
            warn!(peer = self.own_index, leader = from, "leader signature rejected: {}", err);
            return;
        }
        round.complete(msg.signature);
    }

    fn note_rejection(&self, round: &mut ActiveRound) {
        round.rejections += 1;
        if round.rejections >= self.config.determinism_warn_threshold && !round.determinism_warned {
            round.determinism_warned = true;
            self.determinism_warnings.fetch_add(1, Ordering::Relaxed);
            warn!(
                peer = self.own_index,
                session = round.session_id,
                rejections = round.rejections,
                "DeterminismViolation: repeated mismatching results, execution is not deterministic or the leader is dishonest"
            );
        }
    }

    fn try_recover(&self, round: &mut ActiveRound) {
        if round.completion.is_none() || round.shares.len() < round.committee.quorum() {
            return;
        }
        let Some(essence) = &round.essence else {
            return;
        };
        let shares: Vec<SigShare> = round.shares.values().cloned().collect();
        match self.signer.recover_full_signature(&shares, &essence.bytes) {
            Ok(signature) => round.complete(signature),
            Err(err) => warn!(peer = self.own_index, "can't recover full signature: {}", err),
        }
    }

    fn finalize(
        &self,
        session_id: u64,
        state_index: u32,
        output: VmOutput,
        signature: FullSignature,
    ) -> RoundOutcome {
        let leader = output.leader_index;
        let signed_tx = SignedTransaction::attach(output.essence, signature);
        let is_leader = leader == self.own_index;
        if is_leader {
            self.signer
                .verify_full_signature(&signed_tx.signature, &output.essence_bytes)?;
        }

        // the authoritative state only moves once every step below succeeded
        let mut next = self.state.lock().copy();
        next.apply_block(&output.block)?;
        let commitment = next.state_commitment();
        if commitment != signed_tx.essence.state_commitment {
            return Err(StateError::Consistency(format!(
                "block #{} led to commitment {} instead of {}",
                output.block.index(),
                commitment,
                signed_tx.essence.state_commitment
            ))
            .into());
        }
        if is_leader {
            self.ledger.submit(&signed_tx)?;
        }
        next.commit(&self.sync, std::slice::from_ref(&output.block))?;
        *self.state.lock() = next;

        if is_leader {
            let msg = PeerMessage::FinalizedResult(FinalizedResultMsg {
                session_id,
                state_index,
                essence_hash: output.essence_hash,
                signature: signed_tx.signature.clone(),
            });
            for peer in self.transport.peers() {
                self.send(peer, &msg);
            }
        }

        Ok(RoundResult {
            session_id,
            leader,
            signed_tx,
            block: output.block,
            state_commitment: commitment,
            events: output.events,
        })
    }

    fn send(&self, peer: PeerIndex, msg: &PeerMessage) {
        let (msg_type, payload) = match msg.encode() {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(peer = self.own_index, "can't encode message: {}", err);
                return;
            }
        };
        if let Err(err) = self.transport.send(peer, msg_type, payload) {
            warn!(peer = self.own_index, to = peer, "send failed: {}", err);
        }
    }

    fn end_round(&self, session_id: u64, stage: RoundStage) {
        let mut slot = self.round.lock();
        if slot.active.as_ref().map(|r| r.session_id) == Some(session_id) {
            slot.active = None;
            slot.stage = stage;
        }
    }
}

/// Ends the round when `drive` returns or is dropped. Anything but an
/// explicit `finalized` abandons it.
struct RoundGuard<'a> {
    operator: &'a Operator,
    session_id: u64,
    finalized: bool,
}

impl RoundGuard<'_> {
    fn finalized(mut self) {
        self.finalized = true;
    }
}

impl Drop for RoundGuard<'_> {
    fn drop(&mut self) {
        let stage = if self.finalized {
            RoundStage::Finalized
        } else {
            RoundStage::Abandoned
        };
        self.operator.end_round(self.session_id, stage);
    }
}
