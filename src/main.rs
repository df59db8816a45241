/*
    Runs an in-memory committee: every member keeps its own store, executes
    the same rounds against a small counter contract and finalizes them
    through share collection at the round leader.
*/

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::RngCore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use committee_round::common::crypto::{Ed25519ShareSigner, Keypair};
use committee_round::common::hashing::HashValue;
use committee_round::common::{AgentId, ChainId, Hname, PeerIndex};
use committee_round::config::NodeConfig;
use committee_round::consensus::{Collaborators, MemLedger, Operator, PeerDirectory, RoundOutcome};
use committee_round::kv::{KvRead, KvWrite, MemStore};
use committee_round::network::{ChannelNetwork, Node};
use committee_round::state::{MustOptimisticVirtualState, OptimisticStateReader, StateError, StateSync, VirtualState};
use committee_round::vm::{
    Contract, ContractRegistry, ExecutionContext, Params, Request, RoundInputs, RoundTask, Runner, VmError,
};

#[derive(Parser, Debug)]
#[command(name = "committee-round")]
#[command(version, about, long_about = None)]
struct Args {
    /// Committee size
    #[arg(short = 'n', long, default_value = "4")]
    nodes: u16,

    /// Rounds to run
    #[arg(short = 'r', long, default_value = "3")]
    rounds: u64,

    /// Shares needed to finalize; derived from the committee size if unset
    #[arg(short = 'q', long)]
    quorum: Option<usize>,

    /// Round timeout in milliseconds
    #[arg(long)]
    round_timeout_ms: Option<u64>,

    /// JSON node config
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
}

struct DemoCounter;

impl Contract for DemoCounter {
    fn name(&self) -> &str {
        "counter"
    }

    fn call(&self, ctx: &mut ExecutionContext<'_>, entry_point: Hname) -> Result<Params, VmError> {
        if entry_point != Hname::from_name("inc") {
            return Err(VmError::EntryPointNotFound {
                contract: self.hname(),
                entry_point,
            });
        }
        let by = ctx.params().get_u64(b"by")?.unwrap_or(1);
        let mut state = ctx.state();
        let n = state.get_u64(b"n")?.unwrap_or(0) + by;
        state.set_u64(b"n", n);
        ctx.event(format!("counter is now {}", n));
        Ok(Params::new().with_u64("n", n))
    }
}

fn now_nanos() -> Result<i64> {
    let since = SystemTime::now().duration_since(UNIX_EPOCH)?;
    Ok(i64::try_from(since.as_nanos())?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,committee_round=debug")),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => NodeConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => NodeConfig::default(),
    };
    if args.quorum.is_some() {
        config.consensus.quorum = args.quorum;
    }
    if let Some(ms) = args.round_timeout_ms {
        config.consensus.round_timeout_ms = ms;
    }
    let n = args.nodes as usize;
    config.validate(n)?;
    let quorum = config.consensus.quorum_for(n);
    info!(nodes = n, quorum, rounds = args.rounds, "starting committee");

    let chain = ChainId::from_name("demo");
    let keys: Vec<Keypair> = (0..args.nodes).map(|_| Keypair::new_pair()).collect();
    let directory = Arc::new(PeerDirectory::from_pubkeys(keys.iter().map(|k| k.pubkey()).collect()));
    let registry = Arc::new(ContractRegistry::new().with(Arc::new(DemoCounter)));
    let (_network, endpoints) = ChannelNetwork::mesh(args.nodes);

    let mut operators = Vec::with_capacity(n);
    let mut ledgers = Vec::with_capacity(n);
    for ((index, key), (transport, inbox)) in (0..args.nodes).zip(keys).zip(endpoints) {
        let signer = Ed25519ShareSigner::new(index, key, directory.snapshot(), quorum);
        let (state, _) = VirtualState::new_origin(MemStore::new(), chain)?;
        let ledger = Arc::new(MemLedger::new());
        let operator = Arc::new(Operator::new(
            index,
            directory.clone(),
            Collaborators {
                signer: Arc::new(signer),
                transport: Arc::new(transport),
                ledger: ledger.clone(),
            },
            Runner::new(registry.clone()),
            state,
            StateSync::new(),
            &config,
        )?);
        Node::new(operator.clone(), inbox, config.consensus.tick_interval()).spawn();
        operators.push(operator);
        ledgers.push(ledger);
    }

    let sender = AgentId::for_pubkey(&Keypair::new_pair().pubkey());
    let counter = Hname::from_name("counter");
    for session in 1..=args.rounds {
        let requests = vec![Request::new(sender, counter, Hname::from_name("inc"))
            .with_params(Params::new().with_u64("by", session))
            .with_nonce(session)];
        let timestamp = now_nanos()?;
        let mut entropy = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut entropy);

        let handles: Vec<_> = operators
            .iter()
            .map(|op| {
                let op = op.clone();
                let inputs = RoundInputs::new(
                    session,
                    chain,
                    requests.clone(),
                    timestamp,
                    HashValue(entropy),
                    sender,
                    op.baseline(),
                );
                let peer = op.own_index();
                let task = RoundTask::new(
                    inputs,
                    Box::new(move |outcome: &RoundOutcome| {
                        match outcome {
                            Ok(result) if result.leader == peer => {
                                for event in &result.events {
                                    info!(peer, session, "event: {}", event);
                                }
                            }
                            Ok(_) => {}
                            Err(err) => warn!(peer, session, "callback: round failed: {}", err),
                        }
                    }),
                );
                tokio::spawn(async move { op.run_round(task).await })
            })
            .collect();

        let mut finalized = 0;
        for handle in handles {
            if handle.await?.is_ok() {
                finalized += 1;
            }
        }
        info!(session, finalized, "round done");
        if finalized < quorum {
            bail!("round {} finalized on {} of {} members only", session, finalized, n);
        }
    }

    for (op, ledger) in operators.iter().zip(&ledgers) {
        report(op.own_index(), op, ledger)?;
    }
    Ok(())
}

fn report(peer: PeerIndex, op: &Operator, ledger: &MemLedger) -> Result<()> {
    let snapshot = op.state_snapshot();
    let reader = OptimisticStateReader::new(snapshot.db().clone(), op.sync());
    let stored = match reader.hash() {
        Ok(hash) => hash.short(),
        Err(StateError::NotFound(_)) => "none".to_string(),
        Err(err) => return Err(err.into()),
    };

    // every writer has stopped, so the baseline can't move any more
    let state = MustOptimisticVirtualState::wrap(snapshot, op.baseline());
    let key = [Hname::from_name("counter").to_bytes().as_slice(), b"n"].concat();
    let value = state.get(&key).map(|v| committee_round::kv::decode_u64(&v)).transpose()?;
    let led: Vec<u32> = ledger.submitted().iter().map(|tx| tx.essence.block_index).collect();
    println!(
        "peer #{}: block #{} commitment {} (stored {}), counter = {:?}, led blocks {:?}",
        peer,
        state.block_index(),
        state.state_commitment().short(),
        stored,
        value,
        led
    );
    Ok(())
}
