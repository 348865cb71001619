//! DAG admission and milestone orchestration
//!
//! `DagManager` is the single authority for admitting candidate vertices,
//! detecting milestone-qualifying ones, and publishing confirmation
//! events. All admission runs under one mutex so exactly one candidate is
//! decided at a time; that mutex is the ledger's only serialization point.
//!
//! Confirmation is published over bounded channels rather than inline
//! callbacks, so a slow subscriber can never stall admission.

use crate::error::{DagError, Result};
use crate::milestone::{check_milestone_pow, Milestone};
use crate::vertex::{check_structure, Vertex};
use lattice_types::difficulty::{compact_to_target, RetargetParams};
use lattice_types::transaction::OutPoint;
use lattice_types::{Block, Hash256, SignatureScheme};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Outcome of a non-rejected admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Appended to the active level set; `milestone` is true when the
    /// vertex also sealed a level set and advanced the chain head.
    Accepted { milestone: bool },

    /// Identifier already admitted or persisted. Idempotent success.
    AlreadyKnown,

    /// An ancestor reference is unknown; the block is held in the orphan
    /// pool until the ancestor arrives or the hold expires.
    Orphaned,
}

/// Event delivered to confirmation subscribers.
#[derive(Debug, Clone)]
pub struct LevelSetConfirmed {
    pub milestone: Arc<Milestone>,
    /// Identifiers of the confirmed vertices, in level-set order.
    pub confirmed: Vec<Hash256>,
}

/// Durable sink for sealed level sets. Implemented by the level-set store;
/// injected so the manager owns no storage detail.
pub trait LevelSetPersistence: Send + Sync {
    fn store_level_set(&self, milestone: &Milestone) -> Result<()>;
    fn contains_block(&self, hash: &Hash256) -> bool;

    /// Miner-chain height of a persisted vertex, consulted when the
    /// vertex has aged out of the in-memory cache.
    fn miner_chain_height(&self, hash: &Hash256) -> Option<u64>;
}

#[derive(Debug, Clone)]
pub struct DagParams {
    pub retarget: RetargetParams,
    pub max_orphans: usize,
    pub orphan_ttl: Duration,
    pub event_capacity: usize,

    /// Sealed level sets kept in the vertex cache. Older history is
    /// evicted and answered by the store.
    pub retained_level_sets: usize,
}

impl Default for DagParams {
    fn default() -> Self {
        Self {
            retarget: RetargetParams::default(),
            max_orphans: 1024,
            orphan_ttl: Duration::from_secs(600),
            event_capacity: 256,
            retained_level_sets: 32,
        }
    }
}

/// State mutated only under the admission lock.
struct AdmissionState {
    /// In-progress level set, arrival order.
    active: Vec<Arc<Vertex>>,

    /// Outpoints spent within the active level set.
    spent: HashSet<OutPoint>,

    /// Blocks waiting on a missing ancestor, keyed by that ancestor.
    orphans: HashMap<Hash256, Vec<(Block, Instant)>>,
    orphan_count: usize,

    /// Hashes of the newest sealed level sets, oldest first; drives
    /// cache eviction.
    recent: VecDeque<Vec<Hash256>>,
}

pub struct DagManager {
    params: DagParams,
    scheme: Arc<dyn SignatureScheme>,
    store: Arc<dyn LevelSetPersistence>,

    head: RwLock<Arc<Milestone>>,
    state: Mutex<AdmissionState>,

    /// Light, evictable vertex cache. The store owns history.
    known: DashMap<Hash256, Arc<Vertex>>,

    subscribers: Mutex<Vec<mpsc::Sender<LevelSetConfirmed>>>,
}

impl DagManager {
    pub fn new(
        store: Arc<dyn LevelSetPersistence>,
        scheme: Arc<dyn SignatureScheme>,
        params: DagParams,
    ) -> Self {
        let genesis = Arc::new(Milestone::genesis(&params.retarget));
        let known = DashMap::new();
        for vertex in &genesis.snapshot.level_set {
            known.insert(vertex.hash, vertex.clone());
        }

        DagManager {
            params,
            scheme,
            store,
            head: RwLock::new(genesis),
            state: Mutex::new(AdmissionState {
                active: Vec::new(),
                spent: HashSet::new(),
                orphans: HashMap::new(),
                orphan_count: 0,
                recent: VecDeque::new(),
            }),
            known,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Current chain tip milestone. Cheap snapshot read.
    pub fn milestone_head(&self) -> Arc<Milestone> {
        self.head.read().clone()
    }

    /// Subscribe to level-set confirmation events. Delivery is best
    /// effort over a bounded channel; the store remains the source of
    /// truth for anything a subscriber misses.
    pub fn subscribe(&self) -> mpsc::Receiver<LevelSetConfirmed> {
        let (tx, rx) = mpsc::channel(self.params.event_capacity);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Admit a candidate block into the DAG.
    pub fn add_vertex(&self, block: Block) -> Result<Admission> {
        let mut state = self.state.lock();
        self.expire_orphans(&mut state);

        let (admission, hash) = self.admit_locked(&mut state, block)?;

        // A newly admitted ancestor may unblock held orphans; re-admit
        // them without resubmission, transitively.
        if matches!(admission, Admission::Accepted { .. }) {
            let mut ready = vec![hash];
            while let Some(parent) = ready.pop() {
                let Some(waiting) = state.orphans.remove(&parent) else {
                    continue;
                };
                state.orphan_count -= waiting.len();
                for (orphan, _) in waiting {
                    match self.admit_locked(&mut state, orphan) {
                        Ok((Admission::Accepted { .. }, h)) => ready.push(h),
                        Ok(_) => {}
                        Err(e) => debug!(error = %e, "held orphan rejected on retry"),
                    }
                }
            }
        }

        Ok(admission)
    }

    fn admit_locked(
        &self,
        state: &mut AdmissionState,
        mut block: Block,
    ) -> Result<(Admission, Hash256)> {
        let hash = block.seal()?;

        if self.known.contains_key(&hash) || self.store.contains_block(&hash) {
            return Ok((Admission::AlreadyKnown, hash));
        }

        if let Some(missing) = self.missing_ancestor(&block) {
            if state.orphan_count >= self.params.max_orphans {
                return Err(DagError::OrphanPoolFull(missing));
            }
            debug!(block = %hash, %missing, "holding orphan until ancestor arrives");
            state
                .orphans
                .entry(missing)
                .or_default()
                .push((block, Instant::now()));
            state.orphan_count += 1;
            return Ok((Admission::Orphaned, hash));
        }

        let head = self.milestone_head();
        let block_target = compact_to_target(head.snapshot.block_bits)?;
        if !hash.meets_target(&block_target) {
            return Err(DagError::InsufficientWork {
                hash,
                bits: head.snapshot.block_bits,
            });
        }

        let validity = check_structure(&block, self.scheme.as_ref(), &state.spent)?;

        let miner_chain_height = self
            .known
            .get(&block.header.prev_hash)
            .map(|v| v.miner_chain_height + 1)
            .or_else(|| {
                self.store
                    .miner_chain_height(&block.header.prev_hash)
                    .map(|h| h + 1)
            })
            .unwrap_or(1);
        let prior_reward = state
            .active
            .last()
            .map(|v| v.cumulative_reward)
            .unwrap_or(head.snapshot.cumulative_reward);

        let vertex = Arc::new(Vertex {
            hash,
            height: head.height + 1,
            miner_chain_height,
            cumulative_reward: prior_reward + Vertex::block_reward(&block),
            validity,
            milestone: None,
            block: Arc::new(block),
        });

        for tx in vertex.block.transactions() {
            for input in &tx.inputs {
                state.spent.insert(input.outpoint.clone());
            }
        }
        state.active.push(vertex.clone());
        self.known.insert(hash, vertex.clone());

        if !check_milestone_pow(&hash, &head.snapshot) {
            return Ok((Admission::Accepted { milestone: false }, hash));
        }

        let milestone = Milestone::create_next(
            &head,
            &vertex,
            state.active.clone(),
            &self.params.retarget,
        )?;
        // Persist before advancing the head; a storage failure leaves the
        // vertex admitted but the level set unsealed, to be retried by the
        // next qualifying candidate.
        self.store.store_level_set(&milestone)?;

        let milestone = Arc::new(milestone);
        for sealed in &milestone.snapshot.level_set {
            self.known.insert(sealed.hash, sealed.clone());
        }
        *self.head.write() = milestone.clone();
        state.active.clear();
        state.spent.clear();

        // The cache retains only the newest sealed sets; anything older
        // is durable and served from the store.
        state
            .recent
            .push_back(milestone.snapshot.level_set.iter().map(|v| v.hash).collect());
        while state.recent.len() > self.params.retained_level_sets {
            if let Some(aged_out) = state.recent.pop_front() {
                for hash in &aged_out {
                    self.known.remove(hash);
                }
            }
        }

        debug!(height = milestone.height, hash = %milestone.hash, "milestone sealed");
        self.publish(LevelSetConfirmed {
            confirmed: milestone.snapshot.level_set.iter().map(|v| v.hash).collect(),
            milestone,
        });

        Ok((Admission::Accepted { milestone: true }, hash))
    }

    fn missing_ancestor(&self, block: &Block) -> Option<Hash256> {
        [
            block.header.prev_hash,
            block.header.tip_hash,
            block.header.milestone_hash,
        ]
        .into_iter()
        .find(|h| {
            !h.is_zero() && !self.known.contains_key(h) && !self.store.contains_block(h)
        })
    }

    fn expire_orphans(&self, state: &mut AdmissionState) {
        if state.orphan_count == 0 {
            return;
        }
        let ttl = self.params.orphan_ttl;
        let mut dropped = 0usize;
        state.orphans.retain(|_, waiting| {
            let before = waiting.len();
            waiting.retain(|(_, held_since)| held_since.elapsed() < ttl);
            dropped += before - waiting.len();
            !waiting.is_empty()
        });
        if dropped > 0 {
            state.orphan_count -= dropped;
            debug!(dropped, "expired orphans");
        }
    }

    fn publish(&self, event: LevelSetConfirmed) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("confirmation subscriber lagging, event dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Block for a vertex still cached in memory, confirmed or not.
    /// History evicted from the cache is answered by the store instead.
    pub fn get_block(&self, hash: &Hash256) -> Option<Arc<Block>> {
        self.known.get(hash).map(|v| v.block.clone())
    }

    /// Number of vertices in the in-progress level set.
    pub fn active_len(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Number of blocks currently held as orphans.
    pub fn orphan_len(&self) -> usize {
        self.state.lock().orphan_count
    }
}
