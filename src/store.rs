// Cumulative regret and strategy storage. One entry per infoset, parallel
// per-action arrays in the node's canonical action order. Two backends share
// the implementation through the `Scalar` value type: the dense backend keeps
// full f64 precision, the compact backend stores f32 for roughly half the
// memory.
//
// Discounting is lazy. The store tracks running multiplicative scales and
// each entry remembers the scale it last synchronized against, so a discount
// call is O(1) and an entry pays for its missed discounts the next time it is
// written. Reads are scale invariant where possible: regret matching and
// average-strategy normalization only depend on ratios.

use crate::config::StoreBackend;
use crate::game::{InfoKey, Street};
use ahash::AHashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::actions::MAX_ACTIONS;

/// Below this the accumulated scale risks denormal underflow; everything is
/// synchronized and the scale resets to 1.
const MIN_SCALE: f64 = 1e-150;

pub trait Scalar:
    Copy + Default + PartialEq + std::fmt::Debug + Serialize + DeserializeOwned
{
    fn from_f64(v: f64) -> Self;
    fn to_f64(self) -> f64;
}

impl Scalar for f64 {
    fn from_f64(v: f64) -> f64 {
        v
    }
    fn to_f64(self) -> f64 {
        self
    }
}

impl Scalar for f32 {
    fn from_f64(v: f64) -> f32 {
        v as f32
    }
    fn to_f64(self) -> f64 {
        self as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "V: Scalar")]
struct Entry<V: Scalar> {
    regrets: SmallVec<[V; MAX_ACTIONS]>,
    strategy: SmallVec<[V; MAX_ACTIONS]>,
    regret_stamp: f64,
    strategy_stamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "V: Scalar")]
pub struct TypedStore<V: Scalar> {
    map: AHashMap<InfoKey, Entry<V>>,
    regret_scale: f64,
    strategy_scale: f64,
    regret_floor: f64,
}

pub type DenseStore = TypedStore<f64>;
pub type CompactStore = TypedStore<f32>;

impl<V: Scalar> TypedStore<V> {
    pub fn new(regret_floor: f64) -> TypedStore<V> {
        TypedStore {
            map: AHashMap::new(),
            regret_scale: 1.0,
            strategy_scale: 1.0,
            regret_floor,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn entry_mut(&mut self, key: &InfoKey, n_actions: usize) -> &mut Entry<V> {
        let (regret_scale, strategy_scale) = (self.regret_scale, self.strategy_scale);
        let entry = self.map.entry(key.clone()).or_insert_with(|| Entry {
            regrets: smallvec::smallvec![V::default(); n_actions],
            strategy: smallvec::smallvec![V::default(); n_actions],
            regret_stamp: regret_scale,
            strategy_stamp: strategy_scale,
        });
        sync_entry(entry, regret_scale, strategy_scale);
        entry
    }

    /// Accumulates `weight * regret` for one action, floor-clamped.
    pub fn update_regret(
        &mut self,
        key: &InfoKey,
        action_index: usize,
        n_actions: usize,
        regret: f64,
        weight: f64,
    ) {
        let floor = self.regret_floor;
        let entry = self.entry_mut(key, n_actions);
        let updated = (entry.regrets[action_index].to_f64() + weight * regret).max(floor);
        entry.regrets[action_index] = V::from_f64(updated);
    }

    /// Regret matching: positive regrets normalized to probabilities, uniform
    /// when none are positive. Scale invariant, so no sync is needed.
    pub fn get_strategy(&self, key: &InfoKey, n_actions: usize) -> SmallVec<[f64; MAX_ACTIONS]> {
        match self.map.get(key) {
            Some(entry) => regret_match(&entry.regrets, n_actions),
            None => uniform(n_actions),
        }
    }

    /// Accumulates weighted strategy mass for later averaging.
    pub fn add_strategy(&mut self, key: &InfoKey, strategy: &[f64], weight: f64) {
        let entry = self.entry_mut(key, strategy.len());
        for (slot, &p) in entry.strategy.iter_mut().zip(strategy) {
            *slot = V::from_f64(slot.to_f64() + weight * p);
        }
    }

    /// Normalized cumulative strategy, uniform before any mass accumulates.
    pub fn get_average_strategy(
        &self,
        key: &InfoKey,
        n_actions: usize,
    ) -> SmallVec<[f64; MAX_ACTIONS]> {
        match self.map.get(key) {
            Some(entry) => {
                let total: f64 = entry.strategy.iter().map(|v| v.to_f64()).sum();
                if total > 0.0 {
                    entry.strategy.iter().map(|v| v.to_f64() / total).collect()
                } else {
                    uniform(n_actions)
                }
            }
            None => uniform(n_actions),
        }
    }

    /// O(1) discount of every stored value, applied lazily per entry.
    pub fn discount(&mut self, regret_factor: f64, strategy_factor: f64) {
        debug_assert!(regret_factor > 0.0 && strategy_factor > 0.0);
        self.regret_scale *= regret_factor;
        self.strategy_scale *= strategy_factor;
        if self.regret_scale < MIN_SCALE || self.strategy_scale < MIN_SCALE {
            self.sync_all();
        }
    }

    fn sync_all(&mut self) {
        for entry in self.map.values_mut() {
            sync_entry(entry, self.regret_scale, self.strategy_scale);
            entry.regret_stamp = 1.0;
            entry.strategy_stamp = 1.0;
        }
        self.regret_scale = 1.0;
        self.strategy_scale = 1.0;
    }

    /// Zeroes negative regrets (the CFR+ update).
    pub fn reset_regrets(&mut self) {
        let (regret_scale, strategy_scale) = (self.regret_scale, self.strategy_scale);
        for entry in self.map.values_mut() {
            sync_entry(entry, regret_scale, strategy_scale);
            for r in entry.regrets.iter_mut() {
                if r.to_f64() < 0.0 {
                    *r = V::default();
                }
            }
        }
    }

    /// True only when every action's regret sits below `threshold`. River
    /// infosets are never prunable.
    pub fn should_prune(&self, key: &InfoKey, n_actions: usize, threshold: f64) -> bool {
        if key.street == Street::River as u8 {
            return false;
        }
        match self.map.get(key) {
            Some(entry) => {
                let factor = self.regret_scale / entry.regret_stamp;
                entry.regrets.len() >= n_actions
                    && entry.regrets.iter().all(|r| r.to_f64() * factor < threshold)
            }
            // Unvisited nodes have zero regret everywhere
            None => false,
        }
    }

    /// Adds `scale` times another store's values into this one. Negative
    /// scales subtract, which is how batch merges remove the shared warm
    /// start counted once per worker.
    pub fn absorb(&mut self, other: &TypedStore<V>, scale: f64) {
        let (other_rs, other_ss) = (other.regret_scale, other.strategy_scale);
        for (key, theirs) in other.map.iter() {
            let regret_factor = scale * other_rs / theirs.regret_stamp;
            let strategy_factor = scale * other_ss / theirs.strategy_stamp;
            let floor = self.regret_floor;
            let entry = self.entry_mut(key, theirs.regrets.len());
            for (slot, r) in entry.regrets.iter_mut().zip(&theirs.regrets) {
                let updated = (slot.to_f64() + r.to_f64() * regret_factor).max(floor);
                *slot = V::from_f64(updated);
            }
            for (slot, s) in entry.strategy.iter_mut().zip(&theirs.strategy) {
                *slot = V::from_f64(slot.to_f64() + s.to_f64() * strategy_factor);
            }
        }
    }

    /// Infoset keys in sorted order, for deterministic artifact output.
    pub fn sorted_keys(&self) -> Vec<InfoKey> {
        let mut keys: Vec<InfoKey> = self.map.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn actions_len(&self, key: &InfoKey) -> Option<usize> {
        self.map.get(key).map(|e| e.regrets.len())
    }
}

fn sync_entry<V: Scalar>(entry: &mut Entry<V>, regret_scale: f64, strategy_scale: f64) {
    if entry.regret_stamp != regret_scale {
        let factor = regret_scale / entry.regret_stamp;
        for r in entry.regrets.iter_mut() {
            *r = V::from_f64(r.to_f64() * factor);
        }
        entry.regret_stamp = regret_scale;
    }
    if entry.strategy_stamp != strategy_scale {
        let factor = strategy_scale / entry.strategy_stamp;
        for s in entry.strategy.iter_mut() {
            *s = V::from_f64(s.to_f64() * factor);
        }
        entry.strategy_stamp = strategy_scale;
    }
}

fn regret_match<V: Scalar>(regrets: &[V], n_actions: usize) -> SmallVec<[f64; MAX_ACTIONS]> {
    let positive: SmallVec<[f64; MAX_ACTIONS]> = (0..n_actions)
        .map(|i| regrets.get(i).map_or(0.0, |r| r.to_f64().max(0.0)))
        .collect();
    let total: f64 = positive.iter().sum();
    if total > 0.0 {
        positive.iter().map(|r| r / total).collect()
    } else {
        uniform(n_actions)
    }
}

fn uniform(n_actions: usize) -> SmallVec<[f64; MAX_ACTIONS]> {
    smallvec::smallvec![1.0 / n_actions as f64; n_actions]
}

/// Backend-dispatching store. Both variants expose the same operations and
/// produce equivalent strategies within f32 tolerance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Store {
    Dense(DenseStore),
    Compact(CompactStore),
}

macro_rules! dispatch {
    ($self:expr, $store:ident => $body:expr) => {
        match $self {
            Store::Dense($store) => $body,
            Store::Compact($store) => $body,
        }
    };
}

impl Store {
    pub fn new(backend: StoreBackend, regret_floor: f64) -> Store {
        match backend {
            StoreBackend::Dense => Store::Dense(DenseStore::new(regret_floor)),
            StoreBackend::Compact => Store::Compact(CompactStore::new(regret_floor)),
        }
    }

    pub fn backend(&self) -> StoreBackend {
        match self {
            Store::Dense(_) => StoreBackend::Dense,
            Store::Compact(_) => StoreBackend::Compact,
        }
    }

    pub fn len(&self) -> usize {
        dispatch!(self, s => s.len())
    }

    pub fn is_empty(&self) -> bool {
        dispatch!(self, s => s.is_empty())
    }

    pub fn update_regret(
        &mut self,
        key: &InfoKey,
        action_index: usize,
        n_actions: usize,
        regret: f64,
        weight: f64,
    ) {
        dispatch!(self, s => s.update_regret(key, action_index, n_actions, regret, weight))
    }

    pub fn get_strategy(&self, key: &InfoKey, n_actions: usize) -> SmallVec<[f64; MAX_ACTIONS]> {
        dispatch!(self, s => s.get_strategy(key, n_actions))
    }

    pub fn add_strategy(&mut self, key: &InfoKey, strategy: &[f64], weight: f64) {
        dispatch!(self, s => s.add_strategy(key, strategy, weight))
    }

    pub fn get_average_strategy(
        &self,
        key: &InfoKey,
        n_actions: usize,
    ) -> SmallVec<[f64; MAX_ACTIONS]> {
        dispatch!(self, s => s.get_average_strategy(key, n_actions))
    }

    pub fn discount(&mut self, regret_factor: f64, strategy_factor: f64) {
        dispatch!(self, s => s.discount(regret_factor, strategy_factor))
    }

    pub fn reset_regrets(&mut self) {
        dispatch!(self, s => s.reset_regrets())
    }

    pub fn should_prune(&self, key: &InfoKey, n_actions: usize, threshold: f64) -> bool {
        dispatch!(self, s => s.should_prune(key, n_actions, threshold))
    }

    pub fn sorted_keys(&self) -> Vec<InfoKey> {
        dispatch!(self, s => s.sorted_keys())
    }

    pub fn actions_len(&self, key: &InfoKey) -> Option<usize> {
        dispatch!(self, s => s.actions_len(key))
    }

    /// Backends must match; workers always clone the coordinator's store so
    /// this holds by construction.
    pub fn absorb(&mut self, other: &Store, scale: f64) {
        match (self, other) {
            (Store::Dense(a), Store::Dense(b)) => a.absorb(b, scale),
            (Store::Compact(a), Store::Compact(b)) => a.absorb(b, scale),
            _ => panic!("cannot merge stores with different backends"),
        }
    }
}
