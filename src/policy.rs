// The blueprint policy artifact: average strategies extracted from a trained
// store, tagged with the abstraction hash so a stale or mismatched artifact
// cannot be loaded by accident.

use crate::abstraction::preflop_hand_name;
use crate::error::{Result, SolverError};
use crate::game::{InfoKey, Street};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub abstraction_hash: u64,
    /// Sorted by key, so serialization is deterministic for a given store.
    table: Vec<(InfoKey, Vec<f64>)>,
}

impl Policy {
    pub fn from_store(store: &crate::store::Store, abstraction_hash: u64) -> Policy {
        let mut table = Vec::with_capacity(store.len());
        for key in store.sorted_keys() {
            let n = store.actions_len(&key).expect("key came from the store");
            let strategy = store.get_average_strategy(&key, n);
            table.push((key, strategy.to_vec()));
        }
        Policy {
            abstraction_hash,
            table,
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn lookup(&self, key: &InfoKey) -> Option<&[f64]> {
        self.table
            .binary_search_by(|(k, _)| k.cmp(key))
            .ok()
            .map(|i| self.table[i].1.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&InfoKey, &[f64])> {
        self.table.iter().map(|(k, s)| (k, s.as_slice()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        bincode::serialize_into(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Loads a policy, rejecting it if its abstraction hash does not match
    /// `expected_hash`. Pass `None` to deliberately bypass validation.
    pub fn load(path: &Path, expected_hash: Option<u64>) -> Result<Policy> {
        let file = File::open(path)?;
        let policy: Policy = bincode::deserialize_from(BufReader::new(file))?;
        if let Some(expected) = expected_hash {
            if policy.abstraction_hash != expected {
                return Err(SolverError::AbstractionMismatch {
                    expected,
                    found: policy.abstraction_hash,
                });
            }
        }
        Ok(policy)
    }

    /// Human-readable opening ranges: the root preflop strategy per starting
    /// hand class, as JSON. Useful for eyeballing whether training converged
    /// to something sane.
    pub fn preflop_report(&self) -> serde_json::Value {
        let mut report = serde_json::Map::new();
        for (key, strategy) in &self.table {
            if key.street == Street::Preflop as u8 && key.path.is_empty() {
                let probs: Vec<serde_json::Value> = strategy
                    .iter()
                    .map(|p| serde_json::json!((p * 1000.0).round() / 1000.0))
                    .collect();
                report.insert(
                    preflop_hand_name(key.bucket),
                    serde_json::Value::Array(probs),
                );
            }
        }
        serde_json::Value::Object(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreBackend;
    use crate::store::Store;
    use smallvec::smallvec;

    fn sample_store() -> Store {
        let mut store = Store::new(StoreBackend::Dense, -1e9);
        let k = InfoKey {
            street: 0,
            bucket: crate::abstraction::preflop_bin(&crate::card_utils::strvec2cards(&[
                "As", "Ad",
            ])),
            path: smallvec![],
        };
        store.add_strategy(&k, &[0.1, 0.9], 10.0);
        store
    }

    #[test]
    fn lookup_finds_stored_strategies() {
        let store = sample_store();
        let policy = Policy::from_store(&store, 0xabc);
        let key = store.sorted_keys().pop().unwrap();
        let strategy = policy.lookup(&key).unwrap();
        assert!((strategy[1] - 0.9).abs() < 1e-9);
        assert!(policy
            .lookup(&InfoKey {
                street: 3,
                bucket: 0,
                path: smallvec![9]
            })
            .is_none());
    }

    #[test]
    fn hash_mismatch_fails_loudly_unless_bypassed() {
        let store = sample_store();
        let policy = Policy::from_store(&store, 0xabc);
        let path = std::env::temp_dir().join(format!("maverick-policy-{}.bin", std::process::id()));
        policy.save(&path).unwrap();

        assert!(Policy::load(&path, Some(0xdef)).is_err());
        assert!(Policy::load(&path, Some(0xabc)).is_ok());
        assert!(Policy::load(&path, None).is_ok());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn preflop_report_names_hands() {
        let store = sample_store();
        let policy = Policy::from_store(&store, 0);
        let report = policy.preflop_report();
        assert!(report.get("AA").is_some());
    }
}
