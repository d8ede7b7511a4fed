// Atomic training checkpoints. Each checkpoint is a directory holding three
// files: meta.json (counters, seeds, discount bookkeeping, abstraction hash,
// metrics), store.bin (the full regret/strategy state) and policy.bin (the
// average strategy extracted at that point). The directory is written under a
// temporary name and renamed into place, so a crash can never leave a
// half-checkpoint that resume would pick up. A checkpoint missing any of the
// three files is ignored.

use crate::error::{Result, SolverError};
use crate::policy::Policy;
use crate::store::Store;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

const SCHEMA_VERSION: u32 = 1;
const META_FILE: &str = "meta.json";
const STORE_FILE: &str = "store.bin";
const POLICY_FILE: &str = "policy.bin";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Schema version of the artifact set. Unknown newer fields in meta.json
    /// are ignored on load, so minor additions stay compatible.
    #[serde(default)]
    pub schema_version: u32,
    pub iteration: u64,
    pub elapsed_secs: f64,
    pub master_seed: u64,
    pub exploration: f64,
    /// Number of discount applications so far; the lazy scale factors
    /// themselves live inside the store blob.
    pub discounts_applied: u64,
    pub abstraction_hash: u64,
    #[serde(default)]
    pub metrics: CheckpointMetrics,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointMetrics {
    pub infosets: usize,
    pub chunk_iterations_per_sec: f64,
}

#[derive(Debug)]
pub struct Checkpoint {
    pub meta: CheckpointMeta,
    pub store: Store,
    pub policy: Policy,
}

fn checkpoint_name(iteration: u64) -> String {
    format!("checkpoint_{:012}", iteration)
}

fn is_complete(dir: &Path) -> bool {
    [META_FILE, STORE_FILE, POLICY_FILE]
        .iter()
        .all(|f| dir.join(f).is_file())
}

/// Writes a checkpoint atomically and returns its final directory.
pub fn save(
    root: &Path,
    meta: &CheckpointMeta,
    store: &Store,
    policy: &Policy,
) -> Result<PathBuf> {
    fs::create_dir_all(root)?;
    let final_dir = root.join(checkpoint_name(meta.iteration));
    let tmp_dir = root.join(format!(".tmp_{}", checkpoint_name(meta.iteration)));
    if tmp_dir.exists() {
        fs::remove_dir_all(&tmp_dir)?;
    }
    fs::create_dir_all(&tmp_dir)?;

    let mut meta = meta.clone();
    meta.schema_version = SCHEMA_VERSION;
    serde_json::to_writer_pretty(
        BufWriter::new(File::create(tmp_dir.join(META_FILE))?),
        &meta,
    )?;
    bincode::serialize_into(
        BufWriter::new(File::create(tmp_dir.join(STORE_FILE))?),
        store,
    )?;
    policy.save(&tmp_dir.join(POLICY_FILE))?;

    if final_dir.exists() {
        fs::remove_dir_all(&final_dir)?;
    }
    fs::rename(&tmp_dir, &final_dir)?;
    Ok(final_dir)
}

pub fn load(dir: &Path) -> Result<Checkpoint> {
    if !is_complete(dir) {
        return Err(SolverError::Configuration(format!(
            "incomplete checkpoint at {}",
            dir.display()
        )));
    }
    let meta: CheckpointMeta =
        serde_json::from_reader(BufReader::new(File::open(dir.join(META_FILE))?))?;
    let store: Store = bincode::deserialize_from(BufReader::new(File::open(
        dir.join(STORE_FILE),
    )?))?;
    let policy = Policy::load(&dir.join(POLICY_FILE), None)?;
    Ok(Checkpoint {
        meta,
        store,
        policy,
    })
}

/// Most recent complete checkpoint under `root`, if any. Partial directories
/// from interrupted writes are skipped and temp directories cleaned up.
pub fn latest(root: &Path) -> Result<Option<PathBuf>> {
    if !root.is_dir() {
        return Ok(None);
    }
    let mut best: Option<(u64, PathBuf)> = None;
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => continue,
        };
        if name.starts_with(".tmp_") {
            fs::remove_dir_all(&path).ok();
            continue;
        }
        let iteration = match name
            .strip_prefix("checkpoint_")
            .and_then(|s| s.parse::<u64>().ok())
        {
            Some(i) => i,
            None => continue,
        };
        if !is_complete(&path) {
            continue;
        }
        if best.as_ref().map_or(true, |(i, _)| iteration > *i) {
            best = Some((iteration, path));
        }
    }
    Ok(best.map(|(_, p)| p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreBackend;
    use crate::game::InfoKey;
    use smallvec::smallvec;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "maverick-checkpoint-{}-{}",
            tag,
            std::process::id()
        ));
        fs::remove_dir_all(&dir).ok();
        dir
    }

    fn sample_state() -> (CheckpointMeta, Store, Policy) {
        let mut store = Store::new(StoreBackend::Dense, -1e9);
        let key = InfoKey {
            street: 0,
            bucket: 42,
            path: smallvec![1],
        };
        store.update_regret(&key, 0, 2, 3.0, 1.0);
        store.add_strategy(&key, &[0.7, 0.3], 1.0);
        let policy = Policy::from_store(&store, 0xfeed);
        let meta = CheckpointMeta {
            schema_version: 0,
            iteration: 1000,
            elapsed_secs: 12.5,
            master_seed: 7,
            exploration: 0.6,
            discounts_applied: 3,
            abstraction_hash: 0xfeed,
            metrics: CheckpointMetrics::default(),
        };
        (meta, store, policy)
    }

    #[test]
    fn save_and_reload_round_trips() {
        let root = scratch_dir("roundtrip");
        let (meta, store, policy) = sample_state();
        save(&root, &meta, &store, &policy).unwrap();

        let path = latest(&root).unwrap().expect("checkpoint exists");
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.meta.iteration, 1000);
        assert_eq!(loaded.meta.abstraction_hash, 0xfeed);
        assert_eq!(loaded.store.len(), store.len());
        assert_eq!(loaded.policy.len(), policy.len());
        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn latest_picks_highest_complete_iteration() {
        let root = scratch_dir("latest");
        let (mut meta, store, policy) = sample_state();
        save(&root, &meta, &store, &policy).unwrap();
        meta.iteration = 2000;
        save(&root, &meta, &store, &policy).unwrap();

        // A torn checkpoint directory with a higher iteration must lose
        let torn = root.join(checkpoint_name(9000));
        fs::create_dir_all(&torn).unwrap();
        fs::write(torn.join(META_FILE), "{}").unwrap();

        let path = latest(&root).unwrap().unwrap();
        assert!(path.ends_with(checkpoint_name(2000)));
        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn incomplete_checkpoint_does_not_load() {
        let root = scratch_dir("incomplete");
        let dir = root.join(checkpoint_name(5));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(META_FILE), "{}").unwrap();
        assert!(load(&dir).is_err());
        fs::remove_dir_all(&root).ok();
    }
}
