// Training coordinator. Drives MCCFR iterations across a pool of worker
// threads, each owning a private copy of the store; results come back over a
// channel and are merged by subtraction against the batch's shared warm-start
// snapshot. Long runs are split into chunks with an atomic checkpoint and a
// full worker-pool teardown at every boundary, so a run can be killed and
// resumed at any point.
//
// Nothing regret-related is shared between threads. A worker's store is its
// own until the moment it is sent back, which rules out data races without a
// single lock.

use crate::abstraction::{fnv1a64, CardAbstraction};
use crate::card_utils::pbar;
use crate::checkpoint::{self, CheckpointMeta, CheckpointMetrics};
use crate::config::{Config, DiscountMode, GameConfig, TrainingConfig};
use crate::error::{Result, SolverError};
use crate::policy::Policy;
use crate::sampler::{Buckets, Sampler};
use crate::store::Store;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Poll interval while draining worker results. Short enough that a worker
/// never blocks long on a full channel while the coordinator is live.
const COLLECT_POLL: Duration = Duration::from_millis(50);

pub struct Trainer {
    game: GameConfig,
    training: TrainingConfig,
    buckets: Arc<dyn Buckets + Send + Sync>,
    abstraction_hash: u64,
    pub store: Store,
    pub iteration: u64,
    elapsed_secs: f64,
    discounts_applied: u64,
}

impl Trainer {
    pub fn new(config: &Config, abstraction: CardAbstraction) -> Result<Trainer> {
        let hash = abstraction.hash();
        Trainer::with_buckets(config, hash, Arc::new(abstraction))
    }

    /// Builds a trainer over any bucketing. The hash still guards
    /// checkpoint compatibility.
    pub fn with_buckets(
        config: &Config,
        abstraction_hash: u64,
        buckets: Arc<dyn Buckets + Send + Sync>,
    ) -> Result<Trainer> {
        config.validate()?;
        let store = Store::new(config.training.backend, config.training.regret_floor);
        Ok(Trainer {
            game: config.game.clone(),
            training: config.training.clone(),
            buckets,
            abstraction_hash,
            store,
            iteration: 0,
            elapsed_secs: 0.0,
            discounts_applied: 0,
        })
    }

    /// Resumes from the latest complete checkpoint if one exists, otherwise
    /// starts fresh. A checkpoint built against a different abstraction is a
    /// fatal error, never silently ignored.
    pub fn resume_or_new(config: &Config, abstraction: CardAbstraction) -> Result<Trainer> {
        let mut trainer = Trainer::new(config, abstraction)?;
        trainer.try_resume()?;
        Ok(trainer)
    }

    /// Restores state from the latest complete checkpoint. Returns whether a
    /// checkpoint was found.
    pub fn try_resume(&mut self) -> Result<bool> {
        let root = Path::new(&self.training.checkpoint_dir);
        let dir = match checkpoint::latest(root)? {
            Some(dir) => dir,
            None => return Ok(false),
        };
        let loaded = checkpoint::load(&dir)?;
        if loaded.meta.abstraction_hash != self.abstraction_hash {
            return Err(SolverError::AbstractionMismatch {
                expected: self.abstraction_hash,
                found: loaded.meta.abstraction_hash,
            });
        }
        log::info!(
            "resuming from {} at iteration {}",
            dir.display(),
            loaded.meta.iteration
        );
        self.store = loaded.store;
        self.iteration = loaded.meta.iteration;
        self.elapsed_secs = loaded.meta.elapsed_secs;
        self.discounts_applied = loaded.meta.discounts_applied;
        // The seed stream and exploration schedule continue exactly where
        // the checkpointed run left off, whatever the live config now says.
        if self.training.master_seed != loaded.meta.master_seed
            || self.training.exploration != loaded.meta.exploration
        {
            log::warn!(
                "checkpoint overrides configured master_seed/exploration ({} / {})",
                loaded.meta.master_seed,
                loaded.meta.exploration
            );
        }
        self.training.master_seed = loaded.meta.master_seed;
        self.training.exploration = loaded.meta.exploration;
        Ok(true)
    }

    fn target_iterations(&self) -> u64 {
        if self.training.iterations == 0 {
            u64::MAX
        } else {
            self.training.iterations
        }
    }

    fn budget_exhausted(&self) -> bool {
        if self.iteration >= self.target_iterations() {
            return true;
        }
        if let Some(minutes) = self.training.time_budget_minutes {
            if self.elapsed_secs >= minutes * 60.0 {
                return true;
            }
        }
        false
    }

    /// Runs training to completion (iteration and/or time budget), writing a
    /// checkpoint at each chunk boundary, and returns the blueprint policy.
    pub fn run(&mut self) -> Result<Policy> {
        loop {
            // The elapsed counter is brought up to date at the end of every
            // chunk, before this check.
            if self.budget_exhausted() {
                break;
            }
            let chunk_start = Instant::now();
            let chunk_end = self
                .iteration
                .saturating_add(self.training.chunk_iterations)
                .min(self.target_iterations());
            let bar = pbar(chunk_end - self.iteration);

            while self.iteration < chunk_end {
                if let Some(minutes) = self.training.chunk_minutes {
                    if chunk_start.elapsed().as_secs_f64() >= minutes * 60.0 {
                        break;
                    }
                }
                let interval = self.training.discount_interval;
                let batch = (interval - self.iteration % interval).min(chunk_end - self.iteration);
                self.run_batch(batch)?;
                if self.iteration % interval == 0 {
                    self.apply_discount();
                }
                bar.inc(batch);
            }
            bar.finish_and_clear();

            let chunk_secs = chunk_start.elapsed().as_secs_f64();
            self.elapsed_secs += chunk_secs;
            let dir = self.save_checkpoint(chunk_secs)?;
            log::info!(
                "chunk complete: iteration {}, {} infosets, checkpoint {}",
                self.iteration,
                self.store.len(),
                dir.display()
            );

            if !self.budget_exhausted() && self.training.inter_chunk_delay_secs > 0.0 {
                // The pool is already torn down; give the allocator a moment
                // to return freed pages before the next chunk spins up.
                thread::sleep(Duration::from_secs_f64(self.training.inter_chunk_delay_secs));
            }
        }
        Ok(self.policy())
    }

    /// Runs one batch across the worker pool and merges the results.
    /// Surviving workers' results are kept even if some workers die.
    pub fn run_batch(&mut self, batch: u64) -> Result<()> {
        let workers = self.training.worker_count().min(batch.max(1) as usize);
        let base = self.iteration;
        let snapshot = self.store.clone();
        let (tx, rx) = mpsc::channel::<Store>();

        let mut handles = Vec::with_capacity(workers);
        for w in 0..workers {
            let tx = tx.clone();
            let mut store = snapshot.clone();
            let game = self.game.clone();
            let training = self.training.clone();
            let buckets = Arc::clone(&self.buckets);
            // Iteration numbers interleave across workers so the traverser
            // keeps alternating within each worker's share.
            let ts: Vec<u64> = (1..=batch)
                .filter(|i| (i - 1) % workers as u64 == w as u64)
                .map(|i| base + i)
                .collect();
            let seed = worker_seed(training.master_seed, base, w);
            handles.push(thread::spawn(move || {
                let sampler = Sampler::new(&game, &training, buckets.as_ref());
                let mut rng = StdRng::seed_from_u64(seed);
                for t in ts {
                    sampler.run_iteration(&mut store, t, &mut rng);
                }
                tx.send(store).ok();
            }));
        }
        drop(tx);

        // Drain while the workers are still running. Blocking until join and
        // only then reading would deadlock against a worker stuck sending an
        // oversized result.
        let deadline = Instant::now() + Duration::from_secs_f64(self.training.collection_timeout_secs);
        let mut results: Vec<Store> = Vec::with_capacity(workers);
        while results.len() < workers && Instant::now() < deadline {
            match rx.recv_timeout(COLLECT_POLL) {
                Ok(store) => results.push(store),
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        for handle in handles {
            if handle.join().is_err() {
                log::warn!("a worker died mid-batch; merging the survivors");
            }
        }
        if results.is_empty() {
            return Err(SolverError::ResourceExhaustion(
                "no worker returned results for this batch".to_string(),
            ));
        }
        if results.len() < workers {
            log::warn!("collected {}/{} worker results", results.len(), workers);
        }

        // Each result is snapshot + its own updates; the canonical store is
        // still the bare snapshot. Adding all results and subtracting the
        // snapshot once per result leaves snapshot + the summed updates.
        for result in &results {
            self.store.absorb(result, 1.0);
        }
        self.store.absorb(&snapshot, -(results.len() as f64));

        self.iteration += batch;
        Ok(())
    }

    fn apply_discount(&mut self) {
        match self.training.discount_mode {
            DiscountMode::None => {}
            DiscountMode::Static => {
                self.store.discount(
                    self.training.static_regret_discount,
                    self.training.static_strategy_discount,
                );
            }
            DiscountMode::Adaptive => {
                let t = self.iteration as f64;
                let d = self.training.discount_interval as f64;
                let alpha = (t + d) / (t + 2.0 * d);
                let beta = t / (t + d);
                self.store.discount(alpha, beta);
            }
        }
        if self.training.cfr_plus {
            self.store.reset_regrets();
        }
        self.discounts_applied += 1;
    }

    fn save_checkpoint(&self, chunk_secs: f64) -> Result<std::path::PathBuf> {
        let meta = CheckpointMeta {
            schema_version: 0,
            iteration: self.iteration,
            elapsed_secs: self.elapsed_secs,
            master_seed: self.training.master_seed,
            exploration: self.training.exploration,
            discounts_applied: self.discounts_applied,
            abstraction_hash: self.abstraction_hash,
            metrics: CheckpointMetrics {
                infosets: self.store.len(),
                chunk_iterations_per_sec: if chunk_secs > 0.0 {
                    self.training.chunk_iterations as f64 / chunk_secs
                } else {
                    0.0
                },
            },
        };
        checkpoint::save(
            Path::new(&self.training.checkpoint_dir),
            &meta,
            &self.store,
            &self.policy(),
        )
    }

    pub fn policy(&self) -> Policy {
        Policy::from_store(&self.store, self.abstraction_hash)
    }
}

fn worker_seed(master_seed: u64, batch_base: u64, worker: usize) -> u64 {
    let mut bytes = [0u8; 24];
    bytes[..8].copy_from_slice(&master_seed.to_le_bytes());
    bytes[8..16].copy_from_slice(&batch_base.to_le_bytes());
    bytes[16..24].copy_from_slice(&(worker as u64).to_le_bytes());
    fnv1a64(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstraction::preflop_bin;
    use crate::card_utils::Card;
    use crate::game::Street;

    struct PreflopOnly;

    impl Buckets for PreflopOnly {
        fn bucket_id(&self, hole: &[Card], _board: &[Card], _street: Street) -> u32 {
            preflop_bin(hole)
        }
    }

    fn test_config(dir: &str) -> Config {
        let mut config = Config::default();
        config.training.iterations = 400;
        config.training.discount_interval = 100;
        config.training.chunk_iterations = 200;
        config.training.inter_chunk_delay_secs = 0.0;
        config.training.workers = Some(2);
        config.training.prune.enabled = false;
        config.training.bet_abstraction = vec![vec![1.0]; 4];
        config.training.checkpoint_dir = std::env::temp_dir()
            .join(format!("maverick-trainer-{dir}-{}", std::process::id()))
            .to_string_lossy()
            .into_owned();
        config
    }

    #[test]
    fn full_run_produces_a_policy_and_checkpoints() {
        let config = test_config("run");
        let mut trainer = Trainer::with_buckets(&config, 0x1, Arc::new(PreflopOnly)).unwrap();
        let policy = trainer.run().unwrap();
        assert_eq!(trainer.iteration, 400);
        assert!(!policy.is_empty());

        let root = Path::new(&config.training.checkpoint_dir);
        let latest = checkpoint::latest(root).unwrap().expect("checkpoint written");
        let loaded = checkpoint::load(&latest).unwrap();
        assert_eq!(loaded.meta.iteration, 400);
        std::fs::remove_dir_all(root).ok();
    }

    #[test]
    fn resume_restores_progress() {
        let config = test_config("resume");
        let mut trainer = Trainer::with_buckets(&config, 0xaa, Arc::new(PreflopOnly)).unwrap();
        trainer.run().unwrap();
        let original = trainer.policy();

        // A config edited between runs must not change the resumed stream
        let mut altered = config.clone();
        altered.training.master_seed = 99;
        altered.training.exploration = 0.1;
        let mut resumed = Trainer::with_buckets(&altered, 0xaa, Arc::new(PreflopOnly)).unwrap();
        assert!(resumed.try_resume().unwrap());
        assert_eq!(resumed.iteration, 400);
        assert_eq!(resumed.training.master_seed, config.training.master_seed);
        assert_eq!(resumed.training.exploration, config.training.exploration);
        // Zero further iterations: the extracted policy is byte-identical
        let a = bincode::serialize(&original).unwrap();
        let b = bincode::serialize(&resumed.policy()).unwrap();
        assert_eq!(a, b);
        std::fs::remove_dir_all(&config.training.checkpoint_dir).ok();
    }

    #[test]
    fn resume_refuses_mismatched_abstraction() {
        let config = test_config("mismatch");
        let mut trainer = Trainer::with_buckets(&config, 0xaa, Arc::new(PreflopOnly)).unwrap();
        trainer.run().unwrap();

        // Same checkpoints, different abstraction hash
        let mut trainer = Trainer::with_buckets(&config, 0xbb, Arc::new(PreflopOnly)).unwrap();
        match trainer.try_resume() {
            Err(SolverError::AbstractionMismatch { expected, found }) => {
                assert_eq!(expected, 0xbb);
                assert_eq!(found, 0xaa);
            }
            other => panic!("expected an abstraction mismatch, got {other:?}"),
        }
        std::fs::remove_dir_all(&config.training.checkpoint_dir).ok();
    }
}
