// Configuration for training and real-time resolving. Loaded from a TOML file
// for the binaries; library code takes explicit references so tests can build
// their own.

use crate::error::{Result, SolverError};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fs;

pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    let path = std::env::var("MAVERICK_CONFIG").unwrap_or_else(|_| "params.toml".to_string());
    match fs::read_to_string(&path) {
        Ok(s) => toml::from_str(&s).expect("could not parse TOML config file"),
        Err(_) => Config::default(),
    }
});

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub game: GameConfig,
    pub abstraction: AbstractionConfig,
    pub training: TrainingConfig,
    pub resolver: ResolverConfig,
}

impl Config {
    pub fn load(path: &str) -> Result<Config> {
        let s = fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&s).map_err(|e| SolverError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.game.validate()?;
        self.abstraction.validate()?;
        self.training.validate()?;
        self.resolver.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub num_players: usize,
    pub stack_size: i32,
    pub small_blind: i32,
    pub big_blind: i32,
    /// Smallest chip denomination the table accepts. Concrete bet sizes are
    /// rounded to a multiple of this.
    pub chip_unit: i32,
    /// Fraction of the remaining stack at or above which a translated bet is
    /// clamped to all-in.
    pub all_in_fraction: f64,
    /// Round-trip stability bound for action translation, as a fraction of
    /// the pot.
    pub translation_epsilon: f64,
}

impl Default for GameConfig {
    fn default() -> GameConfig {
        GameConfig {
            num_players: 2,
            stack_size: 20_000,
            small_blind: 50,
            big_blind: 100,
            chip_unit: 50,
            all_in_fraction: 0.97,
            translation_epsilon: 0.001,
        }
    }
}

impl GameConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_players < 2 || self.num_players > crate::game::MAX_PLAYERS {
            return Err(SolverError::Configuration(format!(
                "num_players must be in 2..={}, got {}",
                crate::game::MAX_PLAYERS,
                self.num_players
            )));
        }
        if self.small_blind <= 0 || self.big_blind < self.small_blind {
            return Err(SolverError::Configuration(
                "blinds must satisfy 0 < small_blind <= big_blind".to_string(),
            ));
        }
        if self.stack_size < self.big_blind {
            return Err(SolverError::Configuration(
                "stack_size must cover the big blind".to_string(),
            ));
        }
        if self.chip_unit <= 0 {
            return Err(SolverError::Configuration(
                "chip_unit must be positive".to_string(),
            ));
        }
        if !(0.5..=1.0).contains(&self.all_in_fraction) {
            return Err(SolverError::Configuration(format!(
                "all_in_fraction {} out of range [0.5, 1.0]",
                self.all_in_fraction
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbstractionConfig {
    pub flop_buckets: u32,
    pub turn_buckets: u32,
    pub river_buckets: u32,
    /// Hands sampled per street when fitting the bucket boundaries.
    pub fit_samples: usize,
    /// Monte Carlo rollouts per equity estimate.
    pub equity_samples: usize,
    pub seed: u64,
}

impl Default for AbstractionConfig {
    fn default() -> AbstractionConfig {
        AbstractionConfig {
            flop_buckets: 200,
            turn_buckets: 200,
            river_buckets: 200,
            fit_samples: 20_000,
            equity_samples: 200,
            seed: 7,
        }
    }
}

impl AbstractionConfig {
    pub fn validate(&self) -> Result<()> {
        for (street, n) in [
            ("flop", self.flop_buckets),
            ("turn", self.turn_buckets),
            ("river", self.river_buckets),
        ] {
            if n == 0 {
                return Err(SolverError::Configuration(format!(
                    "{street}_buckets must be positive"
                )));
            }
        }
        if self.fit_samples == 0 || self.equity_samples == 0 {
            return Err(SolverError::Configuration(
                "fit_samples and equity_samples must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountMode {
    None,
    /// Fixed multiplicative factors applied every `discount_interval`.
    Static,
    /// DCFR schedule: alpha = (t+D)/(t+2D) for regrets, beta = t/(t+D) for
    /// the strategy sum.
    Adaptive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Dense,
    Compact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PruneConfig {
    pub enabled: bool,
    /// Prune only when every action's regret is below this.
    pub threshold: f64,
    /// Probability of actually skipping a prunable node.
    pub probability: f64,
    /// Iterations before pruning activates; early regrets are noise.
    pub warmup: u64,
}

impl Default for PruneConfig {
    fn default() -> PruneConfig {
        PruneConfig {
            enabled: true,
            threshold: -3.0e5,
            probability: 0.95,
            warmup: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Total iteration budget. Training also stops when `time_budget_minutes`
    /// elapses, whichever comes first.
    pub iterations: u64,
    pub time_budget_minutes: Option<f64>,
    pub discount_mode: DiscountMode,
    /// D in the DCFR schedule; also the cadence for static discounting.
    pub discount_interval: u64,
    pub static_regret_discount: f64,
    pub static_strategy_discount: f64,
    /// Zero out negative regrets after each discount (CFR+ behavior).
    pub cfr_plus: bool,
    pub prune: PruneConfig,
    /// Worker count; autodetected from the core count when absent.
    pub workers: Option<usize>,
    /// Chunk size in iterations. Long runs checkpoint and tear the worker
    /// pool down at each chunk boundary.
    pub chunk_iterations: u64,
    pub chunk_minutes: Option<f64>,
    /// Delay between chunks, letting the allocator hand memory back.
    pub inter_chunk_delay_secs: f64,
    /// How long the coordinator keeps polling for results from workers that
    /// have not reported yet.
    pub collection_timeout_secs: f64,
    pub backend: StoreBackend,
    /// Exploration mixed into the sampling policy (outcome sampling only).
    pub exploration: f64,
    /// Floor for cumulative regrets. Reference value from published DCFR
    /// work; tune per abstraction size.
    pub regret_floor: f64,
    /// Pot-fraction bet menu per street, `-1.0` meaning all-in.
    pub bet_abstraction: Vec<Vec<f64>>,
    pub checkpoint_dir: String,
    pub master_seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> TrainingConfig {
        TrainingConfig {
            iterations: 10_000_000,
            time_budget_minutes: None,
            discount_mode: DiscountMode::Adaptive,
            discount_interval: 10_000,
            static_regret_discount: 0.999,
            static_strategy_discount: 0.999,
            cfr_plus: false,
            prune: PruneConfig::default(),
            workers: None,
            chunk_iterations: 1_000_000,
            chunk_minutes: None,
            inter_chunk_delay_secs: 5.0,
            collection_timeout_secs: 60.0,
            backend: StoreBackend::Dense,
            exploration: 0.6,
            regret_floor: -3.1e8,
            bet_abstraction: vec![
                vec![1.0, -1.0],
                vec![0.5, 1.0, -1.0],
                vec![0.5, 1.0, -1.0],
                vec![0.5, 1.0, -1.0],
            ],
            checkpoint_dir: "products/checkpoints".to_string(),
            master_seed: 0,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 && self.time_budget_minutes.is_none() {
            return Err(SolverError::Configuration(
                "training needs an iteration count or a time budget".to_string(),
            ));
        }
        if self.discount_interval == 0 {
            return Err(SolverError::Configuration(
                "discount_interval must be positive".to_string(),
            ));
        }
        if self.chunk_iterations == 0 {
            return Err(SolverError::Configuration(
                "chunk_iterations must be positive".to_string(),
            ));
        }
        for f in [self.static_regret_discount, self.static_strategy_discount] {
            if !(0.0..=1.0).contains(&f) {
                return Err(SolverError::Configuration(format!(
                    "static discount factor {f} out of range [0, 1]"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.prune.probability) {
            return Err(SolverError::Configuration(format!(
                "prune probability {} out of range [0, 1]",
                self.prune.probability
            )));
        }
        if !(0.0..=1.0).contains(&self.exploration) {
            return Err(SolverError::Configuration(format!(
                "exploration {} out of range [0, 1]",
                self.exploration
            )));
        }
        if self.regret_floor >= 0.0 {
            return Err(SolverError::Configuration(
                "regret_floor must be negative".to_string(),
            ));
        }
        if self.bet_abstraction.len() != 4 {
            return Err(SolverError::Configuration(
                "bet_abstraction needs one fraction list per street".to_string(),
            ));
        }
        if let Some(w) = self.workers {
            if w == 0 {
                return Err(SolverError::Configuration(
                    "workers must be positive when set".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuMode {
    Tight,
    Balanced,
    Loose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeafMode {
    /// Gated estimator, then rollout, then blueprint lookup.
    Full,
    /// Skip the estimator stage.
    Rollout,
    /// Blueprint lookup only.
    Blueprint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Streets of lookahead past the current one before leaf evaluation.
    pub extra_streets: u8,
    pub time_budget_ms: u64,
    pub min_iterations: u64,
    pub max_iterations: u64,
    pub menu_mode: MenuMode,
    /// Weight of the KL penalty pulling the local solve toward the
    /// blueprint. Zero disables regularization.
    pub kl_weight: f64,
    pub leaf_mode: LeafMode,
    /// Rollouts per leaf in the rollout stage.
    pub rollout_samples: usize,
    pub preflop_cache_size: u64,
}

impl Default for ResolverConfig {
    fn default() -> ResolverConfig {
        ResolverConfig {
            extra_streets: 0,
            time_budget_ms: 100,
            min_iterations: 200,
            max_iterations: 20_000,
            menu_mode: MenuMode::Balanced,
            kl_weight: 0.1,
            leaf_mode: LeafMode::Rollout,
            rollout_samples: 8,
            preflop_cache_size: 10_000,
        }
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations < self.min_iterations {
            return Err(SolverError::Configuration(
                "max_iterations must be >= min_iterations".to_string(),
            ));
        }
        if self.kl_weight < 0.0 {
            return Err(SolverError::Configuration(
                "kl_weight must be non-negative".to_string(),
            ));
        }
        if self.rollout_samples == 0 {
            return Err(SolverError::Configuration(
                "rollout_samples must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
