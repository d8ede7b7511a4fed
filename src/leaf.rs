// Leaf evaluation for depth-limited subgames. Three stages, tried in order,
// and the chain as a whole always produces a value: a pluggable fast
// estimator behind gating checks, a Monte Carlo rollout under the frozen
// blueprint, and finally a deterministic blueprint playout. A rejected or
// missing stage falls through silently; the only externally visible effect
// is the stage counters.

use crate::actions::AbstractAction;
use crate::card_utils::{expected_hs2, river_equity, Card};
use crate::config::LeafMode;
use crate::game::{board_cards, hole_cards, GameState, Street};
use crate::policy::Policy;
use crate::sampler::{sample_index, Buckets};
use rand::rngs::StdRng;
use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct LeafFeatures {
    pub street: Street,
    /// Pot as a fraction of the starting stack.
    pub pot_fraction: f64,
    /// Hero equity proxy in [0, 1].
    pub equity: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Estimate {
    /// Counterfactual value in chips for the player being evaluated.
    pub value: f64,
    /// Width of the estimator's prediction interval, in chips.
    pub interval_width: f64,
}

/// A fast value estimator, typically a regression model trained offline.
/// Returning `None` means the estimator cannot score these features.
pub trait ValueEstimator: Send + Sync {
    fn estimate(&self, features: &LeafFeatures) -> Option<Estimate>;
}

/// Acceptance limits for estimator outputs. Features outside the training
/// distribution or predictions with wide intervals fall through to rollouts.
#[derive(Debug, Clone)]
pub struct GateLimits {
    pub max_pot_fraction: f64,
    /// Maximum interval width per street, as a fraction of the pot.
    pub interval_width: [f64; 4],
}

impl Default for GateLimits {
    fn default() -> GateLimits {
        GateLimits {
            max_pot_fraction: 6.0,
            interval_width: [0.5, 0.4, 0.3, 0.2],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeafStats {
    pub estimator_accepted: u64,
    pub estimator_rejected: u64,
    pub rollouts: u64,
    pub lookups: u64,
}

pub struct LeafEvaluator<'a> {
    pub mode: LeafMode,
    pub estimator: Option<&'a dyn ValueEstimator>,
    pub blueprint: &'a Policy,
    pub buckets: &'a dyn Buckets,
    /// The blueprint's bet menu per street, used when rolling out.
    pub bet_abstraction: &'a [Vec<f64>],
    pub rollout_samples: usize,
    pub gate: GateLimits,
    /// Equity rollouts for the final-stage estimate.
    pub equity_samples: usize,
}

impl<'a> LeafEvaluator<'a> {
    /// Value of a subgame boundary node for `player`, in chips. Never fails.
    pub fn evaluate(
        &self,
        state: &GameState,
        cards: &[Card],
        player: usize,
        rng: &mut StdRng,
        stats: &mut LeafStats,
    ) -> f64 {
        if self.mode == LeafMode::Full {
            if let Some(value) = self.try_estimator(state, cards, player, rng, stats) {
                return value;
            }
        }
        if self.mode != LeafMode::Blueprint && self.rollout_samples > 0 {
            stats.rollouts += 1;
            return self.rollout(state, cards, player, rng);
        }
        stats.lookups += 1;
        self.blueprint_walk(state, cards, player)
    }

    fn features(
        &self,
        state: &GameState,
        cards: &[Card],
        player: usize,
        rng: &mut StdRng,
    ) -> LeafFeatures {
        let hole = hole_cards(cards, player);
        let board = board_cards(cards, state.num_players, state.street);
        let equity = if state.street == Street::River {
            river_equity(hole, board)
        } else {
            expected_hs2(hole, board, self.equity_samples, rng).sqrt()
        };
        let starting_stack = (state.pot() + state.stacks.iter().sum::<i32>()) as f64
            / state.num_players as f64;
        LeafFeatures {
            street: state.street,
            pot_fraction: state.pot() as f64 / starting_stack.max(1.0),
            equity,
        }
    }

    fn try_estimator(
        &self,
        state: &GameState,
        cards: &[Card],
        player: usize,
        rng: &mut StdRng,
        stats: &mut LeafStats,
    ) -> Option<f64> {
        let estimator = self.estimator?;
        let features = self.features(state, cards, player, rng);
        let in_distribution = features.pot_fraction >= 0.0
            && features.pot_fraction <= self.gate.max_pot_fraction
            && (0.0..=1.0).contains(&features.equity);
        if !in_distribution {
            stats.estimator_rejected += 1;
            return None;
        }
        let estimate = match estimator.estimate(&features) {
            Some(e) => e,
            None => {
                stats.estimator_rejected += 1;
                return None;
            }
        };
        let pot = state.pot() as f64;
        let width_limit = self.gate.interval_width[state.street as usize] * pot;
        if !estimate.value.is_finite() || estimate.interval_width > width_limit {
            stats.estimator_rejected += 1;
            return None;
        }
        stats.estimator_accepted += 1;
        // No leaf can be worth more than the pot or cost more than was put in
        Some(estimate.value.clamp(-pot, pot))
    }

    /// Plays the hand out under the blueprint from this node, averaging the
    /// player's payoff over `rollout_samples` trajectories.
    fn rollout(&self, state: &GameState, cards: &[Card], player: usize, rng: &mut StdRng) -> f64 {
        let mut total = 0.0;
        for _ in 0..self.rollout_samples {
            let mut sim = state.clone();
            while !sim.is_terminal() {
                let actor = sim.current_player();
                let street = sim.street;
                let bucket = self.buckets.bucket_id(
                    hole_cards(cards, actor),
                    board_cards(cards, sim.num_players, street),
                    street,
                );
                let actions = sim.legal_actions(&self.bet_abstraction[street as usize]);
                let key = sim.info_key(bucket);
                let chosen = match self.blueprint.lookup(&key) {
                    Some(strategy) => sample_index(strategy, rng).min(actions.len() - 1),
                    None => rng.gen_range(0..actions.len()),
                };
                sim.apply(actions[chosen]);
            }
            total += sim.payoffs(cards)[player];
        }
        total / self.rollout_samples as f64
    }

    /// Last resort: a single deterministic playout taking the blueprint's
    /// highest-probability action at every node, checking or calling where
    /// the blueprint has no entry.
    fn blueprint_walk(&self, state: &GameState, cards: &[Card], player: usize) -> f64 {
        let mut sim = state.clone();
        while !sim.is_terminal() {
            let actor = sim.current_player();
            let street = sim.street;
            let bucket = self.buckets.bucket_id(
                hole_cards(cards, actor),
                board_cards(cards, sim.num_players, street),
                street,
            );
            let actions = sim.legal_actions(&self.bet_abstraction[street as usize]);
            let key = sim.info_key(bucket);
            let chosen = match self.blueprint.lookup(&key) {
                Some(strategy) => strategy
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.partial_cmp(b.1).expect("finite probabilities"))
                    .map(|(i, _)| i)
                    .unwrap_or(0)
                    .min(actions.len() - 1),
                None => actions
                    .iter()
                    .position(|a| *a == AbstractAction::Call)
                    .unwrap_or(0),
            };
            sim.apply(actions[chosen]);
        }
        sim.payoffs(cards)[player]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstraction::preflop_bin;
    use crate::config::GameConfig;
    use crate::store::Store;
    use rand::SeedableRng;

    struct PreflopOnly;
    impl Buckets for PreflopOnly {
        fn bucket_id(&self, hole: &[Card], _board: &[Card], _street: Street) -> u32 {
            preflop_bin(hole)
        }
    }

    struct FixedEstimator(Option<Estimate>);
    impl ValueEstimator for FixedEstimator {
        fn estimate(&self, _features: &LeafFeatures) -> Option<Estimate> {
            self.0
        }
    }

    fn empty_blueprint() -> Policy {
        Policy::from_store(&Store::new(crate::config::StoreBackend::Dense, -1e9), 0)
    }

    fn menus() -> Vec<Vec<f64>> {
        vec![vec![1.0]; 4]
    }

    fn make_state() -> (GameState, Vec<Card>) {
        let state = GameState::new(&GameConfig::default(), 0);
        (state, crate::card_utils::deck())
    }

    #[test]
    fn wide_intervals_are_rejected_and_fall_through() {
        let blueprint = empty_blueprint();
        let menus = menus();
        let estimator = FixedEstimator(Some(Estimate {
            value: 40.0,
            interval_width: 1e9,
        }));
        let evaluator = LeafEvaluator {
            mode: LeafMode::Full,
            estimator: Some(&estimator),
            blueprint: &blueprint,
            buckets: &PreflopOnly,
            bet_abstraction: &menus,
            rollout_samples: 2,
            gate: GateLimits::default(),
            equity_samples: 4,
        };
        let (state, cards) = make_state();
        let mut rng = StdRng::seed_from_u64(3);
        let mut stats = LeafStats::default();
        evaluator.evaluate(&state, &cards, 0, &mut rng, &mut stats);
        assert_eq!(stats.estimator_rejected, 1);
        assert_eq!(stats.rollouts, 1);
    }

    #[test]
    fn accepted_estimates_are_clamped_to_the_pot() {
        let blueprint = empty_blueprint();
        let menus = menus();
        let estimator = FixedEstimator(Some(Estimate {
            value: 1e7,
            interval_width: 0.0,
        }));
        let evaluator = LeafEvaluator {
            mode: LeafMode::Full,
            estimator: Some(&estimator),
            blueprint: &blueprint,
            buckets: &PreflopOnly,
            bet_abstraction: &menus,
            rollout_samples: 2,
            gate: GateLimits::default(),
            equity_samples: 4,
        };
        let (state, cards) = make_state();
        let mut rng = StdRng::seed_from_u64(3);
        let mut stats = LeafStats::default();
        let value = evaluator.evaluate(&state, &cards, 0, &mut rng, &mut stats);
        assert_eq!(stats.estimator_accepted, 1);
        assert_eq!(value, state.pot() as f64);
    }

    #[test]
    fn blueprint_mode_skips_rollouts() {
        let blueprint = empty_blueprint();
        let menus = menus();
        let evaluator = LeafEvaluator {
            mode: LeafMode::Blueprint,
            estimator: None,
            blueprint: &blueprint,
            buckets: &PreflopOnly,
            bet_abstraction: &menus,
            rollout_samples: 8,
            gate: GateLimits::default(),
            equity_samples: 4,
        };
        let (state, cards) = make_state();
        let mut rng = StdRng::seed_from_u64(3);
        let mut stats = LeafStats::default();
        let value = evaluator.evaluate(&state, &cards, 0, &mut rng, &mut stats);
        assert_eq!(stats.lookups, 1);
        assert_eq!(stats.rollouts, 0);
        assert!(value.is_finite());
    }

    #[test]
    fn lookup_stage_checks_down_under_an_empty_blueprint() {
        // With no blueprint entries the walk checks or calls at every node,
        // so the value is exactly the check-down showdown payoff.
        let blueprint = empty_blueprint();
        let menus = menus();
        let evaluator = LeafEvaluator {
            mode: LeafMode::Blueprint,
            estimator: None,
            blueprint: &blueprint,
            buckets: &PreflopOnly,
            bet_abstraction: &menus,
            rollout_samples: 8,
            gate: GateLimits::default(),
            equity_samples: 4,
        };
        let (state, cards) = make_state();
        let mut rng = StdRng::seed_from_u64(3);
        let mut stats = LeafStats::default();
        let value = evaluator.evaluate(&state, &cards, 0, &mut rng, &mut stats);
        assert_eq!(stats.lookups, 1);

        let mut replay = state.clone();
        while !replay.is_terminal() {
            replay.apply(AbstractAction::Call);
        }
        assert_eq!(value, replay.payoffs(&cards)[0]);
    }

    #[test]
    fn rollout_values_stay_within_stakes() {
        let blueprint = empty_blueprint();
        let menus = menus();
        let evaluator = LeafEvaluator {
            mode: LeafMode::Rollout,
            estimator: None,
            blueprint: &blueprint,
            buckets: &PreflopOnly,
            bet_abstraction: &menus,
            rollout_samples: 4,
            gate: GateLimits::default(),
            equity_samples: 4,
        };
        let (state, cards) = make_state();
        let stack = GameConfig::default().stack_size as f64;
        let mut rng = StdRng::seed_from_u64(9);
        let mut stats = LeafStats::default();
        let value = evaluator.evaluate(&state, &cards, 0, &mut rng, &mut stats);
        assert!(value.abs() <= stack);
    }
}
