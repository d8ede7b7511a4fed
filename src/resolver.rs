// Real-time resolver. For each live decision it rebuilds the game state,
// constructs a depth-limited subgame with a restricted bet menu, runs a short
// MCCFR loop warm-started from the blueprint, and pulls the final strategy
// back toward the blueprint with a KL penalty before picking an action.
//
// The solve is strictly best-effort: the time budget is a hard ceiling after
// the minimum iteration count, a zero budget short-circuits to a blueprint
// lookup, and neither an error nor a panic ever escapes `decide`.

use crate::actions::{
    resolver_fractions, translate, AbstractAction, ConcreteAction, MAX_ACTIONS,
};
use crate::card_utils::{deck, Card};
use crate::config::{Config, GameConfig, ResolverConfig};
use crate::error::{Result, SolverError};
use crate::game::{board_cards, hole_cards, GameState, InfoKey, Street};
use crate::leaf::{GateLimits, LeafEvaluator, LeafStats, ValueEstimator};
use crate::policy::Policy;
use crate::sampler::{sample_index, Buckets};
use crate::store::Store;
use crate::table_state::TableState;
use moka::sync::Cache;
use rand::prelude::*;
use rand::rngs::StdRng;
use smallvec::SmallVec;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Subgame regrets are short-lived; the floor only guards against runaway
/// negatives within one solve.
const LOCAL_REGRET_FLOOR: f64 = -1e12;

const LEAF_EQUITY_SAMPLES: usize = 8;

#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    pub solve_ms: f64,
    pub iterations: u64,
    /// Total variation distance between the local solution and the blueprint
    /// at the root.
    pub value_delta: f64,
    pub leaf: LeafStats,
    pub cache_hit: bool,
    pub used_fallback: bool,
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub action: AbstractAction,
    pub concrete: ConcreteAction,
    /// Final root strategy the action was drawn from.
    pub strategy: Vec<f64>,
    pub telemetry: Telemetry,
}

pub struct Resolver {
    game: GameConfig,
    config: ResolverConfig,
    blueprint: Arc<Policy>,
    buckets: Arc<dyn Buckets + Send + Sync>,
    /// The blueprint's bet menu per street, for lookups and rollouts.
    blueprint_menus: Vec<Vec<f64>>,
    /// The subgame's restricted menu per street.
    subgame_menus: Vec<Vec<f64>>,
    estimator: Option<Box<dyn ValueEstimator>>,
    preflop_cache: Cache<InfoKey, Vec<f64>>,
}

impl Resolver {
    pub fn new(
        config: &Config,
        blueprint: Arc<Policy>,
        buckets: Arc<dyn Buckets + Send + Sync>,
        estimator: Option<Box<dyn ValueEstimator>>,
    ) -> Resolver {
        let subgame_menu = resolver_fractions(config.resolver.menu_mode).to_vec();
        Resolver {
            game: config.game.clone(),
            config: config.resolver.clone(),
            blueprint,
            buckets,
            blueprint_menus: config.training.bet_abstraction.clone(),
            subgame_menus: vec![subgame_menu; 4],
            estimator,
            preflop_cache: Cache::new(config.resolver.preflop_cache_size),
        }
    }

    /// Produces a decision for the live spot. Never blocks meaningfully past
    /// the configured budget and never panics or errors outward; any failure
    /// degrades to a blueprint lookup, and failing that, to check/fold.
    pub fn decide(&self, table: &TableState, rng: &mut StdRng) -> Decision {
        let solved = catch_unwind(AssertUnwindSafe(|| self.solve(table, rng)));
        match solved {
            Ok(Ok(decision)) => {
                log::debug!(
                    "resolved in {:.1}ms over {} iterations (delta {:.3})",
                    decision.telemetry.solve_ms,
                    decision.telemetry.iterations,
                    decision.telemetry.value_delta
                );
                decision
            }
            Ok(Err(e)) => {
                log::warn!("resolve failed ({e}); using the blueprint");
                self.blueprint_fallback(table)
            }
            Err(_) => {
                log::error!("resolve panicked; using the blueprint");
                self.blueprint_fallback(table)
            }
        }
    }

    fn solve(&self, table: &TableState, rng: &mut StdRng) -> Result<Decision> {
        let start = Instant::now();
        let root = table.to_root(&self.game)?;
        if root.current_player() != table.hero {
            return Err(SolverError::Configuration(
                "hero is not the player to act".to_string(),
            ));
        }
        let street = table.street;
        let root_actions = root.legal_actions(&self.subgame_menus[street as usize]);
        let n = root_actions.len();
        let bucket = self
            .buckets
            .bucket_id(&table.hole, &table.board, street);
        let root_key = root.info_key(bucket);

        if self.config.time_budget_ms == 0 {
            return self.blueprint_decision(table);
        }
        if street == Street::Preflop {
            if let Some(cached) = self.preflop_cache.get(&root_key) {
                let chosen = sample_index(&cached, rng);
                let action = root_actions[chosen.min(n - 1)];
                return Ok(Decision {
                    action,
                    concrete: translate(action, &root.bet_context(table.hero)),
                    strategy: cached,
                    telemetry: Telemetry {
                        solve_ms: start.elapsed().as_secs_f64() * 1000.0,
                        cache_hit: true,
                        ..Default::default()
                    },
                });
            }
        }

        let bp = self.blueprint_distribution(&root, &root_key, &root_actions);
        let mut store = Store::new(crate::config::StoreBackend::Dense, LOCAL_REGRET_FLOOR);
        // Warm start at the scale min_iterations of linear-weighted updates
        // would reach: regret matching plays the blueprint at the root until
        // real regrets accumulate past it, and the seeded strategy mass keeps
        // an early-stopped average anchored there too.
        let warm = root.pot() as f64 * self.config.min_iterations.max(1) as f64;
        for (i, &p) in bp.iter().enumerate() {
            store.update_regret(&root_key, i, n, p * warm, 1.0);
        }
        store.add_strategy(&root_key, &bp, warm);

        let limit = lookahead_limit(street, self.config.extra_streets);
        let evaluator = LeafEvaluator {
            mode: self.config.leaf_mode,
            estimator: self.estimator.as_deref(),
            blueprint: &self.blueprint,
            buckets: self.buckets.as_ref(),
            bet_abstraction: &self.blueprint_menus,
            rollout_samples: self.config.rollout_samples,
            gate: GateLimits::default(),
            equity_samples: LEAF_EQUITY_SAMPLES,
        };
        let budget = Duration::from_millis(self.config.time_budget_ms);
        let updatable: Vec<usize> = (0..root.num_players)
            .filter(|&p| !root.folded[p] && (root.stacks[p] > 0 || p == table.hero))
            .collect();

        let mut stats = LeafStats::default();
        let mut iterations = 0;
        for t in 1..=self.config.max_iterations {
            if t > self.config.min_iterations && start.elapsed() >= budget {
                break;
            }
            let cards = self.deal(table, rng);
            let traverser = updatable[(t as usize) % updatable.len()];
            self.traverse(
                root.clone(),
                &cards,
                &mut store,
                traverser,
                t,
                limit,
                &evaluator,
                rng,
                &mut stats,
            );
            iterations = t;
        }

        let sub = store.get_average_strategy(&root_key, n);
        let blended = kl_blend(&sub, &bp, self.config.kl_weight);
        let value_delta = 0.5
            * blended
                .iter()
                .zip(&bp)
                .map(|(a, b)| (a - b).abs())
                .sum::<f64>();

        if street == Street::Preflop {
            self.preflop_cache.insert(root_key, blended.clone());
        }

        let chosen = sample_index(&blended, rng);
        let action = root_actions[chosen];
        Ok(Decision {
            action,
            concrete: translate(action, &root.bet_context(table.hero)),
            strategy: blended,
            telemetry: Telemetry {
                solve_ms: start.elapsed().as_secs_f64() * 1000.0,
                iterations,
                value_delta,
                leaf: stats,
                cache_hit: false,
                used_fallback: false,
            },
        })
    }

    /// External-sampling traversal of the bounded subgame.
    #[allow(clippy::too_many_arguments)]
    fn traverse(
        &self,
        state: GameState,
        cards: &[Card],
        store: &mut Store,
        traverser: usize,
        t: u64,
        limit: Street,
        evaluator: &LeafEvaluator,
        rng: &mut StdRng,
        stats: &mut LeafStats,
    ) -> f64 {
        if state.is_terminal() {
            return state.payoffs(cards)[traverser];
        }
        if state.street > limit {
            return evaluator.evaluate(&state, cards, traverser, rng, stats);
        }
        let player = state.current_player();
        let street = state.street;
        let bucket = self.buckets.bucket_id(
            hole_cards(cards, player),
            board_cards(cards, state.num_players, street),
            street,
        );
        let actions = state.legal_actions(&self.subgame_menus[street as usize]);
        let n = actions.len();
        let key = state.info_key(bucket);
        let strategy = store.get_strategy(&key, n);
        let weight = t as f64;

        if player == traverser {
            let mut utils: SmallVec<[f64; MAX_ACTIONS]> = SmallVec::with_capacity(n);
            for &action in &actions {
                let mut child = state.clone();
                child.apply(action);
                utils.push(self.traverse(
                    child, cards, store, traverser, t, limit, evaluator, rng, stats,
                ));
            }
            let expected: f64 = strategy.iter().zip(&utils).map(|(p, u)| p * u).sum();
            for (i, &u) in utils.iter().enumerate() {
                store.update_regret(&key, i, n, u - expected, weight);
            }
            expected
        } else {
            store.add_strategy(&key, &strategy, weight);
            let chosen = sample_index(&strategy, rng);
            let mut child = state;
            child.apply(actions[chosen]);
            self.traverse(child, cards, store, traverser, t, limit, evaluator, rng, stats)
        }
    }

    /// Deals a full deck in the canonical layout: the hero's known cards and
    /// board stay fixed, everything else is drawn fresh. Opponent ranges are
    /// uniform over the remaining cards.
    fn deal(&self, table: &TableState, rng: &mut StdRng) -> Vec<Card> {
        let n = table.stacks.len();
        let mut remaining = deck();
        remaining.retain(|c| !table.hole.contains(c) && !table.board.contains(c));
        remaining.shuffle(rng);

        let mut cards = Vec::with_capacity(2 * n + 5);
        let mut draw = remaining.into_iter();
        for p in 0..n {
            if p == table.hero {
                cards.extend_from_slice(&table.hole);
            } else {
                cards.push(draw.next().unwrap());
                cards.push(draw.next().unwrap());
            }
        }
        cards.extend_from_slice(&table.board);
        for _ in table.board.len()..5 {
            cards.push(draw.next().unwrap());
        }
        cards
    }

    /// Blueprint probabilities mapped onto the subgame's action menu. The
    /// blueprint may use different bet sizes; each subgame bet inherits the
    /// mass of the nearest blueprint size.
    fn blueprint_distribution(
        &self,
        root: &GameState,
        key: &InfoKey,
        subgame_actions: &[AbstractAction],
    ) -> Vec<f64> {
        let n = subgame_actions.len();
        let uniform = vec![1.0 / n as f64; n];
        let street = root.street;
        let blueprint_actions = root.legal_actions(&self.blueprint_menus[street as usize]);
        let dist = match self.blueprint.lookup(key) {
            Some(d) if d.len() == blueprint_actions.len() => d,
            _ => return uniform,
        };

        let mut mapped = vec![0.0; n];
        for (i, &target) in subgame_actions.iter().enumerate() {
            let mut best: Option<(f64, f64)> = None; // (distance, prob)
            for (j, &source) in blueprint_actions.iter().enumerate() {
                let distance = action_distance(target, source);
                if let Some(d) = distance {
                    if best.map_or(true, |(bd, _)| d < bd) {
                        best = Some((d, dist[j]));
                    }
                }
            }
            mapped[i] = best.map_or(0.0, |(_, p)| p);
        }
        let total: f64 = mapped.iter().sum();
        if total > 0.0 {
            mapped.iter().map(|p| p / total).collect()
        } else {
            uniform
        }
    }

    fn blueprint_fallback(&self, table: &TableState) -> Decision {
        match catch_unwind(AssertUnwindSafe(|| self.blueprint_decision(table))) {
            Ok(Ok(decision)) => decision,
            _ => safe_decision(table),
        }
    }

    /// Direct blueprint lookup, no local solving. Deterministic: takes the
    /// highest-probability action.
    fn blueprint_decision(&self, table: &TableState) -> Result<Decision> {
        let start = Instant::now();
        let root = table.to_root(&self.game)?;
        let street = table.street;
        let actions = root.legal_actions(&self.blueprint_menus[street as usize]);
        let bucket = self
            .buckets
            .bucket_id(&table.hole, &table.board, street);
        let key = root.info_key(bucket);
        let strategy: Vec<f64> = match self.blueprint.lookup(&key) {
            Some(d) if d.len() == actions.len() => d.to_vec(),
            _ => vec![1.0 / actions.len() as f64; actions.len()],
        };
        let chosen = strategy
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).expect("finite probabilities"))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let action = actions[chosen];
        Ok(Decision {
            action,
            concrete: translate(action, &root.bet_context(table.hero)),
            strategy,
            telemetry: Telemetry {
                solve_ms: start.elapsed().as_secs_f64() * 1000.0,
                used_fallback: true,
                ..Default::default()
            },
        })
    }
}

/// Check if free, fold otherwise. The decision of last resort, built straight
/// from the table record so it cannot fail.
fn safe_decision(table: &TableState) -> Decision {
    let current_bet = table.street_bets.iter().copied().max().unwrap_or(0);
    let to_call = current_bet - table.street_bets.get(table.hero).copied().unwrap_or(0);
    let (action, concrete) = if to_call > 0 {
        (AbstractAction::Fold, ConcreteAction::Fold)
    } else {
        (AbstractAction::Call, ConcreteAction::Call(0))
    };
    Decision {
        action,
        concrete,
        strategy: vec![1.0],
        telemetry: Telemetry {
            used_fallback: true,
            ..Default::default()
        },
    }
}

fn lookahead_limit(street: Street, extra_streets: u8) -> Street {
    let idx = (street as u8).saturating_add(extra_streets).min(3);
    match idx {
        0 => Street::Preflop,
        1 => Street::Flop,
        2 => Street::Turn,
        _ => Street::River,
    }
}

/// Distance between two abstract actions for blueprint mass mapping. `None`
/// means incompatible kinds.
fn action_distance(a: AbstractAction, b: AbstractAction) -> Option<f64> {
    match (a, b) {
        (x, y) if x == y => Some(0.0),
        (AbstractAction::Bet(x), AbstractAction::Bet(y)) => {
            Some((x as f64 - y as f64).abs() / 1000.0)
        }
        // An all-in can stand in for a large bet and vice versa
        (AbstractAction::Bet(x), AbstractAction::AllIn)
        | (AbstractAction::AllIn, AbstractAction::Bet(x)) => Some(5.0 + x as f64 / 1000.0),
        _ => None,
    }
}

/// Minimizes `KL(q, sub) + lambda * KL(q, blueprint)`: a geometric blend with
/// exponents `1/(1+lambda)` and `lambda/(1+lambda)`.
pub fn kl_blend(sub: &[f64], blueprint: &[f64], lambda: f64) -> Vec<f64> {
    debug_assert_eq!(sub.len(), blueprint.len());
    if lambda <= 0.0 {
        return sub.to_vec();
    }
    let a = 1.0 / (1.0 + lambda);
    let b = lambda / (1.0 + lambda);
    let blend: Vec<f64> = sub
        .iter()
        .zip(blueprint)
        .map(|(s, p)| s.powf(a) * p.powf(b))
        .collect();
    let total: f64 = blend.iter().sum();
    if total > 0.0 {
        blend.iter().map(|q| q / total).collect()
    } else {
        vec![1.0 / sub.len() as f64; sub.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kl_blend_interpolates_toward_the_blueprint() {
        let sub = [0.9, 0.1];
        let bp = [0.5, 0.5];
        let none = kl_blend(&sub, &bp, 0.0);
        assert_eq!(none, sub.to_vec());

        let light = kl_blend(&sub, &bp, 0.1);
        let heavy = kl_blend(&sub, &bp, 10.0);
        assert!(light[0] < sub[0] && light[0] > bp[0]);
        assert!(heavy[0] < light[0]);
        assert!((heavy.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        // Strong regularization lands near the blueprint
        assert!((heavy[0] - 0.5).abs() < 0.05);
    }

    #[test]
    fn kl_blend_keeps_zeros() {
        // Actions the subgame eliminated stay eliminated
        let sub = [0.0, 1.0];
        let bp = [0.5, 0.5];
        let blend = kl_blend(&sub, &bp, 1.0);
        assert_eq!(blend[0], 0.0);
        assert!((blend[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn lookahead_saturates_at_the_river() {
        assert_eq!(lookahead_limit(Street::Preflop, 0), Street::Preflop);
        assert_eq!(lookahead_limit(Street::Flop, 1), Street::Turn);
        assert_eq!(lookahead_limit(Street::Turn, 5), Street::River);
        assert_eq!(lookahead_limit(Street::River, 1), Street::River);
    }

    #[test]
    fn action_distance_prefers_exact_then_near() {
        let exact = action_distance(AbstractAction::bet(0.5), AbstractAction::bet(0.5));
        let near = action_distance(AbstractAction::bet(0.5), AbstractAction::bet(1.0));
        let shove = action_distance(AbstractAction::bet(0.5), AbstractAction::AllIn);
        assert_eq!(exact, Some(0.0));
        assert!(near.unwrap() < shove.unwrap());
        assert_eq!(
            action_distance(AbstractAction::Fold, AbstractAction::Call),
            None
        );
    }
}
