// Monte Carlo CFR traversal over the abstracted game. Two-player games use
// outcome sampling (one trajectory per iteration, importance-weighted
// updates); with three or more players each iteration traverses every action
// of the player being updated and samples everyone else. The updated player
// alternates each iteration.
//
// Updates use linear weighting: regret and strategy increments at iteration t
// are weighted by t, so later, better-informed iterations dominate the
// averages.

use crate::abstraction::CardAbstraction;
use crate::actions::{AbstractAction, MAX_ACTIONS};
use crate::card_utils::{deck, Card};
use crate::config::{GameConfig, TrainingConfig};
use crate::game::{board_cards, hole_cards, GameState, Street};
use crate::store::Store;
use rand::prelude::*;
use rand::rngs::StdRng;
use smallvec::SmallVec;

/// Card bucketing as the sampler sees it. The fitted abstraction implements
/// this; tests substitute coarser groupings.
pub trait Buckets: Sync {
    fn bucket_id(&self, hole: &[Card], board: &[Card], street: Street) -> u32;
}

impl Buckets for CardAbstraction {
    fn bucket_id(&self, hole: &[Card], board: &[Card], street: Street) -> u32 {
        CardAbstraction::bucket_id(self, hole, board, street)
    }
}

pub struct Sampler<'a> {
    pub game: &'a GameConfig,
    pub training: &'a TrainingConfig,
    pub buckets: &'a dyn Buckets,
}

impl<'a> Sampler<'a> {
    pub fn new(
        game: &'a GameConfig,
        training: &'a TrainingConfig,
        buckets: &'a dyn Buckets,
    ) -> Sampler<'a> {
        Sampler {
            game,
            training,
            buckets,
        }
    }

    /// Runs one MCCFR iteration: deals a deck, picks the player to update,
    /// and traverses. `t` is the global iteration number starting at 1.
    pub fn run_iteration(&self, store: &mut Store, t: u64, rng: &mut StdRng) {
        let mut cards = deck();
        cards.shuffle(rng);
        let n = self.game.num_players;
        let traverser = (t as usize) % n;
        let button = rng.gen_range(0..n);
        let state = GameState::new(self.game, button);
        if n == 2 {
            self.outcome_sample(state, &cards, store, traverser, t, rng, 1.0, 1.0);
        } else {
            self.external_sample(state, &cards, store, traverser, t, rng);
        }
    }

    fn node_context(
        &self,
        state: &GameState,
        cards: &[Card],
    ) -> (crate::game::InfoKey, SmallVec<[AbstractAction; MAX_ACTIONS]>) {
        let player = state.current_player();
        let street = state.street;
        let bucket = self.buckets.bucket_id(
            hole_cards(cards, player),
            board_cards(cards, state.num_players, street),
            street,
        );
        let actions = state.legal_actions(&self.training.bet_abstraction[street as usize]);
        (state.info_key(bucket), actions)
    }

    fn prune_active(&self, t: u64) -> bool {
        self.training.prune.enabled && t > self.training.prune.warmup
    }

    /// External sampling: walk every action at the traverser's nodes, sample
    /// one action everywhere else. Returns the traverser's expected utility.
    fn external_sample(
        &self,
        state: GameState,
        cards: &[Card],
        store: &mut Store,
        traverser: usize,
        t: u64,
        rng: &mut StdRng,
    ) -> f64 {
        if state.is_terminal() {
            return state.payoffs(cards)[traverser];
        }
        let player = state.current_player();
        let (key, actions) = self.node_context(&state, cards);
        let n = actions.len();
        let strategy = store.get_strategy(&key, n);
        let weight = t as f64;

        if player == traverser {
            if self.prune_active(t)
                && state.street != Street::River
                && store.should_prune(&key, n, self.training.prune.threshold)
                && rng.gen::<f64>() < self.training.prune.probability
            {
                return 0.0;
            }
            let mut utils: SmallVec<[f64; MAX_ACTIONS]> = SmallVec::with_capacity(n);
            for &action in &actions {
                let mut child = state.clone();
                child.apply(action);
                utils.push(self.external_sample(child, cards, store, traverser, t, rng));
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
            self.external_sample(child, cards, store, traverser, t, rng)
        }
    }

    /// Outcome sampling for heads-up play. Follows one trajectory; the
    /// traverser samples from an exploration-mixed policy, the opponent from
    /// their current strategy. Returns `(w, tail)` where `w` is the terminal
    /// utility importance-weighted by opponent reach over sample probability,
    /// and `tail` is the traverser's strategy product below this node.
    #[allow(clippy::too_many_arguments)]
    fn outcome_sample(
        &self,
        state: GameState,
        cards: &[Card],
        store: &mut Store,
        traverser: usize,
        t: u64,
        rng: &mut StdRng,
        opp_reach: f64,
        sample_prob: f64,
    ) -> (f64, f64) {
        if state.is_terminal() {
            let util = state.payoffs(cards)[traverser];
            return (util * opp_reach / sample_prob, 1.0);
        }
        let player = state.current_player();
        let (key, actions) = self.node_context(&state, cards);
        let n = actions.len();
        let strategy = store.get_strategy(&key, n);
        let weight = t as f64;

        if player == traverser {
            if self.prune_active(t)
                && state.street != Street::River
                && store.should_prune(&key, n, self.training.prune.threshold)
                && rng.gen::<f64>() < self.training.prune.probability
            {
                return (0.0, 1.0);
            }
            let epsilon = self.training.exploration;
            let probe: SmallVec<[f64; MAX_ACTIONS]> = strategy
                .iter()
                .map(|p| epsilon / n as f64 + (1.0 - epsilon) * p)
                .collect();
            let chosen = sample_index(&probe, rng);
            let mut child = state;
            child.apply(actions[chosen]);
            let (w, tail) = self.outcome_sample(
                child,
                cards,
                store,
                traverser,
                t,
                rng,
                opp_reach,
                sample_prob * probe[chosen],
            );
            for i in 0..n {
                let regret = if i == chosen {
                    w * tail * (1.0 - strategy[chosen])
                } else {
                    -w * tail * strategy[chosen]
                };
                store.update_regret(&key, i, n, regret, weight);
            }
            (w, tail * strategy[chosen])
        } else {
            store.add_strategy(&key, &strategy, weight);
            let chosen = sample_index(&strategy, rng);
            let mut child = state;
            child.apply(actions[chosen]);
            self.outcome_sample(
                child,
                cards,
                store,
                traverser,
                t,
                rng,
                opp_reach * strategy[chosen],
                sample_prob * strategy[chosen],
            )
        }
    }
}

/// Samples an index from a probability vector.
pub fn sample_index(probs: &[f64], rng: &mut StdRng) -> usize {
    let draw: f64 = rng.gen();
    let mut cumulative = 0.0;
    for (i, &p) in probs.iter().enumerate() {
        cumulative += p;
        if draw < cumulative {
            return i;
        }
    }
    probs.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstraction::preflop_bin;
    use crate::config::StoreBackend;
    use rand::SeedableRng;

    /// Collapses every hand to its preflop class on all streets, keeping the
    /// tree tiny and card evaluation free of Monte Carlo work.
    pub struct PreflopOnly;

    impl Buckets for PreflopOnly {
        fn bucket_id(&self, hole: &[Card], _board: &[Card], _street: Street) -> u32 {
            preflop_bin(hole)
        }
    }

    fn tiny_training() -> TrainingConfig {
        TrainingConfig {
            prune: crate::config::PruneConfig {
                enabled: false,
                ..Default::default()
            },
            bet_abstraction: vec![vec![1.0]; 4],
            ..Default::default()
        }
    }

    #[test]
    fn heads_up_iterations_populate_the_store() {
        let game = GameConfig::default();
        let training = tiny_training();
        let sampler = Sampler::new(&game, &training, &PreflopOnly);
        let mut store = Store::new(StoreBackend::Dense, training.regret_floor);
        let mut rng = StdRng::seed_from_u64(1);
        for t in 1..=500 {
            sampler.run_iteration(&mut store, t, &mut rng);
        }
        assert!(store.len() > 10);
        for key in store.sorted_keys() {
            let n = store.actions_len(&key).unwrap();
            let strategy = store.get_strategy(&key, n);
            assert!((strategy.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn multiway_uses_external_sampling_and_terminates() {
        let game = GameConfig {
            num_players: 3,
            ..Default::default()
        };
        let training = tiny_training();
        let sampler = Sampler::new(&game, &training, &PreflopOnly);
        let mut store = Store::new(StoreBackend::Dense, training.regret_floor);
        let mut rng = StdRng::seed_from_u64(2);
        for t in 1..=100 {
            sampler.run_iteration(&mut store, t, &mut rng);
        }
        assert!(!store.is_empty());
    }

    #[test]
    fn iterations_are_deterministic_for_a_seed() {
        let game = GameConfig::default();
        let training = tiny_training();
        let sampler = Sampler::new(&game, &training, &PreflopOnly);

        let run = |seed: u64| {
            let mut store = Store::new(StoreBackend::Dense, training.regret_floor);
            let mut rng = StdRng::seed_from_u64(seed);
            for t in 1..=200 {
                sampler.run_iteration(&mut store, t, &mut rng);
            }
            let keys = store.sorted_keys();
            let strategies: Vec<_> = keys
                .iter()
                .map(|k| {
                    let n = store.actions_len(k).unwrap();
                    store.get_average_strategy(k, n)
                })
                .collect();
            (keys, strategies)
        };
        assert_eq!(run(7), run(7));
        assert_ne!(run(7).0.len(), 0);
    }
}
