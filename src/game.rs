// Abstracted no-limit hold'em game state. This is the tree the sampler walks:
// betting state per player, street transitions, terminal payoffs with side
// pots, and the infoset key that indexes the regret store.

use crate::actions::{translate, AbstractAction, BetContext, ConcreteAction, MAX_ACTIONS};
use crate::card_utils::{hand_strength, Card};
use crate::config::GameConfig;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub const MAX_PLAYERS: usize = 6;

/// Raises allowed per street; keeps the abstract tree bounded.
pub const MAX_RAISES_PER_STREET: u8 = 4;

const STREET_MARKER: u8 = 0xff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Street {
    Preflop = 0,
    Flop = 1,
    Turn = 2,
    River = 3,
}

impl Street {
    pub fn board_len(&self) -> usize {
        match self {
            Street::Preflop => 0,
            Street::Flop => 3,
            Street::Turn => 4,
            Street::River => 5,
        }
    }

    pub fn next(&self) -> Option<Street> {
        match self {
            Street::Preflop => Some(Street::Flop),
            Street::Flop => Some(Street::Turn),
            Street::Turn => Some(Street::River),
            Street::River => None,
        }
    }

    /// Index into postflop-only tables (flop = 0).
    pub fn postflop_index(&self) -> usize {
        debug_assert_ne!(*self, Street::Preflop);
        *self as usize - 1
    }
}

/// Key identifying a decision context: street, card bucket, and the encoded
/// action path from the root. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InfoKey {
    pub street: u8,
    pub bucket: u32,
    pub path: SmallVec<[u8; 16]>,
}

/// Hole cards for player `i` under the canonical deck layout: each player's
/// two cards first, then the board.
pub fn hole_cards(deck: &[Card], player: usize) -> &[Card] {
    &deck[2 * player..2 * player + 2]
}

/// Board cards for a street under the canonical deck layout.
pub fn board_cards(deck: &[Card], num_players: usize, street: Street) -> &[Card] {
    let start = 2 * num_players;
    &deck[start..start + street.board_len()]
}

/// Encodes a per-street action history into the path format used by
/// [`InfoKey`].
pub fn encode_path(history: &[Vec<AbstractAction>]) -> SmallVec<[u8; 16]> {
    let mut path = SmallVec::new();
    for (i, street_actions) in history.iter().enumerate() {
        if i > 0 {
            path.push(STREET_MARKER);
        }
        for action in street_actions {
            path.push(action.encode());
        }
    }
    path
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub num_players: usize,
    pub button: usize,
    pub street: Street,
    pub to_act: usize,
    /// Remaining stack per player.
    pub stacks: SmallVec<[i32; MAX_PLAYERS]>,
    /// Chips committed this street per player.
    pub street_bets: SmallVec<[i32; MAX_PLAYERS]>,
    /// Total chips committed over the whole hand per player.
    pub contributions: SmallVec<[i32; MAX_PLAYERS]>,
    pub folded: SmallVec<[bool; MAX_PLAYERS]>,
    acted: SmallVec<[bool; MAX_PLAYERS]>,
    /// Current minimum raise increment.
    pub min_raise: i32,
    raises_this_street: u8,
    showdown: bool,
    /// Encoded action history for infoset keys.
    pub path: SmallVec<[u8; 16]>,
    chip_unit: i32,
    all_in_fraction: f64,
    big_blind: i32,
}

impl GameState {
    pub fn new(config: &GameConfig, button: usize) -> GameState {
        let n = config.num_players;
        debug_assert!((2..=MAX_PLAYERS).contains(&n));
        let mut state = GameState {
            num_players: n,
            button,
            street: Street::Preflop,
            to_act: 0,
            stacks: smallvec::smallvec![config.stack_size; n],
            street_bets: smallvec::smallvec![0; n],
            contributions: smallvec::smallvec![0; n],
            folded: smallvec::smallvec![false; n],
            acted: smallvec::smallvec![false; n],
            min_raise: config.big_blind,
            raises_this_street: 0,
            showdown: false,
            path: SmallVec::new(),
            chip_unit: config.chip_unit,
            all_in_fraction: config.all_in_fraction,
            big_blind: config.big_blind,
        };
        // Heads up the button is the small blind and acts first preflop.
        let sb = if n == 2 { button } else { (button + 1) % n };
        let bb = (sb + 1) % n;
        state.post(sb, config.small_blind);
        state.post(bb, config.big_blind);
        state.to_act = (bb + 1) % n;
        state
    }

    fn post(&mut self, player: usize, amount: i32) {
        let amount = amount.min(self.stacks[player]);
        self.stacks[player] -= amount;
        self.street_bets[player] += amount;
        self.contributions[player] += amount;
    }

    pub fn pot(&self) -> i32 {
        self.contributions.iter().sum()
    }

    pub fn current_bet(&self) -> i32 {
        *self.street_bets.iter().max().unwrap_or(&0)
    }

    pub fn to_call(&self, player: usize) -> i32 {
        (self.current_bet() - self.street_bets[player]).min(self.stacks[player])
    }

    pub fn current_player(&self) -> usize {
        self.to_act
    }

    fn is_active(&self, player: usize) -> bool {
        !self.folded[player]
    }

    fn active_count(&self) -> usize {
        (0..self.num_players).filter(|&p| self.is_active(p)).count()
    }

    fn can_act(&self, player: usize) -> bool {
        self.is_active(player) && self.stacks[player] > 0
    }

    pub fn is_terminal(&self) -> bool {
        self.active_count() <= 1 || self.showdown
    }

    /// Pot excluding the acting player's pending call, which is how bet
    /// fractions are quoted.
    pub fn bet_context(&self, player: usize) -> BetContext {
        BetContext {
            pot: self.pot() - self.to_call(player),
            to_call: self.to_call(player),
            min_raise: self.min_raise,
            stack: self.stacks[player],
            chip_unit: self.chip_unit,
            all_in_fraction: self.all_in_fraction,
        }
    }

    /// Legal abstract actions for the acting player, in canonical order.
    pub fn legal_actions(&self, bet_fractions: &[f64]) -> SmallVec<[AbstractAction; MAX_ACTIONS]> {
        debug_assert!(!self.is_terminal());
        let player = self.to_act;
        let to_call = self.to_call(player);
        let mut actions: SmallVec<[AbstractAction; MAX_ACTIONS]> = SmallVec::new();
        if to_call > 0 {
            actions.push(AbstractAction::Fold);
        }
        actions.push(AbstractAction::Call);
        let can_raise =
            self.stacks[player] > to_call && self.raises_this_street < MAX_RAISES_PER_STREET;
        if can_raise {
            let mut bets: SmallVec<[AbstractAction; MAX_ACTIONS]> = SmallVec::new();
            let ctx = self.bet_context(player);
            let mut seen: SmallVec<[ConcreteAction; MAX_ACTIONS]> = SmallVec::new();
            for &fraction in bet_fractions {
                let action = if fraction < 0.0 {
                    AbstractAction::AllIn
                } else {
                    AbstractAction::bet(fraction)
                };
                // Drop menu entries that collapse to the same chips
                let concrete = translate(action, &ctx);
                if concrete.amount() > to_call && !seen.contains(&concrete) {
                    seen.push(concrete);
                    bets.push(action);
                }
            }
            bets.sort();
            actions.extend(bets);
        }
        actions
    }

    /// Applies an abstract action for the acting player and advances the
    /// turn, the street, or the hand as needed.
    pub fn apply(&mut self, action: AbstractAction) {
        debug_assert!(!self.is_terminal());
        let player = self.to_act;
        let ctx = self.bet_context(player);
        let concrete = translate(action, &ctx);
        match concrete {
            ConcreteAction::Fold => {
                self.folded[player] = true;
            }
            ConcreteAction::Call(amount) => {
                self.post(player, amount);
            }
            ConcreteAction::Bet(amount) => {
                let raise = amount - ctx.to_call;
                if raise >= self.min_raise {
                    self.min_raise = raise;
                    // A full raise reopens the action
                    for p in 0..self.num_players {
                        self.acted[p] = false;
                    }
                }
                self.raises_this_street += 1;
                self.post(player, amount.min(self.stacks[player]));
            }
        }
        self.acted[player] = true;
        self.path.push(action.encode());

        if self.active_count() <= 1 {
            return;
        }
        if self.street_closed() {
            self.advance_street();
        } else {
            self.to_act = self.next_actor(player);
        }
    }

    fn street_closed(&self) -> bool {
        let bet = self.current_bet();
        (0..self.num_players).all(|p| {
            !self.is_active(p)
                || self.stacks[p] == 0
                || (self.acted[p] && self.street_bets[p] == bet)
        })
    }

    fn next_actor(&self, from: usize) -> usize {
        let mut p = (from + 1) % self.num_players;
        while !self.can_act(p) {
            p = (p + 1) % self.num_players;
        }
        p
    }

    fn advance_street(&mut self) {
        loop {
            match self.street.next() {
                None => {
                    self.showdown = true;
                    return;
                }
                Some(next) => {
                    self.street = next;
                    self.path.push(STREET_MARKER);
                    for p in 0..self.num_players {
                        self.street_bets[p] = 0;
                        self.acted[p] = false;
                    }
                    self.min_raise = self.big_blind;
                    self.raises_this_street = 0;
                    // Fewer than two players can still act: run the board out
                    let actors = (0..self.num_players).filter(|&p| self.can_act(p)).count();
                    if actors >= 2 {
                        self.to_act = self.next_actor(self.button);
                        return;
                    }
                }
            }
        }
    }

    /// Reconstructs a mid-hand state from an observed live table. The
    /// per-player split of chips committed on earlier streets is not
    /// observable, so `contributions` may be an even split; within a subgame
    /// that only shifts payoffs by a per-player constant and never changes
    /// which action is best.
    #[allow(clippy::too_many_arguments)]
    pub fn from_live(
        config: &GameConfig,
        street: Street,
        button: usize,
        to_act: usize,
        stacks: &[i32],
        street_bets: &[i32],
        contributions: &[i32],
        folded: &[bool],
        acted: &[bool],
        min_raise: i32,
        raises_this_street: u8,
        path: SmallVec<[u8; 16]>,
    ) -> GameState {
        GameState {
            num_players: stacks.len(),
            button,
            street,
            to_act,
            stacks: stacks.iter().copied().collect(),
            street_bets: street_bets.iter().copied().collect(),
            contributions: contributions.iter().copied().collect(),
            folded: folded.iter().copied().collect(),
            acted: acted.iter().copied().collect(),
            min_raise,
            raises_this_street,
            showdown: false,
            path,
            chip_unit: config.chip_unit,
            all_in_fraction: config.all_in_fraction,
            big_blind: config.big_blind,
        }
    }

    /// Infoset key for the acting player given their card bucket.
    pub fn info_key(&self, bucket: u32) -> InfoKey {
        InfoKey {
            street: self.street as u8,
            bucket,
            path: self.path.clone(),
        }
    }

    /// Net chip outcome per player at a terminal state. `deck` follows the
    /// canonical layout. Side pots are settled by contribution level.
    pub fn payoffs(&self, deck: &[Card]) -> SmallVec<[f64; MAX_PLAYERS]> {
        debug_assert!(self.is_terminal());
        let n = self.num_players;
        let mut result: SmallVec<[f64; MAX_PLAYERS]> =
            self.contributions.iter().map(|&c| -(c as f64)).collect();

        if self.active_count() == 1 {
            let winner = (0..n).find(|&p| self.is_active(p)).unwrap();
            result[winner] += self.pot() as f64;
            return result;
        }

        let board = board_cards(deck, n, Street::River);
        let strengths: SmallVec<[Option<rs_poker::core::Rank>; MAX_PLAYERS]> = (0..n)
            .map(|p| {
                if self.is_active(p) {
                    Some(hand_strength(&[hole_cards(deck, p), board].concat()))
                } else {
                    None
                }
            })
            .collect();

        // Settle the pot one contribution level at a time so partial stacks
        // only win what they covered.
        let mut levels: SmallVec<[i32; MAX_PLAYERS]> = self
            .contributions
            .iter()
            .enumerate()
            .filter(|(p, _)| self.is_active(*p))
            .map(|(_, &c)| c)
            .collect();
        levels.sort_unstable();
        levels.dedup();

        let mut prev = 0;
        for &level in &levels {
            let slice: i32 = self
                .contributions
                .iter()
                .map(|&c| (c.min(level) - prev).max(0))
                .sum();
            prev = level;
            if slice == 0 {
                continue;
            }
            let eligible: SmallVec<[usize; MAX_PLAYERS]> = (0..n)
                .filter(|&p| self.is_active(p) && self.contributions[p] >= level)
                .collect();
            let best = eligible
                .iter()
                .filter_map(|&p| strengths[p])
                .max()
                .unwrap();
            let winners: SmallVec<[usize; MAX_PLAYERS]> = eligible
                .iter()
                .copied()
                .filter(|&p| strengths[p] == Some(best))
                .collect();
            for &w in &winners {
                result[w] += slice as f64 / winners.len() as f64;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card_utils::strvec2cards;

    fn heads_up() -> GameConfig {
        GameConfig::default()
    }

    fn pot_limit_menu() -> Vec<f64> {
        vec![1.0, -1.0]
    }

    #[test]
    fn blinds_are_posted() {
        let state = GameState::new(&heads_up(), 0);
        assert_eq!(state.pot(), 150);
        assert_eq!(state.to_act, 0, "button acts first heads up");
        assert_eq!(state.to_call(0), 50);
    }

    #[test]
    fn fold_ends_the_hand() {
        let mut state = GameState::new(&heads_up(), 0);
        state.apply(AbstractAction::Fold);
        assert!(state.is_terminal());
        let deck = crate::card_utils::deck();
        let payoffs = state.payoffs(&deck);
        assert_eq!(payoffs[0], -50.0);
        assert_eq!(payoffs[1], 50.0);
    }

    #[test]
    fn call_check_advances_to_flop() {
        let mut state = GameState::new(&heads_up(), 0);
        state.apply(AbstractAction::Call);
        assert_eq!(state.street, Street::Preflop, "big blind still has the option");
        state.apply(AbstractAction::Call);
        assert_eq!(state.street, Street::Flop);
        assert_eq!(state.to_act, 1, "out of position acts first postflop");
    }

    #[test]
    fn check_down_reaches_showdown() {
        let mut state = GameState::new(&heads_up(), 0);
        state.apply(AbstractAction::Call);
        for _ in 0..7 {
            state.apply(AbstractAction::Call);
        }
        assert!(state.is_terminal());
    }

    #[test]
    fn showdown_pays_the_better_hand() {
        let mut state = GameState::new(&heads_up(), 0);
        state.apply(AbstractAction::Call);
        for _ in 0..7 {
            state.apply(AbstractAction::Call);
        }
        // Player 0 has aces, player 1 has kings, board bricks
        let deck = strvec2cards(&[
            "As", "Ad", "Ks", "Kd", "2c", "7h", "9d", "Jc", "3s",
        ]);
        let payoffs = state.payoffs(&deck);
        assert_eq!(payoffs[0], 100.0);
        assert_eq!(payoffs[1], -100.0);
    }

    #[test]
    fn fold_only_offered_facing_a_bet() {
        let mut state = GameState::new(&heads_up(), 0);
        state.apply(AbstractAction::Call);
        state.apply(AbstractAction::Call);
        // Checked to on the flop, no bet to fold to
        let actions = state.legal_actions(&pot_limit_menu());
        assert!(!actions.contains(&AbstractAction::Fold));
        assert!(actions.contains(&AbstractAction::Call));
    }

    #[test]
    fn info_keys_distinguish_histories() {
        let mut raise_line = GameState::new(&heads_up(), 0);
        raise_line.apply(AbstractAction::bet(1.0));
        let mut call_line = GameState::new(&heads_up(), 0);
        call_line.apply(AbstractAction::Call);
        assert_ne!(raise_line.info_key(5), call_line.info_key(5));
        assert_ne!(raise_line.info_key(5), raise_line.info_key(6));
    }

    #[test]
    fn all_in_caps_winnings_at_coverage() {
        let mut config = heads_up();
        config.num_players = 3;
        let mut state = GameState::new(&config, 0);
        // Short-stack player 0 for a side pot
        state.stacks[0] = 1000;
        state.apply(AbstractAction::AllIn); // player 0 (UTG) shoves 1000
        state.apply(AbstractAction::AllIn); // player 1 shoves 20000
        state.apply(AbstractAction::Call); // player 2 calls
        assert!(state.is_terminal());
        // Player 0 wins the main pot only; 1 beats 2 for the side pot
        let deck = strvec2cards(&[
            "As", "Ad", "Ks", "Kd", "Qs", "Qd", "2c", "7h", "9d", "Jc", "3s",
        ]);
        let payoffs = state.payoffs(&deck);
        assert_eq!(payoffs[0], 2000.0);
        assert_eq!(payoffs[1], 18_000.0);
        assert!((payoffs[0] + payoffs[1] + payoffs[2]).abs() < 1e-9);
    }
}
