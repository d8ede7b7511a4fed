// Normalized live table record, the boundary between perception and the
// solver. Whatever reads the table produces one of these; the resolver never
// sees anything rawer.

use crate::actions::AbstractAction;
use crate::card_utils::Card;
use crate::config::GameConfig;
use crate::error::{Result, SolverError};
use crate::game::{encode_path, GameState, Street};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableState {
    pub street: Street,
    pub board: Vec<Card>,
    pub button: usize,
    /// Seat index of the player we are deciding for. Must be the player to
    /// act.
    pub hero: usize,
    pub hole: Vec<Card>,
    /// Total chips committed by everyone, current street included.
    pub pot: i32,
    pub stacks: Vec<i32>,
    /// Chips committed this street per seat.
    pub street_bets: Vec<i32>,
    pub folded: Vec<bool>,
    pub all_in: Vec<bool>,
    /// Who has already acted this street.
    pub acted: Vec<bool>,
    pub min_raise: i32,
    /// Abstract action history, one list per street dealt so far.
    pub history: Vec<Vec<AbstractAction>>,
}

impl TableState {
    pub fn validate(&self) -> Result<()> {
        let n = self.stacks.len();
        if n < 2 || n > crate::game::MAX_PLAYERS {
            return Err(SolverError::Configuration(format!(
                "table has {n} seats"
            )));
        }
        for (name, len) in [
            ("street_bets", self.street_bets.len()),
            ("folded", self.folded.len()),
            ("all_in", self.all_in.len()),
            ("acted", self.acted.len()),
        ] {
            if len != n {
                return Err(SolverError::Configuration(format!(
                    "{name} has {len} entries for {n} seats"
                )));
            }
        }
        if self.hero >= n || self.button >= n {
            return Err(SolverError::Configuration(
                "hero and button must be valid seats".to_string(),
            ));
        }
        if self.hole.len() != 2 {
            return Err(SolverError::Configuration(format!(
                "hero needs two hole cards, got {}",
                self.hole.len()
            )));
        }
        if self.board.len() != self.street.board_len() {
            return Err(SolverError::Configuration(format!(
                "{} cards on board on street {:?}",
                self.board.len(),
                self.street
            )));
        }
        if self.folded[self.hero] {
            return Err(SolverError::Configuration(
                "hero has folded; there is no decision to make".to_string(),
            ));
        }
        for p in 0..n {
            if self.all_in[p] && self.stacks[p] != 0 {
                return Err(SolverError::Configuration(format!(
                    "seat {p} is flagged all in but has {} chips behind",
                    self.stacks[p]
                )));
            }
        }
        if self.pot < self.street_bets.iter().sum::<i32>() {
            return Err(SolverError::Configuration(
                "pot is smaller than the current street's bets".to_string(),
            ));
        }
        if self.history.len() != self.street as usize + 1 {
            return Err(SolverError::Configuration(format!(
                "history covers {} streets, expected {}",
                self.history.len(),
                self.street as usize + 1
            )));
        }
        Ok(())
    }

    /// Rebuilds the game state at the hero's decision point.
    pub fn to_root(&self, config: &GameConfig) -> Result<GameState> {
        self.validate()?;
        let n = self.stacks.len();

        // Past-street contributions are not itemized in the live view; an
        // even split across live players keeps the pot total right.
        let prior = self.pot - self.street_bets.iter().sum::<i32>();
        let live = self.folded.iter().filter(|f| !**f).count().max(1) as i32;
        let contributions: Vec<i32> = (0..n)
            .map(|p| {
                let share = if self.folded[p] { 0 } else { prior / live };
                share + self.street_bets[p]
            })
            .collect();

        let raises_this_street = self
            .history
            .last()
            .map(|actions| {
                actions
                    .iter()
                    .filter(|a| matches!(a, AbstractAction::Bet(_) | AbstractAction::AllIn))
                    .count() as u8
            })
            .unwrap_or(0);

        let root = GameState::from_live(
            config,
            self.street,
            self.button,
            self.hero,
            &self.stacks,
            &self.street_bets,
            &contributions,
            &self.folded,
            &self.acted,
            self.min_raise.max(config.big_blind),
            raises_this_street,
            encode_path(&self.history),
        );
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card_utils::strvec2cards;

    fn flop_spot() -> TableState {
        TableState {
            street: Street::Flop,
            board: strvec2cards(&["Qh", "Jh", "2c"]),
            button: 0,
            hero: 1,
            hole: strvec2cards(&["Ah", "Kh"]),
            pot: 400,
            stacks: vec![19_800, 19_800],
            street_bets: vec![0, 0],
            folded: vec![false, false],
            all_in: vec![false, false],
            acted: vec![false, false],
            min_raise: 100,
            history: vec![vec![AbstractAction::Call, AbstractAction::Call], vec![]],
        }
    }

    #[test]
    fn root_reflects_the_live_spot() {
        let table = flop_spot();
        let root = table.to_root(&GameConfig::default()).unwrap();
        assert_eq!(root.pot(), 400);
        assert_eq!(root.current_player(), 1);
        assert_eq!(root.street, Street::Flop);
        assert!(!root.is_terminal());
        assert_eq!(root.to_call(1), 0);
    }

    #[test]
    fn rejects_inconsistent_records() {
        let mut table = flop_spot();
        table.board.pop();
        assert!(table.to_root(&GameConfig::default()).is_err());

        let mut table = flop_spot();
        table.hole.pop();
        assert!(table.validate().is_err());

        let mut table = flop_spot();
        table.folded[1] = true;
        assert!(table.validate().is_err());

        let mut table = flop_spot();
        table.all_in[0] = true; // but seat 0 still has chips
        assert!(table.validate().is_err());
    }

    #[test]
    fn paths_match_a_replayed_hand() {
        // The same line played through GameState must produce the same path
        let table = flop_spot();
        let root = table.to_root(&GameConfig::default()).unwrap();

        let mut replay = GameState::new(&GameConfig::default(), 0);
        replay.apply(AbstractAction::Call);
        replay.apply(AbstractAction::Call);
        assert_eq!(root.path, replay.path);
        assert_eq!(root.info_key(9), replay.info_key(9));
    }
}
