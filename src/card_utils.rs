use itertools::Itertools;
use rand::prelude::*;
use rand::rngs::StdRng;
use rs_poker::core::{Hand, Rankable};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const CLUBS: u8 = 0;
pub const DIAMONDS: u8 = 1;
pub const HEARTS: u8 = 2;
pub const SPADES: u8 = 3;

#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Card {
    pub rank: u8,
    pub suit: u8,
}

impl Card {
    pub fn new(card: &str) -> Card {
        let rank = match &card[0..1] {
            "2" => 2,
            "3" => 3,
            "4" => 4,
            "5" => 5,
            "6" => 6,
            "7" => 7,
            "8" => 8,
            "9" => 9,
            "T" => 10,
            "J" => 11,
            "Q" => 12,
            "K" => 13,
            "A" => 14,
            _ => panic!("bad card string '{}'", card),
        };
        let suit = match &card[1..2] {
            "c" => CLUBS,
            "d" => DIAMONDS,
            "h" => HEARTS,
            "s" => SPADES,
            _ => panic!("bad card string '{}'", card),
        };
        Card { rank, suit }
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let rank = match self.rank {
            2 => "2",
            3 => "3",
            4 => "4",
            5 => "5",
            6 => "6",
            7 => "7",
            8 => "8",
            9 => "9",
            10 => "T",
            11 => "J",
            12 => "Q",
            13 => "K",
            14 => "A",
            _ => panic!("bad rank value: {}", self.rank),
        };
        let suit = match self.suit {
            CLUBS => "c",
            DIAMONDS => "d",
            HEARTS => "h",
            SPADES => "s",
            _ => panic!("bad suit value"),
        };
        write!(f, "{}{}", rank, suit)
    }
}

pub fn deck() -> Vec<Card> {
    let mut deck = Vec::with_capacity(52);
    for rank in 2..15 {
        for suit in 0..4 {
            deck.push(Card { rank, suit });
        }
    }
    deck
}

pub fn strvec2cards(strvec: &[&str]) -> Vec<Card> {
    strvec.iter().map(|s| Card::new(s)).collect()
}

pub fn pbar(n: u64) -> indicatif::ProgressBar {
    let bar = indicatif::ProgressBar::new(n);
    bar.set_style(
        indicatif::ProgressStyle::with_template(
            "[{elapsed_precise}/{eta_precise}] {wide_bar} {pos:>7}/{len:7} {msg}",
        )
        .expect("bad progress template"),
    );
    bar
}

fn sort_isomorphic(cards: &[Card], streets: bool) -> Vec<Card> {
    let mut sorted;
    if streets && cards.len() > 2 {
        let mut hole = cards[..2].to_vec();
        let mut board = cards[2..].to_vec();
        hole.sort_by_key(|c| (c.suit, c.rank));
        board.sort_by_key(|c| (c.suit, c.rank));
        sorted = [hole, board].concat();
    } else {
        sorted = cards.to_vec();
        sorted.sort_by_key(|c| (c.suit, c.rank));
    }
    sorted
}

// Maps a hand to its canonical suit-isomorphic representative. Order of the
// hole cards and board cards doesn't matter, and suits only matter relative
// to each other, so e.g. a heart flush and a diamond flush collapse to the
// same hand. With `streets` set, the hole cards stay distinguishable from
// the board.
pub fn isomorphic_hand(cards: &[Card], streets: bool) -> Vec<Card> {
    let cards = sort_isomorphic(cards, streets);
    let mut by_suits: Vec<Vec<u8>> = Vec::with_capacity(4);
    for suit in 0..4 {
        let ranks: Vec<u8> = cards
            .iter()
            .filter(|c| c.suit == suit)
            .map(|c| c.rank)
            .collect();
        by_suits.push(ranks);
    }

    // suit_mapping[old_suit] = new_suit, assigned in size order with
    // lexicographic tie breaking
    let mut suit_mapping = [0u8; 4];
    let mut unused_suits: Vec<usize> = vec![0, 1, 2, 3];
    for new_suit in 0..4u8 {
        let mut max = unused_suits[0];
        for &old_suit in &unused_suits {
            if by_suits[old_suit].len() > by_suits[max].len()
                || (by_suits[old_suit].len() == by_suits[max].len()
                    && by_suits[old_suit] < by_suits[max])
            {
                max = old_suit;
            }
        }
        suit_mapping[max] = new_suit;
        unused_suits.retain(|&s| s != max);
    }

    let isomorphic: Vec<Card> = cards
        .iter()
        .map(|card| Card {
            rank: card.rank,
            suit: suit_mapping[card.suit as usize],
        })
        .collect();
    sort_isomorphic(&isomorphic, streets)
}

fn to_rs_poker(card: &Card) -> rs_poker::core::Card {
    use rs_poker::core::{Suit, Value};
    let value = match card.rank {
        2 => Value::Two,
        3 => Value::Three,
        4 => Value::Four,
        5 => Value::Five,
        6 => Value::Six,
        7 => Value::Seven,
        8 => Value::Eight,
        9 => Value::Nine,
        10 => Value::Ten,
        11 => Value::Jack,
        12 => Value::Queen,
        13 => Value::King,
        14 => Value::Ace,
        _ => panic!("bad rank value: {}", card.rank),
    };
    let suit = match card.suit {
        CLUBS => Suit::Club,
        DIAMONDS => Suit::Diamond,
        HEARTS => Suit::Heart,
        SPADES => Suit::Spade,
        _ => panic!("bad suit value"),
    };
    rs_poker::core::Card { value, suit }
}

/// Showdown strength of a 5-7 card hand. Only comparisons are meaningful.
pub fn hand_strength(cards: &[Card]) -> rs_poker::core::Rank {
    let hand = Hand::new_with_cards(cards.iter().map(to_rs_poker).collect());
    hand.rank()
}

/// Exact river equity against a uniformly random opponent holding, by
/// enumerating every remaining two-card combination.
pub fn river_equity(hole: &[Card], board: &[Card]) -> f64 {
    debug_assert_eq!(hole.len(), 2);
    debug_assert_eq!(board.len(), 5);
    let mut remaining = deck();
    remaining.retain(|c| !hole.contains(c) && !board.contains(c));

    let my_strength = hand_strength(&[hole, board].concat());
    let mut wins = 0.0;
    let mut runs = 0.0;
    for opp in remaining.iter().combinations(2) {
        let opp_hand: Vec<Card> = opp.iter().map(|c| **c).collect();
        let opp_strength = hand_strength(&[&opp_hand[..], board].concat());
        if my_strength > opp_strength {
            wins += 1.0;
        } else if my_strength == opp_strength {
            wins += 0.5;
        }
        runs += 1.0;
    }
    wins / runs
}

/// Second moment of the hand's equity distribution over board runouts,
/// estimated with `samples` Monte Carlo rollouts. Deterministic for a given
/// `rng` seed; river hands short-circuit to their exact squared equity.
pub fn expected_hs2(hole: &[Card], board: &[Card], samples: usize, rng: &mut StdRng) -> f64 {
    debug_assert_eq!(hole.len(), 2);
    if board.len() == 5 {
        return river_equity(hole, board).powi(2);
    }

    let mut remaining = deck();
    remaining.retain(|c| !hole.contains(c) && !board.contains(c));

    let mut sum = 0.0;
    for _ in 0..samples {
        // Run the board out, then play one random opponent holding against it
        let mut sample = remaining.clone();
        sample.shuffle(rng);
        let need = 5 - board.len();
        let runout: Vec<Card> = sample[..need].to_vec();
        let opp: Vec<Card> = sample[need..need + 2].to_vec();
        let full_board = [board, &runout[..]].concat();
        let my_strength = hand_strength(&[hole, &full_board[..]].concat());
        let opp_strength = hand_strength(&[&opp[..], &full_board[..]].concat());
        let equity = if my_strength > opp_strength {
            1.0
        } else if my_strength == opp_strength {
            0.5
        } else {
            0.0
        };
        sum += equity;
    }
    let mean = sum / samples as f64;
    mean * mean
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hand_comparisons() {
        let royal_flush = strvec2cards(&["Jd", "As", "Js", "Ks", "Qs", "Ts", "2c"]);
        let straight_flush = strvec2cards(&["7d", "2c", "8d", "Jd", "9d", "3d", "Td"]);
        let four = strvec2cards(&["2h", "2c", "3d", "5c", "7d", "2d", "2s"]);
        let full_house = strvec2cards(&["As", "Jd", "Qs", "Jc", "2c", "Ac", "Ah"]);
        let flush = strvec2cards(&["Jh", "2c", "2h", "3h", "7h", "As", "9h"]);
        let straight = strvec2cards(&["Ah", "2s", "3d", "5c", "4c"]);
        let trips = strvec2cards(&["5d", "4c", "6d", "6h", "6c"]);
        let two_pair = strvec2cards(&["6d", "5c", "5h", "Ah", "Ac"]);
        let pair = strvec2cards(&["Ah", "2d", "2s", "3c", "5c"]);
        let high_card = strvec2cards(&["Kh", "Ah", "Qh", "2h", "3s"]);

        assert!(hand_strength(&royal_flush) > hand_strength(&straight_flush));
        assert!(hand_strength(&straight_flush) > hand_strength(&four));
        assert!(hand_strength(&four) > hand_strength(&full_house));
        assert!(hand_strength(&full_house) > hand_strength(&flush));
        assert!(hand_strength(&flush) > hand_strength(&straight));
        assert!(hand_strength(&straight) > hand_strength(&trips));
        assert!(hand_strength(&trips) > hand_strength(&two_pair));
        assert!(hand_strength(&two_pair) > hand_strength(&pair));
        assert!(hand_strength(&pair) > hand_strength(&high_card));
    }

    #[test]
    fn hand_ties() {
        let royal_spades = strvec2cards(&["Jd", "As", "Js", "Ks", "Qs", "Ts", "2c"]);
        let royal_clubs = strvec2cards(&["Jd", "Ac", "Jc", "Kc", "Qc", "Tc", "2c"]);
        assert_eq!(hand_strength(&royal_spades), hand_strength(&royal_clubs));
    }

    #[test]
    fn isomorphism_collapses_suits() {
        let hearts = strvec2cards(&["Ah", "Kh", "2h", "7h", "9h"]);
        let diamonds = strvec2cards(&["Ad", "Kd", "2d", "7d", "9d"]);
        assert_eq!(isomorphic_hand(&hearts, true), isomorphic_hand(&diamonds, true));

        // Hole cards stay distinguishable from the board
        let pocket_aces = strvec2cards(&["As", "Ad", "Jh", "9c", "2s"]);
        let aces_on_board = strvec2cards(&["Jh", "9c", "As", "Ad", "2s"]);
        assert_ne!(
            isomorphic_hand(&pocket_aces, true),
            isomorphic_hand(&aces_on_board, true)
        );
    }

    #[test]
    fn river_equity_bounds() {
        let nuts_hole = strvec2cards(&["As", "Ks"]);
        let nuts_board = strvec2cards(&["Qs", "Js", "Ts", "2c", "3d"]);
        let equity = river_equity(&nuts_hole, &nuts_board);
        assert!(equity > 0.99, "royal flush should win everything, got {equity}");

        let trash_hole = strvec2cards(&["2c", "7d"]);
        let trash_board = strvec2cards(&["Qs", "Js", "Ts", "9s", "8s"]);
        let equity = river_equity(&trash_hole, &trash_board);
        assert!(equity < 0.6);
    }
}
