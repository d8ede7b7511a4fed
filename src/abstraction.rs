// Card abstraction: maps a (hole, board) pair to a bucket id per street so
// that strategically similar hands share strategy state. Preflop uses the
// closed-form 169 starting-hand classes; postflop streets are fitted offline
// by percentile-clustering sampled E[HS^2] features. The fit is deterministic
// given the configured seed and sample counts, and the whole configuration is
// condensed into a hash so downstream artifacts can detect mismatches.

use crate::card_utils::{deck, expected_hs2, Card};
use crate::config::AbstractionConfig;
use crate::game::Street;
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

const HASH_SCHEMA_TAG: &[u8] = b"maverick-abstraction-v1";

pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardAbstraction {
    config: AbstractionConfig,
    /// Bucket cut points per postflop street (flop, turn, river), each sorted
    /// ascending with `buckets - 1` entries.
    boundaries: [Vec<f64>; 3],
    hash: u64,
}

impl CardAbstraction {
    /// Fits the postflop bucket boundaries from sampled feature vectors.
    /// Deterministic for a fixed config, including across thread counts:
    /// every sample derives its own RNG seed.
    pub fn fit(config: &AbstractionConfig) -> CardAbstraction {
        let mut boundaries: [Vec<f64>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        for street in [Street::Flop, Street::Turn, Street::River] {
            let n_buckets = config.street_buckets(street);
            let board_len = street.board_len();
            let mut features: Vec<f64> = (0..config.fit_samples)
                .into_par_iter()
                .map(|i| {
                    let sample_seed =
                        config.seed ^ fnv1a64(&[street as u8, (i & 0xff) as u8]) ^ (i as u64) << 8;
                    let mut rng = StdRng::seed_from_u64(sample_seed);
                    let mut cards = deck();
                    cards.shuffle(&mut rng);
                    let hole = &cards[..2];
                    let board = &cards[2..2 + board_len];
                    expected_hs2(hole, board, config.equity_samples, &mut rng)
                })
                .collect();
            features.sort_by(|a, b| a.partial_cmp(b).expect("NaN feature"));

            // Percentile cut points: bucket k covers features in
            // [cuts[k-1], cuts[k])
            let mut cuts = Vec::with_capacity(n_buckets as usize - 1);
            for k in 1..n_buckets {
                let idx = (k as usize * features.len()) / n_buckets as usize;
                cuts.push(features[idx.min(features.len() - 1)]);
            }
            boundaries[street.postflop_index()] = cuts;
        }

        let hash = Self::compute_hash(config, &boundaries);
        CardAbstraction {
            config: config.clone(),
            boundaries,
            hash,
        }
    }

    fn compute_hash(config: &AbstractionConfig, boundaries: &[Vec<f64>; 3]) -> u64 {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(HASH_SCHEMA_TAG);
        for n in [
            config.flop_buckets,
            config.turn_buckets,
            config.river_buckets,
        ] {
            bytes.extend_from_slice(&n.to_le_bytes());
        }
        bytes.extend_from_slice(&(config.fit_samples as u64).to_le_bytes());
        bytes.extend_from_slice(&(config.equity_samples as u64).to_le_bytes());
        bytes.extend_from_slice(&config.seed.to_le_bytes());
        for cuts in boundaries {
            for cut in cuts {
                bytes.extend_from_slice(&cut.to_bits().to_le_bytes());
            }
        }
        fnv1a64(&bytes)
    }

    /// Whether this abstraction was fitted from exactly this configuration.
    pub fn matches(&self, config: &AbstractionConfig) -> bool {
        self.config == *config
    }

    /// Hash of the full abstraction configuration and fitted boundaries.
    /// Checkpoints and policy artifacts carry this so resume / load can
    /// reject incompatible abstractions.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Deterministic bucket id for a hand on the given street.
    pub fn bucket_id(&self, hole: &[Card], board: &[Card], street: Street) -> u32 {
        debug_assert_eq!(hole.len(), 2);
        debug_assert_eq!(board.len(), street.board_len());
        if street == Street::Preflop {
            return preflop_bin(hole);
        }
        // Derive the rollout seed from the canonical hand so the estimate,
        // and hence the bucket, is a pure function of the inputs.
        let canonical = crate::card_utils::isomorphic_hand(&[hole, board].concat(), true);
        let mut bytes = Vec::with_capacity(canonical.len() * 2 + 8);
        for c in &canonical {
            bytes.push(c.rank);
            bytes.push(c.suit);
        }
        bytes.extend_from_slice(&self.config.seed.to_le_bytes());
        let mut rng = StdRng::seed_from_u64(fnv1a64(&bytes));
        let feature = expected_hs2(hole, board, self.config.equity_samples, &mut rng);

        let cuts = &self.boundaries[street.postflop_index()];
        match cuts.binary_search_by(|c| c.partial_cmp(&feature).expect("NaN cut")) {
            Ok(i) => i as u32 + 1,
            Err(i) => i as u32,
        }
    }
}

impl AbstractionConfig {
    pub fn street_buckets(&self, street: Street) -> u32 {
        match street {
            Street::Preflop => 169,
            Street::Flop => self.flop_buckets,
            Street::Turn => self.turn_buckets,
            Street::River => self.river_buckets,
        }
    }
}

/// Closed-form preflop class: rank pair plus suitedness, 169 distinct values.
/// Ids are sparse, which is fine for map-keyed stores.
pub fn preflop_bin(hole: &[Card]) -> u32 {
    debug_assert_eq!(hole.len(), 2);
    let mut cards = [hole[0], hole[1]];
    cards.sort_by_key(|c| c.rank);
    let mut bin = 2 * (cards[0].rank as u32 * 100 + cards[1].rank as u32);
    if cards[0].suit == cards[1].suit {
        bin += 1;
    }
    bin
}

/// Human-readable name for a preflop bin, e.g. "AKs", "T9o", "QQ".
pub fn preflop_hand_name(bin: u32) -> String {
    let suited = bin % 2 == 1;
    let ranks = bin / 2;
    let low = (ranks / 100) as u8;
    let high = (ranks % 100) as u8;
    let rank_char = |r: u8| "  23456789TJQKA".chars().nth(r as usize).unwrap();
    if low == high {
        format!("{}{}", rank_char(high), rank_char(low))
    } else {
        format!(
            "{}{}{}",
            rank_char(high),
            rank_char(low),
            if suited { "s" } else { "o" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card_utils::strvec2cards;

    fn small_config() -> AbstractionConfig {
        AbstractionConfig {
            flop_buckets: 10,
            turn_buckets: 10,
            river_buckets: 10,
            fit_samples: 200,
            equity_samples: 20,
            seed: 42,
        }
    }

    #[test]
    fn preflop_bins_distinguish_suitedness() {
        let suited = strvec2cards(&["Ah", "Kh"]);
        let offsuit = strvec2cards(&["Ah", "Kc"]);
        assert_ne!(preflop_bin(&suited), preflop_bin(&offsuit));
        // Order of the hole cards doesn't matter
        let reversed = strvec2cards(&["Kh", "Ah"]);
        assert_eq!(preflop_bin(&suited), preflop_bin(&reversed));
    }

    #[test]
    fn preflop_names_round_trip() {
        assert_eq!(preflop_hand_name(preflop_bin(&strvec2cards(&["Ah", "Kh"]))), "AKs");
        assert_eq!(preflop_hand_name(preflop_bin(&strvec2cards(&["Ah", "Kc"]))), "AKo");
        assert_eq!(preflop_hand_name(preflop_bin(&strvec2cards(&["Qd", "Qc"]))), "QQ");
    }

    #[test]
    fn bucket_id_is_deterministic() {
        let abs = CardAbstraction::fit(&small_config());
        let hole = strvec2cards(&["Ah", "Kh"]);
        let board = strvec2cards(&["Qh", "Jh", "2c"]);
        let a = abs.bucket_id(&hole, &board, Street::Flop);
        let b = abs.bucket_id(&hole, &board, Street::Flop);
        assert_eq!(a, b);
        assert!(a < 10);
    }

    #[test]
    fn fit_is_reproducible_and_hash_tracks_config() {
        let a = CardAbstraction::fit(&small_config());
        let b = CardAbstraction::fit(&small_config());
        assert_eq!(a.hash(), b.hash());

        let mut other = small_config();
        other.seed = 43;
        let c = CardAbstraction::fit(&other);
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn strong_hands_bucket_above_weak_hands() {
        let abs = CardAbstraction::fit(&small_config());
        let board = strvec2cards(&["Qh", "Jh", "2c", "7d", "3s"]);
        let strong = strvec2cards(&["Qc", "Qd"]); // top set
        let weak = strvec2cards(&["4c", "5d"]);
        let strong_bucket = abs.bucket_id(&strong, &board, Street::River);
        let weak_bucket = abs.bucket_id(&weak, &board, Street::River);
        assert!(strong_bucket > weak_bucket);
    }
}
