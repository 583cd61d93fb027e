//! Puzzle Generation
//!
//! Deals four random cards and redraws until the solver confirms the hand
//! reaches 24. After `max_draws` misses a hand from a table of known-solvable
//! rank sets is dealt instead, which bounds the worst case.

use tracing::debug;

use crate::core::rng::DeterministicRng;
use crate::game::solver::Solver;
use crate::game::state::{Card, CardCategory};

/// Cards per hand.
pub const HAND_SIZE: usize = 4;

/// Highest card rank (K).
pub const MAX_RANK: u8 = 13;

/// Known-solvable rank sets dealt when random draws keep missing.
pub const FALLBACK_HANDS: [[u8; HAND_SIZE]; 8] = [
    [1, 2, 3, 4],
    [3, 3, 8, 8],
    [1, 5, 5, 5],
    [4, 4, 10, 10],
    [2, 3, 4, 6],
    [6, 6, 6, 6],
    [1, 3, 4, 6],
    [1, 4, 5, 6],
];

/// Default number of random draws before using the fallback table.
pub const DEFAULT_MAX_DRAWS: u32 = 64;

/// Draws solvable hands.
#[derive(Clone, Debug)]
pub struct PuzzleGenerator {
    solver: Solver,
    max_draws: u32,
}

impl Default for PuzzleGenerator {
    fn default() -> Self {
        Self {
            solver: Solver::new(),
            max_draws: DEFAULT_MAX_DRAWS,
        }
    }
}

/// A dealt hand plus how it was obtained.
#[derive(Clone, Debug)]
pub struct Deal {
    /// The four cards.
    pub cards: Vec<Card>,
    /// Random draws consumed.
    pub draws: u32,
    /// Whether the fallback table supplied the hand.
    pub fallback: bool,
}

impl PuzzleGenerator {
    /// Generator with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the number of random draws tried before falling back.
    pub fn with_max_draws(mut self, max_draws: u32) -> Self {
        self.max_draws = max_draws;
        self
    }

    /// Deal a solvable hand.
    pub fn deal(&self, rng: &mut DeterministicRng) -> Deal {
        for draw in 1..=self.max_draws {
            let ranks: [u8; HAND_SIZE] =
                std::array::from_fn(|_| rng.next_int_range(1, i32::from(MAX_RANK)) as u8);
            let values: Vec<f64> = ranks.iter().map(|r| f64::from(*r)).collect();

            if self.solver.is_solvable(&values) {
                return Deal {
                    cards: Self::cards_for(&ranks, rng),
                    draws: draw,
                    fallback: false,
                };
            }
        }

        let ranks = rng
            .choose(&FALLBACK_HANDS)
            .copied()
            .unwrap_or(FALLBACK_HANDS[0]);
        debug!("Random draws exhausted, dealing fallback hand {:?}", ranks);

        Deal {
            cards: Self::cards_for(&ranks, rng),
            draws: self.max_draws,
            fallback: true,
        }
    }

    fn cards_for(ranks: &[u8; HAND_SIZE], rng: &mut DeterministicRng) -> Vec<Card> {
        ranks
            .iter()
            .map(|rank| {
                let suit = rng
                    .choose(&CardCategory::SUITS)
                    .copied()
                    .unwrap_or(CardCategory::Spades);
                Card::dealt(*rank, suit)
            })
            .collect()
    }
}
