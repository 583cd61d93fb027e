//! Move Validation
//!
//! Clients merge cards locally and submit the resulting hand. By default the
//! server trusts that hand. The strict policy checks it is either one legal
//! merge of the current hand or an undo back to a hand already seen this
//! round.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::solver::Operator;
use crate::game::state::{Card, EPSILON};

/// How submitted hands are checked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovePolicy {
    /// Accept the submitted hand as-is.
    #[default]
    Trusted,
    /// Accept only legal single merges and undos.
    Strict,
}

/// Operators a client may merge with.
pub const MOVE_OPERATORS: [Operator; 5] = [
    Operator::Add,
    Operator::Sub,
    Operator::Mul,
    Operator::Div,
    Operator::Pow,
];

/// Why a strict check failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MoveError {
    /// Card count is not one less than the current hand.
    #[error("expected {expected} cards, got {got}")]
    WrongCardCount {
        /// Required count.
        expected: usize,
        /// Submitted count.
        got: usize,
    },
    /// A card kept from the current hand was altered or duplicated.
    #[error("card {0} was altered")]
    AlteredCard(String),
    /// The submitted hand does not consume exactly two cards.
    #[error("a move must combine exactly two cards")]
    NotAPair,
    /// No operator turns the two consumed cards into the new one.
    #[error("no operator produces {0}")]
    NoOperator(f64),
}

fn same_card(a: &Card, b: &Card) -> bool {
    a.id == b.id && (a.value - b.value).abs() < EPSILON
}

fn same_hand(a: &[Card], b: &[Card]) -> bool {
    a.len() == b.len() && a.iter().all(|x| b.iter().any(|y| same_card(x, y)))
}

/// Whether `next` restores a hand from `history`.
pub fn is_undo(history: &[Vec<Card>], next: &[Card]) -> bool {
    history.iter().any(|h| same_hand(h, next))
}

/// Check that `next` is `current` with two cards merged into one.
pub fn check_merge(current: &[Card], next: &[Card]) -> Result<(), MoveError> {
    let expected = current.len().saturating_sub(1);
    if current.len() < 2 || next.len() != expected {
        return Err(MoveError::WrongCardCount { expected, got: next.len() });
    }

    let mut produced = Vec::new();
    let mut kept_ids: Vec<&str> = Vec::new();
    for card in next {
        match current.iter().find(|c| c.id == card.id) {
            Some(original) => {
                if !same_card(original, card) || kept_ids.contains(&card.id.as_str()) {
                    return Err(MoveError::AlteredCard(card.id.clone()));
                }
                kept_ids.push(&card.id);
            }
            None => produced.push(card),
        }
    }

    let consumed: Vec<&Card> = current
        .iter()
        .filter(|c| !kept_ids.contains(&c.id.as_str()))
        .collect();

    let (new_card, a, b) = match (produced.as_slice(), consumed.as_slice()) {
        ([new_card], [a, b]) => (*new_card, *a, *b),
        _ => return Err(MoveError::NotAPair),
    };

    let legal = MOVE_OPERATORS.iter().any(|op| {
        [op.apply(a.value, b.value), op.apply(b.value, a.value)]
            .into_iter()
            .flatten()
            .any(|v| (v - new_card.value).abs() < EPSILON)
    });

    if legal {
        Ok(())
    } else {
        Err(MoveError::NoOperator(new_card.value))
    }
}
