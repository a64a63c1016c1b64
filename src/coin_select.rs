//! # Coin Selection
//!
//! Greedy-then-patch selection that avoids leaving change strictly between
//! zero and the dust threshold when no near-dust output slot is left.
//!
//! 0. A single coin matching the target exactly is selected alone.
//! 1. Coins are accumulated in order until the target is met.
//! 2. Sub-dust change with no free near-dust slot is patched by adding one
//!    unused coin, then by searching singles, pairs and bounded triplets.
//! 3. Otherwise every coin is spent.

use bitcoin::Amount;

use crate::{
    coin::ArkCoin,
    config::selection::{MAX_SUBDUST_OUTPUTS, TRIPLET_SEARCH_LIMIT},
    error::{ArkError, ArkResult},
};

/// Anything with a spendable amount
pub trait SelectableCoin: Clone {
    fn amount(&self) -> Amount;
}

impl SelectableCoin for ArkCoin {
    fn amount(&self) -> Amount {
        ArkCoin::amount(self)
    }
}

impl SelectableCoin for Amount {
    fn amount(&self) -> Amount {
        *self
    }
}

fn total<'a, T: SelectableCoin + 'a>(coins: impl IntoIterator<Item = &'a T>) -> Option<Amount> {
    coins
        .into_iter()
        .try_fold(Amount::ZERO, |acc, coin| acc.checked_add(coin.amount()))
}

/// Change is acceptable when it is zero or at least `dust`
fn change_ok(sum: Amount, target: Amount, dust: Amount) -> bool {
    match sum.checked_sub(target) {
        Some(change) => change == Amount::ZERO || change >= dust,
        None => false,
    }
}

/// Select coins for `target` with the default near-dust output cap
pub fn select_coins<T: SelectableCoin>(
    available: &[T],
    target: Amount,
    dust: Amount,
    current_subdust: usize,
) -> ArkResult<Vec<T>> {
    select_coins_with_limit(available, target, dust, current_subdust, MAX_SUBDUST_OUTPUTS)
}

pub fn select_coins_with_limit<T: SelectableCoin>(
    available: &[T],
    target: Amount,
    dust: Amount,
    current_subdust: usize,
    max_subdust: usize,
) -> ArkResult<Vec<T>> {
    let available_total = total(available)
        .ok_or_else(|| ArkError::argument("coin amounts overflow"))?;
    if available_total < target {
        return Err(ArkError::insufficient_funds(target, available_total));
    }

    if let Some(exact) = available.iter().find(|coin| coin.amount() == target) {
        return Ok(vec![exact.clone()]);
    }

    let mut selected = Vec::new();
    let mut accumulated = Amount::ZERO;
    for (index, coin) in available.iter().enumerate() {
        if accumulated >= target {
            break;
        }
        accumulated = accumulated
            .checked_add(coin.amount())
            .ok_or_else(|| ArkError::argument("coin amounts overflow"))?;
        selected.push(index);
    }

    let slot_left = current_subdust < max_subdust;
    if change_ok(accumulated, target, dust) || slot_left {
        return Ok(pick(available, &selected));
    }

    log::debug!(
        "Greedy selection leaves sub-dust change of {}, patching",
        accumulated.checked_sub(target).unwrap_or(Amount::ZERO)
    );

    if let Some(extra) = add_one_unused(available, &selected, accumulated, target, dust) {
        selected.push(extra);
        return Ok(pick(available, &selected));
    }

    if let Some(combination) = search_combination(available, target, dust) {
        return Ok(pick(available, &combination));
    }

    log::warn!("No combination avoids sub-dust change, spending all {} coins", available.len());
    Ok(available.to_vec())
}

fn pick<T: SelectableCoin>(available: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&i| available[i].clone()).collect()
}

fn add_one_unused<T: SelectableCoin>(
    available: &[T],
    selected: &[usize],
    accumulated: Amount,
    target: Amount,
    dust: Amount,
) -> Option<usize> {
    (0..available.len())
        .filter(|i| !selected.contains(i))
        .find(|&i| {
            accumulated
                .checked_add(available[i].amount())
                .is_some_and(|sum| change_ok(sum, target, dust))
        })
}

fn search_combination<T: SelectableCoin>(
    available: &[T],
    target: Amount,
    dust: Amount,
) -> Option<Vec<usize>> {
    let fits = |indices: &[usize]| {
        total(indices.iter().map(|&i| &available[i])).is_some_and(|sum| change_ok(sum, target, dust))
    };

    let n = available.len();
    if let Some(i) = (0..n).find(|&i| fits(&[i])) {
        return Some(vec![i]);
    }

    for i in 0..n {
        for j in (i + 1)..n {
            if fits(&[i, j]) {
                return Some(vec![i, j]);
            }
        }
    }

    let bound = n.min(TRIPLET_SEARCH_LIMIT);
    for i in 0..bound {
        for j in (i + 1)..bound {
            for k in (j + 1)..bound {
                if fits(&[i, j, k]) {
                    return Some(vec![i, j, k]);
                }
            }
        }
    }

    None
}
