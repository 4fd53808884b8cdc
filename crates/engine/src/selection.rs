//! Diff selection strategies: which pending diff of an entity to act on next.

use intentful_core::{DiffPair, DiffSelection};
use rand::seq::SliceRandom;
use time::OffsetDateTime;

pub trait DiffSelectionStrategy: Send + Sync {
    /// Index into `candidates`, which is never empty.
    fn choose(&self, candidates: &[usize]) -> Option<usize>;
}

/// Always the first pending diff, in watchlist order.
pub struct BasicSelection;

impl DiffSelectionStrategy for BasicSelection {
    fn choose(&self, candidates: &[usize]) -> Option<usize> {
        candidates.first().copied()
    }
}

/// A pending diff chosen uniformly at random.
pub struct RandomSelection;

impl DiffSelectionStrategy for RandomSelection {
    fn choose(&self, candidates: &[usize]) -> Option<usize> {
        candidates.choose(&mut rand::thread_rng()).copied()
    }
}

pub fn strategy_for(selection: DiffSelection) -> &'static dyn DiffSelectionStrategy {
    match selection {
        DiffSelection::Basic => &BasicSelection,
        DiffSelection::Random => &RandomSelection,
    }
}

/// Diffs that may be acted on at `now`: never dispatched, or past their delay.
pub fn pending(pairs: &[DiffPair], now: OffsetDateTime) -> Vec<usize> {
    pairs
        .iter()
        .enumerate()
        .filter(|(_, (_, backoff))| backoff.as_ref().map_or(true, |b| b.delay.has_elapsed(now)))
        .map(|(i, _)| i)
        .collect()
}

/// Pick the pending diff to act on, if any.
pub fn select_one(
    selection: DiffSelection,
    pairs: &[DiffPair],
    now: OffsetDateTime,
) -> Option<usize> {
    let candidates = pending(pairs, now);
    if candidates.is_empty() {
        return None;
    }
    strategy_for(selection).choose(&candidates)
}
