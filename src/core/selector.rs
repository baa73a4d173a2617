//! Random selection without repeats.
//!
//! Pure function over a catalog and a history: no I/O, randomness injected.
//! Once every catalog entry has been shown the history is cleared before the
//! draw, so a new round over the catalog begins.

use rand::seq::IteratorRandom;
use rand::Rng;
use thiserror::Error;

use crate::domain::DirectoryId;
use crate::library::{Catalog, SelectionHistory};

/// Selection errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectError {
    #[error("Catalog is empty")]
    CatalogEmpty,
}

/// A drawn directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub id: DirectoryId,

    /// True if the history was cleared before this draw
    pub history_reset: bool,
}

/// Draw one catalog entry not yet in `history` and record it there.
///
/// An empty catalog fails without touching the history.
pub fn choose<R: Rng + ?Sized>(
    catalog: &Catalog,
    history: &mut SelectionHistory,
    rng: &mut R,
) -> Result<Selection, SelectError> {
    if catalog.is_empty() {
        return Err(SelectError::CatalogEmpty);
    }

    let history_reset = history.covers(catalog);
    if history_reset {
        history.clear();
    }

    let id = catalog
        .iter()
        .filter(|id| !history.contains(id))
        .choose(rng)
        .cloned()
        .ok_or(SelectError::CatalogEmpty)?;

    history.insert(id.clone());

    Ok(Selection { id, history_reset })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn catalog(raw: &[&str]) -> Catalog {
        Catalog::from_directories(raw.iter().map(|s| DirectoryId::new(s).unwrap()))
    }

    fn history(raw: &[&str]) -> SelectionHistory {
        raw.iter().map(|s| DirectoryId::new(s).unwrap()).collect()
    }

    #[test]
    fn test_empty_catalog_fails_and_keeps_history() {
        let mut h = history(&["a"]);
        let mut rng = StdRng::seed_from_u64(0);

        let result = choose(&Catalog::new(), &mut h, &mut rng);
        assert_eq!(result, Err(SelectError::CatalogEmpty));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn test_never_repeats_within_round() {
        let c = catalog(&["a", "b", "c", "d"]);
        let mut h = SelectionHistory::new();
        let mut rng = StdRng::seed_from_u64(42);

        let mut seen = Vec::new();
        for _ in 0..4 {
            let pick = choose(&c, &mut h, &mut rng).unwrap();
            assert!(!pick.history_reset);
            assert!(!seen.contains(&pick.id));
            seen.push(pick.id);
        }
        assert_eq!(h.len(), 4);

        // Fifth draw starts a new round
        let pick = choose(&c, &mut h, &mut rng).unwrap();
        assert!(pick.history_reset);
        assert_eq!(h.len(), 1);
        assert!(c.contains(&pick.id));
    }

    #[test]
    fn test_reset_ignores_stale_ids() {
        // History holds ids no longer in the catalog; still a superset
        let c = catalog(&["a"]);
        let mut h = history(&["a", "gone"]);
        let mut rng = StdRng::seed_from_u64(1);

        let pick = choose(&c, &mut h, &mut rng).unwrap();
        assert!(pick.history_reset);
        assert_eq!(pick.id.as_str(), "a");
        assert_eq!(h, history(&["a"]));
    }

    #[test]
    fn test_seeded_draws_are_reproducible() {
        let c = catalog(&["a", "b", "c", "d", "e", "f"]);
        let draw = |seed| {
            let mut h = SelectionHistory::new();
            let mut rng = StdRng::seed_from_u64(seed);
            (0..6)
                .map(|_| choose(&c, &mut h, &mut rng).unwrap().id)
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(9), draw(9));
    }
}
