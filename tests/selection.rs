//! Selection Integration Tests
//!
//! Selector behaviour over whole rounds and catalog leaf filtering.

use std::collections::{BTreeSet, HashMap};

use rand::rngs::StdRng;
use rand::SeedableRng;

use screensaver::core::{choose, SelectError};
use screensaver::library::{leaf_directories, parse_listing, MarkerFilter};
use screensaver::{Catalog, DirectoryId, SelectionHistory};

fn ids(raw: &[&str]) -> Vec<DirectoryId> {
    raw.iter().map(|s| DirectoryId::new(s).unwrap()).collect()
}

fn catalog_of(n: usize) -> Catalog {
    Catalog::from_directories(
        (0..n).map(|i| DirectoryId::new(format!("{}/album", 2000 + i)).unwrap()),
    )
}

#[test]
fn test_every_round_shows_each_album_once() {
    let catalog = catalog_of(7);
    let mut history = SelectionHistory::new();
    let mut rng = StdRng::seed_from_u64(2024);

    for round in 0..5 {
        let mut seen = BTreeSet::new();
        for draw in 0..catalog.len() {
            let pick = choose(&catalog, &mut history, &mut rng).unwrap();
            // Only the first draw of a later round resets
            assert_eq!(pick.history_reset, round > 0 && draw == 0);
            assert!(seen.insert(pick.id));
        }
        assert_eq!(seen.len(), catalog.len());
        assert!(history.covers(&catalog));
    }
}

#[test]
fn test_draws_are_roughly_uniform() {
    let catalog = catalog_of(4);
    let mut rng = StdRng::seed_from_u64(7);
    let mut first_picks: HashMap<DirectoryId, usize> = HashMap::new();

    for _ in 0..4_000 {
        let mut history = SelectionHistory::new();
        let pick = choose(&catalog, &mut history, &mut rng).unwrap();
        *first_picks.entry(pick.id).or_default() += 1;
    }

    assert_eq!(first_picks.len(), 4);
    for count in first_picks.values() {
        assert!((800..1_200).contains(count), "skewed draw count {}", count);
    }
}

#[test]
fn test_catalog_shrinking_below_history() {
    // Albums deleted from the archive stay in history; the round still ends
    let mut history: SelectionHistory = ids(&["2000/album", "1999/gone"]).into_iter().collect();
    let catalog = catalog_of(2);
    let mut rng = StdRng::seed_from_u64(0);

    let pick = choose(&catalog, &mut history, &mut rng).unwrap();
    assert_eq!(pick.id.as_str(), "2001/album");
    assert!(!pick.history_reset);

    let pick = choose(&catalog, &mut history, &mut rng).unwrap();
    assert!(pick.history_reset);
    assert!(!history.contains(&DirectoryId::new("1999/gone").unwrap()));
}

#[test]
fn test_empty_catalog_is_an_error() {
    let mut history: SelectionHistory = ids(&["2000/album"]).into_iter().collect();
    let mut rng = StdRng::seed_from_u64(0);

    assert_eq!(
        choose(&Catalog::new(), &mut history, &mut rng),
        Err(SelectError::CatalogEmpty)
    );
    assert_eq!(history.len(), 1);
}

#[test]
fn test_leaf_filter_keeps_deepest_directories() {
    let leaves = leaf_directories(ids(&["a", "a/b", "a/b/c", "x"]));
    assert_eq!(leaves.into_iter().collect::<Vec<_>>(), ids(&["a/b/c", "x"]));
}

#[test]
fn test_leaf_filter_is_segment_based() {
    let leaves = leaf_directories(ids(&["2020", "2020 trip", "2020-b", "2020/x"]));
    assert_eq!(
        leaves.into_iter().collect::<Vec<_>>(),
        ids(&["2020 trip", "2020-b", "2020/x"])
    );
}

#[test]
fn test_listing_to_catalog() {
    let listing: Vec<String> = [
        "receiving incremental file list",
        "./",
        "2019/",
        "2019/Summer/",
        "2019/Summer/@eaDir/",
        "2019/Summer/@eaDir/IMG_1.JPG/",
        "2020/",
        "2020/12 Mexico/",
        "#recycle/",
        "#recycle/2018/",
        "",
        "sent 84 bytes  received 1,234 bytes  2,636.00 bytes/sec",
        "total size is 0  speedup is 0.00 (DRY RUN)",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let dirs = parse_listing(&listing, &MarkerFilter::default());
    let catalog = Catalog::from_directories(dirs);
    assert_eq!(catalog.to_vec(), ids(&["2019/Summer", "2020/12 Mexico"]));
}
