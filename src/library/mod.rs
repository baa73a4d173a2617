//! Local state: catalogs, the album library and the selection history.
//!
//! # Storage Layout
//!
//! ```text
//! $SCREENSAVER_OUTPUT_PATH/
//! ├── already_used.json         # Selection history + last catalogs
//! ├── .lock                     # Advisory lock held during a cycle
//! ├── photos/                   # Working set read by the display
//! └── library/
//!     └── <year>/<album>/       # Same relative path as on the remote
//!         └── IMG_0001.JPG
//! ```

pub mod cache;
pub mod catalog;
pub mod fsops;
pub mod history;

pub use cache::{CacheEntry, CacheError, Library};
pub use catalog::{leaf_directories, parse_listing, Catalog, CatalogError, MarkerFilter};
pub use fsops::CopyStats;
pub use history::{CatalogSnapshot, HistoryRecord, HistoryStore, PersistenceError, SelectionHistory};
