/// Data layer: tables, their on-disk stores, and row filtering.
///
/// Architecture:
/// ```text
///  <store>/<table>.parquet / .csv / .json
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → Table (units from metadata / headers)
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  store    │  SourceKey → file, TableReader seam, listings
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  OR of layer cuts → rows kept for a source
///   └──────────┘
/// ```

pub mod filter;
pub mod loader;
pub mod model;
pub mod store;

pub use filter::RowFilter;
pub use model::{Table, TableSpecs, UNKNOWN_UNIT};
pub use store::{available_tables, FileStore, TableReader};
