// TrackerID - Core Library
// Field lookup of solar-park trackers, offline-first.
// Exposes all modules for use in CLI, API server, and tests

pub mod coerce;
pub mod config;
pub mod db;
pub mod deduplication;
pub mod error;
pub mod export;
pub mod fetch;
pub mod lookup;
pub mod model;
pub mod normalize;
pub mod parser;
pub mod registry;
pub mod repository;
pub mod store;

// Re-export commonly used types
pub use coerce::{coerce_json_row, coerce_row, CoercionReport};
pub use config::Config;
pub use db::{setup_database, CachedPackStat, SqlitePackStore};
pub use deduplication::{dedupe_by_tk, DedupResult};
pub use error::{Error, Result};
pub use export::{export_filename, render, to_csv, to_json, ExportFormat};
pub use fetch::{HttpFetcher, OfflineFetcher, PackFetcher};
pub use lookup::{listing_line, result_summary, CompositeMatch, LookupEngine};
pub use model::{park_key, Pack, ParkDescriptor, TrackerRecord, PACK_VERSION};
pub use normalize::{normalize_composite_id, normalize_header_name};
pub use parser::{parse_table, ParsedTable, Row};
pub use registry::ParkRegistry;
pub use repository::{
    ActiveDataset, BackgroundRefresh, DatasetRepository, ImportSummary, LoadOutcome, LoadSource,
    RefreshOutcome,
};
pub use store::{MemoryPackStore, PackStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
