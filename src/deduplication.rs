// 🔍 Deduplication - one record per physical tracker
// Last write wins: later rows overwrite earlier rows with the same tk.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::TrackerRecord;

/// Outcome of a dedup pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct DedupResult {
    /// Unique by `tk`, sorted ascending by `tk`
    pub trackers: Vec<TrackerRecord>,

    /// How many input records were overwritten by a later one
    pub collapsed: usize,
}

/// Key the records by `tk` (later entries replace earlier ones) and return
/// them sorted by `tk`.
pub fn dedupe_by_tk<I>(records: I) -> DedupResult
where
    I: IntoIterator<Item = TrackerRecord>,
{
    let mut by_tk: BTreeMap<i64, TrackerRecord> = BTreeMap::new();
    let mut collapsed = 0;

    for record in records {
        if by_tk.insert(record.tk, record).is_some() {
            collapsed += 1;
        }
    }

    DedupResult {
        trackers: by_tk.into_values().collect(),
        collapsed,
    }
}
