// 🔎 Lookup Engine
// Pure reads over the active pack: by tk, by platform + controlbox, by
// composite id, and a permissive multi-field text filter.

use serde::Serialize;

use crate::model::{Pack, TrackerRecord};
use crate::normalize::{controlbox_label, normalize_composite_id, pad2, pad3, tk_label};

/// A composite-id hit: which record, which position in its `strings`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompositeMatch<'a> {
    pub record: &'a TrackerRecord,
    pub matched_index: usize,
    pub normalized_query: String,
}

/// Query view over a record slice, in dataset order
#[derive(Debug, Clone, Copy)]
pub struct LookupEngine<'a> {
    trackers: &'a [TrackerRecord],
}

impl<'a> LookupEngine<'a> {
    pub fn new(pack: &'a Pack) -> Self {
        Self {
            trackers: &pack.trackers,
        }
    }

    pub fn from_records(trackers: &'a [TrackerRecord]) -> Self {
        Self { trackers }
    }

    pub fn find_by_tk(&self, tk: i64) -> Option<&'a TrackerRecord> {
        self.trackers.iter().find(|t| t.tk == tk)
    }

    /// First record in dataset order matching both fields
    pub fn find_by_platform_and_controlbox(
        &self,
        platform: i64,
        controlbox_id: i64,
    ) -> Option<&'a TrackerRecord> {
        self.trackers
            .iter()
            .find(|t| t.platform == platform && t.controlbox_id == controlbox_id)
    }

    /// Normalize `raw`, then scan records and their strings in order.
    ///
    /// Stored strings are normalized again before comparing, so packs with
    /// legacy spellings still match.
    pub fn find_by_composite_id(&self, raw: &str) -> Option<CompositeMatch<'a>> {
        let key = normalize_composite_id(raw);
        if key.is_empty() {
            return None;
        }

        self.trackers.iter().find_map(|record| {
            record
                .strings
                .iter()
                .position(|s| normalize_composite_id(s) == key)
                .map(|matched_index| CompositeMatch {
                    record,
                    matched_index,
                    normalized_query: key.clone(),
                })
        })
    }

    /// Case-insensitive substring filter over `search_blob`.
    ///
    /// A blank query returns every record in dataset order.
    pub fn filter_by_text(&self, query: &str) -> Vec<&'a TrackerRecord> {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return self.trackers.iter().collect();
        }

        self.trackers
            .iter()
            .filter(|t| search_blob(t).contains(&q))
            .collect()
    }

    /// Listing order: ascending `tk`
    pub fn sorted_by_tk(&self) -> Vec<&'a TrackerRecord> {
        let mut out: Vec<&TrackerRecord> = self.trackers.iter().collect();
        out.sort_by_key(|t| t.tk);
        out
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}

/// Lowercase text a record is filtered on:
/// `tk141 141 p3 id04 4 ch50 50 01_02_03 ...`
pub fn search_blob(t: &TrackerRecord) -> String {
    let mut parts = vec![
        format!("tk{}", pad3(t.tk)),
        t.tk.to_string(),
        format!("p{}", t.platform),
        format!("id{}", pad2(t.controlbox_id)),
        t.controlbox_id.to_string(),
        format!("ch{}", t.channel),
        t.channel.to_string(),
    ];
    parts.extend(t.strings.iter().cloned());
    parts.join(" ").to_lowercase()
}

// ============================================================================
// RESULT TEXT
// ============================================================================

/// One line per listing entry: `TK141 • P3 • ID 04 • CH 50 • 3 strings`
pub fn listing_line(t: &TrackerRecord) -> String {
    let strings = match t.strings.len() {
        0 => "sin strings".to_string(),
        n => format!("{} strings", n),
    };
    format!(
        "{} • P{} • ID {} • CH {} • {}",
        tk_label(t.tk),
        t.platform,
        pad2(t.controlbox_id),
        t.channel,
        strings
    )
}

/// Plain-text summary of a hit, the form operators paste into work orders
pub fn result_summary(park_name: &str, record: &TrackerRecord, string_hit: Option<&str>) -> String {
    let mut out = String::new();
    out.push_str(park_name);
    out.push('\n');
    if let Some(hit) = string_hit {
        out.push_str(&format!("String: {}\n", hit));
    }
    out.push_str(&format!("{} (Físico {})\n", tk_label(record.tk), record.tk));
    out.push_str(&format!("Plataforma: {}\n", record.platform));
    out.push_str(&format!(
        "ControlBox: {} (ID {})\n",
        controlbox_label(record.platform, record.controlbox_id),
        record.controlbox_id
    ));
    out.push_str(&format!("Channel: {}\n", record.channel));

    out.push_str(&format!("Strings: {}", record.strings.join(", ")));
    out
}
