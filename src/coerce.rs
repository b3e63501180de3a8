// 🧩 Record Coercer
// Raw rows (CSV or JSON) → canonical TrackerRecord
//
// Each field accepts several header variants. Alias precedence is an
// ordered list: the first alias present in the row wins, even if its cell
// turns out to be unparsable.

use serde_json::Value;
use tracing::debug;

use crate::model::TrackerRecord;
use crate::normalize::{normalize_composite_id, normalize_header_name};
use crate::parser::Row;

// ============================================================================
// HEADER ALIASES
// ============================================================================

pub const TK_ALIASES: &[&str] = &["tk", "tracker", "tracker_fisico"];
pub const PLATFORM_ALIASES: &[&str] = &["plataforma", "platform"];
pub const CONTROLBOX_ALIASES: &[&str] = &[
    "controlbox_id",
    "controlboxid",
    "id_local",
    "id_local/netid",
    "id",
    "netid",
];
pub const CHANNEL_ALIASES: &[&str] = &["channel", "canal", "ch"];
pub const STRINGS_ALIASES: &[&str] = &["strings", "ct_cb_st", "ctcbst", "string"];

/// Key prefixes scanned when no single composite-id column is usable
/// (`ct_cb_st_1`, `ct_cb_st_2`, ...)
pub const STRING_COLUMN_PREFIXES: &[&str] = &["ct_cb_st", "ctcbst", "string"];

/// Keys holding declared orders in JSON rows (normalized)
const ORDER_KEYS: &[&str] = &["string_orders", "stringorders"];

/// First alias present in the row (compared after header normalization)
pub fn resolve_alias<'a>(row: &'a Row, aliases: &[&str]) -> Option<&'a str> {
    aliases
        .iter()
        .find_map(|alias| row.get(&normalize_header_name(alias)))
}

/// Base-10 integer with leading-digit semantics: optional sign, then at
/// least one ASCII digit; trailing junk is ignored (`"12abc"` → 12).
pub fn parse_int(raw: &str) -> Option<i64> {
    let s = raw.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let end = digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }

    let value: i64 = digits[..end].parse().ok()?;
    Some(if negative { -value } else { value })
}

// ============================================================================
// COERCION
// ============================================================================

/// Map a raw row into a tracker record.
///
/// Returns `None` when any of tk / platform / controlbox / channel is
/// missing or not an integer. Callers skip such rows.
pub fn coerce_row(row: &Row) -> Option<TrackerRecord> {
    let tk = parse_int(resolve_alias(row, TK_ALIASES)?)?;
    let platform = parse_int(resolve_alias(row, PLATFORM_ALIASES)?)?;
    let controlbox_id = parse_int(resolve_alias(row, CONTROLBOX_ALIASES)?)?;
    let channel = parse_int(resolve_alias(row, CHANNEL_ALIASES)?)?;

    let strings = resolve_strings(row);

    Some(TrackerRecord::new(tk, platform, controlbox_id, channel).with_strings(strings))
}

/// Composite ids of a row.
///
/// 1. One `;`-separated cell via `STRINGS_ALIASES`
/// 2. Otherwise every cell whose key starts with a `STRING_COLUMN_PREFIXES`
///    entry, in key order
fn resolve_strings(row: &Row) -> Vec<String> {
    let from_cell: Vec<String> = resolve_alias(row, STRINGS_ALIASES)
        .map(|raw| {
            raw.split(';')
                .map(normalize_composite_id)
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    if !from_cell.is_empty() {
        return from_cell;
    }

    row.iter()
        .filter(|(k, _)| STRING_COLUMN_PREFIXES.iter().any(|p| k.starts_with(p)))
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty())
        .map(normalize_composite_id)
        .collect()
}

/// Flatten a JSON tracker row into a `Row` plus any declared string orders.
///
/// Keys are header-normalized; numbers and booleans become their text,
/// arrays are joined with `;`, `null` becomes an empty cell.
pub fn row_from_json(value: &Value) -> Option<(Row, Option<Vec<u32>>)> {
    let obj = value.as_object()?;

    let mut row = Row::new();
    let mut orders = None;

    for (key, v) in obj {
        let key = normalize_header_name(key);
        if ORDER_KEYS.contains(&key.as_str()) {
            orders = v.as_array().map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_u64().and_then(|n| u32::try_from(n).ok()))
                    .collect()
            });
            continue;
        }
        row.insert(key, json_cell(v));
    }

    Some((row, orders))
}

fn json_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(json_cell).collect::<Vec<_>>().join(";"),
        other => other.to_string(),
    }
}

/// Coerce a JSON tracker row. Declared `string_orders` survive when they
/// line up with the resolved strings.
pub fn coerce_json_row(value: &Value) -> Option<TrackerRecord> {
    let (row, orders) = row_from_json(value)?;
    let mut record = coerce_row(&row)?;

    if let Some(orders) = orders {
        if orders.len() == record.strings.len() {
            record.string_orders = orders;
        }
    }
    Some(record)
}

// ============================================================================
// BATCH
// ============================================================================

/// Result of coercing a batch of rows
#[derive(Debug, Clone, Default)]
pub struct CoercionReport {
    pub trackers: Vec<TrackerRecord>,
    pub skipped: usize,
}

pub fn coerce_rows<'a, I>(rows: I) -> CoercionReport
where
    I: IntoIterator<Item = &'a Row>,
{
    let mut report = CoercionReport::default();
    for row in rows {
        match coerce_row(row) {
            Some(t) => report.trackers.push(t),
            None => report.skipped += 1,
        }
    }
    if report.skipped > 0 {
        debug!(skipped = report.skipped, "skipped rows without required numeric fields");
    }
    report
}

pub fn coerce_json_rows<'a, I>(rows: I) -> CoercionReport
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut report = CoercionReport::default();
    for row in rows {
        match coerce_json_row(row) {
            Some(t) => report.trackers.push(t),
            None => report.skipped += 1,
        }
    }
    if report.skipped > 0 {
        debug!(skipped = report.skipped, "skipped JSON rows without required numeric fields");
    }
    report
}
