// 🏗️ Tabular Parser
// Delimited text → header-normalized rows, for typical O&M spreadsheets exports.
// One physical line per record (no embedded newlines).

use serde::Serialize;

use crate::normalize::normalize_header_name;

// ============================================================================
// CORE TYPES
// ============================================================================

/// One data row: normalized header → raw trimmed cell.
///
/// Keeps insertion order so "iterate the row's keys" means header order.
/// Inserting an existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Row {
    cells: Vec<(String, String)>,
}

impl Row {
    pub fn new() -> Self {
        Row::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.cells.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.cells.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Cells in key-iteration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cells.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

/// Output of `parse_table`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTable {
    /// Normalized header names, in column order
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

// ============================================================================
// PARSING
// ============================================================================

/// Parse delimited text.
///
/// # Strategy:
/// 1. Drop `\r`, split on `\n`, discard blank lines
/// 2. Pick the delimiter once from the first line: `,` unless that line has
///    no comma but has a `;`
/// 3. First line is the header row (names go through `normalize_header_name`)
/// 4. Missing trailing cells become empty strings, extra cells are ignored
///
/// Never fails: empty input gives an empty table.
pub fn parse_table(text: &str) -> ParsedTable {
    // Spreadsheet "CSV UTF-8" exports start with a byte-order mark
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let cleaned = text.replace('\r', "");
    let lines: Vec<&str> = cleaned
        .split('\n')
        .filter(|l| !l.trim().is_empty())
        .collect();

    let Some(first) = lines.first() else {
        return ParsedTable::default();
    };

    let delimiter = detect_delimiter(first);

    let headers: Vec<String> = split_line(first, delimiter)
        .iter()
        .map(|h| normalize_header_name(h))
        .collect();

    let rows = lines[1..]
        .iter()
        .map(|line| {
            let values = split_line(line, delimiter);
            let mut row = Row::new();
            for (i, header) in headers.iter().enumerate() {
                let value = values.get(i).cloned().unwrap_or_default();
                row.insert(header.clone(), value);
            }
            row
        })
        .collect();

    ParsedTable { headers, rows }
}

/// `,` unless the line has no comma but does have a semicolon
pub fn detect_delimiter(first_line: &str) -> char {
    if !first_line.contains(',') && first_line.contains(';') {
        ';'
    } else {
        ','
    }
}

/// Split one line on `delimiter`.
///
/// A `"` toggles quoted state and is dropped; delimiters inside quotes are
/// literal. No `""` escape. Each field is trimmed.
pub fn split_line(line: &str, delimiter: char) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;

    for ch in line.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
            continue;
        }
        if ch == delimiter && !in_quotes {
            out.push(std::mem::take(&mut cur));
            continue;
        }
        cur.push(ch);
    }
    out.push(cur);

    out.into_iter().map(|s| s.trim().to_string()).collect()
}
