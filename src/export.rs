// 📤 Export Serializer - pack → JSON / CSV text

use std::fmt;
use std::str::FromStr;

use csv::{QuoteStyle, Terminator, WriterBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::Pack;

pub const CSV_HEADER: [&str; 5] = ["TK", "Plataforma", "ControlBox_ID", "Channel", "Strings"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Json => "application/json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(Error::Config(format!("unknown export format '{}'", other))),
        }
    }
}

/// `<parkId>_trackers.<ext>`
pub fn export_filename(park_id: &str, format: ExportFormat) -> String {
    format!("{}_trackers.{}", park_id, format.extension())
}

pub fn render(pack: &Pack, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Csv => to_csv(pack),
        ExportFormat::Json => to_json(pack),
    }
}

/// Pretty-printed pack, field names as stored
pub fn to_json(pack: &Pack) -> Result<String> {
    Ok(serde_json::to_string_pretty(pack)?)
}

/// Fixed 5-column CSV, rows in pack order, `Strings` cell always quoted.
///
/// Composite ids are never expected to hold quotes or commas, so the cell
/// is wrapped verbatim rather than escaped.
pub fn to_csv(pack: &Pack) -> Result<String> {
    let mut wtr = WriterBuilder::new()
        .quote_style(QuoteStyle::Never)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    wtr.write_record(CSV_HEADER)?;
    for t in &pack.trackers {
        wtr.write_record([
            t.tk.to_string(),
            t.platform.to_string(),
            t.controlbox_id.to_string(),
            t.channel.to_string(),
            format!("\"{}\"", t.strings.join(";")),
        ])?;
    }

    let bytes = wtr
        .into_inner()
        .map_err(|e| Error::Io(e.into_error()))?;
    let mut text = String::from_utf8(bytes)
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

    // No trailing newline after the last row
    if text.ends_with('\n') {
        text.pop();
    }
    Ok(text)
}
