//! Regex field specifications and per-field value conversion.

use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::message::FieldValue;

/// Suffix appended to dates from formats that omit the time zone.
const UTC_OFFSET_SUFFIX: &str = " +0000";

/// How a captured group is converted before it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    String,
    Int,
    Date,
}

/// One capture of a regex parser.
///
/// The `regex` fragments of a parser are joined in list order to build the
/// whole line pattern; each fragment is expected to hold exactly one capture
/// group, so the field at list position `n` receives capture group `n + 1`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegexFieldSpec {
    pub regex: String,
    pub field: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub short_message: bool,
    /// chrono `strftime` format, only used for [`FieldType::Date`]
    #[serde(default)]
    pub date_format: String,
    /// Append `" +0000"` to the capture before parsing (dates only)
    #[serde(default)]
    pub add_tz: bool,
}

impl RegexFieldSpec {
    pub fn string(regex: &str, field: &str) -> Self {
        Self {
            regex: regex.to_string(),
            field: field.to_string(),
            field_type: FieldType::String,
            short_message: false,
            date_format: String::new(),
            add_tz: false,
        }
    }

    pub fn int(regex: &str, field: &str) -> Self {
        Self {
            field_type: FieldType::Int,
            ..Self::string(regex, field)
        }
    }

    pub fn date(regex: &str, field: &str, date_format: &str) -> Self {
        Self {
            field_type: FieldType::Date,
            date_format: date_format.to_string(),
            ..Self::string(regex, field)
        }
    }

    pub fn as_short_message(mut self) -> Self {
        self.short_message = true;
        self
    }

    pub fn with_utc_offset(mut self) -> Self {
        self.add_tz = true;
        self
    }

    /// Convert a captured value according to the field type.
    pub fn convert(&self, capture: &str) -> Result<FieldValue> {
        match self.field_type {
            FieldType::Int => Ok(FieldValue::Int(parse_int(capture))),
            FieldType::Date => {
                let text = if self.add_tz {
                    format!("{}{}", capture, UTC_OFFSET_SUFFIX)
                } else {
                    capture.to_string()
                };
                parse_date(&text, &self.date_format)
                    .map(FieldValue::Float)
                    .map_err(|reason| Error::InvalidTimestamp {
                        value: capture.to_string(),
                        format: self.date_format.clone(),
                        reason,
                    })
            }
            FieldType::String => Ok(FieldValue::Text(clean_string(capture))),
        }
    }
}

/// Integer contained in the capture, or 0 when it is not a number.
pub fn parse_int(capture: &str) -> i64 {
    capture.parse().unwrap_or(0)
}

/// Trimmed capture, or `"-"` when nothing is left.
pub fn clean_string(capture: &str) -> String {
    let trimmed = capture.trim();
    if trimmed.is_empty() {
        "-".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Parse a date into Unix epoch seconds (fractional part kept).
///
/// Formats without an offset specifier are read as UTC.
fn parse_date(text: &str, format: &str) -> std::result::Result<f64, String> {
    let micros = match DateTime::parse_from_str(text, format) {
        Ok(dt) => dt.timestamp_micros(),
        Err(with_offset) => NaiveDateTime::parse_from_str(text, format)
            .map(|naive| naive.and_utc().timestamp_micros())
            .map_err(|_| with_offset.to_string())?,
    };
    Ok(micros as f64 / 1_000_000.0)
}
