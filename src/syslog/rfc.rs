//! RFC3164 and RFC5424 header parsing.

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use thiserror::Error;

/// Canonical facility names indexed by facility code.
pub const FACILITY_NAMES: [&str; 24] = [
    "kern",
    "user",
    "mail",
    "daemon",
    "auth",
    "syslog",
    "lpr",
    "news",
    "uucp",
    "cron",
    "authpriv",
    "ftp",
    "ntp",
    "security",
    "console",
    "solaris-cron",
    "local0",
    "local1",
    "local2",
    "local3",
    "local4",
    "local5",
    "local6",
    "local7",
];

/// Highest valid PRI value (facility 23, severity 7).
const MAX_PRIORITY: u16 = 191;

/// Canonical name for a facility code, or `"unknown"`.
pub fn facility_name(code: u8) -> &'static str {
    FACILITY_NAMES
        .get(code as usize)
        .copied()
        .unwrap_or("unknown")
}

/// Framing of a datagram as seen from its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyslogFormat {
    Rfc3164,
    Rfc5424,
    Unknown,
}

impl SyslogFormat {
    /// Value used for `_original_format`.
    pub fn name(self) -> &'static str {
        match self {
            SyslogFormat::Rfc3164 => "RFC3164",
            SyslogFormat::Rfc5424 => "RFC5424",
            SyslogFormat::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyslogParseError {
    #[error("missing or malformed priority")]
    Priority,

    #[error("priority {0} out of range")]
    PriorityRange(u16),

    #[error("malformed header: {0}")]
    Header(&'static str),

    #[error("invalid timestamp {0:?}")]
    Timestamp(String),
}

/// Header fields and content of a parsed syslog message.
#[derive(Debug, Clone, PartialEq)]
pub struct SyslogRecord {
    pub facility: u8,
    pub severity: u8,

    /// `None` when the sender supplied the nil timestamp
    pub timestamp: Option<DateTime<Utc>>,

    pub hostname: String,
    pub app_name: String,
    pub proc_id: Option<String>,
    pub msg_id: Option<String>,
    pub structured_data: Option<String>,

    /// Trimmed message content
    pub message: String,
}

/// Classify the framing of `buf` from its `<PRI>` prefix.
///
/// A PRI followed by a version digit and a space is RFC5424, any other valid
/// PRI is treated as RFC3164.
pub fn detect(buf: &[u8]) -> SyslogFormat {
    let Some(rest) = buf.strip_prefix(b"<") else {
        return SyslogFormat::Unknown;
    };
    let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 || digits > 3 || rest.get(digits) != Some(&b'>') {
        return SyslogFormat::Unknown;
    }
    match rest.get(digits + 1..digits + 3) {
        Some([version, b' ']) if version.is_ascii_digit() => SyslogFormat::Rfc5424,
        _ => SyslogFormat::Rfc3164,
    }
}

fn split_priority(text: &str) -> Result<(u8, u8, &str), SyslogParseError> {
    let rest = text.strip_prefix('<').ok_or(SyslogParseError::Priority)?;
    let end = rest.find('>').ok_or(SyslogParseError::Priority)?;
    let digits = &rest[..end];
    if digits.is_empty() || digits.len() > 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SyslogParseError::Priority);
    }
    let priority: u16 = digits.parse().map_err(|_| SyslogParseError::Priority)?;
    if priority > MAX_PRIORITY {
        return Err(SyslogParseError::PriorityRange(priority));
    }
    Ok(((priority / 8) as u8, (priority % 8) as u8, &rest[end + 1..]))
}

/// Next space-delimited token and the text after it.
fn take_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start_matches(' ');
    if s.is_empty() {
        return None;
    }
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    Some((&s[..end], &s[end..]))
}

/// Split `tag[pid]: content` or `tag: content`.
fn split_tag(content: &str) -> Option<(&str, Option<&str>, &str)> {
    let end = content.find(|c: char| c == ':' || c == '[' || c.is_whitespace())?;
    let (tag, rest) = content.split_at(end);
    if tag.is_empty() || tag.len() > 48 {
        return None;
    }
    let (proc_id, rest) = match rest.strip_prefix('[') {
        Some(inner) => {
            let close = inner.find(']')?;
            (Some(&inner[..close]), &inner[close + 1..])
        }
        None => (None, rest),
    };
    let message = rest.strip_prefix(':')?;
    Some((tag, proc_id, message))
}

/// Parse a BSD syslog message.
///
/// The header carries neither year nor zone, so the timestamp is read as UTC
/// in the year of `now`.
pub fn parse_rfc3164(text: &str, now: DateTime<Utc>) -> Result<SyslogRecord, SyslogParseError> {
    const HEADER: SyslogParseError = SyslogParseError::Header("expected \"Mmm dd hh:mm:ss host\"");

    let (facility, severity, rest) = split_priority(text)?;
    let (month, rest) = take_token(rest).ok_or(HEADER)?;
    let (day, rest) = take_token(rest).ok_or(HEADER)?;
    let (time, rest) = take_token(rest).ok_or(HEADER)?;
    let (hostname, rest) = take_token(rest).ok_or(HEADER)?;

    let stamp = format!("{} {} {} {}", now.year(), month, day, time);
    let timestamp = NaiveDateTime::parse_from_str(&stamp, "%Y %b %d %H:%M:%S")
        .map_err(|_| SyslogParseError::Timestamp(stamp.clone()))?
        .and_utc();

    let content = rest.trim_start();
    let (app_name, proc_id, message) = match split_tag(content) {
        Some((tag, pid, message)) => (tag.to_string(), pid.map(str::to_string), message.trim()),
        None => (String::new(), None, content.trim()),
    };

    Ok(SyslogRecord {
        facility,
        severity,
        timestamp: Some(timestamp),
        hostname: hostname.to_string(),
        app_name,
        proc_id,
        msg_id: None,
        structured_data: None,
        message: message.to_string(),
    })
}

/// Parse an RFC5424 message. Nil header values are kept as `"-"`.
pub fn parse_rfc5424(text: &str) -> Result<SyslogRecord, SyslogParseError> {
    let (facility, severity, rest) = split_priority(text)?;
    let rest = rest
        .strip_prefix("1 ")
        .ok_or(SyslogParseError::Header("unsupported version"))?;

    let mut parts = rest.splitn(6, ' ');
    let mut next = |what: &'static str| {
        parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or(SyslogParseError::Header(what))
    };
    let stamp = next("missing timestamp")?;
    let hostname = next("missing hostname")?;
    let app_name = next("missing app-name")?;
    let proc_id = next("missing procid")?;
    let msg_id = next("missing msgid")?;
    let remainder = next("missing structured data")?;

    let timestamp = if stamp == "-" {
        None
    } else {
        let parsed = DateTime::parse_from_rfc3339(stamp)
            .map_err(|_| SyslogParseError::Timestamp(stamp.to_string()))?;
        Some(parsed.with_timezone(&Utc))
    };

    let (structured_data, message) = split_structured_data(remainder)?;

    Ok(SyslogRecord {
        facility,
        severity,
        timestamp,
        hostname: hostname.to_string(),
        app_name: app_name.to_string(),
        proc_id: Some(proc_id.to_string()),
        msg_id: Some(msg_id.to_string()),
        structured_data: Some(structured_data.to_string()),
        message: message.trim().trim_start_matches('\u{feff}').trim().to_string(),
    })
}

/// Split `[sd-element]...` or `-` from the message that follows it.
fn split_structured_data(s: &str) -> Result<(&str, &str), SyslogParseError> {
    if let Some(rest) = s.strip_prefix('-') {
        return Ok(("-", rest));
    }
    if !s.starts_with('[') {
        return Err(SyslogParseError::Header("malformed structured data"));
    }

    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ']' if !in_quotes => {
                let rest = &s[i + 1..];
                if !rest.starts_with('[') {
                    return Ok((&s[..=i], rest));
                }
            }
            _ => {}
        }
    }
    Err(SyslogParseError::Header("unterminated structured data"))
}
