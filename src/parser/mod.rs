//! Parser engine.
//!
//! A [`ParserRegistry`] maps format names to parser descriptors. Regex parsers
//! are assembled from an ordered list of [`RegexFieldSpec`] fragments and
//! compiled once, when they are registered; lookups afterwards only take a
//! shared read lock, so any number of file workers can parse concurrently.

pub mod builtin;
pub mod field;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::message::{now_timestamp, Message, GELF_VERSION};

pub use field::{FieldType, RegexFieldSpec};

/// The kinds of parser a format can be backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    /// Fields extracted by a pattern built from regex fragments
    Regex,
    /// The line is already a JSON (GELF) object
    Json,
    /// The line becomes the short message as-is
    PlainText,
}

/// A registered parser.
#[derive(Debug)]
pub struct ParserDescriptor {
    name: String,
    kind: ParserKind,
    fields: Vec<RegexFieldSpec>,
    required_fields: usize,
    pattern: Option<Regex>,
}

impl ParserDescriptor {
    fn new(name: &str, kind: ParserKind, fields: Vec<RegexFieldSpec>) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::InvalidDefinition(
                "parser name cannot be empty".to_string(),
            ));
        }

        let pattern = match kind {
            ParserKind::Regex => {
                if fields.is_empty() {
                    return Err(Error::InvalidDefinition(format!(
                        "parser {} fields cannot be empty",
                        name
                    )));
                }
                if let Some(field) = fields
                    .iter()
                    .find(|f| f.field_type == FieldType::Date && f.date_format.is_empty())
                {
                    return Err(Error::InvalidDefinition(format!(
                        "parser {} date field {} has no date_format",
                        name, field.field
                    )));
                }
                let source = fields.iter().fold(String::new(), |mut acc, f| {
                    acc.push_str(&f.regex);
                    acc
                });
                let regex = Regex::new(&source).map_err(|e| {
                    Error::InvalidDefinition(format!("parser {} regex failed to compile: {}", name, e))
                })?;
                Some(regex)
            }
            ParserKind::Json | ParserKind::PlainText => None,
        };

        Ok(Self {
            name: name.to_string(),
            kind,
            required_fields: fields.len(),
            fields,
            pattern,
        })
    }
}

/// A parser definition supplied through configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomParserDef {
    pub name: String,
    #[serde(rename = "type")]
    pub parser_type: String,
    #[serde(default)]
    pub fields: Vec<RegexFieldSpec>,
}

/// Registry of named parsers, shared by every input worker.
#[derive(Debug)]
pub struct ParserRegistry {
    hostname: String,
    parsers: RwLock<HashMap<String, Arc<ParserDescriptor>>>,
}

impl ParserRegistry {
    /// Create an empty registry stamping `hostname` on parsed messages.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            parsers: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry holding every built-in format.
    pub fn with_builtins(hostname: impl Into<String>) -> Result<Self> {
        let registry = Self::new(hostname);
        for (name, kind, fields) in builtin::definitions() {
            registry.register(name, kind, fields)?;
        }
        Ok(registry)
    }

    /// Register (or replace) a parser under `name`.
    pub fn register(
        &self,
        name: &str,
        kind: ParserKind,
        fields: Vec<RegexFieldSpec>,
    ) -> Result<()> {
        let descriptor = Arc::new(ParserDescriptor::new(name, kind, fields)?);
        debug!(format = name, kind = ?kind, "Registered parser");
        self.parsers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), descriptor);
        Ok(())
    }

    /// Register parsers from configuration. Only the `regex` type is supported.
    pub fn add_custom(&self, defs: &[CustomParserDef]) -> Result<()> {
        for def in defs {
            match def.parser_type.to_lowercase().as_str() {
                "regex" => self.register(&def.name, ParserKind::Regex, def.fields.clone())?,
                other => {
                    return Err(Error::InvalidDefinition(format!(
                        "unknown parser type {} for parser {}",
                        other, def.name
                    )))
                }
            }
        }
        Ok(())
    }

    /// True if a parser is registered under `name`.
    pub fn check_format(&self, name: &str) -> bool {
        self.parsers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    fn get(&self, name: &str) -> Result<Arc<ParserDescriptor>> {
        self.parsers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownFormat(name.to_string()))
    }

    /// Parse one line with the named format.
    pub fn parse(&self, line: &str, format: &str) -> Result<Message> {
        let parser = self.get(format)?;
        match parser.kind {
            ParserKind::Regex => self.parse_regex(line, &parser),
            ParserKind::Json => Message::from_json_slice(line.as_bytes()),
            ParserKind::PlainText => Ok(self.parse_plain_text(line)),
        }
    }

    fn parse_regex(&self, line: &str, parser: &ParserDescriptor) -> Result<Message> {
        let pattern = parser.pattern.as_ref().ok_or_else(|| {
            Error::InvalidDefinition(format!("parser {} has no compiled pattern", parser.name))
        })?;

        // group 0 is the whole match
        let captures = pattern.captures(line);
        let found = captures.as_ref().map_or(0, |c| c.len());
        let captures = match captures {
            Some(captures) if found > parser.required_fields => captures,
            _ => {
                return Err(Error::TooFewFields {
                    expected: parser.required_fields,
                    found: found.saturating_sub(1),
                })
            }
        };

        let mut message = Message::with_capacity(parser.fields.len() + 4);
        message.insert("version", GELF_VERSION);
        message.insert("host", self.hostname.as_str());
        message.insert("_original_format", parser.name.as_str());

        for (index, field) in parser.fields.iter().enumerate() {
            let capture = captures.get(index + 1).map(|m| m.as_str()).unwrap_or("");
            let value = field.convert(capture)?;
            if field.short_message {
                message.insert("short_message", value.clone());
            }
            message.insert(field.field.as_str(), value);
        }

        Ok(message)
    }

    fn parse_plain_text(&self, line: &str) -> Message {
        let text = line.strip_suffix('\n').unwrap_or(line);
        let mut message = Message::with_capacity(5);
        message.insert("version", GELF_VERSION);
        message.insert("host", self.hostname.as_str());
        message.insert("short_message", text);
        message.insert("timestamp", now_timestamp());
        message.insert("_original_format", "PlainText");
        message
    }
}

#[cfg(test)]
mod tests {
    use super::builtin::*;
    use super::*;
    use crate::message::FieldValue;

    const COMBINED_LINE: &str = r#"127.0.0.1 - bob [10/Oct/2023:13:55:36 -0700] "GET /x HTTP/1.1" 200 512 "-" "curl/8.0""#;

    fn registry() -> ParserRegistry {
        ParserRegistry::with_builtins("collector01").expect("built-ins register")
    }

    #[test]
    fn test_builtins_registered() {
        let registry = registry();
        for name in [
            FORMAT_GELF,
            FORMAT_TEXT,
            FORMAT_APACHE_ERROR,
            FORMAT_COMBINED,
            FORMAT_COMBINED_PLUS,
            FORMAT_COMBINED_PLUS_VHOST,
            FORMAT_COMBINED_LOAD_BALANCER,
        ] {
            assert!(registry.check_format(name), "missing {}", name);
        }
        assert!(!registry.check_format("syslog"));
    }

    #[test]
    fn test_parse_combined() {
        let m = registry().parse(COMBINED_LINE, FORMAT_COMBINED).unwrap();

        assert_eq!(m.get_str("version"), Some("1.1"));
        assert_eq!(m.get_str("host"), Some("collector01"));
        assert_eq!(m.get_str("_original_format"), Some("combined"));
        assert_eq!(m.get_str("_src_ip"), Some("127.0.0.1"));
        assert_eq!(m.get_str("_http_ident"), Some("-"));
        assert_eq!(m.get_str("_user"), Some("bob"));
        assert_eq!(m.get("timestamp"), Some(&FieldValue::Float(1696971336.0)));
        assert_eq!(m.get_str("_http_request"), Some("GET /x HTTP/1.1"));
        assert_eq!(m.get_str("short_message"), Some("GET /x HTTP/1.1"));
        assert_eq!(m.get("_http_status"), Some(&FieldValue::Int(200)));
        assert_eq!(m.get("_http_response_size"), Some(&FieldValue::Int(512)));
        assert_eq!(m.get_str("_http_referer"), Some("-"));
        assert_eq!(m.get_str("_user_agent"), Some("curl/8.0"));
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_parse_combined_non_numeric_size_is_zero() {
        let line = r#"10.0.0.1 - - [10/Oct/2023:13:55:36 +0000] "HEAD / HTTP/1.1" 304 - "-" "healthcheck""#;
        let m = registry().parse(line, FORMAT_COMBINED).unwrap();
        assert_eq!(m.get("_http_status"), Some(&FieldValue::Int(304)));
        assert_eq!(m.get("_http_response_size"), Some(&FieldValue::Int(0)));
        assert_eq!(m.get_str("_user"), Some("-"));
    }

    #[test]
    fn test_parse_combined_blank_string_becomes_dash() {
        let line = r#"10.0.0.1 - - [10/Oct/2023:13:55:36 +0000] "GET / HTTP/1.1" 200 10 "   " "   ""#;
        let m = registry().parse(line, FORMAT_COMBINED).unwrap();
        assert_eq!(m.get_str("_http_referer"), Some("-"));
        assert_eq!(m.get_str("_user_agent"), Some("-"));
    }

    #[test]
    fn test_parse_combined_bad_date_fails_line() {
        let line = r#"10.0.0.1 - - [yesterday at noon] "GET / HTTP/1.1" 200 10 "-" "x""#;
        let err = registry().parse(line, FORMAT_COMBINED).unwrap_err();
        assert!(matches!(err, Error::InvalidTimestamp { .. }));
    }

    #[test]
    fn test_parse_non_matching_line_is_too_few_fields() {
        let err = registry()
            .parse("this is not an access log", FORMAT_COMBINED)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::TooFewFields {
                expected: 9,
                found: 0
            }
        ));
    }

    #[test]
    fn test_parse_combined_plus() {
        let line = r#"192.168.1.5 - alice [10/Oct/2023:13:55:36 -0700] "POST /api/items?id=7 HTTP/2.0" 201 88 "https://example.com/" "Mozilla/5.0" 1532 "POST" "/api/items" "?id=7""#;
        let m = registry().parse(line, FORMAT_COMBINED_PLUS).unwrap();
        assert_eq!(m.get_str("_http_referer"), Some("https://example.com/"));
        assert_eq!(m.get_str("_user_agent"), Some("Mozilla/5.0"));
        assert_eq!(m.get("_duration_usec"), Some(&FieldValue::Int(1532)));
        assert_eq!(m.get_str("_http_request_method"), Some("POST"));
        assert_eq!(m.get_str("_http_request_path"), Some("/api/items"));
        assert_eq!(m.get_str("_http_request_query"), Some("?id=7"));
    }

    #[test]
    fn test_parse_combined_plus_vhost() {
        let line = r#"www.example.com:443 192.168.1.5 - - [10/Oct/2023:13:55:36 -0700] "GET / HTTP/1.1" 200 1024 "-" "curl/8.0" 250 "GET" "/" """#;
        let m = registry().parse(line, FORMAT_COMBINED_PLUS_VHOST).unwrap();
        assert_eq!(m.get_str("_vhost"), Some("www.example.com"));
        assert_eq!(m.get("_vhost_port"), Some(&FieldValue::Int(443)));
        assert_eq!(m.get_str("_src_ip"), Some("192.168.1.5"));
        assert_eq!(m.get_str("_http_request_query"), Some("-"));
        assert_eq!(m.get("timestamp"), Some(&FieldValue::Float(1696971336.0)));
    }

    #[test]
    fn test_parse_combined_load_balancer() {
        let line = r#"https shop.example.com:443 backend01:80 203.0.113.9 10.0.0.2 [10/Oct/2023:13:55:36 -0700] "GET /cart HTTP/1.1" 200 2048 "-" "Mozilla/5.0" 980 "GET" "/cart" """#;
        let m = registry()
            .parse(line, FORMAT_COMBINED_LOAD_BALANCER)
            .unwrap();
        assert_eq!(m.get_str("_x-forwarded-proto"), Some("https"));
        assert_eq!(m.get_str("_http_host"), Some("shop.example.com"));
        assert_eq!(m.get_str("_x-forwarded-port"), Some("443"));
        assert_eq!(m.get_str("_vhost"), Some("backend01"));
        assert_eq!(m.get("_vhost_port"), Some(&FieldValue::Int(80)));
        assert_eq!(m.get_str("_x-forwarded-for"), Some("203.0.113.9"));
        assert_eq!(m.get_str("_src_ip"), Some("10.0.0.2"));
        assert_eq!(m.get_str("short_message"), Some("GET /cart HTTP/1.1"));
    }

    #[test]
    fn test_parse_apache_error() {
        let line = "[Wed Oct 11 14:32:52.123456 2023] [core:error] [pid 1234] AH00126: Invalid URI in request";
        let m = registry().parse(line, FORMAT_APACHE_ERROR).unwrap();
        assert_eq!(m.get("timestamp"), Some(&FieldValue::Float(1697034772.123456)));
        assert_eq!(m.get_str("_apache_module"), Some("core"));
        assert_eq!(m.get_str("_apache_level"), Some("error"));
        assert_eq!(m.get_str("_apache_pid"), Some("pid 1234"));
        assert_eq!(
            m.get_str("short_message"),
            Some("AH00126: Invalid URI in request")
        );
    }

    #[test]
    fn test_parse_apache_error_without_module() {
        let line = "[Wed Oct 11 14:32:52.123456 2023] [:error] [pid 77] mod_php: fatal error";
        let m = registry().parse(line, FORMAT_APACHE_ERROR).unwrap();
        assert_eq!(m.get_str("_apache_module"), Some("-"));
        assert_eq!(m.get_str("_apache_level"), Some("error"));
        assert_eq!(m.get_str("_apache_pid"), Some("pid 77"));
        assert_eq!(m.get_str("short_message"), Some("mod_php: fatal error"));
    }

    #[test]
    fn test_parse_gelf_passthrough() {
        let registry = registry();
        let m = registry
            .parse(r#"{"version":"1.1","host":"app","short_message":"hi"}"#, FORMAT_GELF)
            .unwrap();
        assert_eq!(m.get_str("short_message"), Some("hi"));

        let err = registry.parse("{not json", FORMAT_GELF).unwrap_err();
        assert!(matches!(err, Error::InvalidJson(_)));
    }

    #[test]
    fn test_parse_plain_text_never_fails() {
        let registry = registry();
        let m = registry.parse("something happened\n", FORMAT_TEXT).unwrap();
        assert_eq!(m.get_str("short_message"), Some("something happened"));
        assert!(m.get("timestamp").and_then(FieldValue::as_f64).is_some());

        let m = registry.parse("", FORMAT_TEXT).unwrap();
        assert_eq!(m.get_str("short_message"), Some(""));
    }

    #[test]
    fn test_unknown_format() {
        let err = registry().parse("x", "nginx-json").unwrap_err();
        assert!(matches!(err, Error::UnknownFormat(name) if name == "nginx-json"));
    }

    #[test]
    fn test_register_rejects_invalid_definitions() {
        let registry = ParserRegistry::new("h");
        assert!(matches!(
            registry.register("", ParserKind::PlainText, Vec::new()),
            Err(Error::InvalidDefinition(_))
        ));
        assert!(matches!(
            registry.register("empty", ParserKind::Regex, Vec::new()),
            Err(Error::InvalidDefinition(_))
        ));
        assert!(matches!(
            registry.register(
                "broken",
                ParserKind::Regex,
                vec![RegexFieldSpec::string("(unclosed", "_x")]
            ),
            Err(Error::InvalidDefinition(_))
        ));
        assert!(!registry.check_format("broken"));
    }

    #[test]
    fn test_register_overwrites_existing() {
        let registry = ParserRegistry::new("h");
        registry
            .register(
                "kv",
                ParserKind::Regex,
                vec![RegexFieldSpec::string(r"^(\w+)$", "short_message")],
            )
            .unwrap();
        registry
            .register(
                "kv",
                ParserKind::Regex,
                vec![
                    RegexFieldSpec::string(r"^(\w+)=", "_key"),
                    RegexFieldSpec::int(r"(\d+)$", "_value"),
                ],
            )
            .unwrap();

        let m = registry.parse("retries=3", "kv").unwrap();
        assert_eq!(m.get_str("_key"), Some("retries"));
        assert_eq!(m.get("_value"), Some(&FieldValue::Int(3)));
    }

    #[test]
    fn test_last_short_message_field_wins() {
        let registry = ParserRegistry::new("h");
        registry
            .register(
                "pair",
                ParserKind::Regex,
                vec![
                    RegexFieldSpec::string(r"^(\S+)\s", "_first").as_short_message(),
                    RegexFieldSpec::string(r"(\S+)$", "_second").as_short_message(),
                ],
            )
            .unwrap();
        let m = registry.parse("alpha beta", "pair").unwrap();
        assert_eq!(m.get_str("short_message"), Some("beta"));
    }

    #[test]
    fn test_add_custom_parsers() {
        let defs: Vec<CustomParserDef> = serde_json::from_str(
            r#"[{"name": "app", "type": "Regex", "fields": [
                {"regex": "^(\\S+)\\s", "field": "_level"},
                {"regex": "(.*)$", "field": "_text", "short_message": true}
            ]}]"#,
        )
        .unwrap();

        let registry = registry();
        registry.add_custom(&defs).unwrap();
        let m = registry.parse("WARN disk almost full", "app").unwrap();
        assert_eq!(m.get_str("_level"), Some("WARN"));
        assert_eq!(m.get_str("short_message"), Some("disk almost full"));
        assert_eq!(m.get_str("_original_format"), Some("app"));
    }

    #[test]
    fn test_add_custom_rejects_unknown_type() {
        let defs = vec![CustomParserDef {
            name: "xml".to_string(),
            parser_type: "xpath".to_string(),
            fields: Vec::new(),
        }];
        let err = registry().add_custom(&defs).unwrap_err();
        assert!(matches!(err, Error::InvalidDefinition(_)));
    }

    #[test]
    fn test_add_custom_rejects_date_without_format() {
        let defs: Vec<CustomParserDef> = serde_json::from_str(
            r#"[{"name": "stamped", "type": "regex", "fields": [
                {"regex": "^(\\S+)\\s", "field": "timestamp", "type": "date"},
                {"regex": "(.*)$", "field": "_text", "short_message": true}
            ]}]"#,
        )
        .unwrap();

        let registry = registry();
        let err = registry.add_custom(&defs).unwrap_err();
        assert!(matches!(err, Error::InvalidDefinition(ref msg) if msg.contains("timestamp")));
        assert!(!registry.check_format("stamped"));
    }

    #[test]
    fn test_concurrent_parsing() {
        let registry = Arc::new(registry());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        registry.parse(COMBINED_LINE, FORMAT_COMBINED).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
