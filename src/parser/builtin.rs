//! Built-in parser definitions for Apache/NGINX access and error logs.

use super::field::RegexFieldSpec;
use super::ParserKind;

pub const FORMAT_GELF: &str = "gelf";
pub const FORMAT_TEXT: &str = "text";
pub const FORMAT_APACHE_ERROR: &str = "error";
pub const FORMAT_COMBINED: &str = "combined";
pub const FORMAT_COMBINED_PLUS: &str = "combinedplus";
pub const FORMAT_COMBINED_PLUS_VHOST: &str = "combinedplusvhost";
pub const FORMAT_COMBINED_LOAD_BALANCER: &str = "combinedloadbalancer";

/// Access log time, e.g. `10/Oct/2023:13:55:36 -0700`
const ACCESS_DATE_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

/// Error log time, e.g. `Wed Oct 11 14:32:52.123456 2023` (offset appended)
const ERROR_DATE_FORMAT: &str = "%a %b %d %H:%M:%S%.f %Y %z";

/// Every built-in format with its kind and field table.
pub fn definitions() -> Vec<(&'static str, ParserKind, Vec<RegexFieldSpec>)> {
    vec![
        (FORMAT_GELF, ParserKind::Json, Vec::new()),
        (FORMAT_TEXT, ParserKind::PlainText, Vec::new()),
        (FORMAT_APACHE_ERROR, ParserKind::Regex, apache_error()),
        (FORMAT_COMBINED, ParserKind::Regex, combined()),
        (FORMAT_COMBINED_PLUS, ParserKind::Regex, combined_plus()),
        (FORMAT_COMBINED_PLUS_VHOST, ParserKind::Regex, combined_plus_vhost()),
        (
            FORMAT_COMBINED_LOAD_BALANCER,
            ParserKind::Regex,
            combined_load_balancer(),
        ),
    ]
}

fn apache_error() -> Vec<RegexFieldSpec> {
    vec![
        RegexFieldSpec::date(r"^\[([^\]]+)\]\s", "timestamp", ERROR_DATE_FORMAT).with_utc_offset(),
        RegexFieldSpec::string(r"\[(\S*):", "_apache_module"),
        RegexFieldSpec::string(r"(\S+)\]\s", "_apache_level"),
        RegexFieldSpec::string(r"\[([^\]]+)\]\s", "_apache_pid"),
        RegexFieldSpec::string(r"(.*?)$", "short_message"),
    ]
}

/// `LogFormat "%h %l %u %t \"%r\" %>s %O \"%{Referer}i\" \"%{User-Agent}i\"" combined`
fn combined() -> Vec<RegexFieldSpec> {
    let mut fields = access_prefix(r"^(\S+)\s");
    fields.push(RegexFieldSpec::string(r#""(.*?)"$"#, "_user_agent"));
    fields
}

/// combined plus `%D \"%m\" \"%U\" \"%q\"`
fn combined_plus() -> Vec<RegexFieldSpec> {
    let mut fields = access_prefix(r"^(\S+)\s");
    fields.extend(timing_suffix());
    fields
}

/// `%v:%p` followed by combinedplus
fn combined_plus_vhost() -> Vec<RegexFieldSpec> {
    let mut fields = vec![
        RegexFieldSpec::string(r"^(\S+):", "_vhost"),
        RegexFieldSpec::int(r"(\S+)\s", "_vhost_port"),
    ];
    fields.extend(access_prefix(r"(\S+)\s"));
    fields.extend(timing_suffix());
    fields
}

/// `%{X-Forwarded-Proto}i %{Host}i:%{X-Forwarded-Port}i %v:%p %{X-Forwarded-For}i %h %t ...`
fn combined_load_balancer() -> Vec<RegexFieldSpec> {
    let mut fields = vec![
        RegexFieldSpec::string(r"^(\S+)\s", "_x-forwarded-proto"),
        RegexFieldSpec::string(r"(\S+):", "_http_host"),
        RegexFieldSpec::string(r"(\S+)\s", "_x-forwarded-port"),
        RegexFieldSpec::string(r"(\S+):", "_vhost"),
        RegexFieldSpec::int(r"(\S+)\s", "_vhost_port"),
        RegexFieldSpec::string(r"(\S+)\s", "_x-forwarded-for"),
        RegexFieldSpec::string(r"(\S+)\s", "_src_ip"),
    ];
    fields.extend(request_fields());
    fields.extend(timing_suffix());
    fields
}

/// `%h %l %u` followed by the request fields, up to and excluding the user agent.
fn access_prefix(src_ip_regex: &str) -> Vec<RegexFieldSpec> {
    let mut fields = vec![
        RegexFieldSpec::string(src_ip_regex, "_src_ip"),
        RegexFieldSpec::string(r"(\S+)\s", "_http_ident"),
        RegexFieldSpec::string(r"(\S+)\s", "_user"),
    ];
    fields.extend(request_fields());
    fields
}

/// `%t \"%r\" %>s %O \"%{Referer}i\"`
fn request_fields() -> Vec<RegexFieldSpec> {
    vec![
        RegexFieldSpec::date(r"\[([^\]]+)\]\s", "timestamp", ACCESS_DATE_FORMAT),
        RegexFieldSpec::string(r#""(.*?)"\s"#, "_http_request").as_short_message(),
        RegexFieldSpec::int(r"(\S+)\s", "_http_status"),
        RegexFieldSpec::int(r"(\S+)\s", "_http_response_size"),
        RegexFieldSpec::string(r#""((?:[^"]*(?:\\")?)*)"\s"#, "_http_referer"),
    ]
}

/// `\"%{User-Agent}i\" %D \"%m\" \"%U\" \"%q\"`
fn timing_suffix() -> Vec<RegexFieldSpec> {
    vec![
        RegexFieldSpec::string(r#""(.*?)"\s"#, "_user_agent"),
        RegexFieldSpec::int(r"(\S+)\s", "_duration_usec"),
        RegexFieldSpec::string(r#""(.*?)"\s"#, "_http_request_method"),
        RegexFieldSpec::string(r#""(.*?)"\s"#, "_http_request_path"),
        RegexFieldSpec::string(r#""(.*?)"$"#, "_http_request_query"),
    ]
}
