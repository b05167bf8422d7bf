//! Tests for logging configuration and format parsing
//!
//! Tests the pure functions in the logging module that handle
//! log format parsing and configuration from environment variables.

use smartbin::observability::logging::{build_filter, parse_flag, parse_level, LogFormat};
use tracing::Level;

#[test]
fn test_log_format_parse_json() {
    assert_eq!(LogFormat::parse("json"), LogFormat::Json);
    assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
    assert_eq!(LogFormat::parse("Json"), LogFormat::Json);
}

#[test]
fn test_log_format_parse_pretty_and_compact() {
    assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
    assert_eq!(LogFormat::parse("Compact"), LogFormat::Compact);
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    // The device console is usually collected by a log shipper
    for input in ["invalid", "", "xml", "yaml", "123"] {
        assert_eq!(LogFormat::parse(input), LogFormat::Json, "input {input:?}");
    }
}

#[test]
fn test_log_level_parsing() {
    let cases = [
        ("ERROR", Level::ERROR),
        ("warn", Level::WARN),
        ("WARNING", Level::WARN),
        ("info", Level::INFO),
        ("Debug", Level::DEBUG),
        ("TRACE", Level::TRACE),
        ("verbose", Level::INFO),
        ("", Level::INFO),
    ];

    for (input, expected) in cases {
        assert_eq!(parse_level(input), expected, "input {input:?}");
    }
}

#[test]
fn test_log_spans_flag_parsing() {
    assert!(parse_flag("true"));
    assert!(parse_flag("TRUE"));
    assert!(parse_flag(" true "));
    assert!(!parse_flag("false"));
    assert!(!parse_flag(""));
    assert!(!parse_flag("1"));
}

#[test]
fn test_filter_quiets_dependencies() {
    let filter = build_filter(Level::DEBUG).to_string().to_lowercase();
    assert!(filter.contains("tungstenite=warn"));
    assert!(filter.contains("reqwest=warn"));
    assert!(filter.contains("debug"));
}
