//! Tests for the RFC 5424 parser

use chrono::{TimeZone, Utc};
use encoding_rs::UTF_8;

use crate::{ParseError, Parser, Rfc5424Parser};

fn parse(raw: &str) -> Result<Option<spigot_model::SyslogMessage>, ParseError> {
    Rfc5424Parser.parse(raw.as_bytes(), UTF_8, false)
}

#[test]
fn test_full_message() {
    let msg = parse(
        "<165>1 2023-12-20T12:36:15.003Z server1.example.com myapp 1234 ID47 \
         [exampleSDID@32473 iut=\"3\" eventSource=\"Application\"] Application started",
    )
    .unwrap()
    .unwrap();

    assert_eq!(msg.priority.0, 165);
    assert_eq!(msg.version, 1);
    assert_eq!(
        msg.time_reported.unwrap(),
        Utc.with_ymd_and_hms(2023, 12, 20, 12, 36, 15).unwrap() + chrono::Duration::milliseconds(3)
    );
    assert_eq!(msg.hostname, "server1.example.com");
    assert_eq!(msg.app_name, "myapp");
    assert_eq!(msg.proc_id, "1234");
    assert_eq!(msg.msg_id, "ID47");
    assert_eq!(msg.structured.len(), 1);
    assert_eq!(msg.structured[0].id, "exampleSDID@32473");
    assert_eq!(msg.structured[0].params[0], ("iut".into(), "3".into()));
    assert_eq!(msg.message, "Application started");
}

#[test]
fn test_nil_fields() {
    let msg = parse("<34>1 - - - - - - boot").unwrap().unwrap();
    assert!(msg.time_reported.is_none());
    assert!(msg.hostname.is_empty());
    assert!(msg.app_name.is_empty());
    assert!(msg.structured.is_empty());
    assert_eq!(msg.message, "boot");
}

#[test]
fn test_no_msg_part() {
    let msg = parse("<34>1 2024-01-01T00:00:00Z host app - - -")
        .unwrap()
        .unwrap();
    assert!(msg.message.is_empty());
}

#[test]
fn test_multiple_sd_elements() {
    let msg = parse("<34>1 - h a p m [one x=\"1\"][two y=\"2\" z=\"3\"] text")
        .unwrap()
        .unwrap();
    assert_eq!(msg.structured.len(), 2);
    assert_eq!(msg.structured[1].id, "two");
    assert_eq!(msg.structured[1].params.len(), 2);
    assert_eq!(msg.message, "text");
}

#[test]
fn test_sd_escapes() {
    let msg = parse(r#"<34>1 - h a p m [e q="say \"hi\" \] \\ done"] x"#)
        .unwrap()
        .unwrap();
    assert_eq!(msg.structured[0].params[0].1, r#"say "hi" ] \ done"#);
}

#[test]
fn test_dont_parse_sd_still_finds_msg() {
    let msg = Rfc5424Parser
        .parse(
            b"<34>1 - h a p m [e q=\"v\"][f r=\"w\"] the message",
            UTF_8,
            true,
        )
        .unwrap()
        .unwrap();
    assert!(msg.structured.is_empty());
    assert_eq!(msg.message, "the message");
}

#[test]
fn test_bom_is_stripped() {
    let msg = parse("<34>1 - h a p m - \u{feff}unicode msg").unwrap().unwrap();
    assert_eq!(msg.message, "unicode msg");
}

#[test]
fn test_empty_payload_is_none() {
    assert!(parse("").unwrap().is_none());
    assert!(parse("   \r\n").unwrap().is_none());
}

#[test]
fn test_bad_priority() {
    assert!(matches!(parse("34>1 - - - - - -"), Err(ParseError::Priority(_))));
    assert!(matches!(parse("<192>1 - - - - - -"), Err(ParseError::Priority(_))));
    assert!(matches!(parse("<abc>1 - - - - - -"), Err(ParseError::Priority(_))));
}

#[test]
fn test_bad_version() {
    assert!(matches!(
        parse("<34>2 - - - - - - x"),
        Err(ParseError::Malformed { .. })
    ));
}

#[test]
fn test_bad_timestamp() {
    assert!(matches!(
        parse("<34>1 yesterday h a p m - x"),
        Err(ParseError::Malformed { .. })
    ));
}

#[test]
fn test_truncated_header() {
    assert!(matches!(
        parse("<34>1 - h"),
        Err(ParseError::Malformed { .. })
    ));
}

#[test]
fn test_unterminated_sd() {
    assert!(matches!(
        parse("<34>1 - h a p m [e q=\"v\" x"),
        Err(ParseError::Malformed { .. })
    ));
}
