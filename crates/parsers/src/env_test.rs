//! Tests for the parser registry and auto-detection

use encoding_rs::UTF_8;
use spigot_config::ParserConfig;

use crate::{AutoParser, Parser, ParsersEnv};

#[test]
fn test_builtins_present() {
    let env = ParsersEnv::new(&[]);
    assert!(env.get("auto").is_some());
    assert!(env.get("rfc3164").is_some());
    assert!(env.get("rfc5424").is_some());
    assert!(env.get("gelf").is_none());
}

#[test]
fn test_alias_resolves_to_builtin() {
    let configs = vec![ParserConfig {
        name: "cisco".into(),
        func: "rfc3164".into(),
    }];
    let env = ParsersEnv::new(&configs);

    let parser = env.get("cisco").unwrap();
    assert_eq!(parser.name(), "rfc3164");
}

#[test]
fn test_unknown_alias_target_skipped() {
    let configs = vec![ParserConfig {
        name: "weird".into(),
        func: "gelf".into(),
    }];
    let env = ParsersEnv::new(&configs);
    assert!(env.get("weird").is_none());
}

#[test]
fn test_auto_detects_5424() {
    let msg = AutoParser::default()
        .parse(b"<165>1 2023-12-20T12:36:15Z h app - - - hi", UTF_8, false)
        .unwrap()
        .unwrap();
    assert_eq!(msg.version, 1);
    assert_eq!(msg.app_name, "app");
}

#[test]
fn test_auto_detects_3164() {
    let msg = AutoParser::default()
        .parse(b"<134>Dec 20 12:34:56 host app: hi", UTF_8, false)
        .unwrap()
        .unwrap();
    assert_eq!(msg.version, 0);
    assert_eq!(msg.hostname, "host");
}

#[test]
fn test_auto_without_priority_falls_back_to_3164() {
    let msg = AutoParser::default()
        .parse(b"plain words", UTF_8, false)
        .unwrap()
        .unwrap();
    assert_eq!(msg.priority.0, 13);
    assert_eq!(msg.message, "plain words");
}
