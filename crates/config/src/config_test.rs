//! Tests for configuration loading and validation

use std::io::Write;
use std::time::Duration;

use crate::{ClientAuthType, Config, ConfigError, DownstreamMode};

#[test]
fn test_minimal_config() {
    let config: Config = "[[relp_source]]\nports = [2514]\n".parse().unwrap();

    let source = config.enabled_sources().next().unwrap();
    assert_eq!(source.ports, vec![2514]);
    assert_eq!(source.bind_addr, "0.0.0.0");
    assert_eq!(source.format, "auto");
    assert_eq!(source.encoding, "utf8");
    assert!(source.keepalive);
    assert!(source.read_timeout().is_none());
    assert_eq!(config.main.input_queue_size, 10_000);
    assert_eq!(config.main.max_input_message_size, 132_000);
    assert_eq!(config.downstream.mode, DownstreamMode::Stdout);
}

#[test]
fn test_full_config() {
    let toml = r#"
        [main]
        input_queue_size = 500
        parser_workers = 2

        [log]
        level = "debug"
        format = "json"

        [[relp_source]]
        ports = [2514, 2515]
        bind_addr = "127.0.0.1"
        format = "cisco"
        timeout = "30s"
        keepalive_period = "2m"
        dont_parse_structured_data = true

        [[parser]]
        name = "cisco"
        func = "rfc3164"

        [downstream]
        mode = "tcp"
        address = "10.1.2.3:6514"
    "#;
    let config: Config = toml.parse().unwrap();

    let source = config.enabled_sources().next().unwrap();
    assert_eq!(source.ports, vec![2514, 2515]);
    assert_eq!(source.read_timeout(), Some(Duration::from_secs(30)));
    assert_eq!(source.keepalive_period, Duration::from_secs(120));
    assert!(source.dont_parse_structured_data);
    assert_eq!(config.main.effective_parser_workers(), 2);
    assert_eq!(config.downstream.address, "10.1.2.3:6514");
}

#[test]
fn test_conf_ids_are_distinct() {
    let toml = "[[relp_source]]\nports = [1]\n[[relp_source]]\nports = [2]\n";
    let config: Config = toml.parse().unwrap();
    assert_ne!(config.relp_source[0].conf_id, config.relp_source[1].conf_id);
}

#[test]
fn test_no_sources_rejected() {
    let err = "".parse::<Config>().unwrap_err();
    assert!(matches!(err, ConfigError::NoSourcesEnabled));

    let err = "[[relp_source]]\nenabled = false\n"
        .parse::<Config>()
        .unwrap_err();
    assert!(matches!(err, ConfigError::NoSourcesEnabled));
}

#[test]
fn test_no_endpoint_rejected() {
    let err = "[[relp_source]]\nports = []\n".parse::<Config>().unwrap_err();
    assert!(matches!(err, ConfigError::NoEndpoint { .. }));
}

#[test]
fn test_unix_socket_only_is_an_endpoint() {
    let config: Config = "[[relp_source]]\nports = []\nunix_socket_path = \"/run/relp.sock\"\n"
        .parse()
        .unwrap();
    let source = config.enabled_sources().next().unwrap();
    assert!(source.unix_socket_path.is_some());
}

#[test]
fn test_duplicate_port_rejected() {
    let toml = "[[relp_source]]\nports = [2514]\n[[relp_source]]\nports = [2514]\n";
    let err = toml.parse::<Config>().unwrap_err();
    assert!(matches!(err, ConfigError::DuplicatePort { port: 2514 }));
}

#[test]
fn test_unknown_format_rejected() {
    let err = "[[relp_source]]\nports = [1]\nformat = \"gelf\"\n"
        .parse::<Config>()
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));

    let toml = "[[relp_source]]\nports = [1]\n[[parser]]\nname = \"x\"\nfunc = \"gelf\"\n";
    let err = toml.parse::<Config>().unwrap_err();
    assert!(matches!(err, ConfigError::UnknownFormat { .. }));
}

#[test]
fn test_client_auth_requires_tls() {
    let toml = "[[relp_source]]\nports = [1]\nclient_auth_type = \"require_and_verify\"\n";
    let err = toml.parse::<Config>().unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));

    let toml = r#"
        [[relp_source]]
        ports = [1]
        client_auth_type = "require_and_verify"
        [relp_source.tls]
        cert_file = "/etc/spigot/cert.pem"
        key_file = "/etc/spigot/key.pem"
    "#;
    let config: Config = toml.parse().unwrap();
    let source = config.enabled_sources().next().unwrap();
    assert_eq!(source.client_auth_type, ClientAuthType::RequireAndVerify);
}

#[test]
fn test_tcp_downstream_requires_address() {
    let toml = "[[relp_source]]\nports = [1]\n[downstream]\nmode = \"tcp\"\n";
    let err = toml.parse::<Config>().unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));
}

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[[relp_source]]\nports = [9514]").unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.relp_source[0].ports, vec![9514]);

    let err = Config::load("/nonexistent/spigot.toml").unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}
