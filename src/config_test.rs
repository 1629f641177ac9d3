use super::*;
use std::collections::HashMap;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
    move |key: &str| map.get(key).cloned()
}

#[test]
fn ws_base_url_maps_schemes() {
    assert_eq!(ws_base_url("http://localhost:8000").expect("http"), "ws://localhost:8000");
    assert_eq!(ws_base_url("https://chat.example.com/").expect("https"), "wss://chat.example.com");
}

#[test]
fn ws_base_url_rejects_other_schemes() {
    let err = ws_base_url("ftp://example.com").expect_err("ftp is not supported");
    assert!(matches!(err, ConfigError::InvalidBaseUrl(ref url) if url == "ftp://example.com"));
}

#[test]
fn socket_url_embeds_token_in_path() {
    let config = ClientConfig::new("http://127.0.0.1:8000/").expect("config");
    assert_eq!(config.socket_url("abc123"), "ws://127.0.0.1:8000/ws/abc123");
}

#[test]
fn from_lookup_uses_defaults_when_empty() {
    let config = ClientConfig::from_lookup(lookup_from(&[])).expect("config");
    assert_eq!(config.api_url, DEFAULT_API_URL);
    assert_eq!(config.ws_url, "ws://127.0.0.1:8000");
    assert_eq!(config.access_token, None);
    assert_eq!(config.transport, TransportConfig::default());
}

#[test]
fn from_lookup_reads_overrides() {
    let config = ClientConfig::from_lookup(lookup_from(&[
        ("THREADLINE_API_URL", "https://api.example.com"),
        ("THREADLINE_WS_URL", "wss://socket.example.com/"),
        ("THREADLINE_ACCESS_TOKEN", "acc"),
        ("THREADLINE_REFRESH_TOKEN", ""),
        ("THREADLINE_RECONNECT_BASE_MS", "250"),
        ("THREADLINE_RECONNECT_MAX_MS", "4000"),
        ("THREADLINE_IDLE_TIMEOUT_SECS", "0"),
    ]))
    .expect("config");

    assert_eq!(config.api_url, "https://api.example.com");
    assert_eq!(config.ws_url, "wss://socket.example.com");
    assert_eq!(config.access_token.as_deref(), Some("acc"));
    assert_eq!(config.refresh_token, None);
    assert_eq!(config.transport.reconnect_base, Duration::from_millis(250));
    assert_eq!(config.transport.reconnect_max, Duration::from_millis(4000));
    assert_eq!(config.transport.idle_timeout, None);
}

#[test]
fn from_lookup_ignores_unparsable_numbers() {
    let config =
        ClientConfig::from_lookup(lookup_from(&[("THREADLINE_RECONNECT_BASE_MS", "soon")])).expect("config");
    assert_eq!(config.transport.reconnect_base, Duration::from_millis(DEFAULT_RECONNECT_BASE_MS));
}

#[test]
fn from_lookup_keeps_max_at_least_base() {
    let config = ClientConfig::from_lookup(lookup_from(&[
        ("THREADLINE_RECONNECT_BASE_MS", "5000"),
        ("THREADLINE_RECONNECT_MAX_MS", "100"),
    ]))
    .expect("config");
    assert_eq!(config.transport.reconnect_max, Duration::from_millis(5000));
}

#[test]
fn from_lookup_rejects_non_ws_socket_url() {
    let err = ClientConfig::from_lookup(lookup_from(&[("THREADLINE_WS_URL", "http://nope")]))
        .expect_err("ws url must use ws scheme");
    assert!(matches!(err, ConfigError::InvalidBaseUrl(_)));
}

#[test]
fn with_ws_url_checks_scheme() {
    let config = ClientConfig::new("http://localhost:8000").unwrap();
    let err = config.clone().with_ws_url("http://localhost:9000").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidBaseUrl(ref url) if url == "http://localhost:9000"));

    let config = config.with_ws_url("wss://socket.example.com/").unwrap();
    assert_eq!(config.ws_url, "wss://socket.example.com");
}

#[test]
fn transport_from_lookup_matches_client_config() {
    let lookup = lookup_from(&[("THREADLINE_IDLE_TIMEOUT_SECS", "30")]);
    let transport = TransportConfig::from_lookup(&lookup);
    assert_eq!(transport.idle_timeout, Some(Duration::from_secs(30)));
    assert_eq!(ClientConfig::from_lookup(lookup).expect("config").transport, transport);
}
