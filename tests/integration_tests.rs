use nsperf::protocol::COOKIE_SIZE;
use nsperf::{Config, Cookie, TestParameters};
use std::time::Duration;

#[test]
fn test_config_builder() {
    let config = Config::client("192.168.1.100".to_string())
        .with_port(5301)
        .with_time(Duration::from_secs(30))
        .with_omit(Duration::from_secs(2))
        .with_parallel(4)
        .with_len(2048)
        .with_interval(Duration::from_secs(2));

    assert_eq!(config.server_addr, "192.168.1.100");
    assert_eq!(config.port, 5301);
    assert_eq!(config.time, Duration::from_secs(30));
    assert_eq!(config.omit, Duration::from_secs(2));
    assert_eq!(config.parallel, 4);
    assert_eq!(config.len, 2048);
    assert_eq!(config.interval, Duration::from_secs(2));
}

#[test]
fn test_default_parameter_document_roundtrip() {
    let params = Config::client("127.0.0.1".to_string()).params();
    assert_eq!(
        params,
        TestParameters {
            tcp: true,
            omit: 0,
            time: 10,
            parallel: 1,
            len: 131072,
            client_version: "3-CURRENT".to_string(),
        }
    );

    let json = serde_json::to_vec(&params).unwrap();
    let parsed: TestParameters = serde_json::from_slice(&json).unwrap();
    assert_eq!(parsed, params);
}

#[test]
fn test_cookie_is_always_37_bytes() {
    assert_eq!(Cookie::default().as_bytes().len(), COOKIE_SIZE);
    assert_eq!(COOKIE_SIZE, 37);

    assert!(Cookie::new("too short").is_err());
    let custom = Cookie::new(&"c".repeat(COOKIE_SIZE)).unwrap();
    assert_eq!(custom.as_bytes().len(), COOKIE_SIZE);
}

#[test]
fn test_library_version_matches_manifest() {
    assert_eq!(nsperf::VERSION, env!("CARGO_PKG_VERSION"));
}
