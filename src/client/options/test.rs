use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::{
    client::options::{ClientOptions, ServerAddress, TopologyMode},
    selection_criteria::ReadPreference,
};

#[test]
fn parse_hosts_and_defaults() {
    let options = ClientOptions::parse("mongodb://a.example.com,B.example.com:27018/").unwrap();
    assert_eq!(
        options.hosts,
        vec![
            ServerAddress::parse("a.example.com:27017").unwrap(),
            ServerAddress::parse("b.example.com:27018").unwrap(),
        ]
    );
    assert_eq!(options.mode, TopologyMode::Single);
    assert_eq!(options.heartbeat_freq(), Duration::from_secs(60));
    assert_eq!(options.min_heartbeat_freq(), Duration::from_millis(500));
    assert_eq!(options.cooldown(), Duration::from_secs(5));
    assert_eq!(options.local_threshold(), Duration::from_millis(15));
    assert_eq!(options.server_selection_timeout(), Duration::from_secs(30));
    assert!(options.server_selection_try_once());
    assert!(!options.is_direct());
}

#[test]
fn parse_options() {
    let options = ClientOptions::parse(
        "mongodb://localhost/?replicaSet=rs0&serverSelectionTryOnce=false&\
         serverSelectionTimeoutMS=1500&localThresholdMS=30&appName=my%20app&\
         readPreference=secondary&readPreferenceTags=dc:ny,rack:1&maxStalenessSeconds=120",
    )
    .unwrap();
    assert_eq!(options.repl_set_name.as_deref(), Some("rs0"));
    assert!(!options.server_selection_try_once());
    assert_eq!(options.server_selection_timeout(), Duration::from_millis(1500));
    assert_eq!(options.local_threshold(), Duration::from_millis(30));
    assert_eq!(options.app_name.as_deref(), Some("my app"));

    let read_pref = options.read_preference.unwrap();
    assert_eq!(read_pref.mode(), "secondary");
    assert_eq!(read_pref.max_staleness(), Some(Duration::from_secs(120)));
    let tags = read_pref.tag_sets().unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].get("dc").map(String::as_str), Some("ny"));
}

#[test]
fn parse_rejects_bad_input() {
    assert!(ClientOptions::parse("mongodb://").is_err());
    assert!(ClientOptions::parse("http://localhost").is_err());
    assert!(ClientOptions::parse("mongodb://localhost/?bogus=1").is_err());
    assert!(ClientOptions::parse("mongodb://localhost/?serverSelectionTryOnce=maybe").is_err());
    assert!(ClientOptions::parse("mongodb://a,b/?directConnection=true").is_err());
    assert!(ClientOptions::parse(
        "mongodb://localhost/?readPreference=primary&maxStalenessSeconds=120"
    )
    .is_err());
    assert!(ClientOptions::parse(
        "mongodb://localhost/?readPreference=secondary&maxStalenessSeconds=30"
    )
    .is_err());
}

#[test]
fn pooled_defaults() {
    let options = ClientOptions::builder()
        .mode(TopologyMode::Pooled)
        .server_selection_try_once(true)
        .build();
    assert_eq!(options.heartbeat_freq(), Duration::from_secs(10));
    assert!(!options.server_selection_try_once());
}

#[test]
fn server_address_parsing() {
    let address = ServerAddress::parse("LocalHost").unwrap();
    assert_eq!(address.to_string(), "localhost:27017");
    assert_eq!(
        ServerAddress::parse("[::1]:27019").unwrap().to_string(),
        "[::1]:27019"
    );
    assert!(ServerAddress::parse("host:0").is_err());
    assert!(ServerAddress::parse("host:notaport").is_err());
    assert!(ServerAddress::parse("a:1:2").is_err());
    assert_eq!(ReadPreference::from_mode("nearest").unwrap().mode(), "nearest");
}
