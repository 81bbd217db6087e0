use std::{
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use pretty_assertions::assert_eq;

use super::util::{standalone_hello, MockReply, MockServer};
use crate::{
    bson::doc,
    options::{ClientOptions, ReadPreference, TopologyMode},
    selection_criteria::OperationType,
    Client,
    ServerType,
    TopologyType,
};

#[tokio::test]
async fn try_once_reports_no_suitable_servers() {
    let own_address = Arc::new(OnceLock::<String>::new());
    let hosts = own_address.clone();
    let server = MockServer::start(move |_| {
        let hosts: Vec<&str> = hosts.get().map(String::as_str).into_iter().collect();
        MockReply::Document(doc! {
            "ok": 1,
            "ismaster": false,
            "secondary": true,
            "setName": "rs",
            "hosts": hosts,
            "minWireVersion": 0,
            "maxWireVersion": 8,
        })
    })
    .await;
    own_address.set(server.address().to_string()).unwrap();

    let options = ClientOptions::builder()
        .hosts(vec![server.address()])
        .repl_set_name("rs".to_string())
        .build();
    let client = Client::with_options(options).unwrap();

    let error = client
        .select_server(OperationType::Write, None)
        .await
        .unwrap_err();
    let message = error.to_string();
    assert!(message.contains("No suitable servers found"), "{}", message);
    assert!(message.contains("serverSelectionTryOnce"), "{}", message);

    // Secondaries still serve reads that allow them.
    let secondary = client
        .select_server(
            OperationType::Read,
            Some(&ReadPreference::SecondaryPreferred { options: None }),
        )
        .await
        .unwrap();
    assert_eq!(secondary.server_type(), ServerType::RsSecondary);
    assert_eq!(client.topology_type(), TopologyType::ReplicaSetNoPrimary);
}

#[tokio::test]
async fn incompatible_wire_version_fails_commands() {
    let server = MockServer::start(|request| match request.name() {
        _ if request.is_handshake() => MockReply::Document(standalone_hello(10, 11)),
        _ => MockReply::Document(doc! { "ok": 1 }),
    })
    .await;
    let client = server.client();

    let error = client
        .database("db")
        .run_command(doc! { "ping": 1 }, None)
        .await
        .unwrap_err();
    assert!(error.is_incompatible_server());
    assert!(error
        .to_string()
        .contains("but this version of libmongoc only supports up to 8"));
    assert!(server.request_names().is_empty());
}

#[tokio::test]
async fn failed_server_is_not_rescanned_during_cooldown() {
    let server = MockServer::start(|_| MockReply::HangUp).await;
    let client = server.client();

    let error = client
        .select_server(OperationType::Read, None)
        .await
        .unwrap_err();
    let failed = Instant::now();
    assert!(error.is_server_selection_error());
    assert!(error.to_string().contains("No suitable servers found"));
    let after_first_scan = server.connection_count();
    assert!(after_first_scan >= 1);

    // Within the minimum heartbeat interval the only node is still cooling down.
    let error = client
        .select_server(OperationType::Read, None)
        .await
        .unwrap_err();
    assert!(error.to_string().contains("No servers yet eligible for rescan"));
    assert_eq!(server.connection_count(), after_first_scan);

    // A scan is allowed again, but skips the node for the default five second cooldown.
    tokio::time::sleep_until((failed + Duration::from_millis(600)).into()).await;
    let error = client
        .select_server(OperationType::Read, None)
        .await
        .unwrap_err();
    assert!(error.to_string().contains("serverSelectionTryOnce"));
    assert_eq!(server.connection_count(), after_first_scan);

    tokio::time::sleep_until((failed + Duration::from_millis(5_100)).into()).await;
    client
        .select_server(OperationType::Read, None)
        .await
        .unwrap_err();
    assert!(server.connection_count() > after_first_scan);
}

#[tokio::test]
async fn pooled_selection_waits_for_background_scan() {
    let server = MockServer::start(|_| MockReply::Document(standalone_hello(0, 8))).await;
    let options = ClientOptions::builder()
        .hosts(vec![server.address()])
        .mode(TopologyMode::Pooled)
        .build();
    let client = Client::with_options(options).unwrap();
    assert!(client.is_monitoring());

    let selected = client
        .select_server(OperationType::Write, None)
        .await
        .unwrap();
    assert_eq!(selected.server_type(), ServerType::Standalone);
    assert_eq!(client.topology_type(), TopologyType::Single);

    client.stop_monitoring();
    assert!(!client.is_monitoring());
    client.start_monitoring().unwrap();
    client.start_monitoring().unwrap();
    assert!(client.is_monitoring());
}

#[tokio::test]
async fn load_balancer_is_selected_without_scanning() {
    let server = MockServer::start(|_| MockReply::HangUp).await;
    let options = ClientOptions::builder()
        .hosts(vec![server.address()])
        .load_balanced(true)
        .build();
    let client = Client::with_options(options).unwrap();
    assert_eq!(client.topology_type(), TopologyType::LoadBalanced);
    assert_eq!(client.topology().scanner_node_count().await, 0);

    let selected = client
        .select_server(OperationType::Read, None)
        .await
        .unwrap();
    assert_eq!(selected.server_type(), ServerType::LoadBalancer);
    assert_eq!(server.connection_count(), 0);
}
