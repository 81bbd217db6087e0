use std::time::Duration;

use pretty_assertions::assert_eq;

use super::{TopologyDescription, TopologyType};
use crate::{
    bson::{doc, oid::ObjectId, DateTime, Document, Timestamp},
    client::{
        options::{ClientOptions, ServerAddress},
        ClusterTime,
    },
    error::{CommandError, ErrorKind},
    hello::HelloReply,
    sdam::description::server::{ServerDescription, ServerType, RTT_UNMEASURED},
};

pub(crate) fn hello_reply(doc: Document, rtt_ms: u64) -> HelloReply {
    HelloReply {
        command_response: crate::bson::from_document(doc.clone()).unwrap(),
        raw_command_response: doc,
        cluster_time: None,
        round_trip_time: Duration::from_millis(rtt_ms),
    }
}

pub(crate) fn topology(hosts: &[&str], repl_set_name: Option<&str>) -> TopologyDescription {
    let hosts = hosts
        .iter()
        .map(|h| ServerAddress::parse(h).unwrap())
        .collect();
    let mut options = ClientOptions::builder().hosts(hosts).build();
    options.repl_set_name = repl_set_name.map(String::from);
    TopologyDescription::new(&options)
}

/// Applies a successful check of `address` that produced `doc`.
pub(crate) fn apply(td: &mut TopologyDescription, address: &str, doc: Document, rtt_ms: u64) {
    let address = ServerAddress::parse(address).unwrap();
    let existing = td.server_by_address(&address).unwrap();
    let (id, previous_rtt) = (existing.id, existing.round_trip_time_ms);
    td.update(ServerDescription::new_from_reply(
        id,
        &address,
        hello_reply(doc, rtt_ms),
        previous_rtt,
        DateTime::now(),
    ))
    .unwrap();
}

fn server_type(td: &TopologyDescription, address: &str) -> Option<ServerType> {
    td.server_by_address(&ServerAddress::parse(address).unwrap())
        .map(|sd| sd.server_type)
}

fn oid(n: u8) -> ObjectId {
    let mut bytes = [0u8; 12];
    bytes[11] = n;
    ObjectId::from_bytes(bytes)
}

fn primary_doc(election: u8) -> Document {
    doc! {
        "ok": 1,
        "ismaster": true,
        "setName": "rs",
        "setVersion": 1,
        "electionId": oid(election),
        "hosts": ["a:27017", "b:27017", "c:27017"],
        "minWireVersion": 0,
        "maxWireVersion": 8,
    }
}

#[test]
fn initial_topology_type() {
    assert_eq!(topology(&["a"], None).topology_type(), TopologyType::Single);
    assert_eq!(
        topology(&["a"], Some("rs")).topology_type(),
        TopologyType::ReplicaSetNoPrimary
    );
    assert_eq!(
        topology(&["a", "b"], None).topology_type(),
        TopologyType::Unknown
    );

    let td = topology(&["a", "b"], None);
    assert!(td.servers.values().all(|sd| sd.round_trip_time_ms == RTT_UNMEASURED));
    assert!(td.servers.values().all(|sd| sd.server_type == ServerType::Unknown));
}

#[test]
fn primary_discovers_members() {
    let mut td = topology(&["a"], Some("rs"));
    apply(&mut td, "a", primary_doc(1), 5);

    assert_eq!(td.topology_type(), TopologyType::ReplicaSetWithPrimary);
    assert_eq!(td.servers.len(), 3);
    assert_eq!(server_type(&td, "b"), Some(ServerType::Unknown));
    assert_eq!(td.max_set_version, Some(1));
    assert_eq!(td.max_election_id, Some(oid(1)));
}

#[test]
fn new_primary_demotes_old_primary() {
    let mut td = topology(&["a", "b", "c"], Some("rs"));
    apply(&mut td, "a", primary_doc(1), 5);
    apply(&mut td, "b", primary_doc(2), 5);

    assert_eq!(server_type(&td, "a"), Some(ServerType::Unknown));
    assert_eq!(server_type(&td, "b"), Some(ServerType::RsPrimary));
    assert_eq!(td.servers_with_type(&[ServerType::RsPrimary]).count(), 1);
    assert_eq!(td.max_election_id, Some(oid(2)));
}

#[test]
fn stale_primary_is_ignored() {
    let mut td = topology(&["a", "b", "c"], Some("rs"));
    apply(&mut td, "b", primary_doc(2), 5);
    apply(&mut td, "a", primary_doc(1), 5);

    assert_eq!(server_type(&td, "a"), Some(ServerType::Unknown));
    assert_eq!(server_type(&td, "b"), Some(ServerType::RsPrimary));
    assert_eq!(td.topology_type(), TopologyType::ReplicaSetWithPrimary);
    assert_eq!(td.max_election_id, Some(oid(2)));
}

#[test]
fn check_started_before_invalidation_is_ignored() {
    let mut td = topology(&["a", "b", "c"], Some("rs"));
    apply(&mut td, "a", primary_doc(1), 5);
    let address = ServerAddress::parse("a").unwrap();
    let id = td.server_by_address(&address).unwrap().id;

    let now = DateTime::now().timestamp_millis();
    let in_flight = DateTime::from_millis(now - 1_000);
    let not_master = ErrorKind::Command(CommandError::new(10107, "not master")).into();
    assert!(td.invalidate_server(id, not_master).unwrap());
    assert_eq!(server_type(&td, "a"), Some(ServerType::Unknown));

    // A heartbeat that was already in flight when the operation failed lands afterwards.
    td.update(ServerDescription::new_from_reply(
        id,
        &address,
        hello_reply(primary_doc(1), 5),
        RTT_UNMEASURED,
        in_flight,
    ))
    .unwrap();
    assert_eq!(server_type(&td, "a"), Some(ServerType::Unknown));
    assert_eq!(td.topology_type(), TopologyType::ReplicaSetNoPrimary);

    // A check started after the invalidation is applied.
    td.update(ServerDescription::new_from_reply(
        id,
        &address,
        hello_reply(primary_doc(1), 5),
        RTT_UNMEASURED,
        DateTime::from_millis(now + 1_000),
    ))
    .unwrap();
    assert_eq!(server_type(&td, "a"), Some(ServerType::RsPrimary));
}

#[test]
fn primary_uniqueness_over_update_sequences() {
    let sequence = [("a", 3u8), ("b", 1), ("c", 2), ("a", 3), ("b", 4), ("c", 4), ("a", 2)];
    let mut td = topology(&["a", "b", "c"], Some("rs"));
    for (address, election) in sequence {
        apply(&mut td, address, primary_doc(election), 5);
        assert!(td.servers_with_type(&[ServerType::RsPrimary]).count() <= 1);
    }
    // An equal election id takes over; a lower one never does.
    assert_eq!(server_type(&td, "c"), Some(ServerType::RsPrimary));
    assert_eq!(server_type(&td, "a"), Some(ServerType::Unknown));
}

#[test]
fn secondary_labels_possible_primary() {
    let mut td = topology(&["a", "b", "c"], Some("rs"));
    apply(
        &mut td,
        "a",
        doc! {
            "ok": 1,
            "secondary": true,
            "setName": "rs",
            "primary": "C:27017",
            "hosts": ["a:27017", "b:27017", "c:27017"],
            "maxWireVersion": 8,
        },
        5,
    );

    assert_eq!(td.topology_type(), TopologyType::ReplicaSetNoPrimary);
    assert_eq!(server_type(&td, "c"), Some(ServerType::PossiblePrimary));
    assert_eq!(server_type(&td, "b"), Some(ServerType::Unknown));
}

#[test]
fn wrong_set_name_is_removed() {
    let mut td = topology(&["a", "b"], Some("rs"));
    apply(
        &mut td,
        "b",
        doc! { "ok": 1, "secondary": true, "setName": "other", "maxWireVersion": 8 },
        5,
    );
    assert_eq!(server_type(&td, "b"), None);
    assert_eq!(td.set_name.as_deref(), Some("rs"));
}

#[test]
fn standalone_among_many_seeds_is_removed() {
    let mut td = topology(&["a", "b"], None);
    apply(&mut td, "a", doc! { "ok": 1, "ismaster": true, "maxWireVersion": 8 }, 5);
    assert_eq!(server_type(&td, "a"), None);
    assert_eq!(td.topology_type(), TopologyType::Unknown);

    apply(
        &mut td,
        "b",
        doc! { "ok": 1, "ismaster": true, "msg": "isdbgrid", "maxWireVersion": 8 },
        5,
    );
    assert_eq!(td.topology_type(), TopologyType::Sharded);
}

#[test]
fn compatibility_error_set_and_cleared() {
    let mut td = topology(&["a"], None);
    apply(
        &mut td,
        "a",
        doc! { "ok": 1, "ismaster": true, "minWireVersion": 10, "maxWireVersion": 11 },
        5,
    );
    let message = td.compatibility_error().unwrap().clone();
    assert_eq!(
        message,
        "Server at a:27017 requires wire version 10, but this version of libmongoc only \
         supports up to 8"
    );

    apply(
        &mut td,
        "a",
        doc! { "ok": 1, "ismaster": true, "minWireVersion": 0, "maxWireVersion": 2 },
        5,
    );
    assert!(td
        .compatibility_error()
        .unwrap()
        .contains("reports wire version 2, but this version of libmongoc requires at least 3"));

    apply(
        &mut td,
        "a",
        doc! { "ok": 1, "ismaster": true, "minWireVersion": 0, "maxWireVersion": 6 },
        5,
    );
    assert_eq!(td.compatibility_error(), None);
}

#[test]
fn failed_check_resets_server() {
    let mut td = topology(&["a"], None);
    apply(&mut td, "a", doc! { "ok": 1, "ismaster": true, "maxWireVersion": 8 }, 12);
    let id = td.server_by_address(&ServerAddress::parse("a").unwrap()).unwrap().id;
    assert_eq!(td.server(id).unwrap().round_trip_time_ms, 12);

    assert!(td
        .invalidate_server(id, crate::error::Error::stream("connection reset"))
        .unwrap());
    let sd = td.server(id).unwrap();
    assert_eq!(sd.server_type, ServerType::Unknown);
    assert_eq!(sd.round_trip_time_ms, RTT_UNMEASURED);
    assert_eq!(sd.error().unwrap().to_string(), "connection reset");
}

#[test]
fn round_trip_time_is_weighted() {
    let mut td = topology(&["a"], None);
    let standalone = doc! { "ok": 1, "ismaster": true, "maxWireVersion": 8 };
    apply(&mut td, "a", standalone.clone(), 100);
    apply(&mut td, "a", standalone, 200);
    let sd = td.server_by_address(&ServerAddress::parse("a").unwrap()).unwrap();
    assert_eq!(sd.round_trip_time_ms, 200 / 5 + 100 * 4 / 5);
}

#[test]
fn cluster_time_never_regresses() {
    let cluster_time = |time: u32, increment: u32| ClusterTime {
        cluster_time: Timestamp { time, increment },
        signature: Document::new(),
    };

    let mut td = topology(&["a"], None);
    let observed = [
        cluster_time(5, 1),
        cluster_time(3, 9),
        cluster_time(5, 2),
        cluster_time(5, 0),
        cluster_time(7, 0),
        cluster_time(6, 100),
    ];
    let mut max = None;
    for time in observed.iter() {
        td.advance_cluster_time(time);
        max = std::cmp::max(max, Some(time.clone()));
        assert_eq!(td.cluster_time(), max.as_ref());
    }
    assert_eq!(td.cluster_time().unwrap().timestamp(), Timestamp { time: 7, increment: 0 });
}

#[test]
fn display() {
    let mut td = topology(&["a"], None);
    apply(&mut td, "a", doc! { "ok": 1, "ismaster": true, "maxWireVersion": 8 }, 3);
    assert_eq!(
        td.to_string(),
        "{ Type: Single, Servers: [ { Address: a:27017, Type: Standalone, Average RTT: 3ms, Max \
         Wire Version: 8 } ] }"
    );
}
