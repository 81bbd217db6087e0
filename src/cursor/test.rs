use std::time::Duration;

use pretty_assertions::assert_eq;

use super::{
    common::{CursorCore, CursorOptions, CursorState},
    find::FindSpec,
};
use crate::{
    bson::{doc, Bson, Document},
    coll::{
        options::{CursorType, FindOptions},
        Namespace,
    },
    error::ErrorKind,
    options::ClientOptions,
    Client,
};

fn core(options: CursorOptions) -> CursorCore {
    let client = Client::with_options(ClientOptions::builder().build()).unwrap();
    CursorCore::new(client, Namespace::new("db", "coll"), options, None)
}

fn docs(range: std::ops::Range<i32>) -> Vec<Document> {
    range.map(|i| doc! { "x": i }).collect()
}

#[test]
fn n_return_combines_limit_and_batch_size() {
    let cases: &[(i64, Option<u32>, i64, i32)] = &[
        // limit, batch size, documents returned, expected
        (0, None, 0, 0),
        (0, Some(10), 0, 10),
        (5, None, 0, 5),
        (5, Some(10), 0, 5),
        (10, Some(3), 0, 3),
        (-4, Some(10), 0, -4),
        (10, Some(3), 8, 2),
        (10, None, 10, 1),
        (10, None, 12, 1),
    ];

    for &(limit, batch_size, count, expected) in cases {
        let mut core = core(CursorOptions {
            limit,
            batch_size,
            ..Default::default()
        });
        core.count = count;
        assert_eq!(
            core.n_return(),
            expected,
            "limit {} batch size {:?} count {}",
            limit,
            batch_size,
            count
        );
    }
}

#[test]
fn n_return_clamps_to_i32() {
    let core = core(CursorOptions {
        limit: i64::from(i32::MAX) + 10,
        ..Default::default()
    });
    assert_eq!(core.n_return(), i32::MAX);
}

#[test]
fn get_more_omits_batch_size_unless_set() {
    let mut core = core(CursorOptions::default());
    core.cursor_id = 42;

    let command = core.get_more_command();
    assert_eq!(command.name, "getMore");
    assert_eq!(command.target_db, "db");
    assert_eq!(
        command.body,
        doc! { "getMore": 42_i64, "collection": "coll" }
    );

    core.options.batch_size = Some(7);
    assert_eq!(
        core.get_more_command().body,
        doc! { "getMore": 42_i64, "collection": "coll", "batchSize": 7_i64 }
    );
}

#[test]
fn get_more_sends_max_await_time_only_for_awaiting_cursors() {
    let mut core = core(CursorOptions {
        tailable: true,
        max_await_time: Some(Duration::from_millis(250)),
        ..Default::default()
    });
    core.cursor_id = 1;
    assert!(!core.get_more_command().body.contains_key("maxTimeMS"));

    core.options.await_data = true;
    assert_eq!(
        core.get_more_command().body.get("maxTimeMS"),
        Some(&Bson::Int64(250))
    );

    core.options.tailable = false;
    assert!(!core.get_more_command().body.contains_key("maxTimeMS"));
}

#[test]
fn pop_from_batch_walks_the_batch() {
    let mut core = core(CursorOptions::default());
    core.cursor_id = 9;
    core.batch = docs(0..2).into();

    assert_eq!(core.pop_from_batch(), CursorState::InBatch);
    assert_eq!(core.current, Some(doc! { "x": 0 }));
    assert_eq!(core.pop_from_batch(), CursorState::InBatch);
    assert_eq!(core.current, Some(doc! { "x": 1 }));
    assert_eq!(core.count, 2);

    assert_eq!(core.pop_from_batch(), CursorState::EndOfBatch);

    core.cursor_id = 0;
    assert_eq!(core.pop_from_batch(), CursorState::Done);
}

#[test]
fn pop_from_batch_stops_at_limit() {
    let mut core = core(CursorOptions {
        limit: 2,
        ..Default::default()
    });
    core.cursor_id = 9;
    core.batch = docs(0..5).into();

    assert_eq!(core.pop_from_batch(), CursorState::InBatch);
    assert_eq!(core.pop_from_batch(), CursorState::InBatch);
    assert_eq!(core.pop_from_batch(), CursorState::Done);
    assert_eq!(core.cursor_id, 0);
    assert_eq!(core.count, 2);
}

#[test]
fn read_cursor_document_updates_id_and_namespace() {
    let mut core = core(CursorOptions::default());
    let reply = doc! {
        "ok": 1,
        "cursor": {
            "id": 17_i32,
            "ns": "other.renamed",
            "firstBatch": [{ "x": 1 }, { "x": 2 }],
        },
    };

    core.read_cursor_document(&reply, "firstBatch", "aggregate")
        .unwrap();
    assert_eq!(core.cursor_id, 17);
    assert_eq!(core.ns, Namespace::new("other", "renamed"));
    assert_eq!(core.batch.len(), 2);
}

#[test]
fn read_cursor_document_rejects_malformed_replies() {
    let malformed = [
        doc! { "ok": 1 },
        doc! { "cursor": { "ns": "db.coll", "firstBatch": [] } },
        doc! { "cursor": { "id": "1", "firstBatch": [] } },
        doc! { "cursor": { "id": 0_i64, "nextBatch": [] } },
        doc! { "cursor": { "id": 0_i64, "firstBatch": [1, 2] } },
    ];

    for reply in malformed {
        let mut core = core(CursorOptions::default());
        let error = core
            .read_cursor_document(&reply, "firstBatch", "find")
            .unwrap_err();
        match *error.kind {
            ErrorKind::InvalidCursor { ref message } => {
                assert_eq!(message, "Invalid reply to find command.")
            }
            ref other => panic!("expected an invalid cursor error, got {:?}", other),
        }
    }
}

#[test]
fn find_command_translates_limit_and_cursor_type() {
    let ns = Namespace::new("db", "coll");

    let spec = FindSpec {
        filter: doc! { "x": 1 },
        options: FindOptions::builder()
            .limit(-3)
            .batch_size(2)
            .cursor_type(CursorType::TailableAwait)
            .build(),
    };
    assert_eq!(
        spec.to_command(&ns).unwrap(),
        doc! {
            "find": "coll",
            "filter": { "x": 1 },
            "batchSize": 2,
            "limit": 3_i64,
            "singleBatch": true,
            "tailable": true,
            "awaitData": true,
        }
    );

    let options = spec.cursor_options();
    assert!(options.tailable && options.await_data);
    assert_eq!(options.limit, -3);

    let spec = FindSpec {
        filter: Document::new(),
        options: FindOptions::builder().limit(4).build(),
    };
    let command = spec.to_command(&ns).unwrap();
    assert_eq!(command.get("limit"), Some(&Bson::Int64(4)));
    assert!(!command.contains_key("singleBatch"));
}
