use std::time::Duration;

use futures::stream::TryStreamExt;
use pretty_assertions::assert_eq;

use super::util::{cursor_reply, standalone_hello, MockReply, MockServer, Request};
use crate::{
    bson::{doc, Bson, Document},
    options::FindOptions,
};

fn docs(values: impl IntoIterator<Item = i32>) -> Vec<Document> {
    values.into_iter().map(|x| doc! { "x": x }).collect()
}

/// Answers an aggregate with one document on a live cursor, and every getMore with the final
/// document.
async fn two_batch_server() -> MockServer {
    MockServer::start(|request| match request.name() {
        _ if request.is_handshake() => MockReply::Document(standalone_hello(0, 8)),
        "aggregate" => MockReply::Document(cursor_reply(42, "db.coll", "firstBatch", docs([1]))),
        "getMore" => MockReply::Document(cursor_reply(0, "db.coll", "nextBatch", docs([2]))),
        _ => MockReply::Document(doc! { "ok": 1 }),
    })
    .await
}

#[tokio::test]
async fn get_more_omits_batch_size_by_default() {
    let server = two_batch_server().await;
    let client = server.client();
    let coll = client.database("db").collection("coll");

    let mut cursor = coll.aggregate(vec![doc! { "$match": {} }], None).unwrap();
    let mut seen = Vec::new();
    while let Some(document) = cursor.try_next().await.unwrap() {
        seen.push(document);
    }
    assert_eq!(seen, docs([1, 2]));
    assert_eq!(cursor.id(), 0);
    assert!(!cursor.is_alive());

    assert_eq!(server.request_names(), vec!["aggregate", "getMore"]);
    let server_id = cursor.server_id().unwrap();
    assert_eq!(cursor.namespace().to_string(), "db.coll");
    assert_eq!(
        client.topology().connections().idle_count(server_id).await,
        1,
        "the connection should be back in the cache"
    );
    let get_more = server.requests()[1].body().cloned().unwrap();
    assert_eq!(get_more.get("getMore"), Some(&Bson::Int64(42)));
    assert_eq!(get_more.get_str("collection").unwrap(), "coll");
    assert!(!get_more.contains_key("batchSize"));
}

#[tokio::test]
async fn stream_and_fresh_clone_rerun_the_query() {
    let server = two_batch_server().await;
    let coll = server.client().database("db").collection("coll");

    let cursor = coll.aggregate(vec![], None).unwrap();
    let fresh = cursor.clone_fresh();
    let all: Vec<Document> = cursor.into_stream().try_collect().await.unwrap();
    assert_eq!(all, docs([1, 2]));

    let again: Vec<Document> = fresh.into_stream().try_collect().await.unwrap();
    assert_eq!(again, all);
    assert_eq!(
        server.request_names(),
        vec!["aggregate", "getMore", "aggregate", "getMore"]
    );
}

#[tokio::test]
async fn get_more_uses_cursor_batch_size() {
    let server = two_batch_server().await;
    let coll = server.client().database("db").collection("coll");

    let mut cursor = coll.aggregate(vec![], None).unwrap();
    cursor.set_batch_size(3);
    assert_eq!(cursor.next().await, Some(&doc! { "x": 1 }));
    assert_eq!(cursor.next().await, Some(&doc! { "x": 2 }));
    assert_eq!(cursor.next().await, None);
    assert!(cursor.error().is_none());

    let get_more = server.requests()[1].body().cloned().unwrap();
    assert_eq!(get_more.get("batchSize"), Some(&Bson::Int64(3)));
}

#[tokio::test]
async fn advancing_finished_cursor_is_an_error() {
    let server = two_batch_server().await;
    let mut cursor = server.client().command("admin", doc! { "ping": 1 }, None);

    assert_eq!(cursor.next().await, Some(&doc! { "ok": 1 }));
    assert_eq!(cursor.next().await, None);
    assert!(cursor.error().is_none());

    assert_eq!(cursor.next().await, None);
    let error = cursor.error().unwrap();
    assert!(error
        .to_string()
        .contains("Cannot advance a completed or failed cursor."));
}

#[tokio::test]
async fn list_databases_unwraps_array_without_get_more() {
    let server = MockServer::start(|request| match request.name() {
        "listDatabases" => MockReply::Document(doc! {
            "ok": 1,
            "databases": [{ "name": "a" }, { "name": "b" }],
        }),
        _ => MockReply::Document(standalone_hello(0, 8)),
    })
    .await;
    let client = server.client();

    let mut cursor = client.list_databases(None);
    assert_eq!(cursor.next().await, Some(&doc! { "name": "a" }));
    assert_eq!(cursor.next().await, Some(&doc! { "name": "b" }));
    assert_eq!(cursor.next().await, None);
    assert!(cursor.error().is_none());

    assert_eq!(server.request_names(), vec!["listDatabases"]);
    assert_eq!(client.list_database_names().await.unwrap(), vec!["a", "b"]);
}

#[tokio::test]
async fn legacy_find_uses_op_query_and_op_get_more() {
    let server = MockServer::start(|request| match request {
        Request::Query(_) => MockReply::Batch {
            cursor_id: 7,
            docs: docs([1, 2]),
        },
        Request::GetMore(_) => MockReply::Batch {
            cursor_id: 0,
            docs: docs([3]),
        },
        _ => MockReply::Document(standalone_hello(0, 3)),
    })
    .await;
    let coll = server.client().database("db").collection("coll");

    let options = FindOptions::builder()
        .batch_size(2)
        .sort(doc! { "x": 1 })
        .build();
    let mut cursor = coll.find(doc! { "x": { "$gt": 0 } }, options);
    let mut seen = Vec::new();
    while let Some(document) = cursor.try_next().await.unwrap() {
        seen.push(document);
    }
    assert_eq!(seen, docs([1, 2, 3]));

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    match requests[0] {
        Request::Query(ref query) => {
            assert_eq!(query.full_collection_name, "db.coll");
            assert_eq!(query.number_to_return, 2);
            assert_eq!(
                query.query,
                doc! { "$query": { "x": { "$gt": 0 } }, "$orderby": { "x": 1 } }
            );
        }
        ref other => panic!("expected OP_QUERY, got {:?}", other),
    }
    match requests[1] {
        Request::GetMore(ref get_more) => {
            assert_eq!(get_more.cursor_id, 7);
            assert_eq!(get_more.number_to_return, 2);
        }
        ref other => panic!("expected OP_GETMORE, got {:?}", other),
    }
}

#[tokio::test]
async fn reaching_limit_kills_open_cursor() {
    let server = MockServer::start(|request| match request.name() {
        "find" => MockReply::Document(cursor_reply(99, "db.coll", "firstBatch", docs([1, 2]))),
        "killCursors" => MockReply::Document(doc! { "ok": 1, "cursorsKilled": [99_i64] }),
        _ => MockReply::Document(standalone_hello(0, 8)),
    })
    .await;
    let coll = server.client().database("db").collection("coll");

    let mut cursor = coll.find(None, FindOptions::builder().limit(1).build());
    assert_eq!(cursor.next().await, Some(&doc! { "x": 1 }));
    assert_eq!(cursor.next().await, None);
    assert!(cursor.error().is_none());
    assert_eq!(cursor.id(), 0);

    let find = server.requests()[0].body().cloned().unwrap();
    assert_eq!(find.get("limit"), Some(&Bson::Int64(1)));

    let killed = tokio::time::timeout(Duration::from_secs(5), async {
        while !server.request_names().iter().any(|name| name == "killCursors") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(killed.is_ok(), "killCursors was never sent");
}
