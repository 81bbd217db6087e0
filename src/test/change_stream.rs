use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use pretty_assertions::assert_eq;

use super::util::{cursor_reply, standalone_hello, MockReply, MockServer};
use crate::bson::{doc, Document, Timestamp};

const NOT_MASTER: i32 = 10107;

fn not_master() -> Document {
    doc! { "ok": 0, "code": NOT_MASTER, "errmsg": "not master" }
}

#[tokio::test]
async fn resumes_once_per_call_then_surfaces_error() {
    let server = MockServer::start(|request| match request.name() {
        "aggregate" => {
            let mut reply = cursor_reply(10, "db.coll", "firstBatch", Vec::new());
            reply.insert(
                "operationTime",
                Timestamp {
                    time: 100,
                    increment: 1,
                },
            );
            MockReply::Document(reply)
        }
        "getMore" => MockReply::Document(not_master()),
        "killCursors" => MockReply::Document(doc! { "ok": 1 }),
        _ => MockReply::Document(standalone_hello(0, 8)),
    })
    .await;
    let coll = server.client().database("db").collection("coll");

    let mut stream = coll.watch(None, None);
    let error = stream.try_next().await.unwrap_err();
    assert_eq!(error.code(), Some(NOT_MASTER));
    assert!(stream.error().is_some());

    assert_eq!(
        server.request_names(),
        vec!["aggregate", "getMore", "killCursors", "aggregate", "getMore"]
    );

    let requests = server.requests();
    let stage = |index: usize| -> Document {
        let pipeline = requests[index].body().unwrap().get_array("pipeline").unwrap();
        pipeline[0]
            .as_document()
            .unwrap()
            .get_document("$changeStream")
            .unwrap()
            .clone()
    };
    assert_eq!(stage(0), Document::new());
    assert_eq!(
        stage(3),
        doc! { "startAtOperationTime": Timestamp { time: 100, increment: 1 } }
    );

    // The stream stays failed.
    assert_eq!(stream.try_next().await.unwrap_err().code(), Some(NOT_MASTER));
    assert_eq!(server.request_names().len(), 5);
}

#[tokio::test]
async fn resumes_after_last_change() {
    let get_mores = Arc::new(AtomicUsize::new(0));
    let counter = get_mores.clone();
    let server = MockServer::start(move |request| match request.name() {
        "aggregate" => MockReply::Document(cursor_reply(
            10,
            "db.coll",
            "firstBatch",
            vec![doc! { "_id": { "token": 1 }, "operationType": "insert" }],
        )),
        "getMore" if counter.fetch_add(1, Ordering::SeqCst) == 0 => {
            MockReply::Document(not_master())
        }
        "getMore" => MockReply::Document(cursor_reply(
            10,
            "db.coll",
            "nextBatch",
            vec![doc! { "_id": { "token": 2 }, "operationType": "delete" }],
        )),
        "killCursors" => MockReply::Document(doc! { "ok": 1 }),
        _ => MockReply::Document(standalone_hello(0, 8)),
    })
    .await;
    let coll = server.client().database("db").collection("coll");

    let mut stream = coll.watch(None, None);
    let first = stream.try_next().await.unwrap().unwrap();
    assert_eq!(first.get_str("operationType").unwrap(), "insert");
    assert_eq!(stream.resume_token(), Some(&doc! { "token": 1 }));

    // The getMore fails, the stream resumes after token 1 and the new aggregate replays it.
    let second = stream.try_next().await.unwrap().unwrap();
    assert_eq!(second.get_str("operationType").unwrap(), "insert");

    let third = stream.try_next().await.unwrap().unwrap();
    assert_eq!(third.get_str("operationType").unwrap(), "delete");
    assert_eq!(stream.resume_token(), Some(&doc! { "token": 2 }));

    let requests = server.requests();
    let resumed = requests
        .iter()
        .filter(|request| request.name() == "aggregate")
        .nth(1)
        .unwrap()
        .body()
        .unwrap()
        .get_array("pipeline")
        .unwrap()[0]
        .as_document()
        .unwrap()
        .get_document("$changeStream")
        .unwrap()
        .clone();
    assert_eq!(resumed, doc! { "resumeAfter": { "token": 1 } });
}

#[tokio::test]
async fn change_without_id_is_an_error() {
    let server = MockServer::start(|request| match request.name() {
        "aggregate" => MockReply::Document(cursor_reply(
            0,
            "db.coll",
            "firstBatch",
            vec![doc! { "operationType": "insert" }],
        )),
        _ => MockReply::Document(standalone_hello(0, 8)),
    })
    .await;
    let coll = server.client().database("db").collection("coll");

    let mut stream = coll.watch(vec![doc! { "$project": { "_id": 0 } }], None);
    assert!(stream.next().await.is_none());
    assert!(stream
        .error()
        .unwrap()
        .to_string()
        .contains("resume token"));
}
