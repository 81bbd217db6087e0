use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::io::AsyncWriteExt;

use super::{Header, Message, MessageFlags, Query, QueryFlags, Reply, Response, WireBuffer};
use crate::{
    bson::{doc, Bson},
    error::ErrorKind,
};

#[test]
fn append_grows_to_power_of_two() {
    let mut buffer = WireBuffer::with_capacity(4);
    buffer.append(&[1, 2, 3]);
    assert_eq!(buffer.capacity(), 4);
    buffer.append(&[4, 5]);
    assert_eq!(buffer.capacity(), 8);
    buffer.append(&[0; 10]);
    assert_eq!(buffer.capacity(), 16);
    assert_eq!(buffer.len(), 15);
    assert_eq!(&buffer.as_slice()[..5], &[1, 2, 3, 4, 5]);
}

#[test]
fn clear_and_consume() {
    let mut buffer = WireBuffer::default();
    buffer.append(b"abcdef");
    buffer.consume(2);
    assert_eq!(buffer.as_slice(), b"cdef");
    buffer.clear(true);
    assert_eq!(buffer.len(), 0);
    buffer.append(b"z");
    assert_eq!(buffer.as_slice(), b"z");
}

#[tokio::test]
async fn fill_reads_at_least_min_bytes() {
    let (mut client, mut server) = tokio::io::duplex(64);
    server.write_all(b"0123456789").await.unwrap();

    let mut buffer = WireBuffer::default();
    let len = buffer
        .fill_from_transport(&mut client, 4, Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert!(len >= 4);
    assert_eq!(&buffer.as_slice()[..4], b"0123");
}

#[tokio::test]
async fn fill_short_read_is_stream_error() {
    let (mut client, mut server) = tokio::io::duplex(64);
    server.write_all(b"abc").await.unwrap();
    drop(server);

    let mut buffer = WireBuffer::default();
    let err = buffer
        .fill_from_transport(&mut client, 8, Some(Duration::from_secs(1)))
        .await
        .unwrap_err();
    assert!(matches!(*err.kind, ErrorKind::Stream { .. }));
    assert_eq!(err.to_string(), "Failed to buffer 8 bytes");
    assert!(err.is_network_error());
}

#[tokio::test]
async fn fill_timeout_is_network_timeout() {
    let (mut client, _server) = tokio::io::duplex(64);
    let mut buffer = WireBuffer::default();
    let err = buffer
        .fill_from_transport(&mut client, 1, Some(Duration::from_millis(20)))
        .await
        .unwrap_err();
    assert!(err.is_network_timeout());
}

#[tokio::test]
async fn fill_rejects_out_of_range_timeout() {
    let (mut client, _server) = tokio::io::duplex(64);
    let mut buffer = WireBuffer::default();
    let err = buffer
        .fill_from_transport(&mut client, 1, Some(Duration::from_millis(i32::MAX as u64 + 1)))
        .await
        .unwrap_err();
    assert!(matches!(*err.kind, ErrorKind::InvalidArgument { .. }));
}

#[tokio::test]
async fn append_from_transport_exact() {
    let (mut client, mut server) = tokio::io::duplex(64);
    server.write_all(b"hello world").await.unwrap();

    let mut buffer = WireBuffer::default();
    buffer
        .append_from_transport(&mut client, 5, None)
        .await
        .unwrap();
    assert_eq!(buffer.as_slice(), b"hello");

    drop(server);
    let err = buffer
        .append_from_transport(&mut client, 10, None)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Failed to read 10 bytes: socket error or timeout"
    );
}

#[test]
fn query_encoding() {
    let query = Query {
        flags: QueryFlags::SECONDARY_OK | QueryFlags::EXHAUST,
        full_collection_name: "db.coll".to_string(),
        number_to_skip: 2,
        number_to_return: -1,
        query: doc! { "x": 1 },
        return_fields_selector: Some(doc! { "_id": 0 }),
    };
    let (request_id, bytes) = query.encode().unwrap();
    let header = Header::parse(&bytes).unwrap();
    assert_eq!(header.request_id, request_id);
    assert_eq!(header.length as usize, bytes.len());

    let decoded = Query::decode(&bytes[Header::LENGTH..]).unwrap();
    assert_eq!(decoded.flags, query.flags);
    assert_eq!(decoded.full_collection_name, "db.coll");
    assert_eq!(decoded.number_to_skip, 2);
    assert_eq!(decoded.number_to_return, -1);
    assert_eq!(decoded.query, doc! { "x": 1 });
    assert_eq!(decoded.return_fields_selector, Some(doc! { "_id": 0 }));
}

#[test]
fn op_msg_sequences_fold_into_payload() {
    let mut body = Vec::new();
    body.extend_from_slice(&0u32.to_le_bytes());
    body.push(0);
    doc! { "ok": 1 }.to_writer(&mut body).unwrap();

    let mut docs = Vec::new();
    doc! { "a": 1 }.to_writer(&mut docs).unwrap();
    doc! { "a": 2 }.to_writer(&mut docs).unwrap();
    body.push(1);
    body.extend_from_slice(&((4 + 6 + docs.len()) as i32).to_le_bytes());
    body.extend_from_slice(b"items\0");
    body.extend(docs);

    let header = Header {
        length: (Header::LENGTH + body.len()) as i32,
        request_id: 9,
        response_to: 4,
        op_code: super::OpCode::Message,
    };
    let mut bytes = Vec::new();
    header.write_to(&mut bytes);
    bytes.extend(body);

    let message = match Response::decode(&bytes).unwrap() {
        Response::Message(message) => message,
        other => panic!("expected OP_MSG, got {:?}", other),
    };
    assert_eq!(message.response_to, 4);
    assert_eq!(
        message.document_payload,
        doc! { "ok": 1, "items": [{ "a": 1 }, { "a": 2 }] }
    );
}

#[test]
fn op_msg_encoding() {
    let mut message = Message::new(doc! { "ping": 1, "$db": "admin" }, MessageFlags::empty());
    message.response_to = 12;
    let (_, bytes) = message.encode().unwrap();
    let decoded = match Response::decode(&bytes).unwrap() {
        Response::Message(message) => message,
        other => panic!("expected OP_MSG, got {:?}", other),
    };
    assert_eq!(decoded.response_to, 12);
    assert_eq!(decoded.document_payload.get("ping"), Some(&Bson::Int32(1)));
}

#[test]
fn reply_decoding() {
    let reply = Reply {
        response_to: 3,
        response_flags: super::ResponseFlags::AWAIT_CAPABLE,
        cursor_id: 42,
        starting_from: 0,
        number_returned: 2,
        docs: vec![doc! { "a": 1 }, doc! { "a": 2 }],
    };
    let bytes = reply.encode(77).unwrap();
    let decoded = match Response::decode(&bytes).unwrap() {
        Response::Reply(reply) => reply,
        other => panic!("expected OP_REPLY, got {:?}", other),
    };
    assert_eq!(decoded.response_to, 3);
    assert_eq!(decoded.cursor_id, 42);
    assert_eq!(decoded.docs, reply.docs);
}
