//! An in-process server that speaks enough of the wire protocol to drive a client through
//! handshakes, commands and legacy cursors.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
    Mutex,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

use crate::{
    bson::{doc, Document},
    client::options::{ClientOptions, ServerAddress},
    cmap::conn::wire::{
        next_request_id,
        GetMore,
        Header,
        Message,
        MessageFlags,
        OpCode,
        Query,
        Reply,
        ResponseFlags,
    },
    Client,
};

/// A request as the mock server decoded it.
#[derive(Clone, Debug)]
pub(crate) enum Request {
    /// A command, sent as OP_MSG or as an OP_QUERY against `<db>.$cmd`.
    Command { name: String, body: Document },

    /// A legacy OP_QUERY against a collection.
    Query(Query),

    GetMore(GetMore),
    KillCursors,
}

impl Request {
    pub(crate) fn name(&self) -> &str {
        match self {
            Request::Command { name, .. } => name,
            Request::Query(_) => "OP_QUERY",
            Request::GetMore(_) => "OP_GETMORE",
            Request::KillCursors => "OP_KILL_CURSORS",
        }
    }

    pub(crate) fn is_handshake(&self) -> bool {
        matches!(self.name(), "hello" | "isMaster" | "ismaster")
    }

    pub(crate) fn body(&self) -> Option<&Document> {
        match self {
            Request::Command { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// What the mock server does with a request.
#[derive(Clone, Debug)]
pub(crate) enum MockReply {
    /// Replies with a single document, in the same protocol the request used.
    Document(Document),

    /// Replies with an OP_REPLY carrying a cursor id and a batch.
    Batch { cursor_id: i64, docs: Vec<Document> },

    /// Closes the connection without replying.
    HangUp,
}

type Responder = dyn Fn(&Request) -> MockReply + Send + Sync;

#[derive(Default)]
struct Recorded {
    requests: Mutex<Vec<Request>>,
    connections: AtomicUsize,
}

pub(crate) struct MockServer {
    address: ServerAddress,
    recorded: Arc<Recorded>,
    listener: JoinHandle<()>,
}

impl MockServer {
    pub(crate) async fn start(
        responder: impl Fn(&Request) -> MockReply + Send + Sync + 'static,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let recorded = Arc::new(Recorded::default());
        let responder: Arc<Responder> = Arc::new(responder);

        let accept_recorded = recorded.clone();
        let listener = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_recorded.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, accept_recorded.clone(), responder.clone()));
            }
        });

        Self {
            address: ServerAddress::Tcp {
                host: "127.0.0.1".to_string(),
                port: Some(port),
            },
            recorded,
            listener,
        }
    }

    pub(crate) fn address(&self) -> ServerAddress {
        self.address.clone()
    }

    /// A single-threaded client whose only seed is this server.
    pub(crate) fn client(&self) -> Client {
        Client::with_options(self.client_options()).unwrap()
    }

    pub(crate) fn client_options(&self) -> ClientOptions {
        ClientOptions::builder().hosts(vec![self.address()]).build()
    }

    /// Every request received so far, handshakes excluded.
    pub(crate) fn requests(&self) -> Vec<Request> {
        self.recorded
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|request| !request.is_handshake())
            .cloned()
            .collect()
    }

    pub(crate) fn request_names(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|request| request.name().to_string())
            .collect()
    }

    /// The number of connections accepted so far.
    pub(crate) fn connection_count(&self) -> usize {
        self.recorded.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// A hello reply from a standalone server.
pub(crate) fn standalone_hello(min_wire_version: i32, max_wire_version: i32) -> Document {
    doc! {
        "ok": 1,
        "isWritablePrimary": true,
        "helloOk": true,
        "minWireVersion": min_wire_version,
        "maxWireVersion": max_wire_version,
    }
}

/// A `{cursor: {id, ns, <batch_field>}}` command reply.
pub(crate) fn cursor_reply(id: i64, ns: &str, batch_field: &str, docs: Vec<Document>) -> Document {
    doc! {
        "ok": 1,
        "cursor": { "id": id, "ns": ns, batch_field: docs },
    }
}

async fn serve(mut stream: TcpStream, recorded: Arc<Recorded>, responder: Arc<Responder>) {
    loop {
        let mut header_bytes = [0u8; Header::LENGTH];
        if stream.read_exact(&mut header_bytes).await.is_err() {
            return;
        }
        let Ok(header) = Header::parse(&header_bytes) else {
            return;
        };
        let mut body = vec![0u8; header.length as usize - Header::LENGTH];
        if stream.read_exact(&mut body).await.is_err() {
            return;
        }

        let Some((request, op_msg)) = decode_request(&header, &body) else {
            return;
        };
        let reply = responder(&request);
        recorded.requests.lock().unwrap().push(request);

        let bytes = match reply {
            MockReply::HangUp => return,
            MockReply::Document(document) if op_msg => {
                let mut message = Message::new(document, MessageFlags::empty());
                message.response_to = header.request_id;
                match message.encode() {
                    Ok((_, bytes)) => bytes,
                    Err(_) => return,
                }
            }
            MockReply::Document(document) => match op_reply(header.request_id, 0, vec![document]) {
                Some(bytes) => bytes,
                None => return,
            },
            MockReply::Batch { cursor_id, docs } => {
                match op_reply(header.request_id, cursor_id, docs) {
                    Some(bytes) => bytes,
                    None => return,
                }
            }
        };
        if stream.write_all(&bytes).await.is_err() {
            return;
        }
    }
}

/// Decodes a request, also reporting whether it arrived as OP_MSG.
fn decode_request(header: &Header, body: &[u8]) -> Option<(Request, bool)> {
    match header.op_code {
        OpCode::Message => {
            let message = Message::decode(header, body).ok()?;
            Some((command(message.document_payload), true))
        }
        OpCode::Query => {
            let query = Query::decode(body).ok()?;
            if query.full_collection_name.ends_with(".$cmd") {
                let body = match query.query.get_document("$query") {
                    Ok(inner) => inner.clone(),
                    Err(_) => query.query,
                };
                Some((command(body), false))
            } else {
                Some((Request::Query(query), false))
            }
        }
        OpCode::GetMore => Some((Request::GetMore(GetMore::decode(body).ok()?), false)),
        OpCode::KillCursors => Some((Request::KillCursors, false)),
        OpCode::Reply => None,
    }
}

fn command(body: Document) -> Request {
    let name = body.keys().next().cloned().unwrap_or_default();
    Request::Command { name, body }
}

fn op_reply(response_to: i32, cursor_id: i64, docs: Vec<Document>) -> Option<Vec<u8>> {
    let reply = Reply {
        response_to,
        response_flags: ResponseFlags::empty(),
        cursor_id,
        starting_from: 0,
        number_returned: docs.len() as i32,
        docs,
    };
    reply.encode(next_request_id()).ok()
}
