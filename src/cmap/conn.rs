mod command;
mod stream_description;
pub(crate) mod wire;

use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::{Duration, Instant},
};

use tokio::{io::AsyncWriteExt, net::TcpStream};

use self::wire::{
    GetMore,
    Header,
    KillCursors,
    Message,
    MessageFlags,
    Query,
    QueryFlags,
    Reply,
    Response,
    WireBuffer,
};
use crate::{
    client::options::ServerAddress,
    error::{Error, Result},
};
pub(crate) use command::{Command, RawCommandResponse};
pub(crate) use stream_description::StreamDescription;

static NEXT_CONNECTION_ID: AtomicU32 = AtomicU32::new(1);

/// A TCP connection to one server, together with the description established by its handshake.
#[derive(Debug)]
pub(crate) struct Connection {
    pub(crate) id: u32,
    pub(crate) address: ServerAddress,

    /// The cached StreamDescription from the connection's handshake.
    pub(crate) stream_description: Option<StreamDescription>,

    /// Whether a network error has occurred on this connection. Such a connection must not be
    /// reused.
    pub(crate) errored: bool,

    socket_timeout: Option<Duration>,
    stream: TcpStream,
    buffer: WireBuffer,
}

impl Connection {
    /// Opens a TCP connection to `address`, failing if it takes longer than `connect_timeout`.
    pub(crate) async fn connect(
        address: ServerAddress,
        connect_timeout: Option<Duration>,
        socket_timeout: Option<Duration>,
    ) -> Result<Self> {
        let target = (address.host().to_string(), address.port());
        let stream = match connect_timeout {
            Some(timeout) if !timeout.is_zero() => {
                tokio::time::timeout(timeout, TcpStream::connect(target))
                    .await
                    .map_err(|_| Error::network_timeout())??
            }
            _ => TcpStream::connect(target).await?,
        };
        stream.set_nodelay(true)?;

        Ok(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::SeqCst),
            address,
            stream_description: None,
            errored: false,
            socket_timeout,
            stream,
            buffer: WireBuffer::default(),
        })
    }

    pub(crate) fn stream_description(&self) -> Result<&StreamDescription> {
        self.stream_description.as_ref().ok_or_else(|| {
            Error::internal("Stream checked out but not handshaked")
        })
    }

    pub(crate) fn max_wire_version(&self) -> Option<i32> {
        self.stream_description
            .as_ref()
            .and_then(|sd| sd.max_wire_version)
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            if e.is_network_error() {
                self.errored = true;
            }
        }
        result
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let write = async {
            self.stream.write_all(bytes).await?;
            self.stream.flush().await
        };
        let result = match self.socket_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, write).await {
                Ok(r) => r.map_err(Error::from),
                Err(_) => Err(Error::network_timeout()),
            },
            None => write.await.map_err(Error::from),
        };
        self.track(result)
    }

    /// Reads one complete message from the stream. Bytes of any following message that arrived
    /// in the same read stay buffered for the next call.
    async fn read_message(&mut self) -> Result<Response> {
        let timeout = self.socket_timeout;
        let max_len = self
            .stream_description
            .as_ref()
            .map(|sd| sd.max_message_size_bytes)
            .unwrap_or(wire::DEFAULT_MAX_MESSAGE_SIZE_BYTES);

        let have = self.buffer.len();
        if have < Header::LENGTH {
            let result = self
                .buffer
                .fill_from_transport(&mut self.stream, Header::LENGTH - have, timeout)
                .await;
            self.track(result)?;
        }

        let prefix = self.buffer.as_slice();
        let length = i32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        if length < Header::LENGTH as i32 || length > max_len {
            self.errored = true;
            self.buffer.clear(false);
            return Err(Error::invalid_response(format!(
                "Message length {} outside of the allowed range [{}, {}]",
                length,
                Header::LENGTH,
                max_len
            )));
        }
        let length = length as usize;

        let have = self.buffer.len();
        if have < length {
            let result = self
                .buffer
                .append_from_transport(&mut self.stream, length - have, timeout)
                .await;
            self.track(result)?;
        }

        let response = Response::decode(&self.buffer.as_slice()[..length]);
        self.buffer.consume(length);
        response
    }

    async fn read_response_to(&mut self, request_id: i32) -> Result<Response> {
        let response = self.read_message().await?;
        if response.response_to() != request_id {
            self.errored = true;
            return Err(Error::invalid_response(format!(
                "Expected response to request {} but got response to {}",
                request_id,
                response.response_to()
            )));
        }
        Ok(response)
    }

    /// Executes a command and returns the server's reply without checking `ok`.
    pub(crate) async fn send_command(&mut self, command: Command) -> Result<RawCommandResponse> {
        let use_op_msg = self
            .stream_description
            .as_ref()
            .is_some_and(|sd| sd.supports_op_msg());

        let reply = if use_op_msg {
            let message = Message::new(command.to_op_msg_document()?, MessageFlags::empty());
            let (request_id, bytes) = message.encode()?;
            self.send(&bytes).await?;
            match self.read_response_to(request_id).await? {
                Response::Message(message) => message.document_payload,
                Response::Reply(_) => {
                    return Err(Error::invalid_response(
                        "received OP_REPLY in response to OP_MSG",
                    ))
                }
            }
        } else {
            let mut flags = QueryFlags::empty();
            if command.secondary_ok {
                flags |= QueryFlags::SECONDARY_OK;
            }
            let query = Query {
                flags,
                full_collection_name: format!("{}.$cmd", command.target_db),
                number_to_skip: 0,
                number_to_return: -1,
                query: command.to_op_query_document()?,
                return_fields_selector: None,
            };
            let mut reply = self.query(&query).await?;
            if reply.docs.is_empty() {
                return Err(Error::invalid_response(format!(
                    "Invalid reply to {} command.",
                    command.name
                )));
            }
            reply.docs.swap_remove(0)
        };

        Ok(RawCommandResponse::new(self.address.clone(), reply))
    }

    /// Sends an OP_QUERY and reads the matching OP_REPLY.
    pub(crate) async fn query(&mut self, query: &Query) -> Result<Reply> {
        let (request_id, bytes) = query.encode()?;
        self.send(&bytes).await?;
        self.read_reply_to(request_id).await
    }

    /// Sends an OP_GETMORE and reads the matching OP_REPLY.
    pub(crate) async fn get_more(&mut self, get_more: &GetMore) -> Result<Reply> {
        let (request_id, bytes) = get_more.encode()?;
        self.send(&bytes).await?;
        self.read_reply_to(request_id).await
    }

    /// Reads the next OP_REPLY of an exhaust cursor. The server streams these without further
    /// requests, so the response id is not checked.
    pub(crate) async fn receive_exhaust_reply(&mut self) -> Result<Reply> {
        match self.read_message().await? {
            Response::Reply(reply) => Ok(reply),
            Response::Message(_) => Err(Error::invalid_response(
                "received OP_MSG while reading an exhaust cursor",
            )),
        }
    }

    /// Sends an OP_KILL_CURSORS. The server does not reply.
    pub(crate) async fn kill_cursors(&mut self, cursor_ids: Vec<i64>) -> Result<()> {
        let bytes = KillCursors { cursor_ids }.encode()?;
        self.send(&bytes).await
    }

    async fn read_reply_to(&mut self, request_id: i32) -> Result<Reply> {
        match self.read_response_to(request_id).await? {
            Response::Reply(reply) => Ok(reply),
            Response::Message(_) => Err(Error::invalid_response(
                "received OP_MSG in response to a legacy opcode",
            )),
        }
    }

    /// Runs a handshake on this connection and records the resulting stream description.
    /// Returns the reply together with the round trip time.
    pub(crate) async fn handshake(
        &mut self,
        command: Command,
    ) -> Result<(RawCommandResponse, Duration)> {
        let start = Instant::now();
        let response = self.send_command(command).await?.validate()?;
        Ok((response, start.elapsed()))
    }
}
