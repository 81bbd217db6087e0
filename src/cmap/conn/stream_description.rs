use std::time::Duration;

use crate::{client::options::ServerAddress, hello::HelloReply, sdam::ServerType};

/// Contains information about a given server in a format digestible by a connection.
#[derive(Debug, Default, Clone)]
pub(crate) struct StreamDescription {
    /// The address of the server.
    pub(crate) server_address: ServerAddress,

    /// The type of the server when the handshake occurred.
    pub(crate) initial_server_type: ServerType,

    /// The maximum wire version that the server understands.
    pub(crate) max_wire_version: Option<i32>,

    /// The minimum wire version that the server understands.
    pub(crate) min_wire_version: Option<i32>,

    /// How long sessions started on this server will stay alive without
    /// executing an operation before the server kills them.
    pub(crate) logical_session_timeout: Option<Duration>,

    /// Whether the server associated with this connection supports the `hello` command.
    pub(crate) hello_ok: bool,

    /// The maximum permitted size of a BSON wire protocol message.
    pub(crate) max_message_size_bytes: i32,
}

impl StreamDescription {
    /// Constructs a new StreamDescription from a `HelloReply`.
    pub(crate) fn from_hello_reply(address: &ServerAddress, reply: &HelloReply) -> Self {
        Self {
            server_address: address.clone(),
            initial_server_type: reply.command_response.server_type(),
            max_wire_version: reply.command_response.max_wire_version,
            min_wire_version: reply.command_response.min_wire_version,
            logical_session_timeout: reply
                .command_response
                .logical_session_timeout_minutes
                .map(|mins| Duration::from_secs(mins as u64 * 60)),
            hello_ok: reply.command_response.hello_ok.unwrap_or(false),
            max_message_size_bytes: reply
                .command_response
                .max_message_size_bytes
                .unwrap_or(super::wire::DEFAULT_MAX_MESSAGE_SIZE_BYTES),
        }
    }

    /// Whether commands on this connection are sent as OP_MSG rather than OP_QUERY.
    pub(crate) fn supports_op_msg(&self) -> bool {
        self.max_wire_version.is_some_and(|v| v >= 6)
    }
}
