mod buffer;
mod header;
mod message;
mod reply;
mod util;

#[cfg(test)]
mod test;

pub(crate) use self::{
    buffer::WireBuffer,
    header::{Header, OpCode},
    message::{GetMore, KillCursors, Message, MessageFlags, Query, QueryFlags},
    reply::{Reply, ResponseFlags},
    util::next_request_id,
};

use crate::error::{Error, Result};

/// The largest message the server is allowed to send unless it advertises otherwise.
pub(crate) const DEFAULT_MAX_MESSAGE_SIZE_BYTES: i32 = 48 * 1024 * 1024;

/// A decoded server response, which is either a legacy OP_REPLY or an OP_MSG.
#[derive(Debug)]
pub(crate) enum Response {
    Reply(Reply),
    Message(Message),
}

impl Response {
    /// Decodes a complete message (header included) from `bytes`.
    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        let header = Header::parse(bytes)?;
        let body = &bytes[Header::LENGTH..];
        match header.op_code {
            OpCode::Reply => Ok(Response::Reply(Reply::decode(&header, body)?)),
            OpCode::Message => Ok(Response::Message(Message::decode(&header, body)?)),
            other => Err(Error::invalid_response(format!(
                "Invalid op code, expected {} or {} and got {}",
                OpCode::Reply as i32,
                OpCode::Message as i32,
                other as i32
            ))),
        }
    }

    pub(crate) fn response_to(&self) -> i32 {
        match self {
            Response::Reply(reply) => reply.response_to,
            Response::Message(message) => message.response_to,
        }
    }
}
