use bitflags::bitflags;

use super::{header::Header, util::SliceReader};
use crate::{bson::Document, error::Result};

bitflags! {
    /// Represents the bitwise flags for an OP_REPLY.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct ResponseFlags: u32 {
        const CURSOR_NOT_FOUND   = 0b_0000_0000_0000_0000_0000_0000_0000_0001;
        const QUERY_FAILURE      = 0b_0000_0000_0000_0000_0000_0000_0000_0010;
        const SHARD_CONFIG_STALE = 0b_0000_0000_0000_0000_0000_0000_0000_0100;
        const AWAIT_CAPABLE      = 0b_0000_0000_0000_0000_0000_0000_0000_1000;
    }
}

/// Represents a wire protocol OP_REPLY operation.
#[derive(Debug, Clone)]
pub(crate) struct Reply {
    pub(crate) response_to: i32,
    pub(crate) response_flags: ResponseFlags,
    pub(crate) cursor_id: i64,
    pub(crate) starting_from: i32,
    pub(crate) number_returned: i32,
    pub(crate) docs: Vec<Document>,
}

impl Reply {
    pub(super) fn decode(header: &Header, body: &[u8]) -> Result<Self> {
        let mut reader = SliceReader::new(body);
        let response_flags = ResponseFlags::from_bits_truncate(reader.read_u32()?);
        let cursor_id = reader.read_i64()?;
        let starting_from = reader.read_i32()?;
        let number_returned = reader.read_i32()?;

        let mut docs = Vec::new();
        while reader.remaining() > 0 {
            docs.push(reader.read_document()?);
        }

        Ok(Self {
            response_to: header.response_to,
            response_flags,
            cursor_id,
            starting_from,
            number_returned,
            docs,
        })
    }

    /// Encodes an OP_REPLY. Only mock servers in tests produce replies.
    #[cfg(test)]
    pub(crate) fn encode(&self, request_id: i32) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.response_flags.bits().to_le_bytes());
        body.extend_from_slice(&self.cursor_id.to_le_bytes());
        body.extend_from_slice(&self.starting_from.to_le_bytes());
        body.extend_from_slice(&(self.docs.len() as i32).to_le_bytes());
        for doc in &self.docs {
            doc.to_writer(&mut body)?;
        }
        let header = Header {
            length: (Header::LENGTH + body.len()) as i32,
            request_id,
            response_to: self.response_to,
            op_code: super::OpCode::Reply,
        };
        let mut out = Vec::new();
        header.write_to(&mut out);
        out.extend(body);
        Ok(out)
    }
}
