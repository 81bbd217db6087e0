use bitflags::bitflags;

use super::{
    header::{Header, OpCode},
    next_request_id,
    util::{write_cstring, write_document, SliceReader},
};
use crate::{
    bson::{Array, Document},
    error::{Error, Result},
};

bitflags! {
    /// The bitwise flags for an OP_QUERY.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct QueryFlags: u32 {
        const TAILABLE_CURSOR   = 0b_0000_0010;
        const SECONDARY_OK      = 0b_0000_0100;
        const NO_CURSOR_TIMEOUT = 0b_0001_0000;
        const AWAIT_DATA        = 0b_0010_0000;
        const EXHAUST           = 0b_0100_0000;
        const PARTIAL           = 0b_1000_0000;
    }
}

bitflags! {
    /// The bitwise flags for an OP_MSG.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct MessageFlags: u32 {
        const CHECKSUM_PRESENT = 0b_0000_0000_0000_0000_0000_0000_0000_0001;
        const MORE_TO_COME     = 0b_0000_0000_0000_0000_0000_0000_0000_0010;
        const EXHAUST_ALLOWED  = 0b_0000_0000_0000_0001_0000_0000_0000_0000;
    }
}

fn finish(
    op_code: OpCode,
    request_id: i32,
    response_to: i32,
    body: Vec<u8>,
) -> Result<Vec<u8>> {
    let length = i32::try_from(Header::LENGTH + body.len())
        .map_err(|_| Error::invalid_argument("message exceeds the maximum encodable size"))?;
    let header = Header {
        length,
        request_id,
        response_to,
        op_code,
    };
    let mut out = Vec::with_capacity(length as usize);
    header.write_to(&mut out);
    out.extend(body);
    Ok(out)
}

/// A legacy OP_QUERY, used for commands against servers without OP_MSG support and for
/// find operations on servers that predate the find command.
#[derive(Debug, Clone)]
pub(crate) struct Query {
    pub(crate) flags: QueryFlags,
    pub(crate) full_collection_name: String,
    pub(crate) number_to_skip: i32,
    pub(crate) number_to_return: i32,
    pub(crate) query: Document,
    pub(crate) return_fields_selector: Option<Document>,
}

impl Query {
    /// Serializes the query into a complete message, returning the bytes and the request id.
    pub(crate) fn encode(&self) -> Result<(i32, Vec<u8>)> {
        let request_id = next_request_id();
        let mut body = Vec::new();
        body.extend_from_slice(&self.flags.bits().to_le_bytes());
        write_cstring(&mut body, &self.full_collection_name);
        body.extend_from_slice(&self.number_to_skip.to_le_bytes());
        body.extend_from_slice(&self.number_to_return.to_le_bytes());
        write_document(&mut body, &self.query)?;
        if let Some(ref fields) = self.return_fields_selector {
            write_document(&mut body, fields)?;
        }
        Ok((request_id, finish(OpCode::Query, request_id, 0, body)?))
    }

    /// Decodes an OP_QUERY body. Only mock servers in tests read queries.
    #[cfg(test)]
    pub(crate) fn decode(body: &[u8]) -> Result<Self> {
        let mut reader = SliceReader::new(body);
        let flags = QueryFlags::from_bits_truncate(reader.read_u32()?);
        let full_collection_name = reader.read_cstring()?;
        let number_to_skip = reader.read_i32()?;
        let number_to_return = reader.read_i32()?;
        let query = reader.read_document()?;
        let return_fields_selector = if reader.remaining() > 0 {
            Some(reader.read_document()?)
        } else {
            None
        };
        Ok(Self {
            flags,
            full_collection_name,
            number_to_skip,
            number_to_return,
            query,
            return_fields_selector,
        })
    }
}

/// A legacy OP_GETMORE.
#[derive(Debug, Clone)]
pub(crate) struct GetMore {
    pub(crate) full_collection_name: String,
    pub(crate) number_to_return: i32,
    pub(crate) cursor_id: i64,
}

impl GetMore {
    pub(crate) fn encode(&self) -> Result<(i32, Vec<u8>)> {
        let request_id = next_request_id();
        let mut body = Vec::new();
        // reserved
        body.extend_from_slice(&0i32.to_le_bytes());
        write_cstring(&mut body, &self.full_collection_name);
        body.extend_from_slice(&self.number_to_return.to_le_bytes());
        body.extend_from_slice(&self.cursor_id.to_le_bytes());
        Ok((request_id, finish(OpCode::GetMore, request_id, 0, body)?))
    }

    #[cfg(test)]
    pub(crate) fn decode(body: &[u8]) -> Result<Self> {
        let mut reader = SliceReader::new(body);
        let _reserved = reader.read_i32()?;
        let full_collection_name = reader.read_cstring()?;
        let number_to_return = reader.read_i32()?;
        let cursor_id = reader.read_i64()?;
        Ok(Self {
            full_collection_name,
            number_to_return,
            cursor_id,
        })
    }
}

/// A legacy OP_KILL_CURSORS. The server sends no reply.
#[derive(Debug, Clone)]
pub(crate) struct KillCursors {
    pub(crate) cursor_ids: Vec<i64>,
}

impl KillCursors {
    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        body.extend_from_slice(&0i32.to_le_bytes());
        let count = i32::try_from(self.cursor_ids.len())
            .map_err(|_| Error::invalid_argument("too many cursor ids"))?;
        body.extend_from_slice(&count.to_le_bytes());
        for id in &self.cursor_ids {
            body.extend_from_slice(&id.to_le_bytes());
        }
        finish(OpCode::KillCursors, next_request_id(), 0, body)
    }
}

/// Represents an OP_MSG wire protocol operation.
#[derive(Debug, Clone)]
pub(crate) struct Message {
    /// The payload type 0 section. Any payload type 1 sections of a decoded reply are folded
    /// into this document as arrays keyed by their identifier.
    pub(crate) document_payload: Document,
    pub(crate) response_to: i32,
    pub(crate) flags: MessageFlags,
    pub(crate) checksum: Option<u32>,
}

impl Message {
    pub(crate) fn new(document_payload: Document, flags: MessageFlags) -> Self {
        Self {
            document_payload,
            response_to: 0,
            flags,
            checksum: None,
        }
    }

    pub(crate) fn encode(&self) -> Result<(i32, Vec<u8>)> {
        let request_id = next_request_id();
        let mut body = Vec::new();
        body.extend_from_slice(&self.flags.bits().to_le_bytes());
        // Payload type 0
        body.push(0);
        write_document(&mut body, &self.document_payload)?;
        if let Some(checksum) = self.checksum {
            body.extend_from_slice(&checksum.to_le_bytes());
        }
        Ok((request_id, finish(OpCode::Message, request_id, self.response_to, body)?))
    }

    pub(crate) fn decode(header: &Header, body: &[u8]) -> Result<Self> {
        let mut reader = SliceReader::new(body);
        let flags = MessageFlags::from_bits_truncate(reader.read_u32()?);

        let mut document_payload: Option<Document> = None;
        let mut sequences: Vec<(String, Array)> = Vec::new();
        let trailer = if flags.contains(MessageFlags::CHECKSUM_PRESENT) {
            4
        } else {
            0
        };
        while reader.remaining() > trailer {
            match reader.read_u8()? {
                0 => {
                    if document_payload.is_some() {
                        return Err(Error::invalid_response(
                            "an OP_MSG response must contain exactly one payload type 0 section",
                        ));
                    }
                    document_payload = Some(reader.read_document()?);
                }
                1 => {
                    let size = reader.read_i32()?;
                    let before = reader.remaining();
                    let identifier = reader.read_cstring()?;
                    let mut documents = Array::new();
                    let section_len = usize::try_from(size - 4)
                        .map_err(|_| Error::invalid_response("negative section size"))?;
                    while before - reader.remaining() < section_len {
                        documents.push(reader.read_document()?.into());
                    }
                    sequences.push((identifier, documents));
                }
                other => {
                    return Err(Error::invalid_response(format!(
                        "invalid OP_MSG payload type {}",
                        other
                    )))
                }
            }
        }

        let mut checksum = None;
        if reader.remaining() == 4 && flags.contains(MessageFlags::CHECKSUM_PRESENT) {
            checksum = Some(reader.read_u32()?);
        } else if reader.remaining() != 0 {
            return Err(Error::invalid_response(format!(
                "The server indicated that the reply would be {} bytes long, but {} bytes were \
                 left over",
                header.length,
                reader.remaining()
            )));
        }

        let mut document_payload = document_payload.ok_or_else(|| {
            Error::invalid_response(
                "an OP_MSG response must contain exactly one payload type 0 section",
            )
        })?;
        for (identifier, documents) in sequences {
            document_payload.insert(identifier, documents);
        }

        Ok(Self {
            document_payload,
            response_to: header.response_to,
            flags,
            checksum,
        })
    }
}
