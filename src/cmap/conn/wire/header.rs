use super::util::SliceReader;
use crate::error::{Error, Result};

/// The wire protocol op codes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OpCode {
    Reply = 1,
    Query = 2004,
    GetMore = 2005,
    KillCursors = 2007,
    Message = 2013,
}

impl OpCode {
    /// Attempt to infer the op code based on the numeric value.
    fn from_i32(i: i32) -> Result<Self> {
        match i {
            1 => Ok(OpCode::Reply),
            2004 => Ok(OpCode::Query),
            2005 => Ok(OpCode::GetMore),
            2007 => Ok(OpCode::KillCursors),
            2013 => Ok(OpCode::Message),
            other => Err(Error::invalid_response(format!(
                "Invalid wire protocol opcode: {}",
                other
            ))),
        }
    }
}

/// The header for any wire protocol message.
#[derive(Debug, Clone)]
pub(crate) struct Header {
    pub(crate) length: i32,
    pub(crate) request_id: i32,
    pub(crate) response_to: i32,
    pub(crate) op_code: OpCode,
}

impl Header {
    pub(crate) const LENGTH: usize = 4 * std::mem::size_of::<i32>();

    /// Serializes the Header and appends the bytes to `out`.
    pub(crate) fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.length.to_le_bytes());
        out.extend_from_slice(&self.request_id.to_le_bytes());
        out.extend_from_slice(&self.response_to.to_le_bytes());
        out.extend_from_slice(&(self.op_code as i32).to_le_bytes());
    }

    /// Reads the leading bytes of `bytes` and deserializes them into a header.
    pub(crate) fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = SliceReader::new(bytes);
        let length = reader.read_i32()?;
        let request_id = reader.read_i32()?;
        let response_to = reader.read_i32()?;
        let op_code = OpCode::from_i32(reader.read_i32()?)?;
        Ok(Self {
            length,
            request_id,
            response_to,
            op_code,
        })
    }
}
