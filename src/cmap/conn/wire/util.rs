use std::sync::atomic::{AtomicI32, Ordering};

use crate::{
    bson::Document,
    error::{Error, Result},
};

static REQUEST_ID: AtomicI32 = AtomicI32::new(0);

/// Obtain a new, unique request ID.
pub(crate) fn next_request_id() -> i32 {
    REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// Serializes `string` to bytes and appends them to `out` with a null terminator.
pub(super) fn write_cstring(out: &mut Vec<u8>, string: &str) {
    out.extend_from_slice(string.as_bytes());
    out.push(0);
}

pub(super) fn write_document(out: &mut Vec<u8>, document: &Document) -> Result<()> {
    document.to_writer(out)?;
    Ok(())
}

/// Little-endian reader over an in-memory message body.
pub(super) struct SliceReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> SliceReader<'a> {
    pub(super) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    pub(super) fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::invalid_response(format!(
                "expected {} more bytes in message but only {} remain",
                n,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.position..self.position + n];
        self.position += n;
        Ok(slice)
    }

    pub(super) fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(super) fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(i32::from_le_bytes(buf))
    }

    pub(super) fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    pub(super) fn read_i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(buf))
    }

    pub(super) fn read_cstring(&mut self) -> Result<String> {
        let rest = &self.bytes[self.position..];
        let end = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| Error::invalid_response("unterminated string in message"))?;
        let s = String::from_utf8(rest[..end].to_vec())
            .map_err(|e| Error::invalid_response(e.to_string()))?;
        self.position += end + 1;
        Ok(s)
    }

    /// Reads one length-prefixed BSON document.
    pub(super) fn read_document(&mut self) -> Result<Document> {
        let rest = &self.bytes[self.position..];
        if rest.len() < 4 {
            return Err(Error::invalid_response("truncated document in message"));
        }
        let len = i32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
        if len < 5 || len as usize > rest.len() {
            return Err(Error::invalid_response(format!(
                "invalid document length {} in message",
                len
            )));
        }
        let mut bytes = self.take(len as usize)?;
        Ok(Document::from_reader(&mut bytes)?)
    }
}
