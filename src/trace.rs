use crate::{
    bson::{oid::ObjectId, Bson, Document},
    error::Error,
    sdam::TopologyDescription,
    selection_criteria::ReadPreference,
};

pub(crate) mod command;
pub(crate) mod server_selection;
pub(crate) mod topology;

pub(crate) const COMMAND_TRACING_EVENT_TARGET: &str = "mongoc::command";
pub(crate) const CURSOR_TRACING_EVENT_TARGET: &str = "mongoc::cursor";
pub(crate) const SERVER_SELECTION_TRACING_EVENT_TARGET: &str = "mongoc::server_selection";
pub(crate) const TOPOLOGY_TRACING_EVENT_TARGET: &str = "mongoc::topology";

pub(crate) const DEFAULT_MAX_DOCUMENT_LENGTH_BYTES: usize = 1000;

pub(crate) trait TracingRepresentation {
    type Representation;

    fn tracing_representation(&self) -> Self::Representation;
}

impl TracingRepresentation for ObjectId {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        self.to_hex()
    }
}

impl TracingRepresentation for Document {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        serialize_command_or_reply(self, DEFAULT_MAX_DOCUMENT_LENGTH_BYTES)
    }
}

impl TracingRepresentation for Error {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        self.to_string()
    }
}

impl TracingRepresentation for ReadPreference {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        self.to_string()
    }
}

impl TracingRepresentation for TopologyDescription {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        self.to_string()
    }
}

/// Renders a document as relaxed extended JSON, truncated to at most `max_length_bytes` on a
/// character boundary.
pub(crate) fn serialize_command_or_reply(doc: &Document, max_length_bytes: usize) -> String {
    let mut ext_json = Bson::Document(doc.clone())
        .into_relaxed_extjson()
        .to_string();
    truncate_on_char_boundary(&mut ext_json, max_length_bytes);
    ext_json
}

pub(crate) fn truncate_on_char_boundary(s: &mut String, new_len: usize) {
    let original_len = s.len();
    if original_len > new_len {
        let mut truncate_index = new_len;
        while !s.is_char_boundary(truncate_index) {
            truncate_index -= 1;
        }
        s.truncate(truncate_index);
        s.push_str("...");
    }
}

#[cfg(test)]
mod test {
    use super::truncate_on_char_boundary;

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut s = "aé".to_string();
        truncate_on_char_boundary(&mut s, 2);
        assert_eq!(s, "a...");

        let mut s = "short".to_string();
        truncate_on_char_boundary(&mut s, 10);
        assert_eq!(s, "short");
    }
}
