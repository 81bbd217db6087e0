//! Contains options for ChangeStreams.
use std::time::Duration;

use serde::{Serialize, Serializer};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    bson::{Document, Timestamp},
    selection_criteria::ReadPreference,
};

/// These are the valid options that can be passed to the `watch` methods for creating a
/// [`ChangeStream`](crate::change_stream::ChangeStream).
///
/// The fields that serialize become the body of the `$changeStream` stage.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ChangeStreamOptions {
    /// Configures how the `fullDocument` field of update events is populated. By default, the
    /// field is empty for updates.
    pub full_document: Option<FullDocumentType>,

    /// The resume token of an event to start after. Takes precedence over
    /// `start_at_operation_time`.
    pub resume_after: Option<Document>,

    /// The change stream will only provide changes that occurred at or after the specified
    /// timestamp.
    pub start_at_operation_time: Option<Timestamp>,

    /// The maximum amount of time for the server to wait on new documents to satisfy a change
    /// stream getMore.
    #[serde(skip_serializing)]
    pub max_await_time: Option<Duration>,

    /// The number of documents to return per batch, for the aggregate and for every getMore.
    #[serde(skip_serializing)]
    pub batch_size: Option<u32>,

    /// The read preference used to select a server, including when resuming.
    #[serde(skip_serializing)]
    pub read_preference: Option<ReadPreference>,
}

/// Describes the modes for configuring the `fullDocument` field of change events.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum FullDocumentType {
    /// The server's default: no full document for updates.
    Default,

    /// The field will be populated with a copy of the entire document that was updated.
    UpdateLookup,

    /// User-defined other types for forward compatibility.
    Other(String),
}

impl FullDocumentType {
    pub(crate) fn as_str(&self) -> &str {
        match self {
            FullDocumentType::Default => "default",
            FullDocumentType::UpdateLookup => "updateLookup",
            FullDocumentType::Other(other) => other,
        }
    }
}

impl Serialize for FullDocumentType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
