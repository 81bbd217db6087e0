use std::time::Duration;

use serde::Serialize;
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    bson::Document,
    selection_criteria::ReadPreference,
    serde_util::{
        serialize_duration_option_as_int_millis,
        serialize_u32_option_as_batch_size,
        serialize_u32_option_as_i32,
    },
};

/// Specifies the type of cursor to return from a find operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum CursorType {
    /// Default; close the cursor after the last document is received from the server.
    #[default]
    NonTailable,

    /// Do not close the cursor after the last document is received from the server. If more
    /// results become available later, the cursor will return them.
    Tailable,

    /// Similar to `Tailable`, except that the server waits up to
    /// [`max_await_time`](FindOptions::max_await_time) for more results before answering a
    /// getMore.
    TailableAwait,
}

impl CursorType {
    pub(crate) fn is_tailable(self) -> bool {
        !matches!(self, CursorType::NonTailable)
    }

    pub(crate) fn is_await_data(self) -> bool {
        matches!(self, CursorType::TailableAwait)
    }
}

/// Specifies the options to a [`Collection::find`](crate::Collection::find) operation.
///
/// The fields that serialize are sent as-is in a find command. Servers that predate the find
/// command receive the same options as OP_QUERY modifiers and flags.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct FindOptions {
    /// If true, partial results will be returned from a mongos rather than an error being
    /// returned if one or more shards is down.
    pub allow_partial_results: Option<bool>,

    /// The number of documents the server should return per batch, for the initial query and
    /// every getMore.
    #[serde(serialize_with = "serialize_u32_option_as_i32")]
    pub batch_size: Option<u32>,

    /// Tags the query with an arbitrary string to help trace the operation through the database
    /// profiler, currentOp and logs.
    pub comment: Option<String>,

    /// The type of cursor to return.
    #[serde(skip)]
    pub cursor_type: Option<CursorType>,

    /// Whether the server streams every batch without waiting for getMore requests. Exhaust
    /// cursors always use the legacy wire protocol and hold their connection until exhausted.
    #[serde(skip)]
    pub exhaust: Option<bool>,

    /// The index to use for the operation.
    pub hint: Option<Document>,

    /// The maximum number of documents to return.
    /// If a negative number is specified, the documents will be returned in a single batch limited
    /// in number by the positive value of the specified limit.
    #[serde(skip)]
    pub limit: Option<i64>,

    /// The maximum amount of time for the server to wait on new documents to satisfy a tailable
    /// await cursor. Ignored for other cursor types.
    #[serde(skip)]
    pub max_await_time: Option<Duration>,

    /// The maximum amount of time to allow the query to run.
    ///
    /// This options maps to the `maxTimeMS` MongoDB query option, so the duration will be sent
    /// across the wire as an integer number of milliseconds.
    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serialize_duration_option_as_int_millis"
    )]
    pub max_time: Option<Duration>,

    /// Whether the server should close the cursor after a period of inactivity.
    pub no_cursor_timeout: Option<bool>,

    /// Limits the fields of the document being returned.
    pub projection: Option<Document>,

    /// The read preference for this query. Defaults to the client's.
    #[serde(skip)]
    pub read_preference: Option<ReadPreference>,

    /// The number of documents to skip before returning.
    pub skip: Option<i64>,

    /// The order of the documents for the purposes of the operation.
    pub sort: Option<Document>,
}

impl FindOptions {
    pub(crate) fn cursor_type(&self) -> CursorType {
        self.cursor_type.unwrap_or_default()
    }

    pub(crate) fn exhaust(&self) -> bool {
        self.exhaust.unwrap_or(false)
    }
}

/// Specifies the options to an aggregate operation.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct AggregateOptions {
    /// Enables writing to temporary files.
    pub allow_disk_use: Option<bool>,

    /// The number of documents the server returns in the first batch. This only applies to the
    /// aggregate command itself; use [`Cursor::set_batch_size`](crate::Cursor::set_batch_size)
    /// to size later batches.
    #[serde(
        serialize_with = "serialize_u32_option_as_batch_size",
        rename(serialize = "cursor")
    )]
    pub batch_size: Option<u32>,

    /// Tags the query with an arbitrary string to help trace the operation through the database
    /// profiler, currentOp and logs.
    pub comment: Option<String>,

    /// The maximum amount of time to allow the query to run.
    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serialize_duration_option_as_int_millis"
    )]
    pub max_time: Option<Duration>,

    /// The read preference for this aggregation. Defaults to the client's.
    #[serde(skip)]
    pub read_preference: Option<ReadPreference>,
}
