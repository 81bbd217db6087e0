//! Contains the functionality for change streams.
pub mod options;
#[cfg(test)]
mod test;

use self::options::ChangeStreamOptions;
use crate::{
    bson::{doc, Bson, Document, Timestamp},
    coll::Namespace,
    cursor::{Cursor, CursorOptions},
    error::{Error, ErrorKind, Result},
    trace::CURSOR_TRACING_EVENT_TARGET,
    Client,
};

/// The first wire version whose aggregate replies carry an `operationTime` a change stream can
/// restart from.
const OPERATION_TIME_WIRE_VERSION: i32 = 7;

/// What a change stream watches.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChangeStreamTarget {
    /// Every database in the deployment.
    Cluster,

    /// Every collection in the named database.
    Database(String),

    /// One collection.
    Collection(Namespace),
}

impl ChangeStreamTarget {
    fn db(&self) -> &str {
        match self {
            ChangeStreamTarget::Cluster => "admin",
            ChangeStreamTarget::Database(db) => db,
            ChangeStreamTarget::Collection(ns) => &ns.db,
        }
    }

    fn namespace(&self) -> Namespace {
        match self {
            ChangeStreamTarget::Collection(ns) => ns.clone(),
            other => Namespace::command(other.db()),
        }
    }

    fn aggregate_target(&self) -> Bson {
        match self {
            ChangeStreamTarget::Collection(ns) => Bson::String(ns.coll.clone()),
            _ => Bson::Int32(1),
        }
    }
}

/// A `ChangeStream` streams the ongoing changes of its associated collection, database or
/// deployment. `ChangeStream` instances are created by the `watch` methods on
/// [`Client`](crate::Client), [`Database`](crate::Database) and
/// [`Collection`](crate::Collection).
///
/// The stream remembers the `_id` of the last change it returned as its resume token. When a
/// getMore fails with a network error or a "not master"/"node is recovering" error, the stream
/// kills its cursor and re-runs the aggregation once, starting after that token. A second
/// failure within the same call is returned to the caller.
///
/// ```rust,no_run
/// # use mongoc::{error::Result, Client};
/// # async fn run() -> Result<()> {
/// # let client = Client::with_uri_str("mongodb://localhost:27017/?replicaSet=rs0")?;
/// let mut stream = client.database("db").collection("coll").watch(None, None);
/// loop {
///     match stream.try_next().await? {
///         Some(change) => println!("{}", change),
///         None => tokio::time::sleep(std::time::Duration::from_millis(100)).await,
///     }
/// }
/// # }
/// ```
#[derive(Debug)]
pub struct ChangeStream {
    client: Client,
    target: ChangeStreamTarget,
    pipeline: Vec<Document>,
    options: ChangeStreamOptions,
    cursor: Cursor,

    /// Whether the current cursor's aggregate reply has been examined for an operation time.
    cursor_primed: bool,

    resume_token: Option<Document>,
    operation_time: Option<Timestamp>,
    current: Option<Document>,
    error: Option<Error>,
}

impl ChangeStream {
    pub(crate) fn new(
        client: Client,
        target: ChangeStreamTarget,
        pipeline: Vec<Document>,
        options: ChangeStreamOptions,
    ) -> Self {
        let resume_token = options.resume_after.clone();
        let operation_time = options.start_at_operation_time;
        let cursor = make_cursor(
            &client,
            &target,
            &pipeline,
            &options,
            resume_token.as_ref(),
            operation_time,
        );
        Self {
            client,
            target,
            pipeline,
            options,
            cursor,
            cursor_primed: false,
            resume_token,
            operation_time,
            current: None,
            error: None,
        }
    }

    /// The resume token of the most recently returned change, or the one the stream was created
    /// with.
    pub fn resume_token(&self) -> Option<&Document> {
        self.resume_token.as_ref()
    }

    /// The error that ended the stream, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Returns the next change, or `None` when no change is available yet or the stream failed.
    pub async fn next(&mut self) -> Option<&Document> {
        if self.advance().await {
            self.current.as_ref()
        } else {
            None
        }
    }

    /// Returns the next change, `Ok(None)` when no change is available yet, or the error that
    /// ended the stream.
    pub async fn try_next(&mut self) -> Result<Option<Document>> {
        if self.advance().await {
            return Ok(self.current.clone());
        }
        match self.error {
            Some(ref error) => Err(error.clone()),
            None => Ok(None),
        }
    }

    async fn advance(&mut self) -> bool {
        self.current = None;
        if self.error.is_some() {
            return false;
        }

        let mut resumed = false;
        loop {
            let next = self.cursor.next().await.cloned();
            self.record_operation_time();

            if let Some(change) = next {
                return match change.get("_id") {
                    Some(Bson::Document(token)) => {
                        self.resume_token = Some(token.clone());
                        self.operation_time = None;
                        self.current = Some(change);
                        true
                    }
                    _ => {
                        self.error = Some(ErrorKind::MissingResumeToken.into());
                        false
                    }
                };
            }

            let error = match self.cursor.error() {
                Some(error) => error.clone(),
                None => return false,
            };
            if resumed || !error.is_resumable() {
                self.error = Some(error);
                return false;
            }
            resumed = true;
            self.resume(&error).await;
        }
    }

    /// Remembers the aggregate reply's operation time when there is no other starting point, so
    /// a resume before the first change does not miss events.
    fn record_operation_time(&mut self) {
        if self.cursor_primed {
            return;
        }
        let reply = match self.cursor.first_reply() {
            Some(reply) => reply,
            None => return,
        };
        self.cursor_primed = true;

        if self.resume_token.is_some()
            || self.operation_time.is_some()
            || self.cursor.max_wire_version().unwrap_or(0) < OPERATION_TIME_WIRE_VERSION
        {
            return;
        }
        if let Ok(operation_time) = reply.get_timestamp("operationTime") {
            self.operation_time = Some(operation_time);
        }
    }

    async fn resume(&mut self, error: &Error) {
        tracing::debug!(
            target: CURSOR_TRACING_EVENT_TARGET,
            error = %error,
            cursorId = self.cursor.id(),
            hasResumeToken = self.resume_token.is_some(),
            "Resuming change stream"
        );

        self.cursor.kill().await;
        self.cursor = make_cursor(
            &self.client,
            &self.target,
            &self.pipeline,
            &self.options,
            self.resume_token.as_ref(),
            self.operation_time,
        );
        self.cursor_primed = false;
    }
}

/// Builds the aggregate that opens a change stream, starting after `resume_token` if there is
/// one, else at `operation_time`.
fn aggregate_command(
    target: &ChangeStreamTarget,
    pipeline: &[Document],
    options: &ChangeStreamOptions,
    resume_token: Option<&Document>,
    operation_time: Option<Timestamp>,
) -> Document {
    let mut stage = Document::new();
    if let Some(ref full_document) = options.full_document {
        stage.insert("fullDocument", full_document.as_str());
    }
    if let Some(token) = resume_token {
        stage.insert("resumeAfter", token.clone());
    } else if let Some(operation_time) = operation_time {
        stage.insert("startAtOperationTime", operation_time);
    }
    if *target == ChangeStreamTarget::Cluster {
        stage.insert("allChangesForCluster", true);
    }

    let mut full_pipeline = vec![Bson::Document(doc! { "$changeStream": stage })];
    full_pipeline.extend(pipeline.iter().cloned().map(Bson::Document));

    let mut cursor = Document::new();
    if let Some(batch_size) = options.batch_size {
        cursor.insert("batchSize", i32::try_from(batch_size).unwrap_or(i32::MAX));
    }

    doc! {
        "aggregate": target.aggregate_target(),
        "pipeline": full_pipeline,
        "cursor": cursor,
    }
}

fn make_cursor(
    client: &Client,
    target: &ChangeStreamTarget,
    pipeline: &[Document],
    options: &ChangeStreamOptions,
    resume_token: Option<&Document>,
    operation_time: Option<Timestamp>,
) -> Cursor {
    let cursor_options = CursorOptions {
        batch_size: options.batch_size,
        tailable: true,
        await_data: true,
        max_await_time: options.max_await_time,
        ..Default::default()
    };
    Cursor::command(
        client.clone(),
        target.namespace(),
        aggregate_command(target, pipeline, options, resume_token, operation_time),
        cursor_options,
        options.read_preference.clone(),
    )
}
