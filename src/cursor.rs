mod array;
mod command;
mod common;
mod find;
mod legacy;
mod single_reply;
#[cfg(test)]
mod test;

use futures_core::Stream;

use self::{
    array::ArrayStrategy,
    command::CommandStrategy,
    common::{CursorCore, CursorState},
    find::{FindSpec, FindStrategy},
    single_reply::SingleReplyStrategy,
};
pub(crate) use self::common::CursorOptions;
use crate::{
    bson::Document,
    coll::{options::FindOptions, Namespace},
    error::{Error, Result},
    selection_criteria::ReadPreference,
    Client,
};

/// The ways a cursor can obtain its batches. The variant set is closed.
#[derive(Debug)]
enum Strategy {
    Command(CommandStrategy),
    Find(FindStrategy),
    SingleReply(SingleReplyStrategy),
    Array(ArrayStrategy),
}

impl Strategy {
    async fn prime(&mut self, core: &mut CursorCore) -> CursorState {
        match self {
            Strategy::Command(strategy) => strategy.prime(core).await,
            Strategy::Find(strategy) => strategy.prime(core).await,
            Strategy::SingleReply(strategy) => strategy.prime(core).await,
            Strategy::Array(strategy) => strategy.prime(core).await,
        }
    }

    async fn get_next_batch(&mut self, core: &mut CursorCore) -> CursorState {
        match self {
            Strategy::Command(strategy) => strategy.get_next_batch(core).await,
            Strategy::Find(strategy) => strategy.get_next_batch(core).await,
            Strategy::SingleReply(_) | Strategy::Array(_) => CursorState::Done,
        }
    }

    fn fresh(&self) -> Self {
        match self {
            Strategy::Command(strategy) => Strategy::Command(strategy.fresh()),
            Strategy::Find(strategy) => Strategy::Find(strategy.fresh()),
            Strategy::SingleReply(strategy) => Strategy::SingleReply(strategy.clone()),
            Strategy::Array(strategy) => Strategy::Array(strategy.clone()),
        }
    }
}

/// A `Cursor` streams the result of a query. No I/O happens when a cursor is created: the
/// initiating command is sent on the first call to [`Cursor::next`], and later batches are
/// fetched as the local batch runs out. Because of this batching, additional network I/O may
/// occur on any given call to `next`.
///
/// Errors do not interrupt iteration with a `Result`: `next` returns `None` and the error is
/// kept on the cursor, where [`Cursor::error`] reports it. [`Cursor::try_next`] folds the two
/// into a single `Result` for callers that prefer `?`.
///
/// ```rust,no_run
/// # use mongoc::{bson::doc, error::Result, Client};
/// # async fn run() -> Result<()> {
/// # let client = Client::with_uri_str("mongodb://localhost:27017")?;
/// let mut cursor = client.database("test").collection("items").find(doc! { "x": 1 }, None);
/// while let Some(doc) = cursor.next().await {
///     println!("{}", doc);
/// }
/// if let Some(error) = cursor.error() {
///     eprintln!("iteration failed: {}", error);
/// }
/// # Ok(())
/// # }
/// ```
///
/// A tailable cursor may return `None` while the server still holds it open; check
/// [`Cursor::is_alive`] and call `next` again later.
///
/// Dropping a cursor whose server-side counterpart is still open asks the server to kill it
/// in the background. Failures of that request are ignored.
#[derive(Debug)]
pub struct Cursor {
    core: CursorCore,
    strategy: Strategy,
    state: CursorState,
}

impl Cursor {
    fn new(core: CursorCore, strategy: Strategy) -> Self {
        Self {
            core,
            strategy,
            state: CursorState::Uninitialized,
        }
    }

    pub(crate) fn find(
        client: Client,
        ns: Namespace,
        filter: Document,
        options: FindOptions,
    ) -> Self {
        let read_preference = options.read_preference.clone();
        let spec = FindSpec { filter, options };
        let core = CursorCore::new(client, ns, spec.cursor_options(), read_preference);
        Self::new(core, Strategy::Find(FindStrategy::new(spec)))
    }

    /// A cursor over a command that replies with `{cursor: {id, ns, firstBatch}}`.
    pub(crate) fn command(
        client: Client,
        ns: Namespace,
        command: Document,
        options: CursorOptions,
        read_preference: Option<ReadPreference>,
    ) -> Self {
        let strategy = CommandStrategy::new(ns.db.clone(), command);
        let core = CursorCore::new(client, ns, options, read_preference);
        Self::new(core, Strategy::Command(strategy))
    }

    pub(crate) fn single_reply(
        client: Client,
        db: &str,
        command: Document,
        read_preference: Option<ReadPreference>,
    ) -> Self {
        let core = CursorCore::new(
            client,
            Namespace::command(db),
            CursorOptions::default(),
            read_preference,
        );
        Self::new(
            core,
            Strategy::SingleReply(SingleReplyStrategy::new(db, command)),
        )
    }

    pub(crate) fn array(
        client: Client,
        db: &str,
        command: Document,
        field: &str,
        read_preference: Option<ReadPreference>,
    ) -> Self {
        let core = CursorCore::new(
            client,
            Namespace::command(db),
            CursorOptions::default(),
            read_preference,
        );
        Self::new(core, Strategy::Array(ArrayStrategy::new(db, command, field)))
    }

    async fn transition(&mut self) -> CursorState {
        let state = match self.state {
            CursorState::Uninitialized => self.strategy.prime(&mut self.core).await,
            CursorState::InBatch => self.core.pop_from_batch(),
            CursorState::EndOfBatch => self.strategy.get_next_batch(&mut self.core).await,
            CursorState::Done => CursorState::Done,
        };
        if self.core.error.is_some() {
            CursorState::Done
        } else {
            state
        }
    }

    /// Moves to the next document. At most one getMore is sent per call, so a cursor that keeps
    /// receiving empty batches returns `false` while staying alive.
    async fn advance(&mut self) -> bool {
        self.core.current = None;
        if self.core.error.is_some() {
            return false;
        }
        if self.state == CursorState::Done {
            self.core.error = Some(Error::invalid_cursor(
                "Cannot advance a completed or failed cursor.",
            ));
            return false;
        }

        let mut attempted_refresh = false;
        while self.state != CursorState::Done {
            if self.state == CursorState::EndOfBatch {
                if attempted_refresh {
                    return false;
                }
                attempted_refresh = true;
            }
            self.state = self.transition().await;
            if self.core.current.is_some() {
                return true;
            }
        }
        false
    }

    /// Advances the cursor and returns the next document, or `None` when the cursor is exhausted,
    /// failed, or (for tailable cursors) has nothing new yet. The returned reference is
    /// invalidated by the next call.
    pub async fn next(&mut self) -> Option<&Document> {
        if self.advance().await {
            self.core.current.as_ref()
        } else {
            None
        }
    }

    /// Advances the cursor, returning the next document or the error that ended iteration.
    pub async fn try_next(&mut self) -> Result<Option<Document>> {
        if self.advance().await {
            return Ok(self.core.current.clone());
        }
        match self.core.error {
            Some(ref error) => Err(error.clone()),
            None => Ok(None),
        }
    }

    /// The document returned by the last successful call to [`Cursor::next`].
    pub fn current(&self) -> Option<&Document> {
        self.core.current.as_ref()
    }

    /// The error that ended iteration, if any.
    pub fn error(&self) -> Option<&Error> {
        self.core.error.as_ref()
    }

    /// The server-assigned cursor id, or 0 once the server has closed the cursor.
    pub fn id(&self) -> i64 {
        self.core.cursor_id
    }

    /// Whether further calls to [`Cursor::next`] may return documents.
    pub fn is_alive(&self) -> bool {
        self.core.error.is_none() && self.state != CursorState::Done
    }

    /// The id of the server this cursor is pinned to, once one has been selected.
    pub fn server_id(&self) -> Option<u32> {
        self.core.server.as_ref().map(|server| server.id)
    }

    /// The namespace the cursor iterates. Command replies may replace the one it was created
    /// with.
    pub fn namespace(&self) -> &Namespace {
        &self.core.ns
    }

    /// The batch size requested by getMore.
    pub fn batch_size(&self) -> Option<u32> {
        self.core.options.batch_size
    }

    /// Sets the batch size requested by later getMores. The initiating command is unaffected.
    pub fn set_batch_size(&mut self, batch_size: u32) {
        self.core.options.batch_size = Some(batch_size);
    }

    /// Returns a new cursor that re-runs the same query from the start.
    pub fn clone_fresh(&self) -> Cursor {
        Self::new(self.core.fresh(), self.strategy.fresh())
    }

    /// Converts the cursor into a [`Stream`] of documents. The stream ends after the first error
    /// and, for tailable cursors, as soon as a getMore returns no documents.
    pub fn into_stream(self) -> impl Stream<Item = Result<Document>> + Send {
        futures_util::stream::unfold(Some(self), |cursor| async move {
            let mut cursor = cursor?;
            match cursor.try_next().await {
                Ok(Some(document)) => Some((Ok(document), Some(cursor))),
                Ok(None) => None,
                Err(error) => Some((Err(error), None)),
            }
        })
    }

    /// The reply to the initiating command, once the cursor has been primed.
    pub(crate) fn first_reply(&self) -> Option<&Document> {
        self.core.first_reply.as_ref()
    }

    /// The max wire version of the server the cursor is pinned to.
    pub(crate) fn max_wire_version(&self) -> Option<i32> {
        self.core
            .server
            .as_ref()
            .and_then(|server| server.max_wire_version())
    }

    /// Kills the server-side cursor and waits for the outcome, ignoring failures. The cursor is
    /// done afterwards.
    pub(crate) async fn kill(&mut self) {
        if self.core.cursor_id != 0 && self.core.exhaust_connection.take().is_none() {
            if let Some(server_id) = self.server_id() {
                let _ = self
                    .core
                    .client
                    .kill_cursor_now(server_id, self.core.cursor_id, &self.core.ns)
                    .await;
            }
        }
        self.core.cursor_id = 0;
        self.state = CursorState::Done;
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if self.state != CursorState::Done {
            self.core.abandon();
        }
    }
}
