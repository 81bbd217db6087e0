use std::{
    collections::VecDeque,
    sync::atomic::{AtomicI64, Ordering},
    time::Duration,
};

use crate::{
    bson::{doc, Bson, Document},
    cmap::{Command, Connection, Reply, ResponseFlags},
    coll::Namespace,
    error::{CommandError, Error, ErrorKind, Result},
    sdam::ServerDescription,
    selection_criteria::{OperationType, ReadPreference},
    serde_util::duration_as_millis_i64,
    Client,
};

static NEXT_OPERATION_ID: AtomicI64 = AtomicI64::new(1);

/// Where a cursor is in its lifecycle. The only transitions out of `Uninitialized` go through a
/// strategy's prime, and nothing leaves `Done`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum CursorState {
    #[default]
    Uninitialized,
    InBatch,
    EndOfBatch,
    Done,
}

/// Cursor-level settings that apply beyond the initiating command.
#[derive(Clone, Debug, Default)]
pub(crate) struct CursorOptions {
    /// Sizes getMore requests. Never copied from the initiating command.
    pub(crate) batch_size: Option<u32>,

    /// Zero means no limit; a negative limit asks for a single batch.
    pub(crate) limit: i64,

    pub(crate) skip: i64,
    pub(crate) tailable: bool,
    pub(crate) await_data: bool,
    pub(crate) max_await_time: Option<Duration>,
    pub(crate) no_cursor_timeout: bool,
    pub(crate) allow_partial_results: bool,
    pub(crate) exhaust: bool,
}

/// State shared by every strategy: the server the cursor is pinned to, the cursor id, the local
/// batch, and the error that ended iteration.
#[derive(Debug)]
pub(crate) struct CursorCore {
    pub(crate) client: Client,
    pub(crate) ns: Namespace,
    pub(crate) options: CursorOptions,
    pub(crate) read_preference: Option<ReadPreference>,
    pub(crate) operation_id: i64,

    pub(crate) server: Option<ServerDescription>,
    pub(crate) cursor_id: i64,
    pub(crate) batch: VecDeque<Document>,
    pub(crate) current: Option<Document>,
    pub(crate) error: Option<Error>,

    /// Documents handed out so far.
    pub(crate) count: i64,

    /// The reply to the initiating command, kept for callers that need more than the batch.
    pub(crate) first_reply: Option<Document>,

    /// The connection an exhaust cursor is streaming replies on.
    pub(crate) exhaust_connection: Option<Connection>,
}

impl CursorCore {
    pub(crate) fn new(
        client: Client,
        ns: Namespace,
        options: CursorOptions,
        read_preference: Option<ReadPreference>,
    ) -> Self {
        Self {
            client,
            ns,
            options,
            read_preference,
            operation_id: NEXT_OPERATION_ID.fetch_add(1, Ordering::SeqCst),
            server: None,
            cursor_id: 0,
            batch: VecDeque::new(),
            current: None,
            error: None,
            count: 0,
            first_reply: None,
            exhaust_connection: None,
        }
    }

    /// A core with the same configuration and none of the iteration state.
    pub(crate) fn fresh(&self) -> Self {
        Self::new(
            self.client.clone(),
            self.ns.clone(),
            self.options.clone(),
            self.read_preference.clone(),
        )
    }

    /// Returns the server this cursor is pinned to, selecting and pinning one first if needed.
    pub(crate) async fn select_server(&mut self) -> Result<ServerDescription> {
        if let Some(ref server) = self.server {
            return Ok(server.clone());
        }
        let server = self
            .client
            .select_server(OperationType::Read, self.read_preference.as_ref())
            .await?;
        self.server = Some(server.clone());
        Ok(server)
    }

    pub(crate) fn pinned_server(&self) -> Result<ServerDescription> {
        self.server
            .clone()
            .ok_or_else(|| Error::internal("cursor is not pinned to a server"))
    }

    /// Records `error` and ends iteration.
    pub(crate) fn fail(&mut self, error: Error) -> CursorState {
        self.error = Some(error);
        CursorState::Done
    }

    fn limit_reached(&self) -> bool {
        self.options.limit != 0 && self.count >= self.options.limit.abs()
    }

    /// Moves the next buffered document into `current`.
    pub(crate) fn pop_from_batch(&mut self) -> CursorState {
        if self.limit_reached() {
            self.abandon();
            return CursorState::Done;
        }
        match self.batch.pop_front() {
            Some(document) => {
                self.current = Some(document);
                self.count += 1;
                CursorState::InBatch
            }
            None if self.cursor_id == 0 => CursorState::Done,
            None => CursorState::EndOfBatch,
        }
    }

    /// Kills the server-side cursor without waiting, or closes the exhaust connection streaming
    /// it. Does nothing once the server has closed the cursor.
    pub(crate) fn abandon(&mut self) {
        if self.cursor_id == 0 {
            return;
        }
        if self.exhaust_connection.take().is_none() {
            if let Some(ref server) = self.server {
                self.client.kill_cursor(server.id, self.cursor_id, &self.ns);
            }
        }
        self.cursor_id = 0;
    }

    /// The numberToReturn of a legacy query or getMore, and the batch size of a getMore command.
    pub(crate) fn n_return(&self) -> i32 {
        let limit = self.options.limit;
        let batch_size = i64::from(self.options.batch_size.unwrap_or(0));

        let mut n_return = if limit < 0 {
            limit
        } else if limit == 0 {
            batch_size
        } else if batch_size == 0 {
            limit
        } else {
            limit.min(batch_size)
        };

        if limit > 0 && self.count > 0 {
            let remaining = limit - self.count;
            // A cursor that delivered its limit but is still open needs a non-zero request to
            // receive the final empty batch.
            if remaining <= 0 {
                return 1;
            }
            n_return = n_return.min(remaining);
        }

        n_return.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
    }

    /// Builds `{getMore, collection, batchSize?, maxTimeMS?}` for the current cursor.
    pub(crate) fn get_more_command(&self) -> Command {
        let mut body = doc! {
            "getMore": self.cursor_id,
            "collection": self.ns.coll.as_str(),
        };
        if self.options.batch_size.is_some_and(|size| size > 0) {
            body.insert("batchSize", i64::from(self.n_return()).abs());
        }
        if self.options.tailable && self.options.await_data {
            if let Some(max_await_time) = self.options.max_await_time {
                body.insert("maxTimeMS", duration_as_millis_i64(max_await_time));
            }
        }
        Command::new("getMore", &self.ns.db, body)
    }

    /// Loads the batch out of a `{cursor: {id, ns, <batch_field>: [...]}}` reply.
    pub(crate) fn read_cursor_document(
        &mut self,
        reply: &Document,
        batch_field: &str,
        command_name: &str,
    ) -> Result<()> {
        let invalid = || Error::invalid_cursor(format!("Invalid reply to {} command.", command_name));

        let cursor = reply.get_document("cursor").map_err(|_| invalid())?;
        let id = match cursor.get("id") {
            Some(Bson::Int64(id)) => *id,
            Some(Bson::Int32(id)) => i64::from(*id),
            _ => return Err(invalid()),
        };
        let batch = cursor
            .get_array(batch_field)
            .map_err(|_| invalid())?
            .iter()
            .map(|value| match value {
                Bson::Document(document) => Ok(document.clone()),
                _ => Err(invalid()),
            })
            .collect::<Result<VecDeque<_>>>()?;

        if let Ok(ns) = cursor.get_str("ns") {
            if let Ok(ns) = ns.parse() {
                self.ns = ns;
            }
        }
        self.cursor_id = id;
        self.batch = batch;
        Ok(())
    }

    /// Loads the batch out of an OP_REPLY, turning the reply's failure flags into errors.
    pub(crate) fn read_reply(&mut self, reply: Reply) -> Result<()> {
        if reply.response_flags.contains(ResponseFlags::CURSOR_NOT_FOUND) {
            self.cursor_id = 0;
            return Err(Error::invalid_cursor(
                "The cursor is invalid or has expired.",
            ));
        }
        if reply.response_flags.contains(ResponseFlags::QUERY_FAILURE) {
            self.cursor_id = 0;
            let document = reply.docs.into_iter().next().unwrap_or_default();
            let code = match document.get("code") {
                Some(Bson::Int32(code)) => *code,
                Some(Bson::Int64(code)) => *code as i32,
                Some(Bson::Double(code)) => *code as i32,
                _ => 0,
            };
            let message = document
                .get_str("$err")
                .unwrap_or("Unknown query failure")
                .to_string();
            return Err(Error::from(ErrorKind::Command(CommandError::new(code, message)))
                .with_server_response(document));
        }

        self.cursor_id = reply.cursor_id;
        self.batch = reply.docs.into();
        Ok(())
    }
}
