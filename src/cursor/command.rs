use super::{
    common::{CursorCore, CursorState},
    legacy,
};
use crate::{bson::Document, cmap::Command, trace::CURSOR_TRACING_EVENT_TARGET};

/// The first wire version with the find and getMore commands.
pub(crate) const FIND_COMMAND_WIRE_VERSION: i32 = 4;

/// How the batch currently in the core was obtained.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum ReadingFrom {
    #[default]
    None,
    CommandReply,
    OpGetMoreReply,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GetMoreType {
    Command,
    Legacy,
}

/// Drives any command whose reply is shaped `{cursor: {id, ns, firstBatch}}`: find, aggregate,
/// listCollections and friends.
#[derive(Clone, Debug)]
pub(crate) struct CommandStrategy {
    db: String,
    command: Document,
    reading_from: ReadingFrom,
    get_more_type: Option<GetMoreType>,
}

impl CommandStrategy {
    pub(crate) fn new(db: impl Into<String>, command: Document) -> Self {
        Self {
            db: db.into(),
            command,
            reading_from: ReadingFrom::None,
            get_more_type: None,
        }
    }

    fn command_name(&self) -> String {
        self.command.keys().next().cloned().unwrap_or_default()
    }

    pub(crate) async fn prime(&mut self, core: &mut CursorCore) -> CursorState {
        let server = match core.select_server().await {
            Ok(server) => server,
            Err(e) => return core.fail(e),
        };

        let name = self.command_name();
        let command = Command::new(&name, &self.db, self.command.clone());
        let reply = match core
            .client
            .execute_command(&server, command, core.read_preference.as_ref())
            .await
        {
            Ok(response) => response.into_raw_body(),
            Err(e) => return core.fail(e),
        };

        if let Err(e) = core.read_cursor_document(&reply, "firstBatch", &name) {
            return core.fail(e);
        }
        core.first_reply = Some(reply);
        self.reading_from = ReadingFrom::CommandReply;
        CursorState::InBatch
    }

    pub(crate) async fn get_next_batch(&mut self, core: &mut CursorCore) -> CursorState {
        if core.cursor_id == 0 {
            return CursorState::Done;
        }
        let server = match core.pinned_server() {
            Ok(server) => server,
            Err(e) => return core.fail(e),
        };

        let get_more_type = *self.get_more_type.get_or_insert_with(|| {
            if server.max_wire_version().unwrap_or(0) >= FIND_COMMAND_WIRE_VERSION
                && !core.options.exhaust
            {
                GetMoreType::Command
            } else {
                GetMoreType::Legacy
            }
        });

        tracing::debug!(
            target: CURSOR_TRACING_EVENT_TARGET,
            operationId = core.operation_id,
            cursorId = core.cursor_id,
            getMoreType = ?get_more_type,
            previousReply = ?self.reading_from,
            "Fetching next batch"
        );

        match get_more_type {
            GetMoreType::Command => {
                let command = core.get_more_command();
                let reply = match core.client.execute_command(&server, command, None).await {
                    Ok(response) => response.into_raw_body(),
                    Err(e) => return core.fail(e),
                };
                if let Err(e) = core.read_cursor_document(&reply, "nextBatch", "getMore") {
                    return core.fail(e);
                }
                self.reading_from = ReadingFrom::CommandReply;
                CursorState::InBatch
            }
            GetMoreType::Legacy => {
                let state = legacy::get_more(core).await;
                self.reading_from = ReadingFrom::OpGetMoreReply;
                state
            }
        }
    }

    /// The same command with no iteration state.
    pub(crate) fn fresh(&self) -> Self {
        Self::new(self.db.clone(), self.command.clone())
    }
}
