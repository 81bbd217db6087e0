use super::common::{CursorCore, CursorState};
use crate::{bson::Document, cmap::Command};

/// Runs one command and hands out its reply as the only document.
#[derive(Clone, Debug)]
pub(crate) struct SingleReplyStrategy {
    db: String,
    command: Document,
}

impl SingleReplyStrategy {
    pub(crate) fn new(db: impl Into<String>, command: Document) -> Self {
        Self {
            db: db.into(),
            command,
        }
    }

    pub(crate) async fn prime(&mut self, core: &mut CursorCore) -> CursorState {
        let server = match core.select_server().await {
            Ok(server) => server,
            Err(e) => return core.fail(e),
        };
        let name = self.command.keys().next().cloned().unwrap_or_default();
        let command = Command::new(name, &self.db, self.command.clone());
        match core
            .client
            .execute_command(&server, command, core.read_preference.as_ref())
            .await
        {
            Ok(response) => {
                core.cursor_id = 0;
                core.batch = vec![response.into_raw_body()].into();
                CursorState::InBatch
            }
            Err(e) => core.fail(e),
        }
    }
}
