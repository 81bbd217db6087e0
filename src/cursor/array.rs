use super::common::{CursorCore, CursorState};
use crate::{
    bson::{Bson, Document},
    cmap::Command,
    error::{Error, Result},
};

/// Runs one command and iterates over an array of documents embedded in its reply, such as the
/// `databases` field of listDatabases. The whole result always arrives in that one reply.
#[derive(Clone, Debug)]
pub(crate) struct ArrayStrategy {
    db: String,
    command: Document,
    field: String,
}

impl ArrayStrategy {
    pub(crate) fn new(db: impl Into<String>, command: Document, field: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            command,
            field: field.into(),
        }
    }

    pub(crate) async fn prime(&mut self, core: &mut CursorCore) -> CursorState {
        let server = match core.select_server().await {
            Ok(server) => server,
            Err(e) => return core.fail(e),
        };
        let name = self.command.keys().next().cloned().unwrap_or_default();
        let command = Command::new(&name, &self.db, self.command.clone());
        let result = core
            .client
            .execute_command(&server, command, core.read_preference.as_ref())
            .await
            .and_then(|response| self.unwrap_array(response.raw_body(), &name));

        match result {
            Ok(documents) => {
                core.cursor_id = 0;
                core.batch = documents.into();
                CursorState::InBatch
            }
            Err(e) => core.fail(e),
        }
    }

    fn unwrap_array(&self, reply: &Document, command_name: &str) -> Result<Vec<Document>> {
        let invalid = || Error::invalid_cursor(format!("Invalid reply to {} command.", command_name));
        reply
            .get_array(&self.field)
            .map_err(|_| invalid())?
            .iter()
            .map(|value| match value {
                Bson::Document(document) => Ok(document.clone()),
                _ => Err(invalid()),
            })
            .collect()
    }
}
