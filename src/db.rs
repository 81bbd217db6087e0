use std::sync::Arc;

use crate::{
    bson::{doc, Document},
    change_stream::{options::ChangeStreamOptions, ChangeStream, ChangeStreamTarget},
    cmap::Command,
    coll::Namespace,
    cursor::{Cursor, CursorOptions},
    error::Result,
    selection_criteria::{OperationType, ReadPreference},
    Client,
    Collection,
};

/// `Database` is the client-side abstraction of a MongoDB database. It can be used to run
/// database-level commands, list collections, and get handles to [`Collection`]s. A `Database`
/// can be obtained through a [`Client`] by calling [`Client::database`].
///
/// `Database` uses [`std::sync::Arc`] internally, so it can safely be shared across threads or
/// async tasks.
#[derive(Clone, Debug)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

#[derive(Debug)]
struct DatabaseInner {
    client: Client,
    name: String,
}

impl Database {
    pub(crate) fn new(client: Client, name: &str) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                client,
                name: name.to_string(),
            }),
        }
    }

    pub(crate) fn client(&self) -> &Client {
        &self.inner.client
    }

    /// Gets the name of the `Database`.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Gets a handle to a collection in this database. No I/O is performed.
    pub fn collection(&self, name: &str) -> Collection {
        Collection::new(self, name)
    }

    /// Runs a database-level command and returns the server's reply.
    ///
    /// The command is treated as a read: it goes to a server matching `read_preference`, or the
    /// client's default read preference when `None`. A reply with `ok: 0` becomes a command
    /// error.
    pub async fn run_command(
        &self,
        command: Document,
        read_preference: Option<ReadPreference>,
    ) -> Result<Document> {
        let client = self.client();
        let server = client
            .select_server(OperationType::Read, read_preference.as_ref())
            .await?;
        let name = command
            .keys()
            .next()
            .cloned()
            .unwrap_or_default();
        let response = client
            .execute_command(
                &server,
                Command::new(name, self.name(), command),
                read_preference.as_ref(),
            )
            .await?;
        Ok(response.into_raw_body())
    }

    /// Runs a database-level command and returns a cursor that yields the reply as its only
    /// document. The command is sent on the first call to [`Cursor::next`].
    pub fn command(&self, command: Document, read_preference: Option<ReadPreference>) -> Cursor {
        Cursor::single_reply(self.client().clone(), self.name(), command, read_preference)
    }

    /// Returns a cursor over the collections in this database matching `filter`.
    pub fn list_collections(&self, filter: impl Into<Option<Document>>) -> Cursor {
        let mut command = doc! { "listCollections": 1, "cursor": {} };
        if let Some(filter) = filter.into() {
            command.insert("filter", filter);
        }
        Cursor::command(
            self.client().clone(),
            Namespace::command(self.name()),
            command,
            CursorOptions::default(),
            None,
        )
    }

    /// The names of the collections in this database.
    pub async fn list_collection_names(&self) -> Result<Vec<String>> {
        let mut cursor = self.list_collections(None);
        let mut names = Vec::new();
        while let Some(collection) = cursor.try_next().await? {
            if let Ok(name) = collection.get_str("name") {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    /// Opens a change stream over every collection in this database.
    pub fn watch(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<ChangeStreamOptions>>,
    ) -> ChangeStream {
        ChangeStream::new(
            self.client().clone(),
            ChangeStreamTarget::Database(self.name().to_string()),
            pipeline.into_iter().collect(),
            options.into().unwrap_or_default(),
        )
    }
}
