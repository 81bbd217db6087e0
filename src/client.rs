mod cluster_time;
mod executor;
pub mod options;

use std::sync::Arc;

pub use self::cluster_time::ClusterTime;
use self::options::ClientOptions;
use crate::{
    bson::{doc, Document},
    change_stream::{options::ChangeStreamOptions, ChangeStream, ChangeStreamTarget},
    coll::Namespace,
    cursor::Cursor,
    db::Database,
    error::Result,
    hello::HandshakeMetadata,
    sdam::{ServerDescription, Topology, TopologyType},
    selection_criteria::{OperationType, ReadPreference},
};

/// This is the main entry point for the API. A `Client` is used to connect to a MongoDB
/// deployment and keeps track of its topology.
///
/// A client created with [`TopologyMode::Single`](options::TopologyMode::Single) scans servers
/// on demand while selecting one, and should not be used from several tasks at once. A client
/// created with [`TopologyMode::Pooled`](options::TopologyMode::Pooled) monitors the deployment
/// from a background task and can be shared freely; `Client` uses [`std::sync::Arc`] internally,
/// so cloning it is cheap.
///
/// ```rust,no_run
/// # use mongoc::{Client, error::Result};
/// # async fn run() -> Result<()> {
/// let client = Client::with_uri_str("mongodb://localhost:27017/?appName=example")?;
/// let mut cursor = client.database("test").collection("items").find(None, None);
/// while let Some(doc) = cursor.next().await {
///     println!("{}", doc);
/// }
/// if let Some(error) = cursor.error() {
///     return Err(error.clone());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    topology: Topology,
}

impl Client {
    /// Creates a new `Client` for the deployment described by `uri`, which must be a valid
    /// MongoDB connection string.
    pub fn with_uri_str(uri: impl AsRef<str>) -> Result<Self> {
        Self::with_options(ClientOptions::parse(uri)?)
    }

    /// Creates a new `Client` with the given options.
    ///
    /// A pooled client starts its background monitor immediately, so it must be created inside a
    /// tokio runtime.
    pub fn with_options(options: ClientOptions) -> Result<Self> {
        Self::with_options_and_metadata(options, HandshakeMetadata::default())
    }

    /// Creates a new `Client` that describes itself to servers with `metadata`. The metadata is
    /// frozen once the client exists.
    pub fn with_options_and_metadata(
        options: ClientOptions,
        mut metadata: HandshakeMetadata,
    ) -> Result<Self> {
        if let Some(ref app_name) = options.app_name {
            metadata.set_app_name(Some(app_name.clone()))?;
        }
        let metadata = Arc::new(metadata.freeze());
        let topology = Topology::new(options, metadata)?;

        Ok(Self {
            inner: Arc::new(ClientInner { topology }),
        })
    }

    pub(crate) fn topology(&self) -> &Topology {
        &self.inner.topology
    }

    /// The options this client was created with.
    pub fn options(&self) -> &ClientOptions {
        self.inner.topology.options()
    }

    /// Gets a handle to the database named `name`. No I/O is performed.
    pub fn database(&self, name: &str) -> Database {
        Database::new(self.clone(), name)
    }

    /// The type of the deployment as currently understood.
    pub fn topology_type(&self) -> TopologyType {
        self.inner.topology.topology_type()
    }

    /// The most recent description of every known server, ordered by server id.
    pub fn servers(&self) -> Vec<ServerDescription> {
        let description = self.inner.topology.description();
        let mut servers: Vec<ServerDescription> = description.servers.into_values().collect();
        servers.sort_by_key(|server| server.id);
        servers
    }

    /// The description of the server with the given id, if it is still part of the topology.
    pub fn server_description(&self, server_id: u32) -> Option<ServerDescription> {
        self.inner.topology.server_description(server_id)
    }

    /// The highest cluster time this client has seen.
    pub fn cluster_time(&self) -> Option<ClusterTime> {
        self.inner.topology.cluster_time()
    }

    /// Selects a server suitable for an operation of the given type. When `read_preference` is
    /// `None`, the client's default read preference is used, falling back to primary.
    pub async fn select_server(
        &self,
        operation_type: OperationType,
        read_preference: Option<&ReadPreference>,
    ) -> Result<ServerDescription> {
        self.inner
            .topology
            .select_server(operation_type, read_preference)
            .await
    }

    /// Starts background monitoring. Does nothing if the monitor is already running.
    pub fn start_monitoring(&self) -> Result<()> {
        self.inner.topology.start_scanner()
    }

    /// Stops background monitoring. Does nothing if the monitor is not running.
    pub fn stop_monitoring(&self) {
        self.inner.topology.stop_scanner()
    }

    /// Whether a background task is monitoring the deployment.
    pub fn is_monitoring(&self) -> bool {
        self.inner.topology.scanner_state() == crate::sdam::ScannerState::BgRunning
    }

    /// Runs `command` against `db` and returns a cursor that yields the reply as its only
    /// document. The command is sent on the first call to [`Cursor::next`].
    pub fn command(
        &self,
        db: &str,
        command: Document,
        read_preference: Option<ReadPreference>,
    ) -> Cursor {
        Cursor::single_reply(self.clone(), db, command, read_preference)
    }

    /// Returns a cursor over the databases on the selected server. Each document has at least a
    /// `name` field.
    pub fn list_databases(&self, filter: Option<Document>) -> Cursor {
        let mut command = doc! { "listDatabases": 1 };
        if let Some(filter) = filter {
            command.insert("filter", filter);
        }
        Cursor::array(self.clone(), "admin", command, "databases", None)
    }

    /// The names of every database on the selected server.
    pub async fn list_database_names(&self) -> Result<Vec<String>> {
        let mut cursor = self.list_databases(None);
        let mut names = Vec::new();
        while let Some(database) = cursor.try_next().await? {
            if let Ok(name) = database.get_str("name") {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    /// Opens a change stream over every database in the deployment.
    pub fn watch(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<ChangeStreamOptions>>,
    ) -> ChangeStream {
        ChangeStream::new(
            self.clone(),
            ChangeStreamTarget::Cluster,
            pipeline.into_iter().collect(),
            options.into().unwrap_or_default(),
        )
    }

    /// Kills a server-side cursor without waiting for the outcome. Requires a tokio runtime;
    /// without one the cursor is left to time out on the server.
    pub(crate) fn kill_cursor(&self, server_id: u32, cursor_id: i64, ns: &Namespace) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => return,
        };
        let client = self.clone();
        let ns = ns.clone();
        runtime.spawn(async move {
            let _ = client.kill_cursor_now(server_id, cursor_id, &ns).await;
        });
    }
}
