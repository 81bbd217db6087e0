use std::time::Instant;

use super::Client;
use crate::{
    bson::doc,
    cmap::{Command, Connection, RawCommandResponse},
    coll::Namespace,
    error::{Error, Result},
    hello::{hello_command, run_hello},
    sdam::ServerDescription,
    selection_criteria::ReadPreference,
    trace::{
        command::{emit_command_failed, emit_command_started, emit_command_succeeded},
        CURSOR_TRACING_EVENT_TARGET,
    },
};

impl Client {
    /// Returns an idle connection to `server`, or opens and handshakes a new one. A failure to
    /// connect is reported to the topology.
    pub(crate) async fn checkout_connection(&self, server: &ServerDescription) -> Result<Connection> {
        let topology = self.topology();
        if let Some(connection) = topology.connections().take(server.id).await {
            return Ok(connection);
        }

        let options = topology.options();
        let result = async {
            let mut connection = Connection::connect(
                server.address.clone(),
                Some(options.connect_timeout()),
                options.socket_timeout,
            )
            .await?;
            run_hello(
                &mut connection,
                hello_command(false, Some(topology.metadata())),
            )
            .await?;
            Ok::<_, Error>(connection)
        }
        .await;

        if let Err(ref e) = result {
            topology.handle_application_error(server.id, e).await;
        }
        result
    }

    pub(crate) async fn checkin_connection(&self, server_id: u32, connection: Connection) {
        self.topology()
            .connections()
            .put(server_id, connection)
            .await
    }

    /// Executes a command on a checked out connection to `server` and returns the connection
    /// to the cache afterwards.
    pub(crate) async fn execute_command(
        &self,
        server: &ServerDescription,
        command: Command,
        read_preference: Option<&ReadPreference>,
    ) -> Result<RawCommandResponse> {
        let mut connection = self.checkout_connection(server).await?;
        let result = self
            .execute_command_on_connection(server.id, &mut connection, command, read_preference)
            .await;
        self.checkin_connection(server.id, connection).await;
        result
    }

    /// Executes a command on the given connection.
    ///
    /// The read preference is applied according to the topology type, the topology's cluster
    /// time is gossiped to servers that understand it, and the reply's cluster time is recorded.
    /// A reply with `ok: 0` becomes a command error. Errors are reported to the topology before
    /// they are returned.
    pub(crate) async fn execute_command_on_connection(
        &self,
        server_id: u32,
        connection: &mut Connection,
        mut command: Command,
        read_preference: Option<&ReadPreference>,
    ) -> Result<RawCommandResponse> {
        let topology = self.topology();
        topology.update_command_with_read_pref(server_id, &mut command, read_preference);
        if connection.max_wire_version().unwrap_or(0) >= 6 {
            if let Some(cluster_time) = topology.cluster_time() {
                command.set_cluster_time(&cluster_time);
            }
        }

        let name = command.name.clone();
        emit_command_started(
            &name,
            &command.target_db,
            &command.body,
            connection.id,
            &connection.address,
        );
        let start = Instant::now();

        let result = connection.send_command(command).await.and_then(|response| {
            if let Some(ref cluster_time) = response.cluster_time() {
                topology.advance_cluster_time(cluster_time);
            }
            response.validate()
        });

        match result {
            Ok(ref response) => emit_command_succeeded(
                &name,
                response.raw_body(),
                connection.id,
                &connection.address,
                start.elapsed(),
            ),
            Err(ref e) => {
                emit_command_failed(&name, e, connection.id, &connection.address, start.elapsed());
                topology.handle_application_error(server_id, e).await;
            }
        }
        result
    }

    /// Kills a server-side cursor, with the killCursors command on servers that support it and
    /// OP_KILL_CURSORS otherwise.
    pub(crate) async fn kill_cursor_now(
        &self,
        server_id: u32,
        cursor_id: i64,
        ns: &Namespace,
    ) -> Result<()> {
        let server = match self.topology().server_description(server_id) {
            Some(server) => server,
            None => return Ok(()),
        };

        let mut connection = self.checkout_connection(&server).await?;
        let result = if connection.max_wire_version().unwrap_or(0) >= 4 {
            let command = Command::new(
                "killCursors",
                &ns.db,
                doc! { "killCursors": ns.coll.as_str(), "cursors": [cursor_id] },
            );
            self.execute_command_on_connection(server_id, &mut connection, command, None)
                .await
                .map(|_| ())
        } else {
            connection.kill_cursors(vec![cursor_id]).await
        };
        self.checkin_connection(server_id, connection).await;

        tracing::debug!(
            target: CURSOR_TRACING_EVENT_TARGET,
            cursorId = cursor_id,
            namespace = %ns,
            serverHost = server.address.host(),
            serverPort = server.address.port(),
            succeeded = result.is_ok(),
            "Cursor killed"
        );
        result
    }
}
