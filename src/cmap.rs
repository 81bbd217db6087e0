//! Connections to servers speaking the MongoDB wire protocol. Idle connections are cached per
//! server by the client; there is no pool sizing or wait queue.

pub(crate) mod conn;

use std::collections::HashMap;

use tokio::sync::Mutex;

pub(crate) use self::conn::{
    wire::{GetMore, Query, QueryFlags, Reply, ResponseFlags},
    Command,
    Connection,
    RawCommandResponse,
    StreamDescription,
};

/// Idle, already-handshaked connections keyed by server id.
#[derive(Debug, Default)]
pub(crate) struct ConnectionCache {
    idle: Mutex<HashMap<u32, Vec<Connection>>>,
}

impl ConnectionCache {
    pub(crate) async fn take(&self, server_id: u32) -> Option<Connection> {
        self.idle
            .lock()
            .await
            .get_mut(&server_id)
            .and_then(Vec::pop)
    }

    /// Returns a connection to the cache unless it saw a network error.
    pub(crate) async fn put(&self, server_id: u32, connection: Connection) {
        if connection.errored {
            return;
        }
        self.idle
            .lock()
            .await
            .entry(server_id)
            .or_default()
            .push(connection);
    }

    /// Drops every idle connection to a server.
    pub(crate) async fn clear(&self, server_id: u32) {
        self.idle.lock().await.remove(&server_id);
    }

    #[cfg(test)]
    pub(crate) async fn idle_count(&self, server_id: u32) -> usize {
        self.idle
            .lock()
            .await
            .get(&server_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
