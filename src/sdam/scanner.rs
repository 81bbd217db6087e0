use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use futures_util::future::join_all;

use super::{TopologyDescription, TopologyType};
use crate::{
    bson::DateTime,
    client::options::ServerAddress,
    cmap::Connection,
    error::{Error, Result},
    hello::{hello_command, run_hello, HandshakeMetadata, HelloReply},
    trace::topology::TopologyTracingEventEmitter,
};

/// Whether a background task is monitoring the topology.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum ScannerState {
    #[default]
    Off,
    BgRunning,
}

/// The outcome of checking one server.
#[derive(Debug)]
pub(crate) struct CheckResult {
    pub(crate) id: u32,
    pub(crate) address: ServerAddress,
    pub(crate) result: Result<HelloReply>,

    /// When the check was started, before any network round trip.
    pub(crate) started: DateTime,
}

/// Runs handshakes against every known server and remembers which ones failed recently.
#[derive(Debug)]
pub(crate) struct Scanner {
    nodes: Vec<ScannerNode>,
    metadata: Arc<HandshakeMetadata>,
    connect_timeout: Duration,
    cooldown: Duration,
    emitter: TopologyTracingEventEmitter,

    /// When the most recent scan finished.
    pub(crate) last_scan: Option<Instant>,
}

#[derive(Debug)]
struct ScannerNode {
    id: u32,
    address: ServerAddress,
    connection: Option<Connection>,
    hello_ok: bool,
    last_failed: Option<Instant>,
    last_error: Option<Error>,
}

impl Scanner {
    pub(crate) fn new(
        metadata: Arc<HandshakeMetadata>,
        connect_timeout: Duration,
        cooldown: Duration,
        emitter: TopologyTracingEventEmitter,
    ) -> Self {
        Self {
            nodes: Vec::new(),
            metadata,
            connect_timeout,
            cooldown,
            emitter,
            last_scan: None,
        }
    }

    /// Adds nodes for servers that were discovered and drops nodes for servers that were removed.
    /// Load balancers are never scanned.
    pub(crate) fn sync_nodes(&mut self, description: &TopologyDescription) {
        if description.topology_type() == TopologyType::LoadBalanced {
            self.nodes.clear();
            return;
        }

        self.nodes
            .retain(|node| description.servers.contains_key(&node.id));
        for server in description.servers.values() {
            if !self.nodes.iter().any(|node| node.id == server.id) {
                self.nodes.push(ScannerNode {
                    id: server.id,
                    address: server.address.clone(),
                    connection: None,
                    hello_ok: false,
                    last_failed: None,
                    last_error: None,
                });
            }
        }
        self.nodes.sort_by_key(|node| node.id);
    }

    /// Whether every node failed so recently that a scan at `when` would skip all of them.
    pub(crate) fn in_cooldown(&self, when: Instant) -> bool {
        self.nodes
            .iter()
            .all(|node| node.in_cooldown(when, self.cooldown))
    }

    /// Checks every node, concurrently. With `obey_cooldown`, nodes that failed within the
    /// cooldown window are skipped.
    pub(crate) async fn scan(&mut self, obey_cooldown: bool) -> Vec<CheckResult> {
        let now = Instant::now();
        let cooldown = self.cooldown;
        let metadata = self.metadata.as_ref();
        let connect_timeout = self.connect_timeout;
        let emitter = &self.emitter;

        let checks = self
            .nodes
            .iter_mut()
            .filter(|node| !(obey_cooldown && node.in_cooldown(now, cooldown)))
            .map(|node| node.check(metadata, connect_timeout, emitter));
        let results = join_all(checks).await;

        self.last_scan = Some(Instant::now());
        results
    }

    /// The errors recorded for nodes whose last check failed, formatted as `[msg] [msg]`.
    pub(crate) fn errors(&self) -> Option<String> {
        let errors: Vec<String> = self
            .nodes
            .iter()
            .filter_map(|node| node.last_error.as_ref())
            .map(|e| format!("[{}]", e))
            .collect();
        if errors.is_empty() {
            None
        } else {
            Some(errors.join(" "))
        }
    }

    #[cfg(test)]
    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl ScannerNode {
    fn in_cooldown(&self, when: Instant, cooldown: Duration) -> bool {
        self.last_failed
            .is_some_and(|last_failed| last_failed + cooldown >= when)
    }

    /// Checks the server, retrying once right away if the first attempt hit a network error.
    async fn check(
        &mut self,
        metadata: &HandshakeMetadata,
        connect_timeout: Duration,
        emitter: &TopologyTracingEventEmitter,
    ) -> CheckResult {
        let started = DateTime::now();
        let result = match self.perform_hello(metadata, connect_timeout, emitter).await {
            Err(e) if e.is_network_error() => {
                self.perform_hello(metadata, connect_timeout, emitter)
                    .await
            }
            other => other,
        };

        match result {
            Ok(_) => {
                self.last_failed = None;
                self.last_error = None;
            }
            Err(ref e) => {
                self.last_failed = Some(Instant::now());
                self.last_error = Some(e.clone());
            }
        }

        CheckResult {
            id: self.id,
            address: self.address.clone(),
            result,
            started,
        }
    }

    async fn perform_hello(
        &mut self,
        metadata: &HandshakeMetadata,
        connect_timeout: Duration,
        emitter: &TopologyTracingEventEmitter,
    ) -> Result<HelloReply> {
        emitter.emit_heartbeat_started(&self.address, false);
        let start = Instant::now();

        let result = self.run_hello(metadata, connect_timeout).await;
        match result {
            Ok(ref reply) => {
                self.hello_ok = reply.command_response.hello_ok.unwrap_or(false);
                emitter.emit_heartbeat_succeeded(&self.address, start.elapsed());
            }
            Err(ref e) => {
                self.connection = None;
                emitter.emit_heartbeat_failed(&self.address, e);
            }
        }
        result
    }

    async fn run_hello(
        &mut self,
        metadata: &HandshakeMetadata,
        connect_timeout: Duration,
    ) -> Result<HelloReply> {
        let connection = match self.connection {
            Some(ref mut connection) => connection,
            None => {
                let connection = Connection::connect(
                    self.address.clone(),
                    Some(connect_timeout),
                    Some(connect_timeout),
                )
                .await?;
                self.connection.insert(connection)
            }
        };

        let first = connection.stream_description.is_none();
        let command = hello_command(self.hello_ok, first.then_some(metadata));
        run_hello(connection, command).await
    }
}
