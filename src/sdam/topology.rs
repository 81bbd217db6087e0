use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
        PoisonError,
        Weak,
    },
    time::{Duration, Instant},
};

use tokio::{
    sync::{
        broadcast::{self, error::TryRecvError},
        watch,
        Mutex,
    },
    task::JoinHandle,
};

use super::{
    scanner::{CheckResult, Scanner, ScannerState},
    ServerDescription,
    TopologyDescription,
    TopologyType,
};
use crate::{
    bson::oid::ObjectId,
    client::{
        options::{ClientOptions, TopologyMode},
        ClusterTime,
    },
    cmap::{Command, ConnectionCache},
    error::{Error, Result},
    hello::HandshakeMetadata,
    sdam::description::server::RTT_UNMEASURED,
    selection_criteria::{OperationType, ReadPreference},
    trace::{server_selection::ServerSelectionEventEmitter, topology::TopologyTracingEventEmitter},
};

const TRY_ONCE_MESSAGE: &str = "No suitable servers found (`serverSelectionTryOnce` set)";
const TIMEOUT_MESSAGE: &str = "No suitable servers found: `serverSelectionTimeoutMS` expired";

/// The client's view of the deployment, shared by every operation.
///
/// The current [`TopologyDescription`] is published through a watch channel: readers take cheap
/// snapshots, and pooled selections wait on it for the next scan. Scans themselves are serialized
/// by the scanner lock. In single-threaded mode the thread running a selection also performs the
/// scans; in pooled mode a background task does.
#[derive(Clone, Debug)]
pub(crate) struct Topology {
    inner: Arc<TopologyInner>,
}

#[derive(Debug)]
struct TopologyInner {
    id: ObjectId,
    options: ClientOptions,
    metadata: Arc<HandshakeMetadata>,
    description: watch::Sender<TopologyDescription>,
    scanner: Mutex<Scanner>,
    update_requester: UpdateRequester,
    connections: ConnectionCache,
    emitter: TopologyTracingEventEmitter,

    /// Set when an error makes the single-threaded description untrustworthy.
    stale: AtomicBool,

    /// Set by a "not master" error so the next single-threaded scan skips the minimum heartbeat
    /// wait.
    scan_immediately: AtomicBool,

    background: std::sync::Mutex<Background>,
}

#[derive(Debug, Default)]
struct Background {
    state: ScannerState,
    handle: Option<JoinHandle<()>>,
}

impl Drop for TopologyInner {
    fn drop(&mut self) {
        let background = self
            .background
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = background.handle.take() {
            handle.abort();
        }
    }
}

impl Topology {
    pub(crate) fn new(options: ClientOptions, metadata: Arc<HandshakeMetadata>) -> Result<Self> {
        options.validate()?;

        let id = ObjectId::new();
        let emitter = TopologyTracingEventEmitter::new(id);
        let description = TopologyDescription::new(&options);

        let mut scanner = Scanner::new(
            metadata.clone(),
            options.connect_timeout(),
            options.cooldown(),
            emitter,
        );
        scanner.sync_nodes(&description);

        let (description, _) = watch::channel(description);
        let mode = options.mode;
        let topology = Topology {
            inner: Arc::new(TopologyInner {
                id,
                options,
                metadata,
                description,
                scanner: Mutex::new(scanner),
                update_requester: UpdateRequester::new(),
                connections: ConnectionCache::default(),
                emitter,
                stale: AtomicBool::new(false),
                scan_immediately: AtomicBool::new(false),
                background: Default::default(),
            }),
        };

        if mode == TopologyMode::Pooled {
            topology.start_scanner()?;
        }

        Ok(topology)
    }

    pub(crate) fn id(&self) -> ObjectId {
        self.inner.id
    }

    pub(crate) fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub(crate) fn metadata(&self) -> &HandshakeMetadata {
        &self.inner.metadata
    }

    pub(crate) fn connections(&self) -> &ConnectionCache {
        &self.inner.connections
    }

    /// A snapshot of the current description.
    pub(crate) fn description(&self) -> TopologyDescription {
        self.inner.description.borrow().clone()
    }

    pub(crate) fn topology_type(&self) -> TopologyType {
        self.inner.description.borrow().topology_type()
    }

    pub(crate) fn server_description(&self, server_id: u32) -> Option<ServerDescription> {
        self.inner.description.borrow().server(server_id).cloned()
    }

    pub(crate) fn cluster_time(&self) -> Option<ClusterTime> {
        self.inner.description.borrow().cluster_time().cloned()
    }

    pub(crate) fn advance_cluster_time(&self, cluster_time: &ClusterTime) {
        self.inner.description.send_if_modified(|description| {
            if description.cluster_time() >= Some(cluster_time) {
                return false;
            }
            description.advance_cluster_time(cluster_time);
            true
        });
    }

    pub(crate) fn update_command_with_read_pref(
        &self,
        server_id: u32,
        command: &mut Command,
        read_preference: Option<&ReadPreference>,
    ) {
        self.inner
            .description
            .borrow()
            .update_command_with_read_pref(server_id, command, read_preference)
    }

    /// Whether a background task is currently monitoring the deployment.
    pub(crate) fn scanner_state(&self) -> ScannerState {
        self.inner
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    /// Starts background monitoring. Starting an already running scanner does nothing.
    pub(crate) fn start_scanner(&self) -> Result<()> {
        let mut background = self
            .inner
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if background.state == ScannerState::BgRunning {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            Error::internal("background monitoring requires a running tokio runtime")
        })?;
        let monitor = BackgroundMonitor {
            topology: Arc::downgrade(&self.inner),
            update_requests: self.inner.update_requester.subscribe(),
            heartbeat_freq: self.inner.options.heartbeat_freq(),
            min_heartbeat_freq: self.inner.options.min_heartbeat_freq(),
        };
        background.handle = Some(runtime.spawn(monitor.execute()));
        background.state = ScannerState::BgRunning;
        Ok(())
    }

    /// Stops background monitoring. Stopping a scanner that is not running does nothing.
    pub(crate) fn stop_scanner(&self) {
        let mut background = self
            .inner
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = background.handle.take() {
            handle.abort();
        }
        background.state = ScannerState::Off;
    }

    /// Asks the background monitor to scan as soon as the minimum heartbeat interval allows.
    pub(crate) fn request_scan(&self) {
        self.inner.update_requester.request();
    }

    /// Selects a server suitable for an operation, scanning as the topology mode dictates.
    pub(crate) async fn select_server(
        &self,
        operation_type: OperationType,
        read_preference: Option<&ReadPreference>,
    ) -> Result<ServerDescription> {
        let primary = ReadPreference::Primary;
        let read_preference = read_preference
            .or(self.inner.options.read_preference.as_ref())
            .unwrap_or(&primary);

        let emitter = ServerSelectionEventEmitter::new(
            self.inner.id,
            operation_type,
            read_preference,
            Instant::now(),
            self.inner.options.server_selection_timeout(),
        );
        emitter.emit_started_event(&self.description());

        let result = match self.inner.options.mode {
            TopologyMode::Single => {
                self.select_server_single(operation_type, read_preference)
                    .await
            }
            TopologyMode::Pooled => {
                self.select_server_pooled(operation_type, read_preference, &emitter)
                    .await
            }
        };

        let description = self.description();
        match result {
            Ok(ref server) => emitter.emit_succeeded_event(&description, server),
            Err(ref e) => emitter.emit_failed_event(&description, e),
        }
        result
    }

    async fn select_server_single(
        &self,
        operation_type: OperationType,
        read_preference: &ReadPreference,
    ) -> Result<ServerDescription> {
        let options = &self.inner.options;
        let try_once = options.server_selection_try_once();
        let heartbeat_freq = options.heartbeat_freq();
        let min_heartbeat_freq = options.min_heartbeat_freq();

        let loop_start = Instant::now();
        let expire_at = loop_start + options.server_selection_timeout();
        let mut loop_end = loop_start;
        let mut tried_once = false;

        let mut scanner = self.inner.scanner.lock().await;
        let mut stale = self.inner.stale.swap(false, Ordering::SeqCst)
            || scanner
                .last_scan
                .map_or(true, |last_scan| last_scan + heartbeat_freq < loop_start);

        loop {
            if stale {
                let bypass_min_heartbeat = self.inner.scan_immediately.swap(false, Ordering::SeqCst);
                let scan_ready = match scanner.last_scan {
                    Some(last_scan) if !bypass_min_heartbeat => last_scan + min_heartbeat_freq,
                    _ => loop_end,
                };

                if scan_ready > expire_at && !try_once {
                    return Err(selection_error(TIMEOUT_MESSAGE, scanner.errors()));
                }

                if scan_ready > loop_end {
                    if try_once && scanner.in_cooldown(scan_ready) {
                        return Err(Error::server_selection("No servers yet eligible for rescan"));
                    }
                    tokio::time::sleep_until(scan_ready.into()).await;
                }

                self.scan(&mut scanner, true).await;
                loop_end = scanner.last_scan.unwrap_or_else(Instant::now);
                tried_once = true;
                stale = false;
            }

            if let Some(server) = self
                .inner
                .description
                .borrow()
                .select_server(operation_type, read_preference)?
            {
                return Ok(server.clone());
            }

            stale = true;
            if try_once {
                if tried_once {
                    return Err(selection_error(TRY_ONCE_MESSAGE, scanner.errors()));
                }
            } else {
                loop_end = Instant::now();
                if loop_end > expire_at {
                    return Err(selection_error(TIMEOUT_MESSAGE, scanner.errors()));
                }
            }
        }
    }

    async fn select_server_pooled(
        &self,
        operation_type: OperationType,
        read_preference: &ReadPreference,
        emitter: &ServerSelectionEventEmitter<'_>,
    ) -> Result<ServerDescription> {
        let deadline = Instant::now() + self.inner.options.server_selection_timeout();
        let mut watcher = self.inner.description.subscribe();
        let mut emitted_waiting_message = false;

        loop {
            let description = watcher.borrow_and_update().clone();
            if let Some(server) = description.select_server(operation_type, read_preference)? {
                return Ok(server.clone());
            }

            self.request_scan();
            if !emitted_waiting_message {
                emitter.emit_waiting_event(&description);
                emitted_waiting_message = true;
            }

            match tokio::time::timeout_at(deadline.into(), watcher.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return Err(Error::internal("topology was closed")),
                Err(_) => {
                    let errors = description_errors(&self.description());
                    return Err(selection_error(TIMEOUT_MESSAGE, errors));
                }
            }
        }
    }

    /// Scans every node, publishes the resulting description, and brings the scanner's node
    /// list in line with it.
    async fn scan(&self, scanner: &mut Scanner, obey_cooldown: bool) {
        let results = scanner.scan(obey_cooldown).await;
        self.apply_check_results(results);
        scanner.sync_nodes(&self.inner.description.borrow());
    }

    fn apply_check_results(&self, results: Vec<CheckResult>) {
        let previous = self.description();
        self.inner.description.send_modify(|description| {
            for check in results {
                let previous_rtt = description
                    .server(check.id)
                    .map(|server| server.round_trip_time_ms)
                    .unwrap_or(RTT_UNMEASURED);
                let server = match check.result {
                    Ok(reply) => ServerDescription::new_from_reply(
                        check.id,
                        &check.address,
                        reply,
                        previous_rtt,
                        check.started,
                    ),
                    Err(e) => {
                        ServerDescription::new_from_error(check.id, &check.address, e, check.started)
                    }
                };
                if let Err(e) = description.update(server) {
                    tracing::warn!(error = %e, "failed to apply a server check to the topology");
                }
            }
        });

        let current = self.inner.description.borrow();
        if *current != previous {
            self.inner
                .emitter
                .emit_description_changed(&previous, &current);
        }
    }

    /// Updates the topology after an operation against `server_id` failed.
    ///
    /// State change errors and network errors other than timeouts mark the server Unknown and
    /// drop its idle connections. "Not master" additionally triggers an immediate rescan in both
    /// modes; "node is recovering" only wakes the background monitor.
    pub(crate) async fn handle_application_error(&self, server_id: u32, error: &Error) {
        if !(error.is_state_change_error() || error.is_non_timeout_network_error()) {
            return;
        }

        let mut invalidated = None;
        self.inner.description.send_if_modified(|description| {
            if description.topology_type() == TopologyType::LoadBalanced {
                return false;
            }
            let address = description.server(server_id).map(|sd| sd.address.clone());
            match description.invalidate_server(server_id, error.clone()) {
                Ok(true) => {
                    invalidated = address;
                    true
                }
                Ok(false) => false,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to invalidate server");
                    false
                }
            }
        });
        if let Some(ref address) = invalidated {
            self.inner.emitter.emit_server_invalidated(address, error);
        }

        self.inner.connections.clear(server_id).await;

        let pooled = self.inner.options.mode == TopologyMode::Pooled;
        if error.is_notwritableprimary() {
            if pooled {
                self.request_scan();
            } else {
                self.inner.scan_immediately.store(true, Ordering::SeqCst);
                self.inner.stale.store(true, Ordering::SeqCst);
            }
        } else if error.is_recovering() {
            if pooled {
                self.request_scan();
            } else {
                self.inner.stale.store(true, Ordering::SeqCst);
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn scanner_node_count(&self) -> usize {
        self.inner.scanner.lock().await.node_count()
    }
}

fn selection_error(message: &str, errors: Option<String>) -> Error {
    match errors {
        Some(errors) => Error::server_selection(format!("{}: {}", message, errors)),
        None => Error::server_selection(message),
    }
}

fn description_errors(description: &TopologyDescription) -> Option<String> {
    let mut servers: Vec<&ServerDescription> = description.servers.values().collect();
    servers.sort_by_key(|server| server.id);
    let errors: Vec<String> = servers
        .into_iter()
        .filter_map(|server| server.error())
        .map(|e| format!("[{}]", e))
        .collect();
    if errors.is_empty() {
        None
    } else {
        Some(errors.join(" "))
    }
}

/// The background task of a pooled topology. It holds only a weak reference so that dropping
/// the last client handle ends the task.
struct BackgroundMonitor {
    topology: Weak<TopologyInner>,
    update_requests: UpdateRequestReceiver,
    heartbeat_freq: Duration,
    min_heartbeat_freq: Duration,
}

impl BackgroundMonitor {
    async fn execute(mut self) {
        loop {
            let topology = match self.topology.upgrade() {
                Some(inner) => Topology { inner },
                None => return,
            };
            {
                let mut scanner = topology.inner.scanner.lock().await;
                topology.scan(&mut scanner, false).await;
            }
            drop(topology);
            self.update_requests.clear_update_requests();

            tokio::time::sleep(self.min_heartbeat_freq).await;
            self.update_requests
                .wait_for_update_request(self.heartbeat_freq.saturating_sub(self.min_heartbeat_freq))
                .await;
        }
    }
}

#[derive(Clone, Debug)]
struct UpdateRequester {
    sender: broadcast::Sender<()>,
}

impl UpdateRequester {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self { sender }
    }

    fn request(&self) {
        let _ = self.sender.send(());
    }

    fn subscribe(&self) -> UpdateRequestReceiver {
        UpdateRequestReceiver {
            receiver: self.sender.subscribe(),
        }
    }
}

struct UpdateRequestReceiver {
    receiver: broadcast::Receiver<()>,
}

impl UpdateRequestReceiver {
    async fn wait_for_update_request(&mut self, timeout: Duration) {
        let _: std::result::Result<_, _> =
            tokio::time::timeout(timeout, self.receiver.recv()).await;
    }

    /// Discards requests made while a scan was running, since that scan satisfied them.
    fn clear_update_requests(&mut self) {
        while !matches!(
            self.receiver.try_recv(),
            Err(TryRecvError::Empty | TryRecvError::Closed)
        ) {}
    }
}
