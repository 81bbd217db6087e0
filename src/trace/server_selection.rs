use std::time::{Duration, Instant};

use super::{TracingRepresentation, SERVER_SELECTION_TRACING_EVENT_TARGET};
use crate::{
    bson::oid::ObjectId,
    error::Error,
    sdam::{ServerDescription, TopologyDescription},
    selection_criteria::{OperationType, ReadPreference},
};

/// Type responsible for emitting server selection tracing events.
pub(crate) struct ServerSelectionEventEmitter<'a> {
    topology_id: ObjectId,
    operation_type: OperationType,
    read_preference: &'a ReadPreference,
    start_time: Instant,
    timeout: Duration,
}

impl ServerSelectionEventEmitter<'_> {
    pub(crate) fn new(
        topology_id: ObjectId,
        operation_type: OperationType,
        read_preference: &ReadPreference,
        start_time: Instant,
        timeout: Duration,
    ) -> ServerSelectionEventEmitter<'_> {
        ServerSelectionEventEmitter {
            topology_id,
            operation_type,
            read_preference,
            start_time,
            timeout,
        }
    }

    pub(crate) fn emit_started_event(&self, topology_description: &TopologyDescription) {
        if tracing::enabled!(target: SERVER_SELECTION_TRACING_EVENT_TARGET, tracing::Level::DEBUG) {
            tracing::debug!(
                target: SERVER_SELECTION_TRACING_EVENT_TARGET,
                topologyId = self.topology_id.tracing_representation(),
                operation = %self.operation_type,
                selector = self.read_preference.tracing_representation(),
                topologyDescription = topology_description.tracing_representation(),
                "Server selection started"
            );
        }
    }

    pub(crate) fn emit_failed_event(
        &self,
        topology_description: &TopologyDescription,
        error: &Error,
    ) {
        if tracing::enabled!(target: SERVER_SELECTION_TRACING_EVENT_TARGET, tracing::Level::DEBUG) {
            tracing::debug!(
                target: SERVER_SELECTION_TRACING_EVENT_TARGET,
                topologyId = self.topology_id.tracing_representation(),
                operation = %self.operation_type,
                selector = self.read_preference.tracing_representation(),
                topologyDescription = topology_description.tracing_representation(),
                failure = error.tracing_representation(),
                "Server selection failed"
            );
        }
    }

    pub(crate) fn emit_succeeded_event(
        &self,
        topology_description: &TopologyDescription,
        server: &ServerDescription,
    ) {
        if tracing::enabled!(target: SERVER_SELECTION_TRACING_EVENT_TARGET, tracing::Level::DEBUG) {
            tracing::debug!(
                target: SERVER_SELECTION_TRACING_EVENT_TARGET,
                topologyId = self.topology_id.tracing_representation(),
                operation = %self.operation_type,
                selector = self.read_preference.tracing_representation(),
                topologyDescription = topology_description.tracing_representation(),
                serverHost = server.address().host(),
                serverPort = server.address().port(),
                "Server selection succeeded"
            );
        }
    }

    pub(crate) fn emit_waiting_event(&self, topology_description: &TopologyDescription) {
        if tracing::enabled!(target: SERVER_SELECTION_TRACING_EVENT_TARGET, tracing::Level::INFO) {
            let remaining_time = self
                .timeout
                .checked_sub(self.start_time.elapsed())
                .unwrap_or(Duration::ZERO);
            tracing::info!(
                target: SERVER_SELECTION_TRACING_EVENT_TARGET,
                topologyId = self.topology_id.tracing_representation(),
                operation = %self.operation_type,
                selector = self.read_preference.tracing_representation(),
                topologyDescription = topology_description.tracing_representation(),
                remainingTimeMS = remaining_time.as_millis() as u64,
                "Waiting for suitable server to become available",
            );
        }
    }
}
