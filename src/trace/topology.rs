use std::time::Duration;

use super::{TracingRepresentation, TOPOLOGY_TRACING_EVENT_TARGET};
use crate::{
    bson::oid::ObjectId,
    client::options::ServerAddress,
    error::Error,
    sdam::TopologyDescription,
};

/// Emits heartbeat and topology change events for one topology.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TopologyTracingEventEmitter {
    topology_id: ObjectId,
}

impl TopologyTracingEventEmitter {
    pub(crate) fn new(topology_id: ObjectId) -> Self {
        Self { topology_id }
    }

    pub(crate) fn emit_heartbeat_started(&self, address: &ServerAddress, awaited: bool) {
        tracing::debug!(
            target: TOPOLOGY_TRACING_EVENT_TARGET,
            topologyId = self.topology_id.tracing_representation(),
            serverHost = address.host(),
            serverPort = address.port(),
            awaited,
            "Server heartbeat started"
        );
    }

    pub(crate) fn emit_heartbeat_succeeded(&self, address: &ServerAddress, duration: Duration) {
        tracing::debug!(
            target: TOPOLOGY_TRACING_EVENT_TARGET,
            topologyId = self.topology_id.tracing_representation(),
            serverHost = address.host(),
            serverPort = address.port(),
            durationMS = duration.as_millis() as u64,
            "Server heartbeat succeeded"
        );
    }

    pub(crate) fn emit_heartbeat_failed(&self, address: &ServerAddress, error: &Error) {
        tracing::debug!(
            target: TOPOLOGY_TRACING_EVENT_TARGET,
            topologyId = self.topology_id.tracing_representation(),
            serverHost = address.host(),
            serverPort = address.port(),
            failure = error.tracing_representation(),
            "Server heartbeat failed"
        );
    }

    pub(crate) fn emit_description_changed(
        &self,
        previous: &TopologyDescription,
        new: &TopologyDescription,
    ) {
        if tracing::enabled!(target: TOPOLOGY_TRACING_EVENT_TARGET, tracing::Level::DEBUG) {
            tracing::debug!(
                target: TOPOLOGY_TRACING_EVENT_TARGET,
                topologyId = self.topology_id.tracing_representation(),
                previousDescription = previous.tracing_representation(),
                newDescription = new.tracing_representation(),
                "Topology description changed"
            );
        }
    }

    pub(crate) fn emit_server_invalidated(&self, address: &ServerAddress, error: &Error) {
        tracing::debug!(
            target: TOPOLOGY_TRACING_EVENT_TARGET,
            topologyId = self.topology_id.tracing_representation(),
            serverHost = address.host(),
            serverPort = address.port(),
            failure = error.tracing_representation(),
            "Server marked unknown after an application error"
        );
    }
}
