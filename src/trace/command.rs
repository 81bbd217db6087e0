use std::time::Duration;

use super::{TracingRepresentation, COMMAND_TRACING_EVENT_TARGET};
use crate::{bson::Document, client::options::ServerAddress, error::Error};

pub(crate) fn emit_command_started(
    command_name: &str,
    database_name: &str,
    command: &Document,
    connection_id: u32,
    address: &ServerAddress,
) {
    if tracing::enabled!(target: COMMAND_TRACING_EVENT_TARGET, tracing::Level::DEBUG) {
        tracing::debug!(
            target: COMMAND_TRACING_EVENT_TARGET,
            command = command.tracing_representation(),
            databaseName = database_name,
            commandName = command_name,
            driverConnectionId = connection_id,
            serverHost = address.host(),
            serverPort = address.port(),
            "Command started"
        );
    }
}

pub(crate) fn emit_command_succeeded(
    command_name: &str,
    reply: &Document,
    connection_id: u32,
    address: &ServerAddress,
    duration: Duration,
) {
    if tracing::enabled!(target: COMMAND_TRACING_EVENT_TARGET, tracing::Level::DEBUG) {
        tracing::debug!(
            target: COMMAND_TRACING_EVENT_TARGET,
            reply = reply.tracing_representation(),
            commandName = command_name,
            driverConnectionId = connection_id,
            serverHost = address.host(),
            serverPort = address.port(),
            durationMS = duration.as_millis() as u64,
            "Command succeeded"
        );
    }
}

pub(crate) fn emit_command_failed(
    command_name: &str,
    failure: &Error,
    connection_id: u32,
    address: &ServerAddress,
    duration: Duration,
) {
    tracing::debug!(
        target: COMMAND_TRACING_EVENT_TARGET,
        failure = failure.tracing_representation(),
        commandName = command_name,
        driverConnectionId = connection_id,
        serverHost = address.host(),
        serverPort = address.port(),
        durationMS = duration.as_millis() as u64,
        "Command failed"
    );
}
