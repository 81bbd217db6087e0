use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    bson::{doc, oid::ObjectId, DateTime, Document},
    client::ClusterTime,
    cmap::{Command, Connection, StreamDescription},
    error::{Error, Result},
    sdam::ServerType,
    selection_criteria::TagSet,
};

/// The legacy version of the `hello` command which was deprecated in 5.0.
pub(crate) const LEGACY_HELLO_COMMAND_NAME: &str = "isMaster";

const DRIVER_NAME: &str = "mongoc";

/// Describes this client to servers during the connection handshake.
///
/// Metadata is assembled while the client is being built and then frozen: once a client has
/// been created from it, further calls to
/// [`append_driver_info`](HandshakeMetadata::append_driver_info) fail.
#[derive(Clone, Debug, PartialEq)]
pub struct HandshakeMetadata {
    driver_name: String,
    driver_version: String,
    platform: Option<String>,
    app_name: Option<String>,
    frozen: bool,
}

impl Default for HandshakeMetadata {
    fn default() -> Self {
        Self {
            driver_name: DRIVER_NAME.to_string(),
            driver_version: env!("CARGO_PKG_VERSION").to_string(),
            platform: None,
            app_name: None,
            frozen: false,
        }
    }
}

impl HandshakeMetadata {
    /// Appends information about a library wrapping this one. Each field is joined to the
    /// existing value with " / ".
    pub fn append_driver_info(
        &mut self,
        name: impl AsRef<str>,
        version: impl AsRef<str>,
        platform: Option<&str>,
    ) -> Result<()> {
        if self.frozen {
            return Err(Error::invalid_argument(
                "Cannot set handshake data after a client has been created",
            ));
        }
        self.driver_name = format!("{} / {}", self.driver_name, name.as_ref());
        self.driver_version = format!("{} / {}", self.driver_version, version.as_ref());
        if let Some(platform) = platform {
            self.platform = Some(match self.platform.take() {
                Some(existing) => format!("{} / {}", existing, platform),
                None => platform.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn set_app_name(&mut self, app_name: Option<String>) -> Result<()> {
        if self.frozen {
            return Err(Error::invalid_argument(
                "Cannot set handshake data after a client has been created",
            ));
        }
        self.app_name = app_name;
        Ok(())
    }

    /// Whether this metadata has been used to create a client.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub(crate) fn freeze(mut self) -> Self {
        self.frozen = true;
        self
    }

    /// The `client` document sent with the first handshake on every connection.
    pub(crate) fn to_document(&self) -> Document {
        let mut metadata = doc! {
            "driver": {
                "name": self.driver_name.as_str(),
                "version": self.driver_version.as_str(),
            },
            "os": {
                "type": std::env::consts::OS,
                "architecture": std::env::consts::ARCH,
            },
        };
        if let Some(ref app_name) = self.app_name {
            metadata.insert("application", doc! { "name": app_name.as_str() });
        }
        if let Some(ref platform) = self.platform {
            metadata.insert("platform", platform.as_str());
        }
        metadata
    }
}

/// Construct a hello or legacy hello command, depending on the circumstances.
///
/// If the server indicated `helloOk: true`, then `hello` will be used. Otherwise, legacy hello
/// will be used along with `helloOk: true`. Client metadata is only included when `metadata` is
/// given, which is the case for the first handshake on a connection.
pub(crate) fn hello_command(hello_ok: bool, metadata: Option<&HandshakeMetadata>) -> Command {
    let (mut body, command_name) = if hello_ok {
        (doc! { "hello": 1 }, "hello")
    } else {
        (
            doc! { LEGACY_HELLO_COMMAND_NAME: 1, "helloOk": true },
            LEGACY_HELLO_COMMAND_NAME,
        )
    };
    if let Some(metadata) = metadata {
        body.insert("client", metadata.to_document());
    }
    Command::new(command_name, "admin", body)
}

/// Execute a hello or legacy hello command, recording the stream description on connections
/// that have not completed a handshake yet.
pub(crate) async fn run_hello(conn: &mut Connection, command: Command) -> Result<HelloReply> {
    let (response, round_trip_time) = conn.handshake(command).await?;
    let cluster_time = response.cluster_time();
    let command_response: HelloCommandResponse = response.body()?;
    let reply = HelloReply {
        command_response,
        raw_command_response: response.into_raw_body(),
        cluster_time,
        round_trip_time,
    };
    if conn.stream_description.is_none() {
        conn.stream_description = Some(StreamDescription::from_hello_reply(&conn.address, &reply));
    }
    Ok(reply)
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HelloReply {
    pub(crate) command_response: HelloCommandResponse,
    pub(crate) raw_command_response: Document,
    pub(crate) cluster_time: Option<ClusterTime>,
    pub(crate) round_trip_time: Duration,
}

/// The response to a `hello` command.
///
/// See the documentation [here](https://www.mongodb.com/docs/manual/reference/command/hello/) for more details.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HelloCommandResponse {
    /// Whether the server is writable. If true, this instance is a primary in a replica set, a
    /// mongos instance, or a standalone mongod.
    pub is_writable_primary: Option<bool>,

    #[serde(rename = "ismaster")]
    /// Legacy name for `is_writable_primary` field.
    pub is_master: Option<bool>,

    /// Whether or not the server supports using the `hello` command for monitoring instead
    /// of the legacy hello command.
    pub hello_ok: Option<bool>,

    /// The list of all hosts.
    pub hosts: Option<Vec<String>>,

    /// The list of all passives in a replica set.
    pub passives: Option<Vec<String>>,

    /// The list of all arbiters in a replica set.
    pub arbiters: Option<Vec<String>>,

    /// An optional message. This contains the value "isdbgrid" when returned from a mongos.
    pub msg: Option<String>,

    /// The address of the server that returned this `HelloCommandResponse`.
    pub me: Option<String>,

    /// The current replica set config version.
    pub set_version: Option<i32>,

    /// The name of the current replica set.
    pub set_name: Option<String>,

    /// Whether the server is hidden.
    pub hidden: Option<bool>,

    /// Whether the server is a secondary.
    pub secondary: Option<bool>,

    /// Whether the server is an arbiter.
    pub arbiter_only: Option<bool>,

    #[serde(rename = "isreplicaset")]
    /// Whether the server is a replica set.
    pub is_replica_set: Option<bool>,

    /// The time in minutes that a session remains active after its most recent use.
    pub logical_session_timeout_minutes: Option<i64>,

    /// Optime and date information for the server's most recent write operation.
    pub last_write: Option<LastWrite>,

    /// The minimum wire version that the server supports.
    pub min_wire_version: Option<i32>,

    /// The maximum wire version that the server supports.
    pub max_wire_version: Option<i32>,

    /// User-defined tags for a replica set member.
    pub tags: Option<TagSet>,

    /// A unique identifier for each election.
    pub election_id: Option<ObjectId>,

    /// The address of current primary member of the replica set.
    pub primary: Option<String>,

    /// The maximum permitted size of a BSON wire protocol message.
    pub max_message_size_bytes: Option<i32>,

    /// If the connection is to a load balancer, the id of the selected backend.
    pub service_id: Option<ObjectId>,
}

impl HelloCommandResponse {
    pub(crate) fn server_type(&self) -> ServerType {
        if self.msg.as_deref() == Some("isdbgrid") {
            ServerType::Mongos
        } else if self.set_name.is_some() {
            if self.hidden == Some(true) {
                ServerType::RsOther
            } else if self.is_writable_primary == Some(true) || self.is_master == Some(true) {
                ServerType::RsPrimary
            } else if self.secondary == Some(true) {
                ServerType::RsSecondary
            } else if self.arbiter_only == Some(true) {
                ServerType::RsArbiter
            } else {
                ServerType::RsOther
            }
        } else if self.is_replica_set == Some(true) {
            ServerType::RsGhost
        } else {
            ServerType::Standalone
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LastWrite {
    pub last_write_date: DateTime,
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{hello_command, HandshakeMetadata, HelloCommandResponse};
    use crate::{bson::doc, sdam::ServerType};

    #[test]
    fn metadata_is_immutable_once_frozen() {
        let mut metadata = HandshakeMetadata::default();
        metadata
            .append_driver_info("wrapper", "1.2", Some("tokio"))
            .unwrap();
        let frozen = metadata.freeze();
        assert!(frozen.is_frozen());

        let mut copy = frozen.clone();
        assert!(copy.append_driver_info("other", "0.1", None).is_err());
        assert!(copy.set_app_name(Some("app".to_string())).is_err());

        let driver = frozen.to_document().get_document("driver").unwrap().clone();
        assert_eq!(
            driver.get_str("name").unwrap(),
            format!("{} / wrapper", super::DRIVER_NAME)
        );
        assert_eq!(frozen.to_document().get_str("platform").unwrap(), "tokio");
    }

    #[test]
    fn legacy_hello_until_hello_ok() {
        let command = hello_command(false, None);
        assert_eq!(command.name, "isMaster");
        assert_eq!(command.body, doc! { "isMaster": 1, "helloOk": true });

        let metadata = HandshakeMetadata::default();
        let command = hello_command(true, Some(&metadata));
        assert_eq!(command.name, "hello");
        assert!(command.body.contains_key("client"));
    }

    #[test]
    fn server_type_inference() {
        let response = |doc| -> HelloCommandResponse { crate::bson::from_document(doc).unwrap() };
        assert_eq!(
            response(doc! { "msg": "isdbgrid", "maxWireVersion": 8 }).server_type(),
            ServerType::Mongos
        );
        assert_eq!(
            response(doc! { "setName": "rs", "ismaster": true }).server_type(),
            ServerType::RsPrimary
        );
        assert_eq!(
            response(doc! { "setName": "rs", "secondary": true, "hidden": true }).server_type(),
            ServerType::RsOther
        );
        assert_eq!(
            response(doc! { "setName": "rs", "arbiterOnly": true }).server_type(),
            ServerType::RsArbiter
        );
        assert_eq!(
            response(doc! { "isreplicaset": true }).server_type(),
            ServerType::RsGhost
        );
        assert_eq!(response(doc! {}).server_type(), ServerType::Standalone);
    }
}
