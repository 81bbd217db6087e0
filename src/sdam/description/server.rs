use std::time::Duration;

use serde::Serialize;

use crate::{
    bson::{oid::ObjectId, DateTime},
    client::{options::ServerAddress, ClusterTime},
    error::{Error, Result},
    hello::HelloReply,
    selection_criteria::TagSet,
};

pub(crate) const MIN_WIRE_VERSION: i32 = 3;
pub(crate) const MAX_WIRE_VERSION: i32 = 8;
const MIN_DB_VERSION: &str = "3.0";

/// The round trip time recorded for a server that has never been measured.
pub(crate) const RTT_UNMEASURED: i64 = -1;

/// Enum representing the possible types of servers that the driver can connect to.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Serialize, derive_more::Display)]
#[non_exhaustive]
pub enum ServerType {
    /// A single, non-replica set mongod.
    Standalone,

    /// A router used in sharded deployments.
    Mongos,

    /// The primary node in a replica set.
    #[serde(rename = "RSPrimary")]
    #[display("RSPrimary")]
    RsPrimary,

    /// A secondary node in a replica set.
    #[serde(rename = "RSSecondary")]
    #[display("RSSecondary")]
    RsSecondary,

    /// A non-data bearing node in a replica set which can participate in elections.
    #[serde(rename = "RSArbiter")]
    #[display("RSArbiter")]
    RsArbiter,

    /// Hidden, starting up, or recovering nodes in a replica set.
    #[serde(rename = "RSOther")]
    #[display("RSOther")]
    RsOther,

    /// A member of an uninitialized replica set or a member that has been removed from the
    /// replica set config.
    #[serde(rename = "RSGhost")]
    #[display("RSGhost")]
    RsGhost,

    /// A load-balancing proxy between the driver and the MongoDB deployment.
    LoadBalancer,

    /// A server that another member named as the primary but which has not been checked yet.
    PossiblePrimary,

    /// A server that the driver hasn't yet communicated with or can't connect to.
    #[default]
    Unknown,
}

impl ServerType {
    pub(crate) fn is_data_bearing(self) -> bool {
        matches!(
            self,
            ServerType::Standalone
                | ServerType::RsPrimary
                | ServerType::RsSecondary
                | ServerType::Mongos
                | ServerType::LoadBalancer
        )
    }

    /// Whether a server of this type may be handed to an operation.
    pub(crate) fn is_available(self) -> bool {
        !matches!(self, ServerType::Unknown | ServerType::PossiblePrimary)
    }
}

/// A snapshot of the most recent information known about one server.
///
/// The `reply` field holds either the last handshake error, the last handshake reply, or
/// neither for a server that has been discovered but not checked yet. Accessors for reply fields
/// propagate a stored error with `?`.
#[derive(Debug, Clone)]
pub struct ServerDescription {
    pub(crate) id: u32,
    pub(crate) address: ServerAddress,
    pub(crate) server_type: ServerType,
    pub(crate) last_update_time: Option<DateTime>,

    /// Weighted round trip time in milliseconds, or `RTT_UNMEASURED`.
    pub(crate) round_trip_time_ms: i64,

    pub(crate) reply: std::result::Result<Option<HelloReply>, Error>,
}

impl PartialEq for ServerDescription {
    fn eq(&self, other: &Self) -> bool {
        if self.id != other.id
            || self.address != other.address
            || self.server_type != other.server_type
        {
            return false;
        }

        match (self.reply.as_ref(), other.reply.as_ref()) {
            (Ok(self_reply), Ok(other_reply)) => {
                let self_response = self_reply.as_ref().map(|r| &r.command_response);
                let other_response = other_reply.as_ref().map(|r| &r.command_response);

                self_response == other_response
            }
            (Err(self_err), Err(other_err)) => self_err.to_string() == other_err.to_string(),
            _ => false,
        }
    }
}

impl ServerDescription {
    /// A description of a server that has not been checked yet.
    pub(crate) fn new(id: u32, address: &ServerAddress) -> Self {
        Self {
            id,
            address: address.clone(),
            server_type: ServerType::Unknown,
            last_update_time: None,
            round_trip_time_ms: RTT_UNMEASURED,
            reply: Ok(None),
        }
    }

    /// A description built from a successful handshake. `previous_rtt_ms` is the round trip
    /// time recorded before this check, which is blended with the new sample. `check_started`
    /// orders this description against the one already recorded.
    pub(crate) fn new_from_reply(
        id: u32,
        address: &ServerAddress,
        mut reply: HelloReply,
        previous_rtt_ms: i64,
        check_started: DateTime,
    ) -> Self {
        let server_type = reply.command_response.server_type();

        let sample = reply.round_trip_time.as_millis().min(i64::MAX as u128) as i64;
        let round_trip_time_ms = if previous_rtt_ms == RTT_UNMEASURED {
            sample
        } else {
            sample / 5 + previous_rtt_ms * 4 / 5
        };

        let response = &mut reply.command_response;
        for list in [
            &mut response.hosts,
            &mut response.passives,
            &mut response.arbiters,
        ]
        .into_iter()
        .flatten()
        {
            for host in list.iter_mut() {
                *host = host.to_lowercase();
            }
        }
        if let Some(ref mut me) = response.me {
            *me = me.to_lowercase();
        }
        if let Some(ref mut primary) = response.primary {
            *primary = primary.to_lowercase();
        }

        Self {
            id,
            address: address.clone(),
            server_type,
            last_update_time: Some(check_started),
            round_trip_time_ms,
            reply: Ok(Some(reply)),
        }
    }

    /// A description of a server whose check failed, or that an operation invalidated at
    /// `when`. The server is reset to Unknown.
    pub(crate) fn new_from_error(
        id: u32,
        address: &ServerAddress,
        error: Error,
        when: DateTime,
    ) -> Self {
        Self {
            id,
            address: address.clone(),
            server_type: ServerType::Unknown,
            last_update_time: Some(when),
            round_trip_time_ms: RTT_UNMEASURED,
            reply: Err(error),
        }
    }

    /// The id of this server, stable for the lifetime of the client.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The address of this server.
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// The type of this server.
    pub fn server_type(&self) -> ServerType {
        self.server_type
    }

    /// The weighted round trip time to this server, or `None` if it has never been measured.
    pub fn round_trip_time(&self) -> Option<Duration> {
        u64::try_from(self.round_trip_time_ms)
            .ok()
            .map(Duration::from_millis)
    }

    /// The error from the most recent check of this server, if it failed.
    pub fn error(&self) -> Option<&Error> {
        self.reply.as_ref().err()
    }

    /// The maximum wire version this server reported.
    pub fn max_wire_version(&self) -> Option<i32> {
        self.reply_ref()
            .and_then(|reply| reply.command_response.max_wire_version)
    }

    /// The minimum wire version this server reported.
    pub fn min_wire_version(&self) -> Option<i32> {
        self.reply_ref()
            .and_then(|reply| reply.command_response.min_wire_version)
    }

    fn reply_ref(&self) -> Option<&HelloReply> {
        self.reply.as_ref().ok().and_then(Option::as_ref)
    }

    fn reply(&self) -> Result<Option<&HelloReply>> {
        self.reply.as_ref().map(Option::as_ref).map_err(Clone::clone)
    }

    pub(crate) fn is_available(&self) -> bool {
        self.server_type.is_available()
    }

    /// A message describing why this server cannot be used with this driver, if its wire version
    /// range does not overlap the supported one. Unknown servers are never incompatible.
    pub(crate) fn compatibility_error_message(&self) -> Option<String> {
        if matches!(
            self.server_type,
            ServerType::Unknown | ServerType::PossiblePrimary
        ) {
            return None;
        }

        let reply = self.reply_ref()?;
        let min_wire_version = reply.command_response.min_wire_version.unwrap_or(0);
        if min_wire_version > MAX_WIRE_VERSION {
            return Some(format!(
                "Server at {} requires wire version {}, but this version of libmongoc only \
                 supports up to {}",
                self.address, min_wire_version, MAX_WIRE_VERSION,
            ));
        }

        let max_wire_version = reply.command_response.max_wire_version.unwrap_or(0);
        if max_wire_version < MIN_WIRE_VERSION {
            return Some(format!(
                "Server at {} reports wire version {}, but this version of libmongoc requires \
                 at least {} (MongoDB {})",
                self.address, max_wire_version, MIN_WIRE_VERSION, MIN_DB_VERSION,
            ));
        }

        None
    }

    pub(crate) fn set_name(&self) -> Result<Option<String>> {
        Ok(self
            .reply()?
            .and_then(|reply| reply.command_response.set_name.clone()))
    }

    /// The members listed in this server's hosts, passives, and arbiters.
    pub(crate) fn known_hosts(&self) -> Result<Vec<ServerAddress>> {
        let reply = match self.reply()? {
            Some(reply) => reply,
            None => return Ok(Vec::new()),
        };
        let response = &reply.command_response;
        response
            .hosts
            .iter()
            .flatten()
            .chain(response.passives.iter().flatten())
            .chain(response.arbiters.iter().flatten())
            .map(ServerAddress::parse)
            .collect()
    }

    /// Whether `address` is listed as a member by this server.
    pub(crate) fn has_rs_member(&self, address: &ServerAddress) -> Result<bool> {
        Ok(self.known_hosts()?.iter().any(|host| host == address))
    }

    /// Whether this server reports a `me` field that differs from the address it was reached at.
    pub(crate) fn invalid_me(&self) -> Result<bool> {
        if let Some(reply) = self.reply()? {
            if let Some(ref me) = reply.command_response.me {
                return Ok(ServerAddress::parse(me)? != self.address);
            }
        }

        Ok(false)
    }

    /// The member this server believes to be primary.
    pub(crate) fn primary(&self) -> Result<Option<ServerAddress>> {
        self.reply()?
            .and_then(|reply| reply.command_response.primary.as_deref())
            .map(ServerAddress::parse)
            .transpose()
    }

    pub(crate) fn set_version(&self) -> Result<Option<i32>> {
        Ok(self
            .reply()?
            .and_then(|reply| reply.command_response.set_version))
    }

    pub(crate) fn election_id(&self) -> Result<Option<ObjectId>> {
        Ok(self
            .reply()?
            .and_then(|reply| reply.command_response.election_id))
    }

    pub(crate) fn last_write_date(&self) -> Result<Option<DateTime>> {
        Ok(self.reply()?.and_then(|reply| {
            reply
                .command_response
                .last_write
                .as_ref()
                .map(|write| write.last_write_date)
        }))
    }

    pub(crate) fn logical_session_timeout(&self) -> Result<Option<Duration>> {
        Ok(self.reply()?.and_then(|reply| {
            reply
                .command_response
                .logical_session_timeout_minutes
                .map(|timeout| Duration::from_secs(timeout as u64 * 60))
        }))
    }

    pub(crate) fn cluster_time(&self) -> Result<Option<ClusterTime>> {
        Ok(self.reply()?.and_then(|reply| reply.cluster_time.clone()))
    }

    pub(crate) fn matches_tag_set(&self, tag_set: &TagSet) -> bool {
        let server_tags = match self
            .reply_ref()
            .and_then(|reply| reply.command_response.tags.as_ref())
        {
            Some(tags) => tags,
            None => return tag_set.is_empty(),
        };

        tag_set
            .iter()
            .all(|(key, val)| server_tags.get(key) == Some(val))
    }
}

impl std::fmt::Display for ServerDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ Address: {}, Type: {}",
            self.address, self.server_type
        )?;
        if let Some(rtt) = self.round_trip_time() {
            write!(f, ", Average RTT: {:?}", rtt)?;
        }
        if let Some(max_wire_version) = self.max_wire_version() {
            write!(f, ", Max Wire Version: {}", max_wire_version)?;
        }
        if let Err(ref e) = self.reply {
            write!(f, ", Error: {}", e)?;
        }
        write!(f, " }}")
    }
}
