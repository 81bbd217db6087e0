pub(crate) mod server_selection;
#[cfg(test)]
mod test;

use std::{collections::HashMap, fmt, time::Duration};

use serde::Serialize;

use crate::{
    bson::{oid::ObjectId, DateTime},
    client::{
        options::{ClientOptions, ServerAddress},
        ClusterTime,
    },
    cmap::Command,
    error::{Error, Result},
    sdam::description::server::{ServerDescription, ServerType},
    selection_criteria::ReadPreference,
};

/// The possible types for a topology.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Default, derive_more::Display)]
#[non_exhaustive]
pub enum TopologyType {
    /// A single mongod server.
    Single,

    /// A replica set with no primary.
    ReplicaSetNoPrimary,

    /// A replica set with a primary.
    ReplicaSetWithPrimary,

    /// A sharded topology.
    Sharded,

    /// A load balanced topology.
    LoadBalanced,

    /// A topology whose type is not known.
    #[default]
    Unknown,
}

/// A description of the most up-to-date information known about a topology.
#[derive(Debug, Clone, Default)]
pub(crate) struct TopologyDescription {
    /// Whether or not the topology was initialized with a single seed.
    pub(crate) single_seed: bool,

    /// The current type of the topology.
    pub(crate) topology_type: TopologyType,

    /// The replica set name of the topology. Once known it never changes.
    pub(crate) set_name: Option<String>,

    /// The highest replica set version the driver has seen by a member of the topology.
    pub(crate) max_set_version: Option<i32>,

    /// The highest replica set election id the driver has seen by a member of the topology.
    pub(crate) max_election_id: Option<ObjectId>,

    /// Describes the compatibility issue between the driver and server with regards to the
    /// respective supported wire versions.
    pub(crate) compatibility_error: Option<String>,

    /// The time that a session remains active after its most recent use.
    pub(crate) logical_session_timeout: Option<Duration>,

    /// The highest reported cluster time by any server in this topology.
    pub(crate) cluster_time: Option<ClusterTime>,

    pub(crate) local_threshold: Option<Duration>,

    pub(crate) heartbeat_freq: Option<Duration>,

    /// The server descriptions of each member of the topology, keyed by server id.
    pub(crate) servers: HashMap<u32, ServerDescription>,

    next_server_id: u32,
}

impl PartialEq for TopologyDescription {
    fn eq(&self, other: &Self) -> bool {
        // Only the fields consulted by server selection matter for waking waiters.
        self.compatibility_error == other.compatibility_error
            && self.servers == other.servers
            && self.topology_type == other.topology_type
    }
}

impl TopologyDescription {
    pub(crate) fn new(options: &ClientOptions) -> Self {
        let mut description = Self {
            topology_type: if options.load_balanced == Some(true) {
                TopologyType::LoadBalanced
            } else if options.is_direct() {
                TopologyType::Single
            } else if options.repl_set_name.is_some() {
                TopologyType::ReplicaSetNoPrimary
            } else {
                TopologyType::Unknown
            },
            set_name: options.repl_set_name.clone(),
            local_threshold: options.local_threshold,
            heartbeat_freq: Some(options.heartbeat_freq()),
            next_server_id: 1,
            ..Default::default()
        };

        for address in options.hosts.iter() {
            description.add_server(address);
        }
        description.single_seed = description.servers.len() == 1;

        if description.topology_type == TopologyType::LoadBalanced {
            // Load balancers are never checked; the single seed is usable right away.
            for server in description.servers.values_mut() {
                server.server_type = ServerType::LoadBalancer;
            }
        }

        description
    }

    /// Gets the topology type of the cluster.
    pub(crate) fn topology_type(&self) -> TopologyType {
        self.topology_type
    }

    pub(crate) fn cluster_time(&self) -> Option<&ClusterTime> {
        self.cluster_time.as_ref()
    }

    pub(crate) fn server(&self, id: u32) -> Option<&ServerDescription> {
        self.servers.get(&id)
    }

    pub(crate) fn server_by_address(&self, address: &ServerAddress) -> Option<&ServerDescription> {
        self.servers.values().find(|sd| &sd.address == address)
    }

    pub(crate) fn compatibility_error(&self) -> Option<&String> {
        self.compatibility_error.as_ref()
    }

    pub(crate) fn logical_session_timeout(&self) -> Option<Duration> {
        self.logical_session_timeout
    }

    /// Adds an unchecked server for `address` unless one is already present. Returns its id.
    pub(crate) fn add_server(&mut self, address: &ServerAddress) -> u32 {
        if let Some(existing) = self.server_by_address(address) {
            return existing.id;
        }
        let id = self.next_server_id;
        self.next_server_id += 1;
        self.servers.insert(id, ServerDescription::new(id, address));
        id
    }

    fn remove_server(&mut self, id: u32) {
        self.servers.remove(&id);
    }

    /// Adds `$readPreference` and the secondaryOk bit to a read command bound for `server_id`,
    /// depending on the topology and server type.
    pub(crate) fn update_command_with_read_pref(
        &self,
        server_id: u32,
        command: &mut Command,
        read_preference: Option<&ReadPreference>,
    ) {
        let server_type = self
            .server(server_id)
            .map(|sd| sd.server_type)
            .unwrap_or(ServerType::Unknown);

        match (self.topology_type, server_type) {
            (TopologyType::Sharded, ServerType::Mongos)
            | (TopologyType::Single, ServerType::Mongos)
            | (TopologyType::LoadBalanced, _) => {
                if let Some(read_preference) = read_preference {
                    // Mongos treats a bare secondaryOk as secondaryPreferred, so only modes
                    // that cannot be expressed by the flag alone are forwarded.
                    match read_preference {
                        ReadPreference::SecondaryPreferred { options: None } => {}
                        ReadPreference::Primary => return,
                        other => command.set_read_preference(other.clone()),
                    }
                    command.secondary_ok = true;
                }
            }
            (TopologyType::Single, ServerType::Standalone) => {}
            (TopologyType::Single, _) => {
                let resolved = match read_preference {
                    Some(ReadPreference::Primary) | None => {
                        ReadPreference::PrimaryPreferred { options: None }
                    }
                    Some(other) => other.clone(),
                };
                command.secondary_ok = true;
                command.set_read_preference(resolved);
            }
            _ => {
                if let Some(read_preference) = read_preference {
                    if read_preference.secondary_ok() {
                        command.secondary_ok = true;
                        command.set_read_preference(read_preference.clone());
                    }
                }
            }
        }
    }

    /// Gets the heartbeat frequency.
    pub(crate) fn heartbeat_frequency(&self) -> Duration {
        self.heartbeat_freq
            .unwrap_or(crate::client::options::DEFAULT_HEARTBEAT_FREQUENCY_SINGLE)
    }

    /// Check the cluster for a compatibility error, and record the error message if one is found.
    fn check_compatibility(&mut self) {
        self.compatibility_error = None;

        for server in self.servers.values() {
            let error_message = server.compatibility_error_message();

            if error_message.is_some() {
                self.compatibility_error = error_message;
                return;
            }
        }
    }

    /// Updates the topology's logical session timeout value based on the server's value for it.
    fn update_logical_session_timeout(&mut self, server_description: &ServerDescription) {
        if !server_description.server_type.is_data_bearing() {
            return;
        }
        match server_description.logical_session_timeout().ok().flatten() {
            Some(new_timeout) => match self.logical_session_timeout {
                Some(current_timeout) => {
                    self.logical_session_timeout =
                        Some(std::cmp::min(current_timeout, new_timeout));
                }
                None => {
                    self.logical_session_timeout = self
                        .servers
                        .values()
                        .filter(|s| s.server_type.is_data_bearing())
                        .map(|s| s.logical_session_timeout().ok().flatten())
                        .min()
                        .flatten();
                }
            },
            // A data-bearing server without a timeout means sessions are unsupported.
            None => self.logical_session_timeout = None,
        }
    }

    /// Sets the topology's cluster time to the provided one if it is higher than the currently
    /// recorded one.
    pub(crate) fn advance_cluster_time(&mut self, cluster_time: &ClusterTime) {
        if self.cluster_time.as_ref() >= Some(cluster_time) {
            return;
        }
        self.cluster_time = Some(cluster_time.clone());
    }

    /// Marks a server Unknown after an operation against it failed.
    pub(crate) fn invalidate_server(&mut self, id: u32, error: Error) -> Result<bool> {
        let address = match self.servers.get(&id) {
            Some(sd) => sd.address.clone(),
            None => return Ok(false),
        };
        self.update(ServerDescription::new_from_error(
            id,
            &address,
            error,
            DateTime::now(),
        ))?;
        Ok(true)
    }

    /// Update the topology based on the new information about the topology contained by the
    /// ServerDescription.
    pub(crate) fn update(&mut self, mut server_description: ServerDescription) -> Result<()> {
        match self.servers.get(&server_description.id) {
            None => return Ok(()),
            Some(existing_sd) => {
                // Ignore results of a check that started before the one already recorded.
                if let (Some(existing), Some(new)) = (
                    existing_sd.last_update_time,
                    server_description.last_update_time,
                ) {
                    if new < existing {
                        return Ok(());
                    }
                }
            }
        }

        if let Some(expected_name) = &self.set_name {
            if self.topology_type == TopologyType::Single && server_description.is_available() {
                let got_name = server_description.set_name();
                if !matches!(
                    got_name.as_ref().map(|opt| opt.as_ref()),
                    Ok(Some(name)) if name == expected_name
                ) {
                    let got_display = match got_name {
                        Ok(Some(s)) => format!("{:?}", s),
                        Ok(None) => "<none>".to_string(),
                        Err(s) => format!("<error: {}>", s),
                    };
                    server_description = ServerDescription::new_from_error(
                        server_description.id,
                        &server_description.address,
                        Error::invalid_argument(format!(
                            "Connection string replicaSet name {:?} does not match actual name {}",
                            expected_name, got_display,
                        )),
                        server_description
                            .last_update_time
                            .unwrap_or_else(DateTime::now),
                    );
                }
            }
        }

        // Replace the old info about the server with the new info.
        self.servers
            .insert(server_description.id, server_description.clone());

        if let TopologyType::LoadBalanced = self.topology_type {
            return Ok(());
        }

        self.update_logical_session_timeout(&server_description);

        if let Some(ref cluster_time) = server_description.cluster_time().ok().flatten() {
            self.advance_cluster_time(cluster_time);
        }

        match self.topology_type {
            TopologyType::Single | TopologyType::LoadBalanced => {}
            TopologyType::Unknown => self.update_unknown_topology(server_description)?,
            TopologyType::Sharded => self.update_sharded_topology(server_description),
            TopologyType::ReplicaSetNoPrimary => {
                self.update_replica_set_no_primary_topology(server_description)?
            }
            TopologyType::ReplicaSetWithPrimary => {
                self.update_replica_set_with_primary_topology(server_description)?;
            }
        }

        self.check_compatibility();

        Ok(())
    }

    /// Update the Unknown topology description based on the server description.
    fn update_unknown_topology(&mut self, server_description: ServerDescription) -> Result<()> {
        match server_description.server_type {
            ServerType::Unknown | ServerType::RsGhost | ServerType::PossiblePrimary => {}
            ServerType::Standalone => {
                self.update_unknown_with_standalone_server(server_description)
            }
            ServerType::Mongos => self.topology_type = TopologyType::Sharded,
            ServerType::RsPrimary => {
                self.topology_type = TopologyType::ReplicaSetWithPrimary;
                self.update_rs_from_primary_server(server_description)?;
            }
            ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther => {
                self.topology_type = TopologyType::ReplicaSetNoPrimary;
                self.update_rs_without_primary_server(server_description)?;
            }
            ServerType::LoadBalancer => {
                return Err(Error::internal("cannot transition to a load balancer"))
            }
        }

        Ok(())
    }

    /// Update the Sharded topology description based on the server description.
    fn update_sharded_topology(&mut self, server_description: ServerDescription) {
        match server_description.server_type {
            ServerType::Unknown | ServerType::Mongos | ServerType::PossiblePrimary => {}
            _ => self.remove_server(server_description.id),
        }
    }

    /// Update the ReplicaSetNoPrimary topology description based on the server description.
    fn update_replica_set_no_primary_topology(
        &mut self,
        server_description: ServerDescription,
    ) -> Result<()> {
        match server_description.server_type {
            ServerType::Unknown | ServerType::RsGhost | ServerType::PossiblePrimary => {}
            ServerType::Standalone | ServerType::Mongos => {
                self.remove_server(server_description.id);
            }
            ServerType::RsPrimary => {
                self.topology_type = TopologyType::ReplicaSetWithPrimary;
                self.update_rs_from_primary_server(server_description)?
            }
            ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther => {
                self.update_rs_without_primary_server(server_description)?;
            }
            ServerType::LoadBalancer => {
                return Err(Error::internal("cannot transition to a load balancer"))
            }
        }

        Ok(())
    }

    /// Update the ReplicaSetWithPrimary topology description based on the server description.
    fn update_replica_set_with_primary_topology(
        &mut self,
        server_description: ServerDescription,
    ) -> Result<()> {
        match server_description.server_type {
            ServerType::Unknown | ServerType::RsGhost | ServerType::PossiblePrimary => {
                self.record_primary_state();
            }
            ServerType::Standalone | ServerType::Mongos => {
                self.remove_server(server_description.id);
                self.record_primary_state();
            }
            ServerType::RsPrimary => self.update_rs_from_primary_server(server_description)?,
            ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther => {
                self.update_rs_with_primary_from_member(server_description)?;
            }
            ServerType::LoadBalancer => {
                return Err(Error::internal("cannot transition to a load balancer"));
            }
        }

        Ok(())
    }

    /// Update the Unknown topology description based on the Standalone server description.
    fn update_unknown_with_standalone_server(&mut self, server_description: ServerDescription) {
        if self.single_seed {
            self.topology_type = TopologyType::Single;
        } else {
            self.remove_server(server_description.id);
        }
    }

    /// Update the ReplicaSetNoPrimary topology description based on the non-primary server
    /// description.
    fn update_rs_without_primary_server(
        &mut self,
        server_description: ServerDescription,
    ) -> Result<()> {
        if self.set_name.is_none() {
            self.set_name = server_description.set_name()?;
        } else if self.set_name != server_description.set_name()? {
            self.remove_server(server_description.id);

            return Ok(());
        }

        self.add_new_servers(server_description.known_hosts()?);

        if let Some(primary) = server_description.primary()? {
            self.label_possible_primary(&primary);
        }

        if server_description.invalid_me()? {
            self.remove_server(server_description.id);
        }

        Ok(())
    }

    /// Update the ReplicaSetWithPrimary topology description based on the non-primary server
    /// description.
    fn update_rs_with_primary_from_member(
        &mut self,
        server_description: ServerDescription,
    ) -> Result<()> {
        if self.set_name != server_description.set_name()? {
            self.remove_server(server_description.id);
            self.record_primary_state();

            return Ok(());
        }

        if server_description.invalid_me()? {
            self.remove_server(server_description.id);
            self.record_primary_state();

            return Ok(());
        }

        self.record_primary_state();
        if self.topology_type == TopologyType::ReplicaSetNoPrimary {
            if let Some(primary) = server_description.primary()? {
                self.label_possible_primary(&primary);
            }
        }

        Ok(())
    }

    /// Update the replica set topology description based on the RSPrimary server description.
    fn update_rs_from_primary_server(
        &mut self,
        server_description: ServerDescription,
    ) -> Result<()> {
        if self.set_name.is_none() {
            self.set_name = server_description.set_name()?;
        } else if self.set_name != server_description.set_name()? {
            self.remove_server(server_description.id);
            self.record_primary_state();

            return Ok(());
        }

        if let Some(server_set_version) = server_description.set_version()? {
            if let Some(server_election_id) = server_description.election_id()? {
                if let (Some(topology_max_set_version), Some(topology_max_election_id)) =
                    (self.max_set_version, self.max_election_id.as_ref())
                {
                    if topology_max_set_version > server_set_version
                        || (topology_max_set_version == server_set_version
                            && *topology_max_election_id > server_election_id)
                    {
                        // A stale primary; forget what it said and check it again later.
                        self.servers.insert(
                            server_description.id,
                            ServerDescription::new(server_description.id, &server_description.address),
                        );
                        self.record_primary_state();
                        return Ok(());
                    }
                }

                self.max_election_id = Some(server_election_id);
            }
        }

        if let Some(server_set_version) = server_description.set_version()? {
            if self
                .max_set_version
                .map(|topology_max_set_version| server_set_version > topology_max_set_version)
                .unwrap_or(true)
            {
                self.max_set_version = Some(server_set_version);
            }
        }

        // Demote any other primary so that at most one is ever recorded.
        let stale_primaries: Vec<(u32, ServerAddress)> = self
            .servers
            .values()
            .filter(|sd| {
                sd.id != server_description.id && sd.server_type == ServerType::RsPrimary
            })
            .map(|sd| (sd.id, sd.address.clone()))
            .collect();
        for (id, address) in stale_primaries {
            self.servers.insert(id, ServerDescription::new(id, &address));
        }

        self.add_new_servers(server_description.known_hosts()?);

        let unreported: Vec<u32> = self
            .servers
            .values()
            .filter(|sd| {
                !server_description
                    .has_rs_member(&sd.address)
                    .unwrap_or(false)
            })
            .map(|sd| sd.id)
            .collect();
        for id in unreported {
            self.remove_server(id);
        }

        self.record_primary_state();

        Ok(())
    }

    /// Marks an Unknown member as the possible primary named by another member.
    fn label_possible_primary(&mut self, address: &ServerAddress) {
        if let Some(server) = self
            .servers
            .values_mut()
            .find(|sd| &sd.address == address)
        {
            if server.server_type == ServerType::Unknown {
                server.server_type = ServerType::PossiblePrimary;
            }
        }
    }

    /// Inspect the topology for a primary server, and update the topology type to
    /// ReplicaSetNoPrimary if none is found.
    fn record_primary_state(&mut self) {
        self.topology_type = if self
            .servers
            .values()
            .any(|server| server.server_type == ServerType::RsPrimary)
        {
            TopologyType::ReplicaSetWithPrimary
        } else {
            TopologyType::ReplicaSetNoPrimary
        };
    }

    /// Create a new ServerDescription for each address and add it to the topology.
    fn add_new_servers(&mut self, addresses: impl IntoIterator<Item = ServerAddress>) {
        for address in addresses {
            self.add_server(&address);
        }
    }
}

impl fmt::Display for TopologyDescription {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::result::Result<(), fmt::Error> {
        write!(f, "{{ Type: {}", self.topology_type)?;

        if let Some(ref set_name) = self.set_name {
            write!(f, ", Set Name: {}", set_name)?;
        }

        if let Some(max_set_version) = self.max_set_version {
            write!(f, ", Max Set Version: {}", max_set_version)?;
        }

        if let Some(max_election_id) = self.max_election_id {
            write!(f, ", Max Election ID: {}", max_election_id)?;
        }

        if let Some(ref compatibility_error) = self.compatibility_error {
            write!(f, ", Compatibility Error: {}", compatibility_error)?;
        }

        if !self.servers.is_empty() {
            let mut servers: Vec<_> = self.servers.values().collect();
            servers.sort_by_key(|sd| sd.id);
            write!(f, ", Servers: [ ")?;
            for (i, server) in servers.into_iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", server)?;
            }
            write!(f, " ]")?;
        }

        write!(f, " }}")
    }
}
