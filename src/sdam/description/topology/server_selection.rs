
use std::time::Duration;

use rand::{seq::IndexedRandom, SeedableRng};

use super::{TopologyDescription, TopologyType};
use crate::{
    client::options::DEFAULT_LOCAL_THRESHOLD,
    error::{Error, ErrorKind, Result},
    sdam::description::server::{ServerDescription, ServerType},
    selection_criteria::{OperationType, ReadPreference, TagSet, SMALLEST_MAX_STALENESS},
};

pub(crate) const IDLE_WRITE_PERIOD: Duration = Duration::from_secs(10);

impl TopologyDescription {
    /// Picks a server for an operation, or returns `None` if no server is suitable yet.
    ///
    /// Fails outright if any server's wire version range is incompatible with this driver.
    pub(crate) fn select_server(
        &self,
        operation_type: OperationType,
        read_preference: &ReadPreference,
    ) -> Result<Option<&ServerDescription>> {
        let in_window = self.suitable_servers_in_latency_window(operation_type, read_preference)?;
        Ok(choose_one(&in_window).copied())
    }

    pub(crate) fn suitable_servers_in_latency_window(
        &self,
        operation_type: OperationType,
        read_preference: &ReadPreference,
    ) -> Result<Vec<&ServerDescription>> {
        if let Some(message) = self.compatibility_error() {
            return Err(ErrorKind::IncompatibleServer {
                message: message.to_string(),
            }
            .into());
        }

        let mut suitable_servers = self.suitable_servers(operation_type, read_preference)?;
        self.retain_servers_within_latency_window(&mut suitable_servers);

        Ok(suitable_servers)
    }

    pub(crate) fn has_available_servers(&self) -> bool {
        self.servers.values().any(|server| server.is_available())
    }

    fn suitable_servers(
        &self,
        operation_type: OperationType,
        read_preference: &ReadPreference,
    ) -> Result<Vec<&ServerDescription>> {
        let servers = match self.topology_type {
            TopologyType::Unknown => Vec::new(),
            TopologyType::Single | TopologyType::LoadBalanced => self
                .servers
                .values()
                .filter(|s| s.is_available())
                .collect(),
            TopologyType::Sharded => self.servers_with_type(&[ServerType::Mongos]).collect(),
            TopologyType::ReplicaSetWithPrimary | TopologyType::ReplicaSetNoPrimary => {
                match operation_type {
                    OperationType::Write => {
                        self.servers_with_type(&[ServerType::RsPrimary]).collect()
                    }
                    OperationType::Read => self.suitable_servers_in_replica_set(read_preference)?,
                }
            }
        };

        Ok(servers)
    }

    fn retain_servers_within_latency_window(&self, suitable_servers: &mut Vec<&ServerDescription>) {
        let shortest_rtt = suitable_servers
            .iter()
            .filter_map(|server_desc| server_desc.round_trip_time())
            .min();

        let local_threshold = self.local_threshold.unwrap_or(DEFAULT_LOCAL_THRESHOLD);

        let max_rtt_within_window = shortest_rtt
            .map(|rtt| rtt.checked_add(local_threshold).unwrap_or(Duration::MAX));

        suitable_servers.retain(move |server_desc| {
            match (server_desc.round_trip_time(), max_rtt_within_window) {
                (Some(server_rtt), Some(max_rtt)) => server_rtt <= max_rtt,
                // Load balancers are never checked, so they have no round trip time.
                _ => matches!(server_desc.server_type, ServerType::LoadBalancer),
            }
        });
    }

    pub(crate) fn servers_with_type<'a>(
        &'a self,
        types: &'a [ServerType],
    ) -> impl Iterator<Item = &'a ServerDescription> {
        self.servers
            .values()
            .filter(move |server| types.contains(&server.server_type))
    }

    #[cfg(test)]
    pub(crate) fn primary(&self) -> Option<&ServerDescription> {
        self.servers_with_type(&[ServerType::RsPrimary]).next()
    }

    fn suitable_servers_in_replica_set(
        &self,
        read_preference: &ReadPreference,
    ) -> Result<Vec<&ServerDescription>> {
        let tag_sets = read_preference.tag_sets();
        let max_staleness = read_preference.max_staleness();

        let servers = match read_preference {
            ReadPreference::Primary => self.servers_with_type(&[ServerType::RsPrimary]).collect(),
            ReadPreference::Secondary { .. } => self.suitable_servers_for_read_preference(
                &[ServerType::RsSecondary],
                tag_sets,
                max_staleness,
            )?,
            ReadPreference::PrimaryPreferred { .. } => {
                match self.servers_with_type(&[ServerType::RsPrimary]).next() {
                    Some(primary) => vec![primary],
                    None => self.suitable_servers_for_read_preference(
                        &[ServerType::RsSecondary],
                        tag_sets,
                        max_staleness,
                    )?,
                }
            }
            ReadPreference::SecondaryPreferred { .. } => {
                let suitable_servers = self.suitable_servers_for_read_preference(
                    &[ServerType::RsSecondary],
                    tag_sets,
                    max_staleness,
                )?;

                if suitable_servers.is_empty() {
                    self.servers_with_type(&[ServerType::RsPrimary]).collect()
                } else {
                    suitable_servers
                }
            }
            ReadPreference::Nearest { .. } => self.suitable_servers_for_read_preference(
                &[ServerType::RsPrimary, ServerType::RsSecondary],
                tag_sets,
                max_staleness,
            )?,
        };

        Ok(servers)
    }

    fn suitable_servers_for_read_preference(
        &self,
        types: &'static [ServerType],
        tag_sets: Option<&Vec<TagSet>>,
        max_staleness: Option<Duration>,
    ) -> Result<Vec<&ServerDescription>> {
        if let Some(max_staleness) = max_staleness {
            verify_max_staleness(max_staleness, self.heartbeat_frequency())?;
        }

        let mut servers = self.servers_with_type(types).collect();

        if let Some(max_staleness) = max_staleness {
            if max_staleness > Duration::ZERO {
                self.filter_servers_by_max_staleness(&mut servers, max_staleness);
            }
        }

        if let Some(tag_sets) = tag_sets {
            filter_servers_by_tag_sets(&mut servers, tag_sets);
        }

        Ok(servers)
    }

    fn filter_servers_by_max_staleness(
        &self,
        servers: &mut Vec<&ServerDescription>,
        max_staleness: Duration,
    ) {
        let max_staleness_ms = max_staleness.as_millis().try_into().unwrap_or(i64::MAX);

        match self.servers_with_type(&[ServerType::RsPrimary]).next() {
            Some(primary) => servers.retain(|server| {
                server.server_type == ServerType::RsPrimary
                    || self
                        .secondary_staleness_with_primary(server, primary)
                        .is_some_and(|staleness| staleness <= max_staleness_ms)
            }),
            None => {
                let max_write_date = match self
                    .servers_with_type(&[ServerType::RsSecondary])
                    .filter_map(|server| server.last_write_date().ok().flatten())
                    .map(|date| date.timestamp_millis())
                    .max()
                {
                    Some(max_write_date) => max_write_date,
                    None => return,
                };

                servers.retain(|server| {
                    self.secondary_staleness_without_primary(server, max_write_date)
                        .is_some_and(|staleness| staleness <= max_staleness_ms)
                })
            }
        }
    }

    fn heartbeat_frequency_ms(&self) -> i64 {
        self.heartbeat_frequency()
            .as_millis()
            .try_into()
            .unwrap_or(i64::MAX)
    }

    fn secondary_staleness_with_primary(
        &self,
        secondary: &ServerDescription,
        primary: &ServerDescription,
    ) -> Option<i64> {
        let primary_last_update = primary.last_update_time?.timestamp_millis();
        let primary_last_write = primary.last_write_date().ok()??.timestamp_millis();

        let secondary_last_update = secondary.last_update_time?.timestamp_millis();
        let secondary_last_write = secondary.last_write_date().ok()??.timestamp_millis();

        Some(
            (secondary_last_update - secondary_last_write)
                - (primary_last_update - primary_last_write)
                + self.heartbeat_frequency_ms(),
        )
    }

    fn secondary_staleness_without_primary(
        &self,
        secondary: &ServerDescription,
        max_last_write_date: i64,
    ) -> Option<i64> {
        let secondary_last_write = secondary.last_write_date().ok()??.timestamp_millis();
        Some(max_last_write_date - secondary_last_write + self.heartbeat_frequency_ms())
    }
}

fn choose_one<'a, T>(values: &'a [T]) -> Option<&'a T> {
    values.choose(&mut rand::rngs::SmallRng::from_os_rng())
}

fn filter_servers_by_tag_sets(servers: &mut Vec<&ServerDescription>, tag_sets: &[TagSet]) {
    if tag_sets.is_empty() {
        return;
    }

    for tag_set in tag_sets {
        let matches_tag_set = |server: &&ServerDescription| server.matches_tag_set(tag_set);

        if servers.iter().any(matches_tag_set) {
            servers.retain(matches_tag_set);

            return;
        }
    }

    servers.clear();
}

pub(crate) fn verify_max_staleness(max_staleness: Duration, heartbeat_frequency: Duration) -> Result<()> {
    let smallest_max_staleness = std::cmp::max(
        SMALLEST_MAX_STALENESS,
        heartbeat_frequency
            .checked_add(IDLE_WRITE_PERIOD)
            .unwrap_or(Duration::MAX),
    );

    if max_staleness < smallest_max_staleness {
        return Err(Error::invalid_argument(format!(
            "invalid max_staleness value: must be at least {} seconds",
            smallest_max_staleness.as_secs()
        )));
    }

    Ok(())
}
