//! Contains the options that can be used to create a new [`Client`](../struct.Client.html).

#[cfg(test)]
mod test;

use std::{
    fmt::{self, Display, Formatter},
    hash::{Hash, Hasher},
    str::FromStr,
    time::Duration,
};

use typed_builder::TypedBuilder;

use crate::{
    error::{Error, Result},
    selection_criteria::{ReadPreference, TagSet},
};

pub(crate) const DEFAULT_PORT: u16 = 27017;

pub(crate) const DEFAULT_HEARTBEAT_FREQUENCY_SINGLE: Duration = Duration::from_secs(60);
pub(crate) const DEFAULT_HEARTBEAT_FREQUENCY_POOLED: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_MIN_HEARTBEAT_FREQUENCY: Duration = Duration::from_millis(500);
pub(crate) const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);
pub(crate) const DEFAULT_LOCAL_THRESHOLD: Duration = Duration::from_millis(15);
pub(crate) const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const URI_SCHEME: &str = "mongodb://";

/// An enum representing the address of a MongoDB server.
#[derive(Clone, Debug, Eq)]
#[non_exhaustive]
pub enum ServerAddress {
    /// A TCP/IP host and port combination.
    Tcp {
        /// The hostname or IP address where the MongoDB server can be found.
        host: String,

        /// The TCP port that the MongoDB server is listening on.
        ///
        /// The default is 27017.
        port: Option<u16>,
    },
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::Tcp {
            host: "localhost".into(),
            port: None,
        }
    }
}

impl PartialEq for ServerAddress {
    fn eq(&self, other: &Self) -> bool {
        self.host().eq_ignore_ascii_case(other.host()) && self.port() == other.port()
    }
}

impl Hash for ServerAddress {
    fn hash<H>(&self, state: &mut H)
    where
        H: Hasher,
    {
        self.host().to_ascii_lowercase().hash(state);
        self.port().hash(state);
    }
}

impl FromStr for ServerAddress {
    type Err = Error;

    fn from_str(address: &str) -> Result<Self> {
        ServerAddress::parse(address)
    }
}

impl ServerAddress {
    /// Parses an address string into a `ServerAddress`.
    pub fn parse(address: impl AsRef<str>) -> Result<Self> {
        let address = address.as_ref();
        let invalid =
            || Error::invalid_argument(format!("invalid server address: \"{}\"", address));

        // IPv6 literals are bracketed: "[::1]:27017".
        let (hostname, port) = if let Some(rest) = address.strip_prefix('[') {
            let (host, after) = rest.split_once(']').ok_or_else(invalid)?;
            match after {
                "" => (host, None),
                _ => (host, Some(after.strip_prefix(':').ok_or_else(invalid)?)),
            }
        } else {
            let mut parts = address.split(':');
            let host = parts.next().ok_or_else(invalid)?;
            let port = parts.next();
            if parts.next().is_some() {
                return Err(invalid());
            }
            (host, port)
        };

        if hostname.is_empty() {
            return Err(invalid());
        }

        let port = match port {
            Some(part) => {
                let port = u16::from_str(part).map_err(|_| {
                    Error::invalid_argument(format!(
                        "port must be valid 16-bit unsigned integer, instead got: {}",
                        part
                    ))
                })?;
                if port == 0 {
                    return Err(Error::invalid_argument(format!(
                        "invalid server address: \"{}\"; port must be non-zero",
                        address
                    )));
                }
                Some(port)
            }
            None => None,
        };

        Ok(ServerAddress::Tcp {
            host: hostname.to_lowercase(),
            port,
        })
    }

    /// The host portion of this address.
    pub fn host(&self) -> &str {
        match self {
            Self::Tcp { host, .. } => host.as_str(),
        }
    }

    /// The port of this address, defaulting to 27017.
    pub fn port(&self) -> u16 {
        match self {
            Self::Tcp { port, .. } => port.unwrap_or(DEFAULT_PORT),
        }
    }
}

impl Display for ServerAddress {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        if self.host().contains(':') {
            write!(fmt, "[{}]:{}", self.host(), self.port())
        } else {
            write!(fmt, "{}:{}", self.host(), self.port())
        }
    }
}

/// How the client monitors its deployment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, derive_more::Display)]
#[non_exhaustive]
pub enum TopologyMode {
    /// No background tasks; servers are scanned on demand during server selection. A client in
    /// this mode must not be used concurrently.
    #[default]
    #[display("single-threaded")]
    Single,

    /// A background task scans the deployment periodically and wakes waiting selections after
    /// every scan.
    #[display("pooled")]
    Pooled,
}

/// Contains the options that can be used to create a new [`Client`](../struct.Client.html).
#[derive(Clone, Debug, PartialEq, TypedBuilder)]
#[non_exhaustive]
pub struct ClientOptions {
    /// The initial list of seeds that the Client should connect to.
    #[builder(default = vec![ServerAddress::default()])]
    pub hosts: Vec<ServerAddress>,

    /// Whether the client scans on demand or runs a background monitor.
    #[builder(default)]
    pub mode: TopologyMode,

    /// The application name sent to the server as part of the handshake.
    #[builder(default, setter(strip_option))]
    pub app_name: Option<String>,

    /// The connect timeout passed to each underlying TcpStream when attempting to connect to the
    /// server.
    ///
    /// The default value is 10 seconds.
    #[builder(default, setter(strip_option))]
    pub connect_timeout: Option<Duration>,

    /// How long a read or write on an established socket may take. Unbounded by default.
    #[builder(default, setter(strip_option))]
    pub socket_timeout: Option<Duration>,

    /// Specifies whether the Client should directly connect to a single host rather than
    /// autodiscover all servers in the cluster.
    ///
    /// The default value is false, unless exactly one seed is given without a replica set name.
    #[builder(default, setter(strip_option))]
    pub direct_connection: Option<bool>,

    /// The amount of time each monitoring task should wait between performing server checks.
    ///
    /// The default value is 60 seconds for single-threaded clients and 10 seconds for pooled
    /// clients.
    #[builder(default, setter(strip_option))]
    pub heartbeat_freq: Option<Duration>,

    /// The minimum time between two scans of the same server, including scans requested because
    /// an operation found no suitable server.
    ///
    /// The default value is 500 milliseconds.
    #[builder(default, setter(strip_option))]
    pub min_heartbeat_freq: Option<Duration>,

    /// How long a server whose handshake failed is skipped by single-threaded scans.
    ///
    /// The default value is 5 seconds.
    #[builder(default, setter(strip_option))]
    pub cooldown: Option<Duration>,

    /// When running a read operation with a ReadPreference that allows selecting secondaries,
    /// `local_threshold` is used to determine how much longer the average round trip time between
    /// the driver and server is allowed compared to the least round trip time of all the suitable
    /// servers.
    ///
    /// The default value is 15 ms.
    #[builder(default, setter(strip_option))]
    pub local_threshold: Option<Duration>,

    /// The amount of time the Client should attempt to select a server for an operation before
    /// timing out.
    ///
    /// The default value is 30 seconds.
    #[builder(default, setter(strip_option))]
    pub server_selection_timeout: Option<Duration>,

    /// Whether a single-threaded client gives up after one scan instead of retrying until the
    /// selection timeout expires. Ignored by pooled clients.
    ///
    /// The default value is true.
    #[builder(default, setter(strip_option))]
    pub server_selection_try_once: Option<bool>,

    /// The default read preference for operations.
    #[builder(default, setter(strip_option))]
    pub read_preference: Option<ReadPreference>,

    /// The name of the replica set that the Client should connect to.
    #[builder(default, setter(strip_option))]
    pub repl_set_name: Option<String>,

    /// Whether the single seed is a load balancer. Load balancers are never monitored; every
    /// operation is routed to the seed.
    #[builder(default, setter(strip_option))]
    pub load_balanced: Option<bool>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ClientOptions {
    /// Parses a MongoDB connection string into a ClientOptions struct.
    ///
    /// The format of a MongoDB connection string is described
    /// [here](https://www.mongodb.com/docs/manual/reference/connection-string/#connection-string-formats).
    ///
    /// The following options are supported (options are case insensitive):
    ///
    ///   * `appName`: maps to the `app_name` field
    ///   * `connectTimeoutMS`: maps to the `connect_timeout` field
    ///   * `directConnection`: maps to the `direct_connection` field
    ///   * `heartbeatFrequencyMS`: maps to the `heartbeat_freq` field
    ///   * `loadBalanced`: maps to the `load_balanced` field
    ///   * `localThresholdMS`: maps to the `local_threshold` field
    ///   * `maxStalenessSeconds`: maps to the `max_staleness` field of the `read_preference`
    ///   * `readPreference`: maps to the `read_preference` field
    ///   * `readPreferenceTags`: maps to the `tag_sets` field of the `read_preference`
    ///   * `replicaSet`: maps to the `repl_set_name` field
    ///   * `serverSelectionTimeoutMS`: maps to the `server_selection_timeout` field
    ///   * `serverSelectionTryOnce`: maps to the `server_selection_try_once` field
    ///   * `socketTimeoutMS`: maps to the `socket_timeout` field
    pub fn parse(uri: impl AsRef<str>) -> Result<Self> {
        let uri = uri.as_ref();
        let after_scheme = uri.strip_prefix(URI_SCHEME).ok_or_else(|| {
            Error::invalid_argument(format!(
                "connection string must start with \"{}\"",
                URI_SCHEME
            ))
        })?;

        let (host_section, options_section) = match after_scheme.split_once('/') {
            Some((hosts, rest)) => {
                let options = rest.split_once('?').map(|(_, options)| options);
                (hosts, options)
            }
            None => match after_scheme.split_once('?') {
                Some(_) => {
                    return Err(Error::invalid_argument(
                        "connection string must contain a '/' before the options",
                    ))
                }
                None => (after_scheme, None),
            },
        };

        if host_section.contains('@') {
            return Err(Error::invalid_argument(
                "credentials in the connection string are not supported",
            ));
        }

        let hosts = host_section
            .split(',')
            .map(|host| ServerAddress::parse(percent_decode(host, "host must be URL encoded")?))
            .collect::<Result<Vec<_>>>()?;
        if hosts.is_empty() {
            return Err(Error::invalid_argument("connection string contains no hosts"));
        }

        let mut options = ClientOptions {
            hosts,
            ..Default::default()
        };

        let mut parser = OptionsParser::default();
        if let Some(section) = options_section {
            for pair in section.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').ok_or_else(|| {
                    Error::invalid_argument(format!(
                        "connection string options must be key=value pairs, got \"{}\"",
                        pair
                    ))
                })?;
                let value = percent_decode(value, "option values must be URL encoded")?;
                parser.parse_option_pair(&mut options, &key.to_lowercase(), &value)?;
            }
        }
        parser.finish(&mut options)?;

        options.validate()?;
        Ok(options)
    }

    /// Checks that the options are internally consistent.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(Error::invalid_argument("at least one host must be specified"));
        }
        if self.direct_connection == Some(true) && self.hosts.len() > 1 {
            return Err(Error::invalid_argument(
                "cannot specify multiple seeds with directConnection=true",
            ));
        }
        if self.load_balanced == Some(true) {
            if self.hosts.len() > 1 {
                return Err(Error::invalid_argument(
                    "cannot specify multiple seeds with loadBalanced=true",
                ));
            }
            if self.repl_set_name.is_some() {
                return Err(Error::invalid_argument(
                    "cannot specify replicaSet with loadBalanced=true",
                ));
            }
        }
        if let Some(max_staleness) = self
            .read_preference
            .as_ref()
            .and_then(|rp| rp.max_staleness())
        {
            let heartbeat = self.heartbeat_freq();
            if max_staleness < crate::selection_criteria::SMALLEST_MAX_STALENESS
                || max_staleness < heartbeat + Duration::from_secs(10)
            {
                return Err(Error::invalid_argument(format!(
                    "invalid max staleness {:?}: must be at least 90 seconds and at least the \
                     heartbeat frequency plus 10 seconds",
                    max_staleness
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn heartbeat_freq(&self) -> Duration {
        self.heartbeat_freq.unwrap_or(match self.mode {
            TopologyMode::Single => DEFAULT_HEARTBEAT_FREQUENCY_SINGLE,
            TopologyMode::Pooled => DEFAULT_HEARTBEAT_FREQUENCY_POOLED,
        })
    }

    pub(crate) fn min_heartbeat_freq(&self) -> Duration {
        self.min_heartbeat_freq
            .unwrap_or(DEFAULT_MIN_HEARTBEAT_FREQUENCY)
    }

    pub(crate) fn cooldown(&self) -> Duration {
        self.cooldown.unwrap_or(DEFAULT_COOLDOWN)
    }

    pub(crate) fn local_threshold(&self) -> Duration {
        self.local_threshold.unwrap_or(DEFAULT_LOCAL_THRESHOLD)
    }

    pub(crate) fn server_selection_timeout(&self) -> Duration {
        self.server_selection_timeout
            .unwrap_or(DEFAULT_SERVER_SELECTION_TIMEOUT)
    }

    pub(crate) fn server_selection_try_once(&self) -> bool {
        self.mode == TopologyMode::Single && self.server_selection_try_once.unwrap_or(true)
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT)
    }

    /// Whether the deployment is treated as a single server, skipping discovery.
    pub(crate) fn is_direct(&self) -> bool {
        self.direct_connection
            .unwrap_or(self.hosts.len() == 1 && self.repl_set_name.is_none())
    }
}

/// Collects read preference pieces, which may appear in any order in a connection string.
#[derive(Default)]
struct OptionsParser {
    read_preference_mode: Option<String>,
    read_preference_tags: Vec<TagSet>,
    max_staleness: Option<Duration>,
}

impl OptionsParser {
    fn parse_option_pair(
        &mut self,
        options: &mut ClientOptions,
        key: &str,
        value: &str,
    ) -> Result<()> {
        macro_rules! get_bool {
            ($value:expr, $option:expr) => {
                match $value {
                    "true" => true,
                    "false" => false,
                    _ => {
                        return Err(Error::invalid_argument(format!(
                            "connection string `{}` option must be a boolean",
                            $option,
                        )))
                    }
                }
            };
        }

        macro_rules! get_duration {
            ($value:expr, $option:expr) => {
                match u64::from_str_radix($value, 10) {
                    Ok(i) => i,
                    _ => {
                        return Err(Error::invalid_argument(format!(
                            "connection string `{}` option must be a non-negative integer",
                            $option
                        )))
                    }
                }
            };
        }

        match key {
            "appname" => options.app_name = Some(value.to_string()),
            "connecttimeoutms" => {
                options.connect_timeout = Some(Duration::from_millis(get_duration!(value, key)))
            }
            "directconnection" => options.direct_connection = Some(get_bool!(value, key)),
            "heartbeatfrequencyms" => {
                let freq = Duration::from_millis(get_duration!(value, key));
                if freq < DEFAULT_MIN_HEARTBEAT_FREQUENCY {
                    return Err(Error::invalid_argument(format!(
                        "'heartbeatFrequencyMS' must be at least {}ms",
                        DEFAULT_MIN_HEARTBEAT_FREQUENCY.as_millis()
                    )));
                }
                options.heartbeat_freq = Some(freq);
            }
            "loadbalanced" => options.load_balanced = Some(get_bool!(value, key)),
            "localthresholdms" => {
                options.local_threshold = Some(Duration::from_millis(get_duration!(value, key)))
            }
            "maxstalenessseconds" => {
                // -1 means no maximum
                if value != "-1" {
                    self.max_staleness = Some(Duration::from_secs(get_duration!(value, key)));
                }
            }
            "readpreference" => self.read_preference_mode = Some(value.to_string()),
            "readpreferencetags" => {
                let tags: Result<TagSet> = if value.is_empty() {
                    Ok(TagSet::new())
                } else {
                    value
                        .split(',')
                        .map(|tag| {
                            let (k, v) = tag.split_once(':').ok_or_else(|| {
                                Error::invalid_argument(format!(
                                    "'{}' is not a valid read preference tag (which must be of \
                                     the form 'key:value'",
                                    value,
                                ))
                            })?;
                            Ok((k.to_string(), v.to_string()))
                        })
                        .collect()
                };
                self.read_preference_tags.push(tags?);
            }
            "replicaset" => options.repl_set_name = Some(value.to_string()),
            "serverselectiontimeoutms" => {
                options.server_selection_timeout =
                    Some(Duration::from_millis(get_duration!(value, key)))
            }
            "serverselectiontryonce" => {
                options.server_selection_try_once = Some(get_bool!(value, key))
            }
            "sockettimeoutms" => {
                options.socket_timeout = Some(Duration::from_millis(get_duration!(value, key)))
            }
            other => {
                return Err(Error::invalid_argument(format!(
                    "{} is an invalid option",
                    other
                )))
            }
        }

        Ok(())
    }

    fn finish(self, options: &mut ClientOptions) -> Result<()> {
        let mut read_preference = match self.read_preference_mode {
            Some(ref mode) => Some(ReadPreference::from_mode(mode)?),
            None if !self.read_preference_tags.is_empty() || self.max_staleness.is_some() => {
                return Err(Error::invalid_argument(
                    "read preference tags and max staleness require a read preference mode",
                ))
            }
            None => None,
        };
        if let Some(rp) = read_preference.take() {
            let mut rp = rp;
            if !self.read_preference_tags.is_empty() {
                rp = rp.with_tags(self.read_preference_tags)?;
            }
            if let Some(max_staleness) = self.max_staleness {
                rp = rp.with_max_staleness(max_staleness)?;
            }
            read_preference = Some(rp);
        }
        options.read_preference = read_preference;
        Ok(())
    }
}

fn percent_decode(s: &str, err_message: &str) -> Result<String> {
    match percent_encoding::percent_decode_str(s).decode_utf8() {
        Ok(result) => Ok(result.to_string()),
        Err(_) => Err(Error::invalid_argument(err_message)),
    }
}
